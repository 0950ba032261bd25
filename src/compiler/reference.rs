//! In-process reference implementation of the kernel-compiler capability.
//!
//! `ReferenceCompiler` models an accelerator toolchain entirely in host
//! memory: parsing performs real shape/dtype inference over the graph, the
//! "engine blob" is a serde_json definition, and the execution context is a
//! small interpreter whose dispatch is queued on the stream like any other
//! asynchronous operation. Everything the real pipeline does (build, cache
//! round-trip, binding derivation, stream-ordered execution) is exercised
//! without hardware.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compiler::{
    BindingDesc, BindingDirection, BuildDiagnostic, BuildRequest, CompiledEngine,
    ExecutionContext, KernelCompiler, PrecisionMode,
};
use crate::device::{DeviceBuffer, DeviceCaps, Stream};
use crate::engine::OptimizationProfile;
use crate::error::{ForgeResult, GraphForgeError};
use crate::graph::{ComputationGraph, DType, GraphNode, OpKind};
use crate::tensor::Tensor;

/// Engines never expose bindings below this rank; unknown-sentinel outputs
/// are padded with trailing singleton dimensions up to it.
pub const MIN_BINDING_RANK: usize = 2;

const ENGINE_BLOB_VERSION: u32 = 1;

macro_rules! parse_err {
    ($node:expr, $function:expr, $code:expr, $($arg:tt)*) => {
        GraphForgeError::GraphParse {
            node: $node,
            diagnostic: BuildDiagnostic {
                file: file!().to_string(),
                line: line!(),
                function: $function.to_string(),
                code: $code.to_string(),
                description: format!($($arg)*),
            },
        }
    };
}

/// Host-memory reference toolchain
pub struct ReferenceCompiler {
    caps: DeviceCaps,
}

impl ReferenceCompiler {
    pub fn new() -> Self {
        ReferenceCompiler {
            caps: DeviceCaps {
                fast_f16: true,
                fast_i8: true,
            },
        }
    }

    /// Override the advertised device capabilities (tests use this to force
    /// precision-selection paths)
    pub fn with_caps(caps: DeviceCaps) -> Self {
        ReferenceCompiler { caps }
    }

    fn derive(
        &self,
        graph: &ComputationGraph,
        profile: Option<&OptimizationProfile>,
    ) -> ForgeResult<ParsedGraph> {
        const F: &str = "ReferenceCompiler::derive";

        let mut bindings = Vec::new();
        let mut shapes: HashMap<String, (DType, Vec<usize>)> = HashMap::new();
        let mut shape_values: HashMap<String, Vec<i64>> = HashMap::new();

        for (i, spec) in graph.inputs.iter().enumerate() {
            let concrete = match spec.shape.to_concrete() {
                Some(c) => c,
                None => match profile.and_then(|p| p.dims(&spec.name)) {
                    Some(dims) => dims.to_vec(),
                    None => {
                        return Err(parse_err!(
                            i,
                            F,
                            "UNRESOLVED_DYNAMIC_SHAPE",
                            "input '{}' has dynamic shape {} and no profile entry",
                            spec.name,
                            spec.shape
                        ))
                    }
                },
            };
            let pinned_values = if spec.is_shape_tensor {
                match profile.and_then(|p| p.shape_values(&spec.name)) {
                    Some(values) => {
                        shape_values.insert(spec.name.clone(), values.to_vec());
                        Some(values.to_vec())
                    }
                    None => {
                        return Err(parse_err!(
                            i,
                            F,
                            "UNRESOLVED_SHAPE_VALUES",
                            "shape tensor '{}' has no profile values",
                            spec.name
                        ))
                    }
                }
            } else {
                None
            };
            let lowered = spec.dtype.lowered();
            shapes.insert(spec.name.clone(), (lowered, concrete.clone()));
            bindings.push(BindingDesc {
                name: spec.name.clone(),
                direction: BindingDirection::Input,
                dtype: lowered,
                shape: concrete,
                is_shape_tensor: spec.is_shape_tensor,
                pinned_values,
                declared_dtype: spec.dtype,
                from_unknown_sentinel: false,
            });
        }

        let mut workspace_bytes = 0usize;
        for (i, node) in graph.nodes.iter().enumerate() {
            let produced =
                infer_node(i, node, &shapes, &shape_values).map_err(|e| match e {
                    e @ GraphForgeError::GraphParse { .. } => e,
                    other => parse_err!(i, F, "NODE_INFERENCE", "{}", other),
                })?;
            for (name, dtype, shape) in produced {
                workspace_bytes +=
                    shape.iter().product::<usize>().max(1) * dtype.element_size();
                shapes.insert(name, (dtype, shape));
            }
        }

        for spec in &graph.outputs {
            let (dtype, inferred) = shapes.get(&spec.name).cloned().ok_or_else(|| {
                parse_err!(
                    graph.nodes.len(),
                    F,
                    "UNKNOWN_OUTPUT",
                    "declared output '{}' is produced by no node",
                    spec.name
                )
            })?;
            if dtype != spec.dtype.lowered() {
                return Err(parse_err!(
                    graph.nodes.len(),
                    F,
                    "OUTPUT_DTYPE_MISMATCH",
                    "output '{}' declared {} but graph produces {}",
                    spec.name,
                    spec.dtype.lowered(),
                    dtype
                ));
            }
            let from_sentinel = spec.shape.is_unknown_sentinel();
            let mut shape = inferred;
            if from_sentinel {
                while shape.len() < MIN_BINDING_RANK {
                    shape.push(1);
                }
            } else if let Some(declared) = spec.shape.to_concrete() {
                if declared != shape {
                    return Err(parse_err!(
                        graph.nodes.len(),
                        F,
                        "OUTPUT_SHAPE_MISMATCH",
                        "output '{}' declared {} but graph produces {:?}",
                        spec.name,
                        spec.shape,
                        shape
                    ));
                }
            }
            bindings.push(BindingDesc {
                name: spec.name.clone(),
                direction: BindingDirection::Output,
                dtype,
                shape,
                is_shape_tensor: false,
                pinned_values: None,
                declared_dtype: spec.dtype,
                from_unknown_sentinel: from_sentinel,
            });
        }

        Ok(ParsedGraph {
            bindings,
            workspace_bytes,
        })
    }
}

impl Default for ReferenceCompiler {
    fn default() -> Self {
        Self::new()
    }
}

struct ParsedGraph {
    bindings: Vec<BindingDesc>,
    workspace_bytes: usize,
}

/// Shape/dtype inference for one node. Returns (name, dtype, shape) per
/// produced tensor.
fn infer_node(
    index: usize,
    node: &GraphNode,
    shapes: &HashMap<String, (DType, Vec<usize>)>,
    shape_values: &HashMap<String, Vec<i64>>,
) -> ForgeResult<Vec<(String, DType, Vec<usize>)>> {
    const F: &str = "infer_node";

    let arity = match node.op {
        OpKind::Identity | OpKind::Relu | OpKind::Cast { .. } | OpKind::Shape => 1,
        OpKind::Add | OpKind::Mul | OpKind::MatMul | OpKind::Reshape => 2,
    };
    if node.inputs.len() != arity || node.outputs.len() != 1 {
        return Err(parse_err!(
            index,
            F,
            "ARITY",
            "{} takes {} input(s) and 1 output, got {}/{}",
            node.op.name(),
            arity,
            node.inputs.len(),
            node.outputs.len()
        ));
    }

    let resolve = |name: &str| -> ForgeResult<(DType, Vec<usize>)> {
        shapes.get(name).cloned().ok_or_else(|| {
            parse_err!(
                index,
                F,
                "UNKNOWN_TENSOR",
                "node consumes undefined tensor '{}'",
                name
            )
        })
    };

    let out = node.outputs[0].clone();
    let (dtype, shape) = match &node.op {
        OpKind::Identity => resolve(&node.inputs[0])?,
        OpKind::Relu => {
            let (dtype, shape) = resolve(&node.inputs[0])?;
            if dtype != DType::F32 {
                return Err(parse_err!(
                    index,
                    F,
                    "UNSUPPORTED_DTYPE",
                    "relu supports f32 operands, got {}",
                    dtype
                ));
            }
            (dtype, shape)
        }
        OpKind::Cast { to } => {
            let (from, shape) = resolve(&node.inputs[0])?;
            let to = to.lowered();
            let supported = from == to
                || matches!(
                    (from, to),
                    (DType::F32, DType::I32)
                        | (DType::I32, DType::F32)
                        | (DType::F32, DType::F16)
                        | (DType::F16, DType::F32)
                );
            if !supported {
                return Err(parse_err!(
                    index,
                    F,
                    "UNSUPPORTED_DTYPE",
                    "cast {} -> {} is not supported",
                    from,
                    to
                ));
            }
            (to, shape)
        }
        OpKind::Add | OpKind::Mul => {
            let (da, sa) = resolve(&node.inputs[0])?;
            let (db, sb) = resolve(&node.inputs[1])?;
            if da != db {
                return Err(parse_err!(
                    index,
                    F,
                    "ELEMENTWISE_DTYPE",
                    "{} operands have mismatched dtypes {} and {}",
                    node.op.name(),
                    da,
                    db
                ));
            }
            if !matches!(da, DType::F32 | DType::I32) {
                return Err(parse_err!(
                    index,
                    F,
                    "UNSUPPORTED_DTYPE",
                    "{} supports f32 and i32 operands, got {}",
                    node.op.name(),
                    da
                ));
            }
            let count = |s: &[usize]| s.iter().product::<usize>().max(1);
            let shape = if count(&sb) == 1 {
                sa
            } else if count(&sa) == 1 {
                sb
            } else if sa == sb {
                sa
            } else {
                return Err(parse_err!(
                    index,
                    F,
                    "ELEMENTWISE_SHAPE",
                    "{} operands have incompatible shapes {:?} and {:?}",
                    node.op.name(),
                    sa,
                    sb
                ));
            };
            (da, shape)
        }
        OpKind::MatMul => {
            let (da, sa) = resolve(&node.inputs[0])?;
            let (db, sb) = resolve(&node.inputs[1])?;
            if da != DType::F32 || db != DType::F32 {
                return Err(parse_err!(
                    index,
                    F,
                    "UNSUPPORTED_DTYPE",
                    "matmul supports f32 operands, got {} x {}",
                    da,
                    db
                ));
            }
            if sa.len() != 2 || sb.len() != 2 || sa[1] != sb[0] {
                return Err(parse_err!(
                    index,
                    F,
                    "MATMUL_SHAPE",
                    "matmul requires ({}, k) x (k, {}), got {:?} x {:?}",
                    sa.first().copied().unwrap_or(0),
                    sb.get(1).copied().unwrap_or(0),
                    sa,
                    sb
                ));
            }
            (da, vec![sa[0], sb[1]])
        }
        OpKind::Shape => {
            let (_, shape) = resolve(&node.inputs[0])?;
            (DType::I32, vec![shape.len()])
        }
        OpKind::Reshape => {
            let (dtype, data_shape) = resolve(&node.inputs[0])?;
            let target = shape_values.get(&node.inputs[1]).ok_or_else(|| {
                parse_err!(
                    index,
                    F,
                    "RESHAPE_TARGET",
                    "reshape target '{}' is not a profiled shape tensor",
                    node.inputs[1]
                )
            })?;
            let target: Vec<usize> = target
                .iter()
                .map(|&v| {
                    usize::try_from(v).map_err(|_| {
                        parse_err!(
                            index,
                            F,
                            "RESHAPE_TARGET",
                            "reshape target contains negative extent {}",
                            v
                        )
                    })
                })
                .collect::<ForgeResult<_>>()?;
            let before: usize = data_shape.iter().product::<usize>().max(1);
            let after: usize = target.iter().product::<usize>().max(1);
            if before != after {
                return Err(parse_err!(
                    index,
                    F,
                    "RESHAPE_COUNT",
                    "reshape changes element count: {:?} -> {:?}",
                    data_shape,
                    target
                ));
            }
            (dtype, target)
        }
    };
    Ok(vec![(out, dtype, shape)])
}

impl KernelCompiler for ReferenceCompiler {
    fn name(&self) -> &str {
        "reference"
    }

    fn device_caps(&self) -> DeviceCaps {
        self.caps
    }

    fn parse(&self, graph: &ComputationGraph) -> ForgeResult<Vec<BindingDesc>> {
        Ok(self.derive(graph, None)?.bindings)
    }

    fn build(
        &self,
        graph: &ComputationGraph,
        request: BuildRequest<'_>,
    ) -> ForgeResult<Vec<u8>> {
        tracing::debug!(
            "ReferenceCompiler::build: graph '{}', precision {}, workspace {} bytes",
            graph.name,
            request.precision,
            request.max_workspace_bytes
        );
        let parsed = self.derive(graph, request.profile)?;
        if parsed.workspace_bytes > request.max_workspace_bytes {
            return Err(GraphForgeError::BuildFailure(format!(
                "intermediate tensor storage needs {} bytes, workspace budget is {}",
                parsed.workspace_bytes, request.max_workspace_bytes
            )));
        }
        if request.precision == PrecisionMode::Lowest && !self.caps.fast_i8 {
            return Err(GraphForgeError::BuildFailure(
                "device has no fast int8 path".to_string(),
            ));
        }

        let scales = if request.precision == PrecisionMode::Lowest {
            let provider = request.calibration.ok_or_else(|| {
                GraphForgeError::Calibration(
                    "lowest precision requires a calibration provider".to_string(),
                )
            })?;
            Some(calibrate(&parsed.bindings, provider)?)
        } else {
            None
        };

        let def = ReferenceEngineDef {
            version: ENGINE_BLOB_VERSION,
            graph_name: graph.name.clone(),
            precision: request.precision,
            bindings: parsed.bindings,
            nodes: graph.nodes.clone(),
            scales,
        };
        serde_json::to_vec(&def)
            .map_err(|e| GraphForgeError::Internal(format!("engine serialization: {}", e)))
    }

    fn deserialize(&self, blob: &[u8]) -> ForgeResult<Box<dyn CompiledEngine>> {
        let def: ReferenceEngineDef = serde_json::from_slice(blob)
            .map_err(|e| GraphForgeError::EngineCache(format!("corrupt engine blob: {}", e)))?;
        if def.version != ENGINE_BLOB_VERSION {
            return Err(GraphForgeError::EngineCache(format!(
                "engine blob version {} is not supported (expected {})",
                def.version, ENGINE_BLOB_VERSION
            )));
        }
        Ok(Box::new(ReferenceEngine { def: Arc::new(def) }))
    }
}

/// Max-abs quantization scales per input binding
fn calibrate(
    bindings: &[BindingDesc],
    provider: &mut dyn crate::calibration::CalibrationProvider,
) -> ForgeResult<HashMap<String, f32>> {
    let inputs: Vec<&BindingDesc> = bindings
        .iter()
        .filter(|b| b.is_input() && !b.is_shape_tensor)
        .collect();
    let mut maxima: HashMap<String, f32> = HashMap::new();
    let mut batches = 0usize;
    while let Some(batch) = provider.next_batch()? {
        if batch.len() != inputs.len() {
            return Err(GraphForgeError::Calibration(format!(
                "calibration batch has {} tensors, engine has {} data inputs",
                batch.len(),
                inputs.len()
            )));
        }
        for (binding, tensor) in inputs.iter().zip(&batch) {
            if tensor.dtype() == DType::F32 {
                let max = tensor
                    .as_f32()?
                    .iter()
                    .fold(0f32, |acc, v| acc.max(v.abs()));
                let entry = maxima.entry(binding.name.clone()).or_insert(0.0);
                *entry = entry.max(max);
            }
        }
        batches += 1;
    }
    if batches == 0 {
        return Err(GraphForgeError::Calibration(
            "calibration provider yielded no batches".to_string(),
        ));
    }
    tracing::debug!("calibrate: {} batches, {} scaled bindings", batches, maxima.len());
    Ok(maxima
        .into_iter()
        .map(|(name, max)| (name, if max > 0.0 { max / 127.0 } else { 1.0 }))
        .collect())
}

/// The serialized engine definition; this is the cacheable blob
#[derive(Debug, Serialize, Deserialize)]
struct ReferenceEngineDef {
    version: u32,
    graph_name: String,
    precision: PrecisionMode,
    bindings: Vec<BindingDesc>,
    nodes: Vec<GraphNode>,
    scales: Option<HashMap<String, f32>>,
}

struct ReferenceEngine {
    def: Arc<ReferenceEngineDef>,
}

impl CompiledEngine for ReferenceEngine {
    fn bindings(&self) -> &[BindingDesc] {
        &self.def.bindings
    }

    fn precision(&self) -> PrecisionMode {
        self.def.precision
    }

    fn serialize(&self) -> ForgeResult<Vec<u8>> {
        serde_json::to_vec(self.def.as_ref())
            .map_err(|e| GraphForgeError::Internal(format!("engine serialization: {}", e)))
    }

    fn create_context(&self) -> ForgeResult<Box<dyn ExecutionContext>> {
        Ok(Box::new(ReferenceContext {
            def: Arc::clone(&self.def),
            addresses: HashMap::new(),
            shape_values: HashMap::new(),
        }))
    }
}

struct ReferenceContext {
    def: Arc<ReferenceEngineDef>,
    addresses: HashMap<String, DeviceBuffer>,
    shape_values: HashMap<String, Vec<i64>>,
}

impl ExecutionContext for ReferenceContext {
    fn set_tensor_address(&mut self, name: &str, buffer: &DeviceBuffer) -> ForgeResult<()> {
        let binding = self
            .def
            .bindings
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| {
                GraphForgeError::Internal(format!("unknown binding '{}'", name))
            })?;
        if binding.is_shape_tensor {
            return Err(GraphForgeError::Internal(format!(
                "shape tensor '{}' is bound by value, not by address",
                name
            )));
        }
        self.addresses.insert(name.to_string(), buffer.clone());
        Ok(())
    }

    fn set_shape_values(&mut self, name: &str, values: &[i64]) -> ForgeResult<()> {
        self.shape_values.insert(name.to_string(), values.to_vec());
        Ok(())
    }

    fn execute_async(&mut self, stream: &Stream) -> ForgeResult<()> {
        for binding in &self.def.bindings {
            if binding.is_shape_tensor {
                if !self.shape_values.contains_key(&binding.name) {
                    return Err(GraphForgeError::Internal(format!(
                        "shape tensor '{}' has no values bound",
                        binding.name
                    )));
                }
            } else if !self.addresses.contains_key(&binding.name) {
                return Err(GraphForgeError::Internal(format!(
                    "binding '{}' has no address bound",
                    binding.name
                )));
            }
        }
        let def = Arc::clone(&self.def);
        let addresses = self.addresses.clone();
        let shape_values = self.shape_values.clone();
        stream.enqueue(Box::new(move || {
            interpret(&def, &addresses, &shape_values)
        }))
    }
}

/// Run one inference pass over the bound buffers. Executes on the stream,
/// so failures surface at synchronization as `TransferOrCompute`.
fn interpret(
    def: &ReferenceEngineDef,
    addresses: &HashMap<String, DeviceBuffer>,
    shape_values: &HashMap<String, Vec<i64>>,
) -> ForgeResult<()> {
    let mut values: HashMap<String, Tensor> = HashMap::new();

    for binding in def.bindings.iter().filter(|b| b.is_input()) {
        let tensor = if binding.is_shape_tensor {
            let ints = shape_values.get(&binding.name).ok_or_else(|| {
                GraphForgeError::TransferOrCompute(format!(
                    "shape tensor '{}' lost its values",
                    binding.name
                ))
            })?;
            match binding.dtype {
                DType::I32 => {
                    let narrow: Vec<i32> = ints
                        .iter()
                        .map(|&v| {
                            i32::try_from(v).map_err(|_| {
                                GraphForgeError::TransferOrCompute(format!(
                                    "shape value {} out of i32 range",
                                    v
                                ))
                            })
                        })
                        .collect::<ForgeResult<_>>()?;
                    Tensor::from_i32(&[narrow.len()], &narrow)?
                }
                other => {
                    return Err(GraphForgeError::TransferOrCompute(format!(
                        "shape tensor '{}' has non-integer engine dtype {}",
                        binding.name, other
                    )))
                }
            }
        } else {
            let buffer = addresses.get(&binding.name).ok_or_else(|| {
                GraphForgeError::TransferOrCompute(format!(
                    "binding '{}' lost its address",
                    binding.name
                ))
            })?;
            let bytes = buffer.read_bytes()?;
            Tensor::from_bytes(
                binding.dtype,
                binding.shape.clone(),
                bytes[..binding.byte_size()].to_vec(),
            )?
        };
        values.insert(binding.name.clone(), tensor);
    }

    for node in &def.nodes {
        let out = eval_node(node, &values)?;
        values.insert(node.outputs[0].clone(), out);
    }

    for binding in def.bindings.iter().filter(|b| !b.is_input()) {
        let tensor = values.get(&binding.name).ok_or_else(|| {
            GraphForgeError::TransferOrCompute(format!(
                "output '{}' was never produced",
                binding.name
            ))
        })?;
        let buffer = addresses.get(&binding.name).ok_or_else(|| {
            GraphForgeError::TransferOrCompute(format!(
                "binding '{}' lost its address",
                binding.name
            ))
        })?;
        buffer.write_bytes(tensor.bytes())?;
    }
    Ok(())
}

fn eval_node(node: &GraphNode, values: &HashMap<String, Tensor>) -> ForgeResult<Tensor> {
    let arg = |i: usize| -> ForgeResult<&Tensor> {
        node.inputs.get(i).and_then(|n| values.get(n)).ok_or_else(|| {
            GraphForgeError::TransferOrCompute(format!(
                "{} is missing operand {}",
                node.op.name(),
                i
            ))
        })
    };

    match &node.op {
        OpKind::Identity => Ok(arg(0)?.clone()),
        OpKind::Relu => {
            let a = arg(0)?;
            let out: Vec<f32> = a.as_f32()?.into_iter().map(|v| v.max(0.0)).collect();
            Tensor::from_f32(a.shape(), &out)
        }
        OpKind::Cast { to } => cast_tensor(arg(0)?, to.lowered()),
        OpKind::Add => binary_elementwise(arg(0)?, arg(1)?, |a, b| a + b, |a, b| a.wrapping_add(b)),
        OpKind::Mul => binary_elementwise(arg(0)?, arg(1)?, |a, b| a * b, |a, b| a.wrapping_mul(b)),
        OpKind::MatMul => {
            let a = arg(0)?;
            let b = arg(1)?;
            let (m, k) = (a.shape()[0], a.shape()[1]);
            let n = b.shape()[1];
            let av = a.as_f32()?;
            let bv = b.as_f32()?;
            let mut out = vec![0f32; m * n];
            for i in 0..m {
                for j in 0..n {
                    let mut acc = 0f32;
                    for p in 0..k {
                        acc += av[i * k + p] * bv[p * n + j];
                    }
                    out[i * n + j] = acc;
                }
            }
            Tensor::from_f32(&[m, n], &out)
        }
        OpKind::Shape => {
            let dims: Vec<i32> = arg(0)?.shape().iter().map(|&d| d as i32).collect();
            Tensor::from_i32(&[dims.len()], &dims)
        }
        OpKind::Reshape => {
            let data = arg(0)?;
            let target: Vec<usize> = arg(1)?
                .integer_values()?
                .into_iter()
                .map(|v| {
                    usize::try_from(v).map_err(|_| {
                        GraphForgeError::TransferOrCompute(format!(
                            "reshape extent {} is negative",
                            v
                        ))
                    })
                })
                .collect::<ForgeResult<_>>()?;
            data.reshaped(target)
        }
    }
}

fn cast_tensor(t: &Tensor, to: DType) -> ForgeResult<Tensor> {
    if t.dtype() == to {
        return Ok(t.clone());
    }
    match (t.dtype(), to) {
        (DType::F32, DType::I32) => {
            let out: Vec<i32> = t.as_f32()?.into_iter().map(|v| v as i32).collect();
            Tensor::from_i32(t.shape(), &out)
        }
        (DType::I32, DType::F32) => {
            let out: Vec<f32> = t.as_i32()?.into_iter().map(|v| v as f32).collect();
            Tensor::from_f32(t.shape(), &out)
        }
        (DType::F32, DType::F16) => {
            let out: Vec<half::f16> = t
                .as_f32()?
                .into_iter()
                .map(half::f16::from_f32)
                .collect();
            Tensor::from_f16(t.shape(), &out)
        }
        (DType::F16, DType::F32) => {
            let out: Vec<f32> = t.as_f16()?.into_iter().map(f32::from).collect();
            Tensor::from_f32(t.shape(), &out)
        }
        (from, to) => Err(GraphForgeError::TransferOrCompute(format!(
            "unsupported cast {} -> {}",
            from, to
        ))),
    }
}

fn binary_elementwise(
    a: &Tensor,
    b: &Tensor,
    f: fn(f32, f32) -> f32,
    g: fn(i32, i32) -> i32,
) -> ForgeResult<Tensor> {
    let shape = if b.element_count() <= 1 {
        a.shape().to_vec()
    } else {
        b.shape().to_vec()
    };
    match a.dtype() {
        DType::F32 => {
            let av = a.as_f32()?;
            let bv = b.as_f32()?;
            let out = broadcast_zip(&av, &bv, f)?;
            Tensor::from_f32(&shape, &out)
        }
        DType::I32 => {
            let av = a.as_i32()?;
            let bv = b.as_i32()?;
            let out = broadcast_zip(&av, &bv, g)?;
            Tensor::from_i32(&shape, &out)
        }
        other => Err(GraphForgeError::TransferOrCompute(format!(
            "elementwise op unsupported for {}",
            other
        ))),
    }
}

/// Zip with scalar broadcast on either side
fn broadcast_zip<T: Copy>(a: &[T], b: &[T], f: fn(T, T) -> T) -> ForgeResult<Vec<T>> {
    if a.len() == b.len() {
        Ok(a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect())
    } else if b.len() == 1 {
        Ok(a.iter().map(|&x| f(x, b[0])).collect())
    } else if a.len() == 1 {
        Ok(b.iter().map(|&y| f(a[0], y)).collect())
    } else {
        Err(GraphForgeError::TransferOrCompute(format!(
            "elementwise operand lengths {} and {} are incompatible",
            a.len(),
            b.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Shape, TensorSpec};

    fn relu_graph() -> ComputationGraph {
        let mut g = ComputationGraph::new("relu");
        g.add_input(TensorSpec::new("x", DType::F32, Shape::from_static(&[2, 3])));
        g.add_output(TensorSpec::new("y", DType::F32, Shape::from_static(&[2, 3])));
        g.add_node(OpKind::Relu, vec!["x".into()], vec!["y".into()]);
        g
    }

    #[test]
    fn test_parse_derives_bindings() {
        let compiler = ReferenceCompiler::new();
        let bindings = compiler.parse(&relu_graph()).unwrap();
        assert_eq!(bindings.len(), 2);
        assert!(bindings[0].is_input());
        assert_eq!(bindings[0].shape, vec![2, 3]);
        assert_eq!(bindings[1].direction, BindingDirection::Output);
    }

    #[test]
    fn test_parse_reports_node_index() {
        let mut g = relu_graph();
        g.add_node(OpKind::Relu, vec!["missing".into()], vec!["z".into()]);
        let err = ReferenceCompiler::new().parse(&g).unwrap_err();
        match err {
            GraphForgeError::GraphParse { node, diagnostic } => {
                assert_eq!(node, 1);
                assert_eq!(diagnostic.code, "UNKNOWN_TENSOR");
                assert!(!diagnostic.file.is_empty());
                assert!(diagnostic.line > 0);
            }
            other => panic!("expected GraphParse, got {:?}", other),
        }
    }

    #[test]
    fn test_i64_input_lowers_to_i32_binding() {
        let mut g = ComputationGraph::new("lower");
        g.add_input(TensorSpec::new("x", DType::I64, Shape::from_static(&[4])));
        g.add_output(TensorSpec::new("y", DType::I64, Shape::from_static(&[4])));
        g.add_node(OpKind::Identity, vec!["x".into()], vec!["y".into()]);
        let bindings = ReferenceCompiler::new().parse(&g).unwrap();
        assert_eq!(bindings[0].dtype, DType::I32);
        assert_eq!(bindings[0].declared_dtype, DType::I64);
        assert_eq!(bindings[1].dtype, DType::I32);
    }

    #[test]
    fn test_sentinel_output_padded_to_min_rank() {
        let mut g = ComputationGraph::new("sentinel");
        g.add_input(TensorSpec::new("x", DType::F32, Shape::from_static(&[5])));
        g.add_output(TensorSpec::new("y", DType::F32, Shape::unknown()));
        g.add_node(OpKind::Identity, vec!["x".into()], vec!["y".into()]);
        let bindings = ReferenceCompiler::new().parse(&g).unwrap();
        assert_eq!(bindings[1].shape, vec![5, 1]);
        assert!(bindings[1].from_unknown_sentinel);
    }

    #[test]
    fn test_unsupported_op_dtype_rejected_at_parse() {
        // i64 lowers to i32, which relu cannot execute
        let mut g = ComputationGraph::new("int_relu");
        g.add_input(TensorSpec::new("x", DType::I64, Shape::from_static(&[4])));
        g.add_output(TensorSpec::new("y", DType::I64, Shape::from_static(&[4])));
        g.add_node(OpKind::Relu, vec!["x".into()], vec!["y".into()]);
        let err = ReferenceCompiler::new().parse(&g).unwrap_err();
        match err {
            GraphForgeError::GraphParse { node, diagnostic } => {
                assert_eq!(node, 0);
                assert_eq!(diagnostic.code, "UNSUPPORTED_DTYPE");
            }
            other => panic!("expected GraphParse, got {:?}", other),
        }

        let mut g = ComputationGraph::new("int_matmul");
        g.add_input(TensorSpec::new("a", DType::I32, Shape::from_static(&[2, 3])));
        g.add_input(TensorSpec::new("b", DType::I32, Shape::from_static(&[3, 2])));
        g.add_output(TensorSpec::new("y", DType::I32, Shape::from_static(&[2, 2])));
        g.add_node(
            OpKind::MatMul,
            vec!["a".into(), "b".into()],
            vec!["y".into()],
        );
        let err = ReferenceCompiler::new().parse(&g).unwrap_err();
        assert!(matches!(err, GraphForgeError::GraphParse { .. }));
    }

    #[test]
    fn test_shape_tensor_binding_records_pinned_values() {
        let mut g = ComputationGraph::new("reshape");
        g.add_input(TensorSpec::new("x", DType::F32, Shape::from_static(&[2, 6])));
        g.add_input(TensorSpec::shape_tensor(
            "target",
            DType::I64,
            Shape::from_static(&[2]),
        ));
        g.add_output(TensorSpec::new("y", DType::F32, Shape::unknown()));
        g.add_node(
            OpKind::Reshape,
            vec!["x".into(), "target".into()],
            vec!["y".into()],
        );
        let mut profile = OptimizationProfile::new();
        profile.pin_shape_values("target", &[3, 4]);
        let parsed = ReferenceCompiler::new().derive(&g, Some(&profile)).unwrap();
        let target = parsed
            .bindings
            .iter()
            .find(|b| b.name == "target")
            .unwrap();
        assert_eq!(target.pinned_values.as_deref(), Some(&[3i64, 4][..]));
    }

    #[test]
    fn test_workspace_budget_enforced() {
        let compiler = ReferenceCompiler::new();
        let g = relu_graph();
        let err = compiler
            .build(
                &g,
                BuildRequest {
                    precision: PrecisionMode::Full,
                    max_workspace_bytes: 4,
                    profile: None,
                    calibration: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, GraphForgeError::BuildFailure(_)));

        assert!(compiler
            .build(
                &g,
                BuildRequest {
                    precision: PrecisionMode::Full,
                    max_workspace_bytes: 1 << 20,
                    profile: None,
                    calibration: None,
                },
            )
            .is_ok());
    }

    #[test]
    fn test_blob_roundtrip_preserves_bindings() {
        let compiler = ReferenceCompiler::new();
        let blob = compiler
            .build(
                &relu_graph(),
                BuildRequest {
                    precision: PrecisionMode::Reduced,
                    max_workspace_bytes: 1 << 20,
                    profile: None,
                    calibration: None,
                },
            )
            .unwrap();
        let engine = compiler.deserialize(&blob).unwrap();
        assert_eq!(engine.precision(), PrecisionMode::Reduced);
        assert_eq!(engine.bindings().len(), 2);
        assert_eq!(engine.serialize().unwrap(), blob);
    }

    #[test]
    fn test_corrupt_blob_rejected() {
        let err = ReferenceCompiler::new()
            .deserialize(b"not json")
            .err()
            .expect("corrupt blob must be rejected");
        assert!(matches!(err, GraphForgeError::EngineCache(_)));
    }

    #[test]
    fn test_interpreter_through_context() {
        let compiler = ReferenceCompiler::new();
        let blob = compiler
            .build(
                &relu_graph(),
                BuildRequest {
                    precision: PrecisionMode::Full,
                    max_workspace_bytes: 1 << 20,
                    profile: None,
                    calibration: None,
                },
            )
            .unwrap();
        let engine = compiler.deserialize(&blob).unwrap();
        let mut ctx = engine.create_context().unwrap();

        let input = Tensor::from_f32(&[2, 3], &[-1.0, 2.0, -3.0, 4.0, -5.0, 6.0]).unwrap();
        let x = DeviceBuffer::alloc(input.byte_size()).unwrap();
        x.write_bytes(input.bytes()).unwrap();
        let y = DeviceBuffer::alloc(input.byte_size()).unwrap();
        ctx.set_tensor_address("x", &x).unwrap();
        ctx.set_tensor_address("y", &y).unwrap();

        let stream = Stream::new();
        ctx.execute_async(&stream).unwrap();
        stream.synchronize().unwrap();

        let out = Tensor::from_bytes(DType::F32, vec![2, 3], y.read_bytes().unwrap()).unwrap();
        assert_eq!(out.as_f32().unwrap(), vec![0.0, 2.0, 0.0, 4.0, 0.0, 6.0]);
    }

    #[test]
    fn test_calibration_scales_recorded() {
        let compiler = ReferenceCompiler::new();
        let batches = vec![vec![
            Tensor::from_f32(&[2, 3], &[1.0, -2.0, 3.0, 0.5, -6.35, 2.0]).unwrap(),
        ]];
        let mut cal = crate::calibration::InMemoryCalibrator::new(batches).unwrap();
        let blob = compiler
            .build(
                &relu_graph(),
                BuildRequest {
                    precision: PrecisionMode::Lowest,
                    max_workspace_bytes: 1 << 20,
                    profile: None,
                    calibration: Some(&mut cal),
                },
            )
            .unwrap();
        let def: ReferenceEngineDef = serde_json::from_slice(&blob).unwrap();
        let scales = def.scales.unwrap();
        assert!((scales["x"] - 6.35 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn test_lowest_without_calibrator_fails() {
        let err = ReferenceCompiler::new()
            .build(
                &relu_graph(),
                BuildRequest {
                    precision: PrecisionMode::Lowest,
                    max_workspace_bytes: 1 << 20,
                    profile: None,
                    calibration: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, GraphForgeError::Calibration(_)));
    }
}
