//! The execution runtime: one engine, one context, one stream, and a fixed
//! set of buffer pairs for the engine's whole lifetime.
//!
//! A `run()` call validates every input before touching any buffer, queues
//! all transfers and the compute dispatch on the stream in submission
//! order, and blocks exactly once at the final synchronization. Failures
//! surfaced there poison the runtime: queued work may have partially
//! executed, so the engine must be rebuilt or reloaded.
//!
//! Graphs with dynamic inputs are compiled lazily: the first `run()` call
//! negotiates an optimization profile from the shapes and shape values it
//! observes, then builds the engine pinned to exactly those.

use std::path::PathBuf;
use std::sync::Arc;

use crate::calibration::CalibrationProvider;
use crate::compiler::{
    BindingDesc, BuildRequest, CompiledEngine, ExecutionContext, KernelCompiler, PrecisionMode,
};
use crate::device::Stream;
use crate::engine::buffers::BufferPair;
use crate::engine::builder::write_artifact;
use crate::engine::outputs::{normalize_device, normalize_host, OutputValue, Outputs};
use crate::engine::profile::OptimizationProfile;
use crate::engine::validate;
use crate::error::{ForgeResult, GraphForgeError};
use crate::graph::{ComputationGraph, DType};
use crate::tensor::{DeviceTensor, Tensor};

/// How tensors move between the caller and the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Host tensors staged through pinned buffers; outputs come back as
    /// host tensors, widened toward 64-bit declarations
    Staged,
    /// Device tensors copied device-to-device; outputs are zero-copy
    /// device views, never widened
    Peer,
}

/// One input argument to a run call
#[derive(Debug, Clone, Copy)]
pub enum TensorArg<'a> {
    Host(&'a Tensor),
    Device(&'a DeviceTensor),
}

impl<'a> TensorArg<'a> {
    pub fn shape(&self) -> &[usize] {
        match self {
            TensorArg::Host(t) => t.shape(),
            TensorArg::Device(d) => d.shape(),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorArg::Host(t) => t.dtype(),
            TensorArg::Device(d) => d.dtype(),
        }
    }

    /// Literal integer values, for shape-valued inputs. Device tensors are
    /// downloaded; shape tensors are tiny.
    fn integer_values(&self) -> ForgeResult<Vec<i64>> {
        match self {
            TensorArg::Host(t) => t.integer_values(),
            TensorArg::Device(d) => d.to_host()?.integer_values(),
        }
    }
}

/// Build state waiting on the first run's shapes
struct Deferred {
    graph: ComputationGraph,
    precision: PrecisionMode,
    max_workspace_bytes: usize,
    calibration: Option<Box<dyn CalibrationProvider>>,
    artifact: Option<PathBuf>,
}

struct Ready {
    engine: Box<dyn CompiledEngine>,
    context: Box<dyn ExecutionContext>,
    /// One pair per binding, `None` for shape tensors (bound by value)
    pairs: Vec<Option<BufferPair>>,
    input_count: usize,
}

impl Ready {
    fn new(engine: Box<dyn CompiledEngine>) -> ForgeResult<Self> {
        let mut context = engine.create_context()?;
        let mut pairs = Vec::with_capacity(engine.bindings().len());
        let mut input_count = 0;
        for binding in engine.bindings() {
            if binding.is_input() {
                input_count += 1;
            }
            if binding.is_shape_tensor {
                pairs.push(None);
            } else {
                let pair = BufferPair::new(binding)?;
                // Addresses are fixed for the engine's lifetime
                context.set_tensor_address(&binding.name, pair.device())?;
                pairs.push(Some(pair));
            }
        }
        Ok(Ready {
            engine,
            context,
            pairs,
            input_count,
        })
    }

    fn binding(&self, index: usize) -> &BindingDesc {
        &self.engine.bindings()[index]
    }
}

enum State {
    Deferred(Deferred),
    Ready(Ready),
}

/// Staged source bytes: the caller's tensor, or its narrowed replacement
enum StagedSource<'a> {
    Borrowed(&'a Tensor),
    Owned(Tensor),
}

impl StagedSource<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            StagedSource::Borrowed(t) => t.bytes(),
            StagedSource::Owned(t) => t.bytes(),
        }
    }
}

/// Validated transfer plan for one input binding
enum Plan<'a> {
    ShapeValues(Vec<i64>),
    Stage(StagedSource<'a>),
    Peer(&'a DeviceTensor),
}

/// Drives repeated inference passes against one compiled engine
pub struct ExecutionRuntime {
    compiler: Arc<dyn KernelCompiler>,
    stream: Stream,
    state: State,
    poisoned: bool,
}

impl std::fmt::Debug for ExecutionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRuntime")
            .field("built", &self.is_built())
            .field("precision", &self.precision())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl ExecutionRuntime {
    pub(crate) fn from_engine(
        compiler: Arc<dyn KernelCompiler>,
        engine: Box<dyn CompiledEngine>,
    ) -> ForgeResult<Self> {
        Ok(ExecutionRuntime {
            compiler,
            stream: Stream::new(),
            state: State::Ready(Ready::new(engine)?),
            poisoned: false,
        })
    }

    pub(crate) fn deferred(
        compiler: Arc<dyn KernelCompiler>,
        graph: ComputationGraph,
        precision: PrecisionMode,
        max_workspace_bytes: usize,
        calibration: Option<Box<dyn CalibrationProvider>>,
        artifact: Option<PathBuf>,
    ) -> Self {
        ExecutionRuntime {
            compiler,
            stream: Stream::new(),
            state: State::Deferred(Deferred {
                graph,
                precision,
                max_workspace_bytes,
                calibration,
                artifact,
            }),
            poisoned: false,
        }
    }

    /// Whether the engine has been compiled yet (dynamic graphs compile on
    /// the first run)
    pub fn is_built(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Poisoned runtimes refuse further calls; rebuild or reload instead
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// The engine's binding table, once built
    pub fn bindings(&self) -> Option<&[BindingDesc]> {
        match &self.state {
            State::Ready(r) => Some(r.engine.bindings()),
            State::Deferred(_) => None,
        }
    }

    pub fn precision(&self) -> PrecisionMode {
        match &self.state {
            State::Ready(r) => r.engine.precision(),
            State::Deferred(d) => d.precision,
        }
    }

    /// Serialize the engine to its cacheable blob form
    pub fn serialize_engine(&self) -> ForgeResult<Vec<u8>> {
        match &self.state {
            State::Ready(r) => r.engine.serialize(),
            State::Deferred(_) => Err(GraphForgeError::InvalidConfiguration(
                "engine not built yet; run() once first".to_string(),
            )),
        }
    }

    /// Run one inference pass with positionally ordered inputs.
    ///
    /// Extra trailing inputs beyond the engine's bindings are tolerated
    /// (graph exporters commonly emit operands consumed entirely by shape
    /// inference); too few are an error.
    pub fn run(&mut self, inputs: &[TensorArg<'_>], mode: TransferMode) -> ForgeResult<Outputs> {
        self.check_usable()?;
        self.ensure_built(inputs)?;

        let ready = match &mut self.state {
            State::Ready(r) => r,
            State::Deferred(_) => unreachable!("ensure_built leaves state Ready"),
        };

        if inputs.len() < ready.input_count {
            return Err(GraphForgeError::MissingInputs {
                expected: ready.input_count,
                got: inputs.len(),
            });
        }

        // Validate everything before any transfer is queued; rejected calls
        // leave the runtime fully usable.
        let mut plans = Vec::with_capacity(ready.input_count);
        for i in 0..ready.input_count {
            let binding = ready.binding(i);
            let arg = inputs[i];
            if binding.is_shape_tensor {
                validate::check_shape(i, binding, arg.shape())?;
                if !matches!(arg.dtype(), DType::I32 | DType::I64) {
                    return Err(GraphForgeError::DtypeMismatch {
                        input: i,
                        expected: binding.dtype,
                        got: arg.dtype(),
                    });
                }
                let values = arg.integer_values()?;
                validate::check_shape_values(i, binding, &values)?;
                plans.push(Plan::ShapeValues(values));
                continue;
            }
            validate::check_shape(i, binding, arg.shape())?;
            match mode {
                TransferMode::Staged => {
                    let tensor = match arg {
                        TensorArg::Host(t) => t,
                        TensorArg::Device(_) => {
                            return Err(GraphForgeError::InvalidConfiguration(format!(
                                "staged mode takes host tensors, input {} is device-resident",
                                i
                            )))
                        }
                    };
                    let plan = match validate::check_dtype_staged(i, binding, tensor)? {
                        Some(narrowed) => Plan::Stage(StagedSource::Owned(narrowed)),
                        None => Plan::Stage(StagedSource::Borrowed(tensor)),
                    };
                    plans.push(plan);
                }
                TransferMode::Peer => {
                    let tensor = match arg {
                        TensorArg::Device(d) => d,
                        TensorArg::Host(_) => {
                            return Err(GraphForgeError::InvalidConfiguration(format!(
                                "peer mode takes device tensors, input {} is host-resident",
                                i
                            )))
                        }
                    };
                    validate::check_dtype_peer(i, binding, tensor.dtype())?;
                    plans.push(Plan::Peer(tensor));
                }
            }
        }

        let result = submit(ready, &self.stream, plans, mode);
        if result.is_err() {
            // Transfers or compute may have partially executed
            self.poisoned = true;
        }
        result
    }

    /// Run with inputs matched to bindings by name instead of position
    pub fn run_named(
        &mut self,
        inputs: &[(&str, TensorArg<'_>)],
        mode: TransferMode,
    ) -> ForgeResult<Outputs> {
        let names: Vec<String> = match &self.state {
            State::Ready(r) => r
                .engine
                .bindings()
                .iter()
                .filter(|b| b.is_input())
                .map(|b| b.name.clone())
                .collect(),
            State::Deferred(d) => d.graph.inputs.iter().map(|s| s.name.clone()).collect(),
        };
        let mut ordered = Vec::with_capacity(names.len());
        for name in &names {
            let arg = inputs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, a)| *a)
                .ok_or_else(|| {
                    GraphForgeError::InvalidConfiguration(format!(
                        "no value supplied for input '{}'",
                        name
                    ))
                })?;
            ordered.push(arg);
        }
        self.run(&ordered, mode)
    }

    /// Dispatch compute against whatever is already in the device buffers;
    /// no input validation, no transfers. For hot-buffer reuse after a
    /// full `run()` has populated the bindings.
    pub fn run_no_transfer(&mut self) -> ForgeResult<()> {
        self.check_usable()?;
        let ready = match &mut self.state {
            State::Ready(r) => r,
            State::Deferred(_) => {
                return Err(GraphForgeError::InvalidConfiguration(
                    "engine not built yet; run() once first".to_string(),
                ))
            }
        };
        let result = ready
            .context
            .execute_async(&self.stream)
            .and_then(|_| self.stream.synchronize());
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn check_usable(&self) -> ForgeResult<()> {
        if self.poisoned {
            return Err(GraphForgeError::TransferOrCompute(
                "runtime was poisoned by an earlier failure; rebuild the engine".to_string(),
            ));
        }
        Ok(())
    }

    /// Compile a deferred dynamic graph using a profile negotiated from the
    /// observed inputs: min = opt = max, pinned to exactly these shapes.
    fn ensure_built(&mut self, inputs: &[TensorArg<'_>]) -> ForgeResult<()> {
        let deferred = match &mut self.state {
            State::Ready(_) => return Ok(()),
            State::Deferred(d) => d,
        };
        if inputs.len() < deferred.graph.inputs.len() {
            return Err(GraphForgeError::MissingInputs {
                expected: deferred.graph.inputs.len(),
                got: inputs.len(),
            });
        }

        let mut profile = OptimizationProfile::new();
        for (spec, arg) in deferred.graph.inputs.iter().zip(inputs) {
            if spec.is_shape_tensor {
                profile.pin_shape_values(&spec.name, &arg.integer_values()?);
            } else if spec.shape.is_dynamic() {
                profile.pin_dims(&spec.name, arg.shape());
            }
        }
        tracing::debug!(
            "ExecutionRuntime: building deferred engine for '{}' from first-run shapes",
            deferred.graph.name
        );

        let blob = self.compiler.build(
            &deferred.graph,
            BuildRequest {
                precision: deferred.precision,
                max_workspace_bytes: deferred.max_workspace_bytes,
                profile: Some(&profile),
                calibration: deferred.calibration.as_deref_mut().map(|c| c as _),
            },
        )?;
        if let Some(path) = deferred.artifact.as_deref() {
            write_artifact(path, &blob)?;
        }
        let engine = self.compiler.deserialize(&blob)?;
        self.state = State::Ready(Ready::new(engine)?);
        Ok(())
    }
}

/// Queue all transfers and the compute dispatch, synchronize once, then
/// normalize the outputs. Any error here may leave buffers half-written;
/// the caller poisons the runtime.
fn submit(
    ready: &mut Ready,
    stream: &Stream,
    plans: Vec<Plan<'_>>,
    mode: TransferMode,
) -> ForgeResult<Outputs> {
    for (i, plan) in plans.iter().enumerate() {
        match plan {
            Plan::ShapeValues(values) => {
                let name = ready.binding(i).name.clone();
                ready.context.set_shape_values(&name, values)?;
            }
            Plan::Stage(source) => {
                let pair = ready.pairs[i].as_mut().ok_or_else(|| {
                    GraphForgeError::Internal(format!("input {} has no buffer pair", i))
                })?;
                let len = source.bytes().len();
                let pinned = pair.pinned()?.clone();
                pinned.write(source.bytes())?;
                pair.device().copy_from_pinned_async(&pinned, len, stream)?;
            }
            Plan::Peer(tensor) => {
                let pair = ready.pairs[i].as_ref().ok_or_else(|| {
                    GraphForgeError::Internal(format!("input {} has no buffer pair", i))
                })?;
                pair.device()
                    .copy_from_device_async(tensor.buffer(), tensor.byte_size(), stream)?;
            }
        }
    }

    ready.context.execute_async(stream)?;

    // Queue output retrieval before the single synchronization point
    let output_range = ready.input_count..ready.engine.bindings().len();
    let mut staged_outputs = Vec::new();
    if mode == TransferMode::Staged {
        for i in output_range.clone() {
            let pair = ready.pairs[i].as_mut().ok_or_else(|| {
                GraphForgeError::Internal(format!("output {} has no buffer pair", i))
            })?;
            let len = pair.byte_size();
            let pinned = pair.pinned()?.clone();
            pair.device().copy_to_pinned_async(&pinned, len, stream)?;
            staged_outputs.push(pinned);
        }
    }

    stream.synchronize()?;

    let mut outputs = Outputs::default();
    for (slot, i) in output_range.enumerate() {
        let binding = ready.engine.bindings()[i].clone();
        let value = match mode {
            TransferMode::Staged => {
                let bytes = staged_outputs[slot].read()?;
                let raw = Tensor::from_bytes(
                    binding.dtype,
                    binding.shape.clone(),
                    bytes[..binding.byte_size()].to_vec(),
                )?;
                OutputValue::Host(normalize_host(&binding, raw)?)
            }
            TransferMode::Peer => {
                let pair = ready.pairs[i].as_ref().ok_or_else(|| {
                    GraphForgeError::Internal(format!("output {} has no buffer pair", i))
                })?;
                let view = DeviceTensor::wrap(
                    binding.dtype,
                    binding.shape.clone(),
                    pair.device().clone(),
                )?;
                OutputValue::Device(normalize_device(&binding, view)?)
            }
        };
        outputs.push(binding.name, value);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::InMemoryCalibrator;
    use crate::compiler::{BindingDirection, ReferenceCompiler};
    use crate::device::{Device, DeviceCaps};
    use crate::engine::builder::{BuildConfig, EngineBuilder};
    use crate::graph::{OpKind, Shape, TensorSpec};

    fn relu_graph() -> ComputationGraph {
        let mut g = ComputationGraph::new("relu");
        g.add_input(TensorSpec::new("x", DType::F32, Shape::from_static(&[2, 2])));
        g.add_output(TensorSpec::new("y", DType::F32, Shape::from_static(&[2, 2])));
        g.add_node(OpKind::Relu, vec!["x".into()], vec!["y".into()]);
        g
    }

    fn runtime_for(graph: &ComputationGraph) -> ExecutionRuntime {
        let compiler: Arc<dyn KernelCompiler> = Arc::new(ReferenceCompiler::new());
        EngineBuilder::new(
            compiler,
            &Device::parse("accel:0").unwrap(),
            BuildConfig::default(),
        )
        .unwrap()
        .build(graph)
        .unwrap()
    }

    #[test]
    fn test_staged_run() {
        let mut rt = runtime_for(&relu_graph());
        let x = Tensor::from_f32(&[2, 2], &[-1.0, 2.0, -3.0, 4.0]).unwrap();
        let out = rt
            .run(&[TensorArg::Host(&x)], TransferMode::Staged)
            .unwrap();
        let y = out.get("y").unwrap().to_host().unwrap();
        assert_eq!(y.as_f32().unwrap(), vec![0.0, 2.0, 0.0, 4.0]);
    }

    #[test]
    fn test_missing_inputs() {
        let mut rt = runtime_for(&relu_graph());
        let err = rt.run(&[], TransferMode::Staged).unwrap_err();
        assert!(matches!(
            err,
            GraphForgeError::MissingInputs {
                expected: 1,
                got: 0
            }
        ));
        assert!(!rt.is_poisoned());
    }

    #[test]
    fn test_extra_inputs_tolerated() {
        let mut rt = runtime_for(&relu_graph());
        let x = Tensor::from_f32(&[2, 2], &[1.0; 4]).unwrap();
        let extra = Tensor::scalar_i64(0);
        let out = rt
            .run(
                &[TensorArg::Host(&x), TensorArg::Host(&extra)],
                TransferMode::Staged,
            )
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_shape_mismatch_leaves_runtime_usable() {
        let mut rt = runtime_for(&relu_graph());
        let bad = Tensor::from_f32(&[4], &[1.0; 4]).unwrap();
        let err = rt.run(&[TensorArg::Host(&bad)], TransferMode::Staged).unwrap_err();
        assert!(matches!(err, GraphForgeError::ShapeMismatch { .. }));
        assert!(!rt.is_poisoned());

        let good = Tensor::from_f32(&[2, 2], &[1.0; 4]).unwrap();
        assert!(rt.run(&[TensorArg::Host(&good)], TransferMode::Staged).is_ok());
    }

    #[test]
    fn test_peer_mode_requires_device_tensors() {
        let mut rt = runtime_for(&relu_graph());
        let x = Tensor::from_f32(&[2, 2], &[1.0; 4]).unwrap();
        let err = rt.run(&[TensorArg::Host(&x)], TransferMode::Peer).unwrap_err();
        assert!(matches!(err, GraphForgeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_run_named_reorders() {
        let mut g = ComputationGraph::new("add");
        g.add_input(TensorSpec::new("a", DType::F32, Shape::from_static(&[2])));
        g.add_input(TensorSpec::new("b", DType::F32, Shape::from_static(&[2])));
        g.add_output(TensorSpec::new("sum", DType::F32, Shape::from_static(&[2])));
        g.add_node(OpKind::Add, vec!["a".into(), "b".into()], vec!["sum".into()]);

        let mut rt = runtime_for(&g);
        let a = Tensor::from_f32(&[2], &[1.0, 2.0]).unwrap();
        let b = Tensor::from_f32(&[2], &[10.0, 20.0]).unwrap();
        let out = rt
            .run_named(
                &[("b", TensorArg::Host(&b)), ("a", TensorArg::Host(&a))],
                TransferMode::Staged,
            )
            .unwrap();
        assert_eq!(
            out[0].to_host().unwrap().as_f32().unwrap(),
            vec![11.0, 22.0]
        );

        let err = rt
            .run_named(&[("a", TensorArg::Host(&a))], TransferMode::Staged)
            .unwrap_err();
        assert!(matches!(err, GraphForgeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_run_no_transfer_reuses_buffers() {
        let mut rt = runtime_for(&relu_graph());
        let x = Tensor::from_f32(&[2, 2], &[-1.0, 2.0, -3.0, 4.0]).unwrap();
        rt.run(&[TensorArg::Host(&x)], TransferMode::Staged).unwrap();
        // Compute again against the buffers as they stand
        rt.run_no_transfer().unwrap();
    }

    /// Compiler stub whose compute dispatch always fails on the stream, so
    /// the error surfaces at synchronization like a real kernel fault.
    struct FaultingCompiler;

    impl KernelCompiler for FaultingCompiler {
        fn name(&self) -> &str {
            "faulting"
        }

        fn device_caps(&self) -> DeviceCaps {
            DeviceCaps {
                fast_f16: true,
                fast_i8: true,
            }
        }

        fn parse(&self, _graph: &ComputationGraph) -> ForgeResult<Vec<BindingDesc>> {
            Ok(Vec::new())
        }

        fn build(
            &self,
            _graph: &ComputationGraph,
            _request: BuildRequest<'_>,
        ) -> ForgeResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn deserialize(&self, _blob: &[u8]) -> ForgeResult<Box<dyn CompiledEngine>> {
            Ok(Box::new(FaultingEngine {
                bindings: fault_bindings(),
            }))
        }
    }

    struct FaultingEngine {
        bindings: Vec<BindingDesc>,
    }

    impl CompiledEngine for FaultingEngine {
        fn bindings(&self) -> &[BindingDesc] {
            &self.bindings
        }

        fn precision(&self) -> PrecisionMode {
            PrecisionMode::Full
        }

        fn serialize(&self) -> ForgeResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn create_context(&self) -> ForgeResult<Box<dyn ExecutionContext>> {
            Ok(Box::new(FaultingContext))
        }
    }

    struct FaultingContext;

    impl ExecutionContext for FaultingContext {
        fn set_tensor_address(
            &mut self,
            _name: &str,
            _buffer: &crate::device::DeviceBuffer,
        ) -> ForgeResult<()> {
            Ok(())
        }

        fn set_shape_values(&mut self, _name: &str, _values: &[i64]) -> ForgeResult<()> {
            Ok(())
        }

        fn execute_async(&mut self, stream: &Stream) -> ForgeResult<()> {
            stream.enqueue(Box::new(|| {
                Err(GraphForgeError::TransferOrCompute(
                    "kernel fault injected".to_string(),
                ))
            }))
        }
    }

    fn fault_bindings() -> Vec<BindingDesc> {
        let binding = |name: &str, direction| BindingDesc {
            name: name.to_string(),
            direction,
            dtype: DType::F32,
            shape: vec![1],
            is_shape_tensor: false,
            pinned_values: None,
            declared_dtype: DType::F32,
            from_unknown_sentinel: false,
        };
        vec![
            binding("x", BindingDirection::Input),
            binding("y", BindingDirection::Output),
        ]
    }

    #[test]
    fn test_compute_failure_poisons_runtime() {
        let engine: Box<dyn CompiledEngine> = Box::new(FaultingEngine {
            bindings: fault_bindings(),
        });
        let mut rt = ExecutionRuntime::from_engine(Arc::new(FaultingCompiler), engine).unwrap();
        let x = Tensor::from_f32(&[1], &[1.0]).unwrap();

        let err = rt
            .run(&[TensorArg::Host(&x)], TransferMode::Staged)
            .unwrap_err();
        assert!(matches!(err, GraphForgeError::TransferOrCompute(_)));
        assert!(!err.leaves_runtime_usable());
        assert!(rt.is_poisoned());

        // Every further call is refused before touching the stream
        let refused = rt
            .run(&[TensorArg::Host(&x)], TransferMode::Staged)
            .unwrap_err();
        assert!(matches!(refused, GraphForgeError::TransferOrCompute(_)));
        assert!(rt.run_no_transfer().is_err());
    }

    #[test]
    fn test_deferred_build_with_borrowed_calibrator() {
        let mut g = ComputationGraph::new("dyn_int8");
        g.add_input(TensorSpec::new(
            "x",
            DType::F32,
            Shape(vec![crate::graph::Dim::Static(1), crate::graph::Dim::Dynamic]),
        ));
        g.add_output(TensorSpec::new("y", DType::F32, Shape::unknown()));
        g.add_node(OpKind::Identity, vec!["x".into()], vec!["y".into()]);

        let compiler: Arc<dyn KernelCompiler> = Arc::new(ReferenceCompiler::new());
        let calibrator = InMemoryCalibrator::new(vec![vec![
            Tensor::from_f32(&[1, 3], &[1.0, -2.0, 3.0]).unwrap(),
        ]])
        .unwrap();
        let mut rt = EngineBuilder::new(
            compiler,
            &Device::parse("accel:0").unwrap(),
            BuildConfig::default().with_lowest_precision(true),
        )
        .unwrap()
        .with_calibrator(Box::new(calibrator))
        .build(&g)
        .unwrap();
        assert!(!rt.is_built());

        // First run drives calibration through the deferred build
        let x = Tensor::from_f32(&[1, 3], &[-1.0, 0.5, 2.0]).unwrap();
        rt.run(&[TensorArg::Host(&x)], TransferMode::Staged).unwrap();
        assert!(rt.is_built());
        assert_eq!(rt.precision(), PrecisionMode::Lowest);
    }

    #[test]
    fn test_deferred_build_on_first_run() {
        let mut g = ComputationGraph::new("dyn");
        g.add_input(TensorSpec::new(
            "x",
            DType::F32,
            Shape(vec![crate::graph::Dim::Static(1), crate::graph::Dim::Dynamic]),
        ));
        g.add_output(TensorSpec::new("y", DType::F32, Shape::unknown()));
        g.add_node(OpKind::Relu, vec!["x".into()], vec!["y".into()]);

        let mut rt = runtime_for(&g);
        assert!(!rt.is_built());

        let x = Tensor::from_f32(&[1, 3], &[-1.0, 0.5, 2.0]).unwrap();
        let out = rt.run(&[TensorArg::Host(&x)], TransferMode::Staged).unwrap();
        assert!(rt.is_built());
        let y = out.get("y").unwrap().to_host().unwrap();
        assert_eq!(y.shape(), &[1, 3]);
        assert_eq!(y.as_f32().unwrap(), vec![0.0, 0.5, 2.0]);
    }
}
