//! The opaque kernel-compiler capability.
//!
//! Engine building and execution happen behind three traits so the pipeline
//! never depends on a concrete vendor toolchain: [`KernelCompiler`] parses a
//! graph and produces an engine blob, [`CompiledEngine`] exposes the binding
//! table and spawns execution contexts, and [`ExecutionContext`] binds
//! addresses and dispatches stream-ordered compute. [`ReferenceCompiler`]
//! is the in-process implementation used by tests and development.

pub mod reference;

pub use reference::ReferenceCompiler;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationProvider;
use crate::device::{DeviceCaps, Stream};
use crate::error::ForgeResult;
use crate::graph::{ComputationGraph, DType};

/// Structured parse diagnostic carried inside `GraphParse` errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildDiagnostic {
    pub file: String,
    pub line: u32,
    pub function: String,
    pub code: String,
    pub description: String,
}

impl fmt::Display for BuildDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) in {} [{}:{}]",
            self.description, self.code, self.function, self.file, self.line
        )
    }
}

/// Direction of an engine binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingDirection {
    Input,
    Output,
}

/// One I/O slot of a compiled engine.
///
/// The binding set, including ordering and byte sizes, is fixed at build
/// time; the runtime derives its buffer pairs from this table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingDesc {
    pub name: String,
    pub direction: BindingDirection,
    /// Engine-side element type (after 64-bit lowering)
    pub dtype: DType,
    /// Concrete engine-side shape
    pub shape: Vec<usize>,
    /// Bound by value through `set_shape_values`, not by device address
    pub is_shape_tensor: bool,
    /// Literal values the engine was pinned to at build time (shape tensors
    /// only); runs must supply exactly these
    pub pinned_values: Option<Vec<i64>>,
    /// Declared (pre-lowering) element type, for output widening
    pub declared_dtype: DType,
    /// True when the graph declared this output with the unknown-shape
    /// sentinel; the normalizer squeezes engine rank padding back off
    pub from_unknown_sentinel: bool,
}

impl BindingDesc {
    pub fn is_input(&self) -> bool {
        self.direction == BindingDirection::Input
    }

    /// Byte size of the binding's device allocation
    pub fn byte_size(&self) -> usize {
        self.shape.iter().product::<usize>().max(1) * self.dtype.element_size()
    }
}

/// Numeric precision the engine is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrecisionMode {
    /// f32 everywhere
    Full,
    /// f16 where the device is faster at it
    Reduced,
    /// int8 with calibration
    Lowest,
}

impl PrecisionMode {
    /// Cache filename suffix for this precision
    pub fn suffix(&self) -> &'static str {
        match self {
            PrecisionMode::Full => "",
            PrecisionMode::Reduced => "_fp16",
            PrecisionMode::Lowest => "_int8",
        }
    }
}

impl fmt::Display for PrecisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrecisionMode::Full => write!(f, "full"),
            PrecisionMode::Reduced => write!(f, "reduced"),
            PrecisionMode::Lowest => write!(f, "lowest"),
        }
    }
}

/// Everything the compiler needs for one build
pub struct BuildRequest<'a> {
    pub precision: PrecisionMode,
    pub max_workspace_bytes: usize,
    /// Profile for dynamic graphs; `None` for fully static ones
    pub profile: Option<&'a crate::engine::OptimizationProfile>,
    /// Required when `precision` is `Lowest`. The trait-object lifetime is
    /// spelled out so borrowed providers don't get forced to `'static`.
    pub calibration: Option<&'a mut (dyn CalibrationProvider + 'a)>,
}

/// Graph-to-engine compiler
pub trait KernelCompiler: Send + Sync {
    /// Human-readable toolchain name for logs
    fn name(&self) -> &str;

    /// Capabilities of the device the compiler targets
    fn device_caps(&self) -> DeviceCaps;

    /// Validate the graph; returns the fixed binding table the built engine
    /// will expose. Failures carry the offending node index.
    fn parse(&self, graph: &ComputationGraph) -> ForgeResult<Vec<BindingDesc>>;

    /// Compile the graph into an opaque engine blob
    fn build(&self, graph: &ComputationGraph, request: BuildRequest<'_>)
        -> ForgeResult<Vec<u8>>;

    /// Reconstruct an engine from a previously serialized blob
    fn deserialize(&self, blob: &[u8]) -> ForgeResult<Box<dyn CompiledEngine>>;
}

/// A built (or cache-loaded) engine
pub trait CompiledEngine: Send + Sync {
    /// Fixed binding table, inputs before outputs, in graph declaration order
    fn bindings(&self) -> &[BindingDesc];

    /// Precision the engine was built with
    fn precision(&self) -> PrecisionMode;

    /// Serialize to the cacheable blob format
    fn serialize(&self) -> ForgeResult<Vec<u8>>;

    /// Spawn an execution context holding per-context binding state
    fn create_context(&self) -> ForgeResult<Box<dyn ExecutionContext>>;
}

/// Per-runtime execution state: bound addresses and shape values
pub trait ExecutionContext: Send {
    /// Bind a device buffer to a named binding
    fn set_tensor_address(
        &mut self,
        name: &str,
        buffer: &crate::device::DeviceBuffer,
    ) -> ForgeResult<()>;

    /// Pass a shape tensor's literal values (shape tensors are consumed by
    /// value during shape inference, never by device address)
    fn set_shape_values(&mut self, name: &str, values: &[i64]) -> ForgeResult<()>;

    /// Queue one full inference pass on the stream
    fn execute_async(&mut self, stream: &Stream) -> ForgeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_suffixes() {
        assert_eq!(PrecisionMode::Full.suffix(), "");
        assert_eq!(PrecisionMode::Reduced.suffix(), "_fp16");
        assert_eq!(PrecisionMode::Lowest.suffix(), "_int8");
    }

    #[test]
    fn test_binding_byte_size() {
        let b = BindingDesc {
            name: "x".to_string(),
            direction: BindingDirection::Input,
            dtype: DType::F32,
            shape: vec![1, 3, 4],
            is_shape_tensor: false,
            pinned_values: None,
            declared_dtype: DType::F32,
            from_unknown_sentinel: false,
        };
        assert_eq!(b.byte_size(), 48);

        // Scalars still get one element's worth of storage
        let s = BindingDesc {
            shape: vec![],
            ..b
        };
        assert_eq!(s.byte_size(), 4);
    }

    #[test]
    fn test_diagnostic_display() {
        let d = BuildDiagnostic {
            file: "reference.rs".to_string(),
            line: 42,
            function: "infer_shapes".to_string(),
            code: "UNSUPPORTED_OP".to_string(),
            description: "operator not supported".to_string(),
        };
        let s = d.to_string();
        assert!(s.contains("UNSUPPORTED_OP"));
        assert!(s.contains("reference.rs:42"));
    }
}
