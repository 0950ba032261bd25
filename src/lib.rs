//! GraphForge - compiled-engine build/cache pipeline and async execution runtime
//!
//! GraphForge turns a serialized computation graph into a device-resident
//! compiled engine, caches the artifact on disk so the (potentially
//! multi-minute) optimization cost is paid once, and drives repeated
//! inference passes against it with a single blocking point per call.
//!
//! The kernel compiler itself is an opaque capability behind the
//! [`compiler::KernelCompiler`] trait; [`compiler::ReferenceCompiler`] is an
//! in-process host-memory implementation used for tests and development.

pub mod calibration;
pub mod compiler;
pub mod device;
pub mod engine;
pub mod error;
pub mod graph;
pub mod logging;
pub mod tensor;

pub use calibration::{CalibrationProvider, InMemoryCalibrator};
pub use compiler::{
    BindingDesc, BindingDirection, KernelCompiler, PrecisionMode, ReferenceCompiler,
};
pub use device::{Device, DeviceCaps, DeviceKind};
pub use engine::{
    resolve_artifact_path, BuildConfig, EngineBuilder, ExecutionRuntime, Outputs, TensorArg,
    TransferMode,
};
pub use error::{ErrorCategory, ForgeResult, GraphForgeError};
pub use graph::{ComputationGraph, DType, Dim, Shape};
pub use tensor::{DeviceTensor, Tensor};
