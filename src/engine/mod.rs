//! Engine build pipeline and execution runtime.
//!
//! `EngineBuilder` turns a computation graph into a compiled engine (or
//! loads one from the artifact cache) and hands back an `ExecutionRuntime`
//! that owns the engine, its execution context, one stream, and a buffer
//! pair per binding for the engine's whole lifetime.

pub mod buffers;
pub mod builder;
pub mod outputs;
pub mod profile;
pub mod runtime;
pub mod validate;

pub use builder::{resolve_artifact_path, BuildConfig, EngineBuilder};
pub use outputs::{OutputValue, Outputs};
pub use profile::{OptimizationProfile, ShapeRange};
pub use runtime::{ExecutionRuntime, TensorArg, TransferMode};
