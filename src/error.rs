//! Unified error handling for GraphForge
//!
//! A single error type covers the whole build/run surface: device selection,
//! graph parsing, engine compilation, per-call input validation, and
//! asynchronous transfer/compute failures surfaced at stream synchronization.
//! `category()` classifies errors for handling decisions.

use std::fmt;

use crate::compiler::BuildDiagnostic;
use crate::graph::{DType, Shape};

/// Unified error type for GraphForge
#[derive(Debug, thiserror::Error)]
pub enum GraphForgeError {
    // ========== Build Errors ==========
    /// Requested device is not an accelerator
    #[error("device mismatch: requested '{requested}', expected an accelerator (ACCEL:<n> or GPU:<n>)")]
    DeviceMismatch { requested: String },

    /// Malformed or unsupported graph; carries the offending node index and
    /// a structured diagnostic for debugging
    #[error("graph parse failed at node {node}: {diagnostic}")]
    GraphParse {
        node: usize,
        diagnostic: BuildDiagnostic,
    },

    /// Compiler could not produce an engine (e.g. workspace budget too small)
    #[error("engine build failed: {0}")]
    BuildFailure(String),

    /// Invalid build or run configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Calibration provider failure during quantized build
    #[error("calibration failed: {0}")]
    Calibration(String),

    /// Engine cache file is unreadable or corrupt
    #[error("engine cache error: {0}")]
    EngineCache(String),

    // ========== Per-call Errors ==========
    /// Fewer inputs supplied than the engine requires
    #[error("not enough inputs: expected {expected}, got {got}")]
    MissingInputs { expected: usize, got: usize },

    /// Input shape does not match its binding's declared shape
    #[error("wrong shape for input {input}: expected {expected}, got {got}")]
    ShapeMismatch {
        input: usize,
        expected: Shape,
        got: Shape,
    },

    /// Input element type does not match its binding's declared type
    #[error("wrong dtype for input {input}: expected {expected}, got {got}")]
    DtypeMismatch {
        input: usize,
        expected: DType,
        got: DType,
    },

    /// A permitted narrowing cast would lose values
    #[error("cannot safely cast input {input} from {from} to {to}: {detail}")]
    UnsafeCast {
        input: usize,
        from: DType,
        to: DType,
        detail: String,
    },

    /// An asynchronous transfer or compute operation failed; reported at the
    /// stream synchronization point. The runtime should be rebuilt.
    #[error("transfer or compute failure: {0}")]
    TransferOrCompute(String),

    // ========== Ambient Errors ==========
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (indicates a bug)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or configuration; the caller should fix the request
    User,
    /// Build-time failure; the caller may retry with a different config
    Build,
    /// Per-call runtime failure
    Runtime,
    /// Indicates a bug; report it
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Build => write!(f, "Build"),
            ErrorCategory::Runtime => write!(f, "Runtime"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl GraphForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            GraphForgeError::DeviceMismatch { .. }
            | GraphForgeError::InvalidConfiguration(_)
            | GraphForgeError::MissingInputs { .. }
            | GraphForgeError::ShapeMismatch { .. }
            | GraphForgeError::DtypeMismatch { .. }
            | GraphForgeError::UnsafeCast { .. } => ErrorCategory::User,

            GraphForgeError::GraphParse { .. }
            | GraphForgeError::BuildFailure(_)
            | GraphForgeError::Calibration(_)
            | GraphForgeError::EngineCache(_) => ErrorCategory::Build,

            GraphForgeError::TransferOrCompute(_) | GraphForgeError::Io(_) => {
                ErrorCategory::Runtime
            }

            GraphForgeError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the runtime stays usable for subsequent calls after this error.
    ///
    /// Validation failures leave all buffers and context state untouched;
    /// a transfer/compute failure does not, and the runtime must be rebuilt.
    pub fn leaves_runtime_usable(&self) -> bool {
        matches!(
            self,
            GraphForgeError::MissingInputs { .. }
                | GraphForgeError::ShapeMismatch { .. }
                | GraphForgeError::DtypeMismatch { .. }
                | GraphForgeError::UnsafeCast { .. }
        )
    }
}

/// Result alias used throughout the crate
pub type ForgeResult<T> = std::result::Result<T, GraphForgeError>;
