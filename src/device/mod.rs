//! Device selection and the reference accelerator primitives.
//!
//! [`Stream`] and the buffer types model the accelerator runtime the engine
//! executes against: a FIFO-ordered command stream, device-resident
//! allocations, and page-locked host staging buffers. In this crate they are
//! backed by host memory so the full transfer/compute pipeline runs (and is
//! tested) without hardware; the semantics match a real driver: all copies
//! are queued on a stream and only `Stream::synchronize` blocks.

pub mod memory;
pub mod stream;

pub use memory::{DeviceBuffer, PinnedBuffer};
pub use stream::Stream;

use std::fmt;
use std::str::FromStr;

use crate::error::{ForgeResult, GraphForgeError};

/// Kind of compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Accelerator (the only kind engines can be built for)
    Accelerator,
    /// Host CPU; rejected by the engine builder
    Cpu,
}

/// A selected compute device, parsed from `"<KIND>:<INDEX>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub kind: DeviceKind,
    pub ordinal: u32,
    /// The selector string as given, kept for error messages
    selector: String,
}

impl Device {
    /// Parse a device selector such as `"ACCEL:0"` or `"gpu:1"`.
    ///
    /// A bare kind (no ordinal) selects device 0.
    pub fn parse(selector: &str) -> ForgeResult<Self> {
        let (kind_str, ordinal) = match selector.split_once(':') {
            Some((k, idx)) => {
                let ordinal = idx.trim().parse::<u32>().map_err(|_| {
                    GraphForgeError::InvalidConfiguration(format!(
                        "invalid device ordinal in selector '{}'",
                        selector
                    ))
                })?;
                (k, ordinal)
            }
            None => (selector, 0),
        };
        let kind = match kind_str.trim().to_ascii_lowercase().as_str() {
            "accel" | "gpu" => DeviceKind::Accelerator,
            "cpu" => DeviceKind::Cpu,
            other => {
                return Err(GraphForgeError::InvalidConfiguration(format!(
                    "unknown device kind '{}'",
                    other
                )))
            }
        };
        Ok(Device {
            kind,
            ordinal,
            selector: selector.to_string(),
        })
    }

    pub fn is_accelerator(&self) -> bool {
        self.kind == DeviceKind::Accelerator
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }
}

impl FromStr for Device {
    type Err = GraphForgeError;

    fn from_str(s: &str) -> ForgeResult<Self> {
        Device::parse(s)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selector)
    }
}

/// Capabilities advertised by a device, queried through the compiler
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceCaps {
    /// Fast half-precision support; enables reduced precision automatically
    pub fast_f16: bool,
    /// Fast 8-bit integer support; required for lowest-precision builds
    pub fast_i8: bool,
}
