//! Tensor element types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a tensor.
///
/// The graph may declare any of these; the compiled engine supports a
/// narrower vocabulary (no 64-bit types), so `lowered()` maps declared
/// types to what the engine actually binds and the result normalizer
/// widens outputs back on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F16,
    F32,
    F64,
    I8,
    I32,
    I64,
    Bool,
}

impl DType {
    /// Size of one element in bytes
    pub fn element_size(&self) -> usize {
        match self {
            DType::F16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
            DType::I8 => 1,
            DType::I32 => 4,
            DType::I64 => 8,
            DType::Bool => 1,
        }
    }

    /// Map a declared type into the engine's narrower vocabulary
    pub fn lowered(&self) -> DType {
        match self {
            DType::I64 => DType::I32,
            DType::F64 => DType::F32,
            other => *other,
        }
    }

    /// Whether the engine can bind this type directly (no lowering needed)
    pub fn engine_supported(&self) -> bool {
        !matches!(self, DType::I64 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I8 => "i8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::Bool => "bool",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(DType::F16.element_size(), 2);
        assert_eq!(DType::F32.element_size(), 4);
        assert_eq!(DType::F64.element_size(), 8);
        assert_eq!(DType::I64.element_size(), 8);
        assert_eq!(DType::Bool.element_size(), 1);
    }

    #[test]
    fn test_lowering() {
        assert_eq!(DType::I64.lowered(), DType::I32);
        assert_eq!(DType::F64.lowered(), DType::F32);
        assert_eq!(DType::F32.lowered(), DType::F32);
        assert!(!DType::I64.engine_supported());
        assert!(DType::I32.engine_supported());
    }

    #[test]
    fn test_serde_roundtrip() {
        let json = serde_json::to_string(&DType::I64).unwrap();
        assert_eq!(json, "\"i64\"");
        let back: DType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DType::I64);
    }
}
