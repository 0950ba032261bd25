//! Per-call input validation.
//!
//! All checks run before any transfer is enqueued, so a rejected call
//! leaves every buffer and the execution context untouched.

use crate::compiler::BindingDesc;
use crate::error::{ForgeResult, GraphForgeError};
use crate::graph::{DType, Shape};
use crate::tensor::Tensor;

/// Whether a supplied concrete shape satisfies a binding shape.
///
/// Shapes must match exactly, with one exception: a rank-zero scalar `()`
/// and the one-element vector `(1,)` are interchangeable.
fn shapes_equivalent(binding: &[usize], got: &[usize]) -> bool {
    if binding == got {
        return true;
    }
    (binding.is_empty() && got == [1]) || (got.is_empty() && binding == [1])
}

pub(crate) fn check_shape(index: usize, binding: &BindingDesc, got: &[usize]) -> ForgeResult<()> {
    if shapes_equivalent(&binding.shape, got) {
        Ok(())
    } else {
        Err(GraphForgeError::ShapeMismatch {
            input: index,
            expected: Shape::from_concrete(&binding.shape),
            got: Shape::from_concrete(got),
        })
    }
}

/// Shape tensors: the supplied literal values must equal the values the
/// engine was pinned to at build time. The engine's shape inference already
/// ran against the pinned values, so different ones cannot take effect.
pub(crate) fn check_shape_values(
    index: usize,
    binding: &BindingDesc,
    got: &[i64],
) -> ForgeResult<()> {
    let pinned = match &binding.pinned_values {
        Some(p) => p,
        None => return Ok(()),
    };
    if pinned == got {
        Ok(())
    } else {
        Err(GraphForgeError::ShapeMismatch {
            input: index,
            expected: values_as_shape(pinned),
            got: values_as_shape(got),
        })
    }
}

fn values_as_shape(values: &[i64]) -> Shape {
    let dims: Vec<usize> = values.iter().map(|&v| v.max(0) as usize).collect();
    Shape::from_concrete(&dims)
}

/// Peer mode: the device tensor's element type must match exactly
pub(crate) fn check_dtype_peer(index: usize, binding: &BindingDesc, got: DType) -> ForgeResult<()> {
    if got == binding.dtype {
        Ok(())
    } else {
        Err(GraphForgeError::DtypeMismatch {
            input: index,
            expected: binding.dtype,
            got,
        })
    }
}

/// Staged mode: exact dtype, or a lossless i64 -> i32 narrowing when the
/// binding was lowered from a 64-bit declaration. Returns the narrowed
/// replacement tensor when a cast was performed.
pub(crate) fn check_dtype_staged(
    index: usize,
    binding: &BindingDesc,
    tensor: &Tensor,
) -> ForgeResult<Option<Tensor>> {
    if tensor.dtype() == binding.dtype {
        return Ok(None);
    }
    if tensor.dtype() == DType::I64 && binding.dtype == DType::I32 {
        return match tensor.narrow_i64_to_i32()? {
            Some(narrowed) => Ok(Some(narrowed)),
            None => Err(GraphForgeError::UnsafeCast {
                input: index,
                from: DType::I64,
                to: DType::I32,
                detail: "a value does not round-trip through i32".to_string(),
            }),
        };
    }
    Err(GraphForgeError::DtypeMismatch {
        input: index,
        expected: binding.dtype,
        got: tensor.dtype(),
    })
}
