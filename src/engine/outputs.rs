//! Result normalization and the output collection.
//!
//! Staged outputs come back as host tensors: sentinel-declared bindings are
//! squeezed back to their natural rank and 64-bit declarations are widened
//! best-effort. Peer outputs stay on device (squeezed, never widened; there
//! is no host round trip to widen through).

use std::ops::Index;

use crate::compiler::BindingDesc;
use crate::compiler::reference::MIN_BINDING_RANK;
use crate::error::{ForgeResult, GraphForgeError};
use crate::graph::count_trailing_ones;
use crate::tensor::{DeviceTensor, Tensor};

/// One normalized output
#[derive(Debug, Clone)]
pub enum OutputValue {
    /// Host-resident (staged retrieval)
    Host(Tensor),
    /// Device-resident (peer retrieval, zero-copy view of the output buffer)
    Device(DeviceTensor),
}

impl OutputValue {
    /// The value as a host tensor; downloads peer outputs
    pub fn to_host(&self) -> ForgeResult<Tensor> {
        match self {
            OutputValue::Host(t) => Ok(t.clone()),
            OutputValue::Device(d) => d.to_host(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            OutputValue::Host(t) => t.shape(),
            OutputValue::Device(d) => d.shape(),
        }
    }
}

/// Outputs of one run, addressable by declared name or by position
#[derive(Debug, Default)]
pub struct Outputs {
    entries: Vec<(String, OutputValue)>,
}

impl Outputs {
    pub(crate) fn push(&mut self, name: String, value: OutputValue) {
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl Index<usize> for Outputs {
    type Output = OutputValue;

    fn index(&self, index: usize) -> &OutputValue {
        &self.entries[index].1
    }
}

/// Natural shape of an output binding: sentinel-declared bindings lose the
/// trailing singleton padding the engine added to reach its minimum rank.
pub(crate) fn normalized_shape(binding: &BindingDesc) -> Vec<usize> {
    let mut shape = binding.shape.clone();
    if binding.from_unknown_sentinel && shape.len() == MIN_BINDING_RANK {
        let trailing = count_trailing_ones(&shape);
        shape.truncate(shape.len() - trailing);
    }
    shape
}

/// Normalize a staged (host) output: squeeze sentinel padding, then widen
/// back toward the declared 64-bit type where the reverse cast is exact.
pub(crate) fn normalize_host(binding: &BindingDesc, tensor: Tensor) -> ForgeResult<Tensor> {
    let shape = normalized_shape(binding);
    let squeezed = if shape != tensor.shape() {
        tensor.reshaped(shape)?
    } else {
        tensor
    };
    if binding.declared_dtype != binding.dtype {
        return squeezed.widened_to(binding.declared_dtype);
    }
    Ok(squeezed)
}

/// Normalize a peer (device) output: squeeze only, zero-copy
pub(crate) fn normalize_device(
    binding: &BindingDesc,
    tensor: DeviceTensor,
) -> ForgeResult<DeviceTensor> {
    let shape = normalized_shape(binding);
    if shape != tensor.shape() {
        let kept: usize = shape.iter().product::<usize>().max(1);
        let had: usize = tensor.shape().iter().product::<usize>().max(1);
        if kept != had {
            return Err(GraphForgeError::Internal(format!(
                "sentinel squeeze changed element count for '{}'",
                binding.name
            )));
        }
        return Ok(tensor.with_shape(shape));
    }
    Ok(tensor)
}
