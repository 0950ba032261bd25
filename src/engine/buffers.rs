//! Per-binding buffer pairs.
//!
//! Every non-shape binding owns one device allocation for the engine's
//! whole lifetime; its size never changes after creation. The pinned host
//! staging buffer is allocated lazily on the first staged transfer, so
//! peer-only workloads never pay for host staging memory.

use crate::compiler::BindingDesc;
use crate::device::{DeviceBuffer, PinnedBuffer};
use crate::error::ForgeResult;

pub(crate) struct BufferPair {
    pub binding: BindingDesc,
    device: DeviceBuffer,
    pinned: Option<PinnedBuffer>,
}

impl BufferPair {
    pub fn new(binding: &BindingDesc) -> ForgeResult<Self> {
        let device = DeviceBuffer::alloc(binding.byte_size())?;
        tracing::trace!(
            "BufferPair::new: binding '{}', {} bytes",
            binding.name,
            binding.byte_size()
        );
        Ok(BufferPair {
            binding: binding.clone(),
            device,
            pinned: None,
        })
    }

    pub fn device(&self) -> &DeviceBuffer {
        &self.device
    }

    /// The pinned staging buffer, allocated on first use
    pub fn pinned(&mut self) -> ForgeResult<&PinnedBuffer> {
        if self.pinned.is_none() {
            self.pinned = Some(PinnedBuffer::alloc(self.binding.byte_size())?);
        }
        Ok(self.pinned.as_ref().unwrap())
    }

    pub fn byte_size(&self) -> usize {
        self.binding.byte_size()
    }
}
