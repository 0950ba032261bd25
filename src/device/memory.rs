//! Device and pinned-host buffer wrappers.
//!
//! `DeviceBuffer` owns one device-resident allocation whose size never
//! changes after creation. All stream-ordered copy methods validate sizes
//! before queuing; the copy itself runs when the stream is synchronized.
//! Buffers clone cheaply (shared Arc inner) so queued operations can hold
//! them alive, but the allocation is freed exactly once.

use std::sync::{Arc, RwLock};

use crate::device::stream::Stream;
use crate::error::{ForgeResult, GraphForgeError};

/// Device-resident allocation
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    inner: Arc<DeviceBufferInner>,
}

#[derive(Debug)]
struct DeviceBufferInner {
    data: RwLock<Vec<u8>>,
    size: usize,
}

impl DeviceBuffer {
    /// Allocate `size` bytes of device memory
    pub fn alloc(size: usize) -> ForgeResult<Self> {
        tracing::trace!("DeviceBuffer::alloc: {} bytes", size);
        if size == 0 {
            return Err(GraphForgeError::Internal(
                "zero-size device allocation".to_string(),
            ));
        }
        Ok(DeviceBuffer {
            inner: Arc::new(DeviceBufferInner {
                data: RwLock::new(vec![0u8; size]),
                size,
            }),
        })
    }

    /// Allocation size in bytes; fixed for the buffer's lifetime
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Queue a host-to-device copy from a pinned staging buffer
    pub fn copy_from_pinned_async(
        &self,
        src: &PinnedBuffer,
        len: usize,
        stream: &Stream,
    ) -> ForgeResult<()> {
        if len > self.size() || len > src.size() {
            return Err(GraphForgeError::TransferOrCompute(format!(
                "H2D copy out of bounds: len={} device={} pinned={}",
                len,
                self.size(),
                src.size()
            )));
        }
        let dst = self.clone();
        let src = src.clone();
        stream.enqueue(Box::new(move || {
            let staged = src.read()?;
            let mut data = dst.inner.data.write().map_err(|e| {
                GraphForgeError::TransferOrCompute(format!("device buffer poisoned: {}", e))
            })?;
            data[..len].copy_from_slice(&staged[..len]);
            Ok(())
        }))
    }

    /// Queue a device-to-host copy into a pinned staging buffer
    pub fn copy_to_pinned_async(
        &self,
        dst: &PinnedBuffer,
        len: usize,
        stream: &Stream,
    ) -> ForgeResult<()> {
        if len > self.size() || len > dst.size() {
            return Err(GraphForgeError::TransferOrCompute(format!(
                "D2H copy out of bounds: len={} device={} pinned={}",
                len,
                self.size(),
                dst.size()
            )));
        }
        let src = self.clone();
        let dst = dst.clone();
        stream.enqueue(Box::new(move || {
            let data = src.inner.data.read().map_err(|e| {
                GraphForgeError::TransferOrCompute(format!("device buffer poisoned: {}", e))
            })?;
            dst.write(&data[..len])
        }))
    }

    /// Queue a device-to-device copy; no host round trip
    pub fn copy_from_device_async(
        &self,
        src: &DeviceBuffer,
        len: usize,
        stream: &Stream,
    ) -> ForgeResult<()> {
        if len > self.size() || len > src.size() {
            return Err(GraphForgeError::TransferOrCompute(format!(
                "D2D copy out of bounds: len={} dst={} src={}",
                len,
                self.size(),
                src.size()
            )));
        }
        let dst = self.clone();
        let src = src.clone();
        stream.enqueue(Box::new(move || {
            let bytes = {
                let data = src.inner.data.read().map_err(|e| {
                    GraphForgeError::TransferOrCompute(format!("device buffer poisoned: {}", e))
                })?;
                data[..len].to_vec()
            };
            let mut data = dst.inner.data.write().map_err(|e| {
                GraphForgeError::TransferOrCompute(format!("device buffer poisoned: {}", e))
            })?;
            data[..len].copy_from_slice(&bytes);
            Ok(())
        }))
    }

    /// Synchronous read of the full allocation.
    ///
    /// Only meaningful after the owning stream has been synchronized;
    /// used by the reference interpreter and by `DeviceTensor::to_host`.
    pub fn read_bytes(&self) -> ForgeResult<Vec<u8>> {
        let data = self
            .inner
            .data
            .read()
            .map_err(|e| GraphForgeError::TransferOrCompute(format!("device buffer poisoned: {}", e)))?;
        Ok(data.clone())
    }

    /// Synchronous write of the full allocation (test and upload helper)
    pub fn write_bytes(&self, bytes: &[u8]) -> ForgeResult<()> {
        if bytes.len() > self.size() {
            return Err(GraphForgeError::TransferOrCompute(format!(
                "write out of bounds: len={} device={}",
                bytes.len(),
                self.size()
            )));
        }
        let mut data = self
            .inner
            .data
            .write()
            .map_err(|e| GraphForgeError::TransferOrCompute(format!("device buffer poisoned: {}", e)))?;
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Whether two handles refer to the same allocation
    pub fn same_allocation(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Page-locked host staging buffer for staged transfers
#[derive(Debug, Clone)]
pub struct PinnedBuffer {
    inner: Arc<PinnedBufferInner>,
}

#[derive(Debug)]
struct PinnedBufferInner {
    data: RwLock<Vec<u8>>,
    size: usize,
}

impl PinnedBuffer {
    /// Allocate `size` bytes of pinned host memory
    pub fn alloc(size: usize) -> ForgeResult<Self> {
        tracing::trace!("PinnedBuffer::alloc: {} bytes", size);
        if size == 0 {
            return Err(GraphForgeError::Internal(
                "zero-size pinned allocation".to_string(),
            ));
        }
        Ok(PinnedBuffer {
            inner: Arc::new(PinnedBufferInner {
                data: RwLock::new(vec![0u8; size]),
                size,
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Stage host bytes into the buffer (synchronous; staging is the host
    /// side of a staged transfer)
    pub fn write(&self, bytes: &[u8]) -> ForgeResult<()> {
        if bytes.len() > self.size() {
            return Err(GraphForgeError::TransferOrCompute(format!(
                "staging write out of bounds: len={} pinned={}",
                bytes.len(),
                self.size()
            )));
        }
        let mut data = self
            .inner
            .data
            .write()
            .map_err(|e| GraphForgeError::TransferOrCompute(format!("pinned buffer poisoned: {}", e)))?;
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Read the buffer contents
    pub fn read(&self) -> ForgeResult<Vec<u8>> {
        let data = self
            .inner
            .data
            .read()
            .map_err(|e| GraphForgeError::TransferOrCompute(format!("pinned buffer poisoned: {}", e)))?;
        Ok(data.clone())
    }
}
