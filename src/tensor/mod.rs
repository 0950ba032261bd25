//! Host and device tensor value types.
//!
//! `Tensor` is a host-resident value: dtype + concrete shape + little-endian
//! element bytes. `DeviceTensor` wraps a device allocation without copying;
//! peer-mode inputs and outputs use it.

use half::f16;

use crate::device::{DeviceBuffer, Stream};
use crate::error::{ForgeResult, GraphForgeError};
use crate::graph::DType;

/// Host-resident tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

macro_rules! typed_ctor {
    ($fn_name:ident, $ty:ty, $dtype:expr) => {
        pub fn $fn_name(shape: &[usize], values: &[$ty]) -> ForgeResult<Self> {
            let mut data = Vec::with_capacity(values.len() * std::mem::size_of::<$ty>());
            for v in values {
                data.extend_from_slice(&v.to_le_bytes());
            }
            Tensor::from_bytes($dtype, shape.to_vec(), data)
        }
    };
}

macro_rules! typed_accessor {
    ($fn_name:ident, $ty:ty, $dtype:expr, $width:expr) => {
        pub fn $fn_name(&self) -> ForgeResult<Vec<$ty>> {
            if self.dtype != $dtype {
                return Err(GraphForgeError::Internal(format!(
                    "tensor is {}, not {}",
                    self.dtype, $dtype
                )));
            }
            let mut out = Vec::with_capacity(self.data.len() / $width);
            for chunk in self.data.chunks_exact($width) {
                let mut bytes = [0u8; $width];
                bytes.copy_from_slice(chunk);
                out.push(<$ty>::from_le_bytes(bytes));
            }
            Ok(out)
        }
    };
}

impl Tensor {
    /// Build a tensor from raw little-endian bytes
    pub fn from_bytes(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> ForgeResult<Self> {
        let expected = shape.iter().product::<usize>() * dtype.element_size();
        if data.len() != expected {
            return Err(GraphForgeError::Internal(format!(
                "tensor byte length {} does not match {} elements of {}",
                data.len(),
                shape.iter().product::<usize>(),
                dtype
            )));
        }
        Ok(Tensor { dtype, shape, data })
    }

    /// Zero-filled tensor
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        let len = shape.iter().product::<usize>() * dtype.element_size();
        Tensor {
            dtype,
            shape: shape.to_vec(),
            data: vec![0u8; len],
        }
    }

    typed_ctor!(from_f32, f32, DType::F32);
    typed_ctor!(from_f64, f64, DType::F64);
    typed_ctor!(from_i32, i32, DType::I32);
    typed_ctor!(from_i64, i64, DType::I64);

    pub fn from_f16(shape: &[usize], values: &[f16]) -> ForgeResult<Self> {
        let mut data = Vec::with_capacity(values.len() * 2);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Tensor::from_bytes(DType::F16, shape.to_vec(), data)
    }

    /// Rank-zero scalar
    pub fn scalar_i64(value: i64) -> Self {
        Tensor {
            dtype: DType::I64,
            shape: Vec::new(),
            data: value.to_le_bytes().to_vec(),
        }
    }

    pub fn scalar_f32(value: f32) -> Self {
        Tensor {
            dtype: DType::F32,
            shape: Vec::new(),
            data: value.to_le_bytes().to_vec(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    typed_accessor!(as_f32, f32, DType::F32, 4);
    typed_accessor!(as_f64, f64, DType::F64, 8);
    typed_accessor!(as_i32, i32, DType::I32, 4);
    typed_accessor!(as_i64, i64, DType::I64, 8);

    pub fn as_f16(&self) -> ForgeResult<Vec<f16>> {
        if self.dtype != DType::F16 {
            return Err(GraphForgeError::Internal(format!(
                "tensor is {}, not f16",
                self.dtype
            )));
        }
        Ok(self
            .data
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    /// Integer values of an i32 or i64 tensor, widened to i64.
    ///
    /// Used to read shape-tensor inputs regardless of declared width.
    pub fn integer_values(&self) -> ForgeResult<Vec<i64>> {
        match self.dtype {
            DType::I32 => Ok(self.as_i32()?.into_iter().map(i64::from).collect()),
            DType::I64 => self.as_i64(),
            other => Err(GraphForgeError::Internal(format!(
                "expected an integer tensor, got {}",
                other
            ))),
        }
    }

    /// Lossless narrowing of an i64 tensor to i32.
    ///
    /// Returns `None` when any value does not round-trip through i32.
    pub fn narrow_i64_to_i32(&self) -> ForgeResult<Option<Tensor>> {
        let values = self.as_i64()?;
        let mut narrowed = Vec::with_capacity(values.len());
        for v in values {
            match i32::try_from(v) {
                Ok(n) => narrowed.push(n),
                Err(_) => return Ok(None),
            }
        }
        Ok(Some(Tensor::from_i32(&self.shape, &narrowed)?))
    }

    /// Best-effort widening toward a declared 64-bit type.
    ///
    /// i32 -> i64 and f32 -> f64 are exact, so the result always reproduces
    /// the narrow values under the reverse cast. Any other combination
    /// returns the tensor unchanged.
    pub fn widened_to(&self, declared: DType) -> ForgeResult<Tensor> {
        match (self.dtype, declared) {
            (DType::I32, DType::I64) => {
                let wide: Vec<i64> = self.as_i32()?.into_iter().map(i64::from).collect();
                Tensor::from_i64(&self.shape, &wide)
            }
            (DType::F32, DType::F64) => {
                let wide: Vec<f64> = self.as_f32()?.into_iter().map(f64::from).collect();
                Tensor::from_f64(&self.shape, &wide)
            }
            _ => Ok(self.clone()),
        }
    }

    /// Same data viewed under a different concrete shape.
    ///
    /// Element counts must agree.
    pub fn reshaped(&self, shape: Vec<usize>) -> ForgeResult<Tensor> {
        let new_count: usize = shape.iter().product();
        if new_count != self.element_count() {
            return Err(GraphForgeError::Internal(format!(
                "reshape element count mismatch: {} vs {}",
                new_count,
                self.element_count()
            )));
        }
        Ok(Tensor {
            dtype: self.dtype,
            shape,
            data: self.data.clone(),
        })
    }
}

/// Zero-copy wrapper around a device-resident allocation
#[derive(Debug, Clone)]
pub struct DeviceTensor {
    dtype: DType,
    shape: Vec<usize>,
    buffer: DeviceBuffer,
}

impl DeviceTensor {
    /// Wrap an existing device allocation; the buffer must hold at least
    /// the tensor's byte size.
    pub fn wrap(dtype: DType, shape: Vec<usize>, buffer: DeviceBuffer) -> ForgeResult<Self> {
        let needed = shape.iter().product::<usize>() * dtype.element_size();
        if buffer.size() < needed {
            return Err(GraphForgeError::Internal(format!(
                "device buffer too small: {} < {}",
                buffer.size(),
                needed
            )));
        }
        Ok(DeviceTensor {
            dtype,
            shape,
            buffer,
        })
    }

    /// Upload a host tensor into a fresh device allocation
    pub fn from_host(tensor: &Tensor) -> ForgeResult<Self> {
        let buffer = DeviceBuffer::alloc(tensor.byte_size().max(1))?;
        buffer.write_bytes(tensor.bytes())?;
        Ok(DeviceTensor {
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            buffer,
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn byte_size(&self) -> usize {
        self.shape.iter().product::<usize>() * self.dtype.element_size()
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    /// Copy the tensor down to host memory. The owning stream must have
    /// been synchronized first; the runtime guarantees that for outputs.
    pub fn to_host(&self) -> ForgeResult<Tensor> {
        let bytes = self.buffer.read_bytes()?;
        Tensor::from_bytes(self.dtype, self.shape.clone(), bytes[..self.byte_size()].to_vec())
    }

    /// Queue a device-to-device copy of this tensor into `dst`
    pub fn copy_into_async(&self, dst: &DeviceBuffer, stream: &Stream) -> ForgeResult<()> {
        dst.copy_from_device_async(&self.buffer, self.byte_size(), stream)
    }

    /// Strip trailing singleton dimensions down to `keep` dims (zero-copy)
    pub(crate) fn with_shape(&self, shape: Vec<usize>) -> DeviceTensor {
        DeviceTensor {
            dtype: self.dtype,
            shape,
            buffer: self.buffer.clone(),
        }
    }
}
