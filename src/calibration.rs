//! Calibration data feed for lowest-precision (int8) engine builds.
//!
//! The compiler pulls representative input batches through
//! [`CalibrationProvider`] to derive per-binding quantization scales.
//! Batches must match the negotiated profile shapes; the provider signals
//! exhaustion by returning `None`.

use crate::error::{ForgeResult, GraphForgeError};
use crate::tensor::Tensor;

/// Source of representative input batches for quantization calibration.
///
/// Each call to `next_batch` yields one batch: a tensor per non-shape input
/// binding, in binding order.
pub trait CalibrationProvider: Send {
    fn next_batch(&mut self) -> ForgeResult<Option<Vec<Tensor>>>;
}

/// Calibration provider backed by pre-collected host tensors
pub struct InMemoryCalibrator {
    batches: std::vec::IntoIter<Vec<Tensor>>,
    served: usize,
}

impl InMemoryCalibrator {
    pub fn new(batches: Vec<Vec<Tensor>>) -> ForgeResult<Self> {
        if batches.is_empty() {
            return Err(GraphForgeError::Calibration(
                "calibrator needs at least one batch".to_string(),
            ));
        }
        Ok(InMemoryCalibrator {
            batches: batches.into_iter(),
            served: 0,
        })
    }

    /// Number of batches handed out so far
    pub fn served(&self) -> usize {
        self.served
    }
}

impl CalibrationProvider for InMemoryCalibrator {
    fn next_batch(&mut self) -> ForgeResult<Option<Vec<Tensor>>> {
        let batch = self.batches.next();
        if batch.is_some() {
            self.served += 1;
            tracing::trace!("InMemoryCalibrator: serving batch {}", self.served);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serves_batches_in_order_then_none() {
        let b0 = vec![Tensor::from_f32(&[2], &[1.0, 2.0]).unwrap()];
        let b1 = vec![Tensor::from_f32(&[2], &[3.0, 4.0]).unwrap()];
        let mut cal = InMemoryCalibrator::new(vec![b0.clone(), b1]).unwrap();

        let first = cal.next_batch().unwrap().unwrap();
        assert_eq!(first[0].as_f32().unwrap(), vec![1.0, 2.0]);
        assert!(cal.next_batch().unwrap().is_some());
        assert!(cal.next_batch().unwrap().is_none());
        assert_eq!(cal.served(), 2);
    }

    #[test]
    fn test_empty_calibrator_rejected() {
        assert!(InMemoryCalibrator::new(Vec::new()).is_err());
    }
}
