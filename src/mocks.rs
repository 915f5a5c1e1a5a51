use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::bbox::BoundingBox;
use crate::device::Device;
use crate::errors::{LeafSamError, Result};
use crate::traits::{LeafClassifier, Mask, SegmentationOracle};
use image::{Luma, RgbImage};
use ndarray::prelude::*;

/// Call counters shared between a [`MockOracle`] and the test that owns it.
#[derive(Debug, Default)]
pub struct MockOracleStats {
    contexts: AtomicUsize,
    predictions: AtomicUsize,
    releases: AtomicUsize,
    pending_failures: AtomicUsize,
}

impl MockOracleStats {
    pub fn contexts(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }

    pub fn predictions(&self) -> usize {
        self.predictions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// テスト用のモックオラクル
///
/// `predict` fills the prompt box (clipped to the active context) and returns
/// a mask sized like the context, so a mask from the wrong context is
/// detectable by its dimensions alone.
#[derive(Debug)]
pub struct MockOracle {
    device: Device,
    context: Option<(u32, u32)>,
    predict_delay: Duration,
    stats: Arc<MockOracleStats>,
}

impl MockOracle {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            context: None,
            predict_delay: Duration::ZERO,
            stats: Arc::new(MockOracleStats::default()),
        }
    }

    /// Make the next `count` predictions fail as if the device ran out of memory.
    pub fn fail_next(self, count: usize) -> Self {
        self.stats.pending_failures.store(count, Ordering::SeqCst);
        self
    }

    pub const fn with_predict_delay(mut self, delay: Duration) -> Self {
        self.predict_delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<MockOracleStats> {
        Arc::clone(&self.stats)
    }
}

impl SegmentationOracle for MockOracle {
    fn set_context(&mut self, image: &RgbImage) -> Result<()> {
        self.stats.contexts.fetch_add(1, Ordering::SeqCst);
        self.context = Some(image.dimensions());
        Ok(())
    }

    fn predict(&mut self, prompt: &BoundingBox) -> Result<Mask> {
        self.stats.predictions.fetch_add(1, Ordering::SeqCst);
        if self.stats.take_failure() {
            return Err(LeafSamError::ResourceExhausted {
                message: "CUDA out of memory. Tried to allocate 1.50 GiB".to_string(),
            });
        }
        if !self.predict_delay.is_zero() {
            thread::sleep(self.predict_delay);
        }

        let (width, height) = self
            .context
            .ok_or_else(|| LeafSamError::model("mock predict", "no active context"))?;
        Ok(Mask::from_fn(width, height, |x, y| {
            let (x, y) = (x as f32, y as f32);
            let inside = x >= prompt.x1 && x < prompt.x2 && y >= prompt.y1 && y < prompt.y2;
            Luma([if inside { 255 } else { 0 }])
        }))
    }

    fn device(&self) -> Device {
        self.device
    }

    fn release_cache(&mut self) {
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
        self.context = None;
    }
}

/// テスト用のモック分類器：常に同じクラスを最有力として返す
#[derive(Debug, Clone)]
pub struct MockClassifier {
    pub input_size: u32,
    pub num_classes: usize,
    pub winner: usize,
}

impl MockClassifier {
    pub const fn new(num_classes: usize, winner: usize) -> Self {
        Self {
            input_size: 256,
            num_classes,
            winner,
        }
    }
}

impl LeafClassifier for MockClassifier {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn predict(&self, batch: ArrayView4<f32>) -> Result<Array2<f32>> {
        let mut scores = Array2::<f32>::from_elem((batch.shape()[0], self.num_classes), 0.01);
        scores.column_mut(self.winner).fill(0.9);
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_oracle_requires_context() {
        let mut mock = MockOracle::new(Device::Cpu);
        let result = mock.predict(&BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert!(matches!(result, Err(LeafSamError::Model { .. })));
    }

    #[test]
    fn test_mock_oracle_fills_box() -> Result<()> {
        let mut mock = MockOracle::new(Device::Cpu);
        mock.set_context(&RgbImage::new(10, 10))?;
        let mask = mock.predict(&BoundingBox::new(2.0, 2.0, 5.0, 5.0))?;

        assert_eq!(mask.get_pixel(3, 3), &Luma([255]));
        assert_eq!(mask.get_pixel(6, 6), &Luma([0]));
        Ok(())
    }

    #[test]
    fn test_mock_classifier_scores() -> Result<()> {
        let mock = MockClassifier::new(21, 5);
        let scores = mock.predict(Array4::<f32>::zeros((2, 256, 256, 3)).view())?;
        assert_eq!(scores.shape(), &[2, 21]);
        assert_eq!(scores[[1, 5]], 0.9);
        Ok(())
    }
}
