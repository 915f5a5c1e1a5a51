use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;

use crate::bbox::BoundingBox;
use crate::device::Device;
use crate::errors::Result;
use crate::traits::{Mask, SegmentationOracle};

/// Shared handle to the single oracle instance of the process.
///
/// Every request goes through [`OracleHandle::segment`], which holds the lock
/// across "set context, then predict" so one request's image can never be
/// swapped out from under another request's prompt.
#[derive(Clone)]
pub struct OracleHandle {
    oracle: Arc<Mutex<Box<dyn SegmentationOracle>>>,
    device: Device,
}

impl OracleHandle {
    pub fn new<O: SegmentationOracle + 'static>(oracle: O) -> Self {
        let device = oracle.device();
        Self {
            oracle: Arc::new(Mutex::new(Box::new(oracle))),
            device,
        }
    }

    pub const fn device(&self) -> Device {
        self.device
    }

    /// Runs one prompt against `image`. Blocks while another request holds
    /// the oracle, so call it from a blocking-capable thread.
    pub fn segment(&self, image: &RgbImage, prompt: &BoundingBox) -> Result<Mask> {
        let mut oracle = self.oracle.lock();
        let mut session = CacheRelease {
            oracle: &mut *oracle,
        };
        session.oracle.set_context(image)?;
        session.oracle.predict(prompt)
    }
}

/// Releases the oracle's device cache when dropped, on every exit path.
struct CacheRelease<'a> {
    oracle: &'a mut Box<dyn SegmentationOracle>,
}

impl Drop for CacheRelease<'_> {
    fn drop(&mut self) {
        self.oracle.release_cache();
        tracing::debug!(device = %self.oracle.device(), "oracle cache released");
    }
}
