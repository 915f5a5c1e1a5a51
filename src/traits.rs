use crate::bbox::BoundingBox;
use crate::device::Device;
use crate::errors::Result;
use image::{GrayImage, RgbImage};
use ndarray::prelude::*;

/// Binary segmentation mask. Non-zero pixels are foreground.
pub type Mask = GrayImage;

/// Promptable segmentation backend.
///
/// The backend holds one "active image" context: `set_context` replaces it and
/// `predict` answers box prompts against it. The two calls form one protocol
/// step, so callers sharing an oracle must hold exclusive access across both
/// (see [`crate::oracle::OracleHandle`]).
pub trait SegmentationOracle: Send {
    /// Make `image` the active context for subsequent prompts.
    fn set_context(&mut self, image: &RgbImage) -> Result<()>;

    /// Predict a single mask for `prompt`, sized like the active context.
    fn predict(&mut self, prompt: &BoundingBox) -> Result<Mask>;

    /// Device the oracle runs on. Fixed for the oracle's lifetime.
    fn device(&self) -> Device;

    /// Drop any per-request state held on the device.
    fn release_cache(&mut self) {}
}

/// Image classifier over NHWC batches.
pub trait LeafClassifier: Send + Sync {
    /// Square input edge length expected by the model.
    fn input_size(&self) -> u32;

    /// Class scores with shape `[batch, classes]`.
    fn predict(&self, batch: ArrayView4<f32>) -> Result<Array2<f32>>;
}
