use std::path::Path;

use crate::{
    bbox::BoundingBox,
    device::Device,
    errors::{LeafSamError, Result},
    imageops::letterbox::fit_longest_side,
    traits::{Mask, SegmentationOracle},
};
use image::{Luma, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::execution_providers::{
    CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

/// Edge length of the square encoder input.
pub const ENCODER_SIZE: u32 = 1024;
/// Edge length of the low-resolution mask prompt accepted by the decoder.
pub const MASK_INPUT_SIZE: usize = 256;

const PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// Prompt point labels understood by the SAM decoder for box corners.
const BOX_TOP_LEFT_LABEL: f32 = 2.0;
const BOX_BOTTOM_RIGHT_LABEL: f32 = 3.0;

/// Mask logits above this value are foreground.
const MASK_THRESHOLD: f32 = 0.0;

/// Encoder output for the active image.
struct ImageContext {
    embeddings: Array4<f32>,
    width: u32,
    height: u32,
    scale: f32,
}

/// Segment Anything exported as an ONNX encoder/decoder pair.
pub struct SamModel {
    encoder: Session,
    decoder: Session,
    device: Device,
    context: Option<ImageContext>,
}

impl SamModel {
    pub fn new(encoder_path: &Path, decoder_path: &Path, device_id: i32) -> Result<Self> {
        require_model(encoder_path, "encoder")?;
        require_model(decoder_path, "decoder")?;

        let cuda = CUDAExecutionProvider::default().with_device_id(device_id);
        let device = match cuda.is_available() {
            Ok(true) => Device::Gpu,
            _ => Device::Cpu,
        };
        tracing::info!(%device, device_id, "loading segment anything sessions");

        let encoder = build_session(encoder_path, device, device_id, "encoder")?;
        let decoder = build_session(decoder_path, device, device_id, "decoder")?;

        Ok(Self {
            encoder,
            decoder,
            device,
            context: None,
        })
    }
}

fn require_model(path: &Path, role: &str) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    Err(LeafSamError::Configuration {
        message: format!("{role} model not found at {}", path.display()),
    })
}

/// TensorRT first, CUDA as the fallback; ort drops to CPU when neither registers.
fn accelerator_providers(device_id: i32) -> [ExecutionProviderDispatch; 2] {
    [
        TensorRTExecutionProvider::default()
            .with_device_id(device_id)
            .build(),
        CUDAExecutionProvider::default()
            .with_device_id(device_id)
            .build(),
    ]
}

fn build_session(path: &Path, device: Device, device_id: i32, role: &str) -> Result<Session> {
    let mut builder = Session::builder()
        .map_err(|e| LeafSamError::model(format!("{role} session builder"), e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| LeafSamError::model(format!("{role} optimization level"), e))?;

    if device.is_accelerated() {
        builder = builder
            .with_execution_providers(accelerator_providers(device_id))
            .map_err(|e| LeafSamError::model(format!("{role} execution provider"), e))?;
    }

    builder
        .commit_from_file(path)
        .map_err(|e| LeafSamError::model(format!("{role} load: {}", path.display()), e))
}

impl SegmentationOracle for SamModel {
    fn set_context(&mut self, image: &RgbImage) -> Result<()> {
        let (width, height) = image.dimensions();
        let (tensor, scale) = preprocess(image, ENCODER_SIZE);

        let outputs = self
            .encoder
            .run(ort::inputs!["image" => TensorRef::from_array_view(tensor.view())?])?;
        let embeddings = outputs["image_embeddings"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();

        self.context = Some(ImageContext {
            embeddings,
            width,
            height,
            scale,
        });
        Ok(())
    }

    fn predict(&mut self, prompt: &BoundingBox) -> Result<Mask> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| LeafSamError::model("decoder", "predict called without an image context"))?;

        let corners = prompt.scaled(context.scale);
        let point_coords = Array3::from_shape_vec(
            (1, 2, 2),
            vec![corners.x1, corners.y1, corners.x2, corners.y2],
        )?;
        let point_labels = array![[BOX_TOP_LEFT_LABEL, BOX_BOTTOM_RIGHT_LABEL]];
        let mask_input = Array4::<f32>::zeros((1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE));
        let has_mask_input = array![0.0f32];
        let orig_im_size = array![context.height as f32, context.width as f32];

        let outputs = self.decoder.run(ort::inputs![
            "image_embeddings" => TensorRef::from_array_view(context.embeddings.view())?,
            "point_coords" => TensorRef::from_array_view(point_coords.view())?,
            "point_labels" => TensorRef::from_array_view(point_labels.view())?,
            "mask_input" => TensorRef::from_array_view(mask_input.view())?,
            "has_mask_input" => TensorRef::from_array_view(has_mask_input.view())?,
            "orig_im_size" => TensorRef::from_array_view(orig_im_size.view())?
        ])?;
        let logits = outputs["masks"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?;

        threshold_mask(logits.slice(s![0, 0, .., ..]), context.width, context.height)
    }

    fn device(&self) -> Device {
        self.device
    }

    fn release_cache(&mut self) {
        self.context = None;
    }
}

/// Encoder input: longest side resized to `size`, normalised with the SAM
/// pixel statistics, zero-padded at the bottom/right to a square.
pub fn preprocess(image: &RgbImage, size: u32) -> (Array4<f32>, f32) {
    let (resized, scale) = fit_longest_side(image, size);
    let (w, h) = resized.dimensions();
    let chw = resized.as_ndarray3();

    let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (channel, (mean, std)) in PIXEL_MEAN.iter().zip(PIXEL_STD.iter()).enumerate() {
        tensor
            .slice_mut(s![0, channel, ..h as usize, ..w as usize])
            .assign(&chw.index_axis(Axis(0), channel).mapv(|v| (f32::from(v) - mean) / std));
    }
    (tensor, scale)
}

/// Turns a `[height, width]` logit plane into a binary mask.
pub fn threshold_mask(logits: ArrayView2<f32>, width: u32, height: u32) -> Result<Mask> {
    let (rows, cols) = logits.dim();
    if (rows, cols) != (height as usize, width as usize) {
        return Err(LeafSamError::model(
            "mask postprocess",
            format!("decoder returned {cols}x{rows} mask for {width}x{height} image"),
        ));
    }
    Ok(Mask::from_fn(width, height, |x, y| {
        let logit = logits[[y as usize, x as usize]];
        Luma([if logit > MASK_THRESHOLD { 255 } else { 0 }])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_missing_encoder_is_configuration_error() {
        let result = SamModel::new(
            Path::new("no/such/encoder.onnx"),
            Path::new("no/such/decoder.onnx"),
            0,
        );
        assert!(matches!(
            result,
            Err(LeafSamError::Configuration { ref message }) if message.starts_with("encoder")
        ));
    }

    #[test]
    fn test_tensorrt_registered_ahead_of_cuda() {
        let providers = accelerator_providers(0).map(|p| format!("{p:?}"));
        assert!(providers[0].starts_with("TensorrtExecutionProvider"));
        assert!(providers[1].starts_with("CUDAExecutionProvider"));
    }

    #[test]
    fn test_preprocess_normalises_and_pads() {
        let image = RgbImage::from_pixel(64, 32, Rgb([124, 116, 104]));
        let (tensor, scale) = preprocess(&image, 128);

        assert_eq!(tensor.shape(), &[1, 3, 128, 128]);
        assert_eq!(scale, 2.0);
        // 画像領域は正規化済み、パディング領域はゼロ
        assert!((tensor[[0, 0, 10, 10]] - (124.0 - 123.675) / 58.395).abs() < 0.05);
        assert_eq!(tensor[[0, 1, 100, 10]], 0.0);
    }

    #[test]
    fn test_threshold_mask() -> Result<()> {
        let logits = array![[-1.0f32, 0.5, 2.0], [0.0, -3.0, 0.1]];
        let mask = threshold_mask(logits.view(), 3, 2)?;

        assert_eq!(mask.dimensions(), (3, 2));
        assert_eq!(mask.get_pixel(0, 0), &Luma([0]));
        assert_eq!(mask.get_pixel(1, 0), &Luma([255]));
        assert_eq!(mask.get_pixel(0, 1), &Luma([0]));
        assert_eq!(mask.get_pixel(2, 1), &Luma([255]));
        Ok(())
    }

    #[test]
    fn test_threshold_mask_rejects_wrong_shape() {
        let logits = Array2::<f32>::zeros((4, 4));
        assert!(threshold_mask(logits.view(), 3, 4).is_err());
    }
}
