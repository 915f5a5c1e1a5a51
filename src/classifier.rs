use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::{LeafSamError, Result};
use crate::traits::LeafClassifier;
use image::{imageops::FilterType, DynamicImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;

/// Classes of the leaf disease model, in output order. Each label is
/// `Plant___Disease`.
pub const DISEASES: [&str; 21] = [
    "Apple___Apple_scab",
    "Apple___Black_rot",
    "Apple___Cedar_apple_rust",
    "Apple___healthy",
    "Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot",
    "Corn_(maize)___Common_rust",
    "Corn_(maize)___Northern_Leaf_Blight",
    "Corn_(maize)___healthy",
    "Potato___Early_blight",
    "Potato___Late_blight",
    "Potato___healthy",
    "Tomato___Bacterial_spot",
    "Tomato___Early_blight",
    "Tomato___Late_blight",
    "Tomato___Leaf_Mold",
    "Tomato___Septoria_leaf_spot",
    "Tomato___Spider_mites Two-spotted_spider_mite",
    "Tomato___Target_Spot",
    "Tomato___Tomato_Yellow_Leaf_Curl_Virus",
    "Tomato___Tomato_mosaic_virus",
    "Tomato___healthy",
];

const LABEL_SEPARATOR: &str = "___";
const SAMPLE_EXTENSION: &str = ".JPG";

/// Predicted class for one leaf photo.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub label: &'static str,
    pub plant: &'static str,
    pub disease: &'static str,
    pub score: f32,
}

impl Diagnosis {
    pub fn from_class(index: usize, score: f32) -> Result<Self> {
        let label = DISEASES.get(index).copied().ok_or_else(|| {
            LeafSamError::model(
                "class lookup",
                format!("class index {index} is outside the {} known labels", DISEASES.len()),
            )
        })?;
        let (plant, disease) = label
            .split_once(LABEL_SEPARATOR)
            .unwrap_or((label, "unknown"));
        Ok(Self {
            label,
            plant,
            disease,
            score,
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.disease == "healthy"
    }
}

/// `plant,disease` in lowercase, the format downstream tooling parses.
impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}",
            self.plant.to_lowercase(),
            self.disease.to_lowercase()
        )
    }
}

/// Resolves a CLI argument to an image path. A bare name (no `/`) refers to a
/// bundled sample: `.JPG` is appended when missing and the name is looked up in
/// `sample_dir`.
pub fn resolve_input(input: &str, sample_dir: &Path) -> PathBuf {
    if input.contains('/') {
        return PathBuf::from(input);
    }
    let name = if input.contains(SAMPLE_EXTENSION) {
        input.to_string()
    } else {
        format!("{input}{SAMPLE_EXTENSION}")
    };
    sample_dir.join(name)
}

/// NHWC batch of one: RGB resized to `size`×`size`, scaled to `[0, 1]`.
pub fn preprocess(image: &DynamicImage, size: u32) -> Array4<f32> {
    let rgb = image
        .resize_exact(size, size, FilterType::Triangle)
        .into_rgb8();
    rgb.as_ndarray3()
        .permuted_axes([1, 2, 0])
        .mapv(|v| f32::from(v) / 255.0)
        .insert_axis(Axis(0))
}

/// Runs `classifier` on one image and picks the highest scoring class.
pub fn diagnose<C: LeafClassifier + ?Sized>(
    classifier: &C,
    image: &DynamicImage,
) -> Result<Diagnosis> {
    let batch = preprocess(image, classifier.input_size());
    let scores = classifier.predict(batch.view())?;
    let row = scores.index_axis(Axis(0), 0);
    let (index, score) = row
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
            Some((_, top)) if top >= s => best,
            _ => Some((i, s)),
        })
        .ok_or_else(|| LeafSamError::model("classification", "model returned no class scores"))?;
    Diagnosis::from_class(index, score)
}

/// Leaf disease classifier exported to ONNX (NHWC float input).
pub struct DiseaseModel {
    pub image_size: u32,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl DiseaseModel {
    pub fn new(model_path: &Path, image_size: u32) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| LeafSamError::model("session builder", e))?
            .commit_from_file(model_path)
            .map_err(|e| {
                LeafSamError::model(format!("classifier load: {}", model_path.display()), e)
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| LeafSamError::model("classifier inputs", "model declares no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| LeafSamError::model("classifier outputs", "model declares no outputs"))?;

        Ok(Self {
            image_size,
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl LeafClassifier for DiseaseModel {
    fn input_size(&self) -> u32 {
        self.image_size
    }

    fn predict(&self, batch: ArrayView4<f32>) -> Result<Array2<f32>> {
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(batch.as_standard_layout().view())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix2>()?
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockClassifier;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_labels_split_into_plant_and_disease() -> Result<()> {
        let diagnosis = Diagnosis::from_class(5, 0.8)?;
        assert_eq!(diagnosis.plant, "Corn_(maize)");
        assert_eq!(diagnosis.disease, "Common_rust");
        assert_eq!(diagnosis.to_string(), "corn_(maize),common_rust");
        assert!(!diagnosis.is_healthy());

        assert!(Diagnosis::from_class(20, 0.9)?.is_healthy());
        Ok(())
    }

    #[test]
    fn test_out_of_range_class() {
        assert!(Diagnosis::from_class(DISEASES.len(), 1.0).is_err());
    }

    #[test]
    fn test_resolve_input() {
        let samples = Path::new("test");
        assert_eq!(
            resolve_input("CornCommonRust1", samples),
            Path::new("test/CornCommonRust1.JPG")
        );
        assert_eq!(
            resolve_input("AppleScab2.JPG", samples),
            Path::new("test/AppleScab2.JPG")
        );
        assert_eq!(
            resolve_input("photos/leaf.png", samples),
            Path::new("photos/leaf.png")
        );
    }

    #[test]
    fn test_preprocess_layout() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([255, 0, 51])));
        let batch = preprocess(&image, 16);

        assert_eq!(batch.shape(), &[1, 16, 16, 3]);
        assert!((batch[[0, 3, 3, 0]] - 1.0).abs() < 0.01);
        assert!((batch[[0, 3, 3, 2]] - 0.2).abs() < 0.01);
    }

    #[test]
    fn test_diagnose_picks_argmax() -> Result<()> {
        let classifier = MockClassifier::new(DISEASES.len(), 13);
        let image = DynamicImage::new_rgb8(300, 200);

        let diagnosis = diagnose(&classifier, &image)?;
        assert_eq!(diagnosis.label, "Tomato___Late_blight");
        assert_eq!(diagnosis.score, 0.9);
        Ok(())
    }
}
