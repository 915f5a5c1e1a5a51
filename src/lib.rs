pub mod artifact;
pub mod bbox;
pub mod classifier;
pub mod config;
pub mod device;
pub mod errors;
pub mod imageops;
pub mod logging;
pub mod mocks;
pub mod model;
pub mod oracle;
pub mod render;
pub mod server;
pub mod traits;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub use bbox::BoundingBox;
pub use classifier::{Diagnosis, DiseaseModel};
pub use config::{Cli, Command, DiagnoseConfig, ServeConfig};
pub use device::Device;
pub use errors::{LeafSamError, Result};
pub use model::SamModel;
pub use oracle::OracleHandle;
pub use traits::*;

/// Runs a leaf classifier over single files or whole directory trees.
pub struct LeafDiagnoser<C: LeafClassifier> {
    classifier: C,
}

impl<C: LeafClassifier> LeafDiagnoser<C> {
    pub const fn new(classifier: C) -> Self {
        Self { classifier }
    }

    pub fn diagnose_file(&self, path: &Path) -> Result<Diagnosis> {
        if !path.is_file() {
            return Err(LeafSamError::FileSystem {
                path: path.to_path_buf(),
                operation: "open image".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "The file could not be found",
                ),
            });
        }

        let img = image::open(path).map_err(|e| LeafSamError::ImageProcessing {
            operation: format!("read {}", path.display()),
            source: Box::new(e),
        })?;
        classifier::diagnose(&self.classifier, &img)
    }

    /// Classifies every supported image under `input_dir` in parallel.
    /// Results come back sorted by path; unreadable files are reported as errors.
    pub fn diagnose_directory(
        &self,
        input_dir: &Path,
    ) -> Result<Vec<(PathBuf, Result<Diagnosis>)>> {
        if !input_dir.is_dir() {
            return Err(LeafSamError::FileSystem {
                path: input_dir.to_path_buf(),
                operation: "read directory".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Input directory does not exist",
                ),
            });
        }

        let mut image_files = collect_image_files(input_dir);
        image_files.sort();

        let pb = ProgressBar::new(image_files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let results = image_files
            .into_par_iter()
            .map(|path| {
                let diagnosis = self.diagnose_file(&path);
                pb.inc(1);
                (path, diagnosis)
            })
            .collect();

        pb.finish_and_clear();
        Ok(results)
    }
}

fn collect_image_files(input_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported_image_format(e.path()))
        .map(|e| e.into_path())
        .collect()
}

pub fn is_supported_image_format(path: &Path) -> bool {
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        matches!(
            extension.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif" | "tiff" | "avif"
        )
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockClassifier;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_supported_formats() {
        let test_cases = vec![
            ("test.jpg", true),
            ("test.JPG", true),
            ("test.jpeg", true),
            ("test.png", true),
            ("test.webp", true),
            ("test.txt", false),
            ("test", false),
        ];

        for (filename, expected) in test_cases {
            assert_eq!(is_supported_image_format(Path::new(filename)), expected);
        }
    }

    #[test]
    fn test_missing_file_is_reported() {
        let diagnoser = LeafDiagnoser::new(MockClassifier::new(classifier::DISEASES.len(), 0));
        let result = diagnoser.diagnose_file(Path::new("test/NoSuchLeaf.JPG"));
        assert!(matches!(result, Err(LeafSamError::FileSystem { .. })));
    }

    #[test]
    fn test_collect_skips_non_images() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let nested = temp_dir.path().join("nested");
        fs::create_dir_all(&nested)?;
        fs::write(temp_dir.path().join("notes.txt"), b"not an image")?;
        image::RgbImage::new(4, 4).save(nested.join("leaf.png"))?;

        let files = collect_image_files(temp_dir.path());
        assert_eq!(files, vec![nested.join("leaf.png")]);
        Ok(())
    }
}
