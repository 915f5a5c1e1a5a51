use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use leaf_sam_rs::artifact::Artifact;
use leaf_sam_rs::classifier::{resolve_input, DISEASES};
use leaf_sam_rs::mocks::MockClassifier;
use leaf_sam_rs::{LeafDiagnoser, LeafSamError};

fn write_leaf(path: &Path) {
    RgbImage::from_pixel(32, 24, Rgb([40, 160, 60]))
        .save(path)
        .unwrap();
}

#[test]
fn test_diagnose_single_sample() {
    let temp_dir = TempDir::new().unwrap();
    let sample_dir = temp_dir.path().join("test");
    fs::create_dir_all(&sample_dir).unwrap();
    write_leaf(&sample_dir.join("CornCommonRust1.JPG"));

    // Corn_(maize)___Common_rust
    let diagnoser = LeafDiagnoser::new(MockClassifier::new(DISEASES.len(), 5));
    let path = resolve_input("CornCommonRust1", &sample_dir);
    let diagnosis = diagnoser.diagnose_file(&path).unwrap();

    assert_eq!(diagnosis.label, "Corn_(maize)___Common_rust");
    assert_eq!(diagnosis.to_string(), "corn_(maize),common_rust");
    assert!(!diagnosis.is_healthy());
}

#[test]
fn test_resolve_input_rules() {
    let sample_dir = Path::new("test");
    assert_eq!(
        resolve_input("PotatoHealthy1", sample_dir),
        PathBuf::from("test/PotatoHealthy1.JPG")
    );
    assert_eq!(
        resolve_input("PotatoHealthy1.JPG", sample_dir),
        PathBuf::from("test/PotatoHealthy1.JPG")
    );
    assert_eq!(
        resolve_input("photos/leaf.png", sample_dir),
        PathBuf::from("photos/leaf.png")
    );
}

#[test]
fn test_diagnose_directory() {
    let temp_dir = TempDir::new().unwrap();
    let nested = temp_dir.path().join("field").join("row2");
    fs::create_dir_all(&nested).unwrap();
    write_leaf(&temp_dir.path().join("b.png"));
    write_leaf(&nested.join("a.png"));
    fs::write(temp_dir.path().join("broken.jpg"), b"truncated").unwrap();
    fs::write(temp_dir.path().join("readme.txt"), b"notes").unwrap();

    let healthy = DISEASES.len() - 1;
    let diagnoser = LeafDiagnoser::new(MockClassifier::new(DISEASES.len(), healthy));
    let results = diagnoser.diagnose_directory(temp_dir.path()).unwrap();

    let paths: Vec<_> = results.iter().map(|(p, _)| p.clone()).collect();
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);
    assert_eq!(results.len(), 3);

    let ok: Vec<_> = results
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok())
        .collect();
    assert_eq!(ok.len(), 2);
    assert!(ok.iter().all(|d| d.is_healthy() && d.plant == "Tomato"));

    let broken = results
        .iter()
        .find(|(p, _)| p.ends_with("broken.jpg"))
        .unwrap();
    assert!(broken.1.is_err());
}

#[test]
fn test_diagnose_directory_requires_directory() {
    let temp_dir = TempDir::new().unwrap();
    let diagnoser = LeafDiagnoser::new(MockClassifier::new(DISEASES.len(), 0));
    let result = diagnoser.diagnose_directory(&temp_dir.path().join("missing"));
    assert!(matches!(result, Err(LeafSamError::FileSystem { .. })));
}

#[test]
fn test_checkpoint_without_source_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let artifact = Artifact::new(temp_dir.path().join("pd_densenet201_6.onnx"));
    let err = artifact.ensure().unwrap_err();
    assert!(err.to_string().contains("no download URL"));
}
