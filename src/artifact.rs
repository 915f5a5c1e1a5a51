use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

use crate::errors::{LeafSamError, Result};

/// A model checkpoint on disk, optionally backed by a download URL.
///
/// Integrity is checked by byte size only: enough to catch truncated
/// downloads, not tampering.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub url: Option<String>,
    pub expected_size: Option<u64>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            url: None,
            expected_size: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub const fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Whether the file exists and matches the expected size, if one is set.
    pub fn is_intact(&self) -> Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(self.expected_size.map_or(true, |size| meta.len() == size)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LeafSamError::FileSystem {
                path: self.path.clone(),
                operation: "checkpoint metadata".to_string(),
                source: e,
            }),
        }
    }

    /// Makes sure the checkpoint is on disk, downloading it when missing or
    /// the wrong size.
    pub fn ensure(&self) -> Result<&Path> {
        if self.is_intact()? {
            tracing::debug!(path = %self.path.display(), "checkpoint present");
            return Ok(&self.path);
        }

        let url = self.url.as_deref().ok_or_else(|| LeafSamError::Artifact {
            path: self.path.clone(),
            reason: if self.path.exists() {
                "has an unexpected size and no download URL is configured".to_string()
            } else {
                "does not exist and no download URL is configured".to_string()
            },
        })?;

        self.download(url)?;
        Ok(&self.path)
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".part");
        PathBuf::from(name)
    }

    fn download(&self, url: &str) -> Result<()> {
        tracing::info!(url, path = %self.path.display(), "downloading checkpoint");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LeafSamError::FileSystem {
                path: parent.to_path_buf(),
                operation: "create checkpoint directory".to_string(),
                source: e,
            })?;
        }

        let response = reqwest::blocking::get(url)?.error_for_status()?;
        let total = response.content_length().or(self.expected_size);

        let progress_bar = match total {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::new_spinner(),
        };
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        ) {
            progress_bar.set_style(style.progress_chars("#>-"));
        }

        let partial = self.partial_path();
        let written = self.write_partial(&partial, progress_bar.wrap_read(response));
        progress_bar.finish_and_clear();

        let written = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
        };

        if let Some(expected) = self.expected_size {
            if written != expected {
                let _ = fs::remove_file(&partial);
                return Err(LeafSamError::Artifact {
                    path: self.path.clone(),
                    reason: format!("download is {written} bytes, expected {expected}"),
                });
            }
        }

        fs::rename(&partial, &self.path).map_err(|e| LeafSamError::FileSystem {
            path: self.path.clone(),
            operation: "move checkpoint into place".to_string(),
            source: e,
        })?;
        tracing::info!(bytes = written, path = %self.path.display(), "checkpoint downloaded");
        Ok(())
    }

    fn write_partial(&self, partial: &Path, mut reader: impl io::Read) -> Result<u64> {
        let file = File::create(partial).map_err(|e| LeafSamError::FileSystem {
            path: partial.to_path_buf(),
            operation: "create partial checkpoint".to_string(),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        let written = io::copy(&mut reader, &mut writer)
            .and_then(|n| writer.flush().map(|()| n))
            .map_err(|e| LeafSamError::FileSystem {
                path: partial.to_path_buf(),
                operation: "write checkpoint".to_string(),
                source: e,
            })?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_present_checkpoint_is_used() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("model.onnx");
        fs::write(&path, vec![0u8; 128])?;

        let artifact = Artifact::new(&path).with_expected_size(128);
        assert!(artifact.is_intact()?);
        assert_eq!(artifact.ensure()?, path.as_path());
        Ok(())
    }

    #[test]
    fn test_size_mismatch_without_url_fails() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("model.onnx");
        fs::write(&path, vec![0u8; 100])?;

        let artifact = Artifact::new(&path).with_expected_size(128);
        assert!(!artifact.is_intact()?);
        let err = artifact.ensure().unwrap_err();
        assert!(err.to_string().contains("unexpected size"));
        Ok(())
    }

    #[test]
    fn test_missing_checkpoint_without_url_fails() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let artifact = Artifact::new(temp_dir.path().join("absent.onnx"));

        assert!(!artifact.is_intact()?);
        assert!(matches!(
            artifact.ensure(),
            Err(LeafSamError::Artifact { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_partial_path() {
        let artifact = Artifact::new("weights/pd_densenet201_6.onnx");
        assert_eq!(
            artifact.partial_path(),
            PathBuf::from("weights/pd_densenet201_6.onnx.part")
        );
    }
}
