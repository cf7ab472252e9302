//! Optical recognition of rasterized regions.
//!
//! [`OcrEngine`] is the seam the region extractor calls through;
//! [`TesseractCli`] drives an installed `tesseract` binary.

use pdf_engine::RgbaImage;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Tesseract engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Executable to run; resolved through `PATH` when not absolute.
    pub tesseract_bin: PathBuf,

    /// Path to the tessdata directory; Tesseract's default when unset.
    pub tessdata_path: Option<PathBuf>,

    /// OCR engine mode (0=Legacy, 1=LSTM, 2=Legacy+LSTM, 3=Default)
    pub engine_mode: u8,

    /// Page segmentation mode (3=Auto, 6=Single uniform block, ...)
    pub page_segmentation_mode: u8,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_bin: PathBuf::from("tesseract"),
            tessdata_path: None,
            engine_mode: 3,
            page_segmentation_mode: 6,
        }
    }
}

impl OcrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tesseract_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.tesseract_bin = path.into();
        self
    }

    pub fn with_tessdata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tessdata_path = Some(path.into());
        self
    }

    pub fn with_engine_mode(mut self, mode: u8) -> Self {
        self.engine_mode = mode;
        self
    }

    pub fn with_page_segmentation_mode(mut self, mode: u8) -> Self {
        self.page_segmentation_mode = mode;
        self
    }

    /// Recognition parameters for one call in `language`.
    pub fn request(&self, language: impl Into<String>) -> OcrRequest {
        OcrRequest {
            language: language.into(),
            engine_mode: self.engine_mode,
            page_segmentation_mode: self.page_segmentation_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrRequest {
    pub language: String,
    pub engine_mode: u8,
    pub page_segmentation_mode: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    #[error("OCR failed: {0}")]
    Failed(String),
}

/// A recognizer that can be shared between extraction workers.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &RgbaImage, request: &OcrRequest) -> Result<String, OcrError>;
}

/// Runs `tesseract <png> stdout ...` once per region.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
    tessdata_path: Option<PathBuf>,
}

impl TesseractCli {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self { binary: config.tesseract_bin.clone(), tessdata_path: config.tessdata_path.clone() }
    }

    pub fn command_args(&self, input: &Path, request: &OcrRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            input.as_os_str().to_owned(),
            "stdout".into(),
            "-l".into(),
            request.language.as_str().into(),
            "--oem".into(),
            request.engine_mode.to_string().into(),
            "--psm".into(),
            request.page_segmentation_mode.to_string().into(),
        ];
        if let Some(tessdata) = &self.tessdata_path {
            args.push("--tessdata-dir".into());
            args.push(tessdata.as_os_str().to_owned());
        }
        args
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image: &RgbaImage, request: &OcrRequest) -> Result<String, OcrError> {
        let input = tempfile::Builder::new()
            .prefix("pagecarve-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|err| OcrError::Failed(format!("failed to create temp file: {err}")))?;
        image
            .save_with_format(input.path(), image::ImageFormat::Png)
            .map_err(|err| OcrError::Failed(format!("failed to write region image: {err}")))?;

        tracing::debug!(
            binary = %self.binary.display(),
            language = %request.language,
            psm = request.page_segmentation_mode,
            width = image.width(),
            height = image.height(),
            "running tesseract"
        );

        let output = Command::new(&self.binary)
            .args(self.command_args(input.path(), request))
            .output()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => OcrError::Unavailable(format!(
                    "`{}` not found; install Tesseract or set PAGECARVE_TESSERACT_BIN",
                    self.binary.display()
                )),
                _ => OcrError::Failed(format!("failed to run {}: {err}", self.binary.display())),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}
