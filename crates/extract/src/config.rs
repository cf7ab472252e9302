use crate::block_sort::ROW_TOLERANCE;
use crate::ocr::OcrConfig;
use crate::quality::QualityThresholds;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_TESSERACT_BIN: &str = "PAGECARVE_TESSERACT_BIN";
pub const ENV_TESSDATA_DIR: &str = "PAGECARVE_TESSDATA_DIR";
pub const ENV_OCR_PSM: &str = "PAGECARVE_OCR_PSM";
pub const ENV_ROW_TOLERANCE: &str = "PAGECARVE_ROW_TOLERANCE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue { key: key.to_owned(), reason: reason.into() }
    }
}

/// Process-level extraction tuning. Per-document settings (DPI, language,
/// text-layer preference) live in the annotation document instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub quality: QualityThresholds,
    pub row_tolerance: f64,
    pub cleanup: bool,
    pub parallel: bool,
    pub ocr: OcrConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            quality: QualityThresholds::default(),
            row_tolerance: ROW_TOLERANCE,
            cleanup: true,
            parallel: true,
            ocr: OcrConfig::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn with_quality(mut self, quality: QualityThresholds) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_row_tolerance(mut self, tolerance: f64) -> Self {
        self.row_tolerance = tolerance;
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_ocr(mut self, ocr: OcrConfig) -> Self {
        self.ocr = ocr;
        self
    }

    /// `config.json` in the platform configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "PageCarve", "PageCarve")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Defaults, overlaid by `explicit` (or the default config file when it
    /// exists), overlaid by the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::from_json_file(path)?,
            None => match Self::default_path().filter(|path| path.is_file()) {
                Some(path) => Self::from_json_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes =
            fs::read(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        tracing::debug!(path = %path.display(), "loaded extraction config");
        config.validate()?;
        Ok(config)
    }

    /// Applies `PAGECARVE_*` overrides read through `lookup`.
    pub fn apply_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(bin) = lookup(ENV_TESSERACT_BIN).filter(|value| !value.trim().is_empty()) {
            self.ocr.tesseract_bin = PathBuf::from(bin);
        }
        if let Some(dir) = lookup(ENV_TESSDATA_DIR).filter(|value| !value.trim().is_empty()) {
            self.ocr.tessdata_path = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(ENV_OCR_PSM) {
            self.ocr.page_segmentation_mode = raw.trim().parse().map_err(|_| {
                ConfigError::invalid(ENV_OCR_PSM, format!("`{raw}` is not a number"))
            })?;
        }
        if let Some(raw) = lookup(ENV_ROW_TOLERANCE) {
            self.row_tolerance = raw.trim().parse().map_err(|_| {
                ConfigError::invalid(ENV_ROW_TOLERANCE, format!("`{raw}` is not a number"))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.row_tolerance.is_finite() || self.row_tolerance <= 0.0 {
            return Err(ConfigError::invalid(
                "row_tolerance",
                format!("must be a positive number, got {}", self.row_tolerance),
            ));
        }
        if self.ocr.page_segmentation_mode > 13 {
            return Err(ConfigError::invalid(
                "ocr.page_segmentation_mode",
                format!("must be between 0 and 13, got {}", self.ocr.page_segmentation_mode),
            ));
        }
        if self.ocr.engine_mode > 3 {
            return Err(ConfigError::invalid(
                "ocr.engine_mode",
                format!("must be between 0 and 3, got {}", self.ocr.engine_mode),
            ));
        }

        let ratios = [
            ("quality.min_clean_ratio", self.quality.min_clean_ratio),
            ("quality.max_isolated_ratio", self.quality.max_isolated_ratio),
        ];
        for (key, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(key, format!("must be within 0..=1, got {value}")));
            }
        }

        Ok(())
    }
}
