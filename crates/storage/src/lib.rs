use directories::ProjectDirs;
use doc_model::{AnnotationDocument, Settings};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Highest sidecar schema major version this build reads.
pub const SUPPORTED_SCHEMA_MAJOR: u32 = 1;

const SIDECAR_SUFFIX: &str = "annotations.json";
const ARTIFACT_SUFFIX: &str = "articles.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("no annotation sidecar at {}", .0.display())]
    NotFound(PathBuf),
    #[error("sidecar schema version {found} is newer than supported major version {supported}")]
    UnsupportedSchema { found: String, supported: u32 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Where sidecars live relative to their source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarLocation {
    /// `<dir>/<stem>.annotations.json` next to the source.
    BesideSource,
    /// `<root>/<parent dir name>/<stem>.annotations.json`.
    Mirrored(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Storage {
    location: SidecarLocation,
}

impl Default for Storage {
    fn default() -> Self {
        Self::beside_source()
    }
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "PageCarve", "PageCarve")
            .ok_or(StorageError::NoDataDirectory)?;

        Ok(Self::with_root(dirs.data_local_dir().join("sidecars")))
    }

    pub fn beside_source() -> Self {
        Self { location: SidecarLocation::BesideSource }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { location: SidecarLocation::Mirrored(root.into()) }
    }

    pub fn sidecar_path(&self, source: &Path) -> PathBuf {
        self.companion_path(source, SIDECAR_SUFFIX)
    }

    /// Where exported article payloads for `source` are written.
    pub fn artifact_path(&self, source: &Path) -> PathBuf {
        self.companion_path(source, ARTIFACT_SUFFIX)
    }

    pub fn exists(&self, source: &Path) -> bool {
        self.sidecar_path(source).is_file()
    }

    pub fn load(&self, source: &Path) -> Result<AnnotationDocument, StorageError> {
        let path = self.sidecar_path(source);
        if !path.exists() {
            return Err(StorageError::NotFound(path));
        }

        let bytes = fs::read(&path)?;
        let mut document = decode(&bytes)?;

        for correction in document.normalize_page_indices() {
            tracing::warn!(sidecar = %path.display(), %correction, "corrected region page index");
        }
        for warning in document.validate() {
            tracing::warn!(sidecar = %path.display(), %warning, "annotation integrity warning");
        }

        tracing::debug!(
            sidecar = %path.display(),
            articles = document.articles.len(),
            regions = document.region_count(),
            "loaded annotations"
        );
        Ok(document)
    }

    /// Loads the sidecar for `source`, or starts an empty document with
    /// `settings` when none exists yet. Nothing is written.
    pub fn load_or_create(
        &self,
        source: &Path,
        settings: Settings,
    ) -> Result<AnnotationDocument, StorageError> {
        match self.load(source) {
            Err(StorageError::NotFound(_)) => {
                Ok(AnnotationDocument::new(source).with_settings(settings))
            }
            other => other,
        }
    }

    /// Writes `document` as the sidecar of `source`.
    pub fn save(
        &self,
        source: &Path,
        document: &AnnotationDocument,
    ) -> Result<PathBuf, StorageError> {
        let path = self.sidecar_path(source);
        write_json_atomic(&path, document)?;
        tracing::debug!(sidecar = %path.display(), "saved annotations");
        Ok(path)
    }

    pub fn save_artifact<T: Serialize>(
        &self,
        source: &Path,
        payload: &T,
    ) -> Result<PathBuf, StorageError> {
        let path = self.artifact_path(source);
        write_json_atomic(&path, payload)?;
        Ok(path)
    }

    fn companion_path(&self, source: &Path, suffix: &str) -> PathBuf {
        let stem = source.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let file_name = format!("{stem}.{suffix}");

        match &self.location {
            SidecarLocation::BesideSource => source.with_file_name(file_name),
            SidecarLocation::Mirrored(root) => {
                let parent_name = source.parent().and_then(Path::file_name);
                match parent_name {
                    Some(parent) => root.join(parent).join(file_name),
                    None => root.join(file_name),
                }
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Result<AnnotationDocument, StorageError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    if let Some(found) = value.get("schema_version").and_then(serde_json::Value::as_str) {
        let major = found.split('.').next().and_then(|major| major.trim().parse::<u32>().ok());
        if !matches!(major, Some(major) if major <= SUPPORTED_SCHEMA_MAJOR) {
            return Err(StorageError::UnsupportedSchema {
                found: found.to_owned(),
                supported: SUPPORTED_SCHEMA_MAJOR,
            });
        }
    }

    Ok(serde_json::from_value(value)?)
}

/// Writes `payload` to a sibling temporary file, flushes it, then renames it
/// over `path`. Readers see either the old file or the new one.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, payload: &T) -> Result<(), StorageError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut bytes = serde_json::to_vec_pretty(payload)?;
    bytes.push(b'\n');

    let mut temp_name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = dir.join(temp_name);

    let result = (|| -> Result<(), StorageError> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
