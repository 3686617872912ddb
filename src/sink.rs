//! Output sink for generated images.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::backend::GeneratedImage;
use crate::error::StorageError;

pub trait ImageSink: Send + Sync {
    /// Persist one image for `item_id`, returning where it landed.
    fn store(&self, item_id: &str, image: &GeneratedImage) -> Result<PathBuf, StorageError>;
}

/// Writes `<root>/<YYMMDD>/<item id>.<ext>`, the day taken from the item id.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

impl ImageSink for DirectorySink {
    fn store(&self, item_id: &str, image: &GeneratedImage) -> Result<PathBuf, StorageError> {
        if item_id.is_empty() || item_id.contains(['/', '\\']) || item_id.starts_with('.') {
            return Err(StorageError::InvalidKey(item_id.to_string()));
        }
        let day = item_id.split('_').next().unwrap_or(item_id);
        let dir = self.root.join(day);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.{}", item_id, extension_for(&image.mime_type)));
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&image.data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StorageError::IoError(e.error))?;
        Ok(path)
    }
}
