use crate::error::{Result, SyncError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const ENTRY_EXTENSION: &str = "cache";

/// Preset thumbnails on disk: `<root>/<folder>/<filename>.cache`, raw payload.
#[derive(Debug, Clone)]
pub struct ImageCache {
    root: PathBuf,
}

impl ImageCache {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("images"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save(&self, folder: &str, filename: &str, payload: &[u8]) -> Result<()> {
        let path = self.entry_path(folder, filename)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, payload).await?;
        tracing::debug!(path = %path.display(), bytes = payload.len(), "image cached");
        Ok(())
    }

    /// `None` is a cache miss.
    pub async fn get(&self, folder: &str, filename: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(folder, filename)?;
        match tokio::fs::read(&path).await {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn clear(&self, folder: &str, filename: &str) -> Result<()> {
        let path = self.entry_path(folder, filename)?;
        match tokio::fs::remove_file(&path).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    pub async fn clear_folder(&self, folder: &str) -> Result<()> {
        validate_component(folder)?;
        match tokio::fs::remove_dir_all(self.root.join(folder)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn entry_path(&self, folder: &str, filename: &str) -> Result<PathBuf> {
        validate_component(folder)?;
        validate_component(filename)?;
        Ok(self
            .root
            .join(folder)
            .join(format!("{filename}.{ENTRY_EXTENSION}")))
    }
}

fn validate_component(value: &str) -> Result<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(&['/', '\\', '\0'][..]);
    if invalid {
        return Err(SyncError::Config(format!(
            "invalid image cache path component {value:?}"
        )));
    }
    Ok(())
}
