use super::{SiteId, Watermark};
use crate::prelude::*;
use crate::Result;
use async_trait::async_trait;
use fs_err::tokio as fs;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub(crate) type Watermarks = BTreeMap<SiteId, Watermark>;

/// Durable storage of the watermarks of all sites.
#[async_trait]
pub(crate) trait WatermarkStore: Send + Sync {
    /// Returns an empty map if nothing was saved yet. An error means the state
    /// exists but can't be read, so it is unknown which entries were processed.
    async fn load(&self) -> Result<Watermarks>;

    async fn save(&self, watermarks: &Watermarks) -> Result;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum WatermarkError {
    #[error("Failed to read watermarks from {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Watermarks file {path} is corrupted")]
    Corrupted {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize watermarks")]
    Serialize { source: serde_json::Error },

    #[error("Failed to write watermarks to {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Keeps the watermarks in a JSON file keyed by site id.
pub(crate) struct JsonFileWatermarkStore {
    path: PathBuf,
}

impl JsonFileWatermarkStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".tmp");
        path.into()
    }
}

#[async_trait]
impl WatermarkStore for JsonFileWatermarkStore {
    async fn load(&self) -> Result<Watermarks> {
        let path = &self.path;

        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Watermarks file doesn't exist yet");
                return Ok(Watermarks::new());
            }
            Err(source) => {
                return Err(err!(WatermarkError::Read {
                    path: path.clone(),
                    source,
                }))
            }
        };

        let watermarks: Watermarks = serde_json::from_slice(&bytes).map_err(|source| {
            err!(WatermarkError::Corrupted {
                path: path.clone(),
                source,
            })
        })?;

        info!(sites = watermarks.len(), "Loaded watermarks");

        Ok(watermarks)
    }

    async fn save(&self, watermarks: &Watermarks) -> Result {
        let json =
            serde_json::to_vec_pretty(watermarks).map_err(err_ctx!(WatermarkError::Serialize))?;

        let path = &self.path;
        let write_err = |source: std::io::Error| {
            err!(WatermarkError::Write {
                path: path.clone(),
                source,
            })
        };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(write_err)?;
        }

        // Rename is atomic, so a crash can't leave a half-written file behind
        let temp_path = self.temp_path();
        fs::write(&temp_path, json).await.map_err(write_err)?;
        fs::rename(&temp_path, path).await.map_err(write_err)?;

        debug!(path = %path.display(), "Saved watermarks");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{NoveltyPolicy, RecentLinks};
    use chrono::TimeZone;

    fn sample() -> Watermarks {
        let mut links = RecentLinks::new(60);
        links.push("https://habr.com/ru/articles/1/".to_owned());

        let newest = chrono::Utc.timestamp_opt(1000, 0).unwrap();

        Watermarks::from([
            (SiteId::new("habr"), Watermark::RecentLinks(links)),
            (SiteId::new("geektimes"), Watermark::Timestamp { newest: Some(newest) }),
        ])
    }

    #[test_log::test(tokio::test)]
    async fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileWatermarkStore::new(dir.path().join("nested/watermarks.json"));

        assert_eq!(store.load().await.unwrap(), Watermarks::new());

        store.save(&sample()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), sample());

        let empty = Watermark::empty(&NoveltyPolicy::Timestamp);
        let overwritten = Watermarks::from([(SiteId::new("habr"), empty)]);
        store.save(&overwritten).await.unwrap();
        assert_eq!(store.load().await.unwrap(), overwritten);

        assert!(!store.temp_path().exists());
    }

    #[test_log::test(tokio::test)]
    async fn corrupted_file_is_not_mistaken_for_a_missing_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermarks.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileWatermarkStore::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("is corrupted"), "{err}");

        store.save(&sample()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), sample());
    }

    #[test_log::test(tokio::test)]
    async fn save_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();

        // A directory can't be replaced with a file
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("child"), "").unwrap();

        let store = JsonFileWatermarkStore::new(&path);
        let err = store.save(&sample()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to write watermarks"), "{err}");
    }
}
