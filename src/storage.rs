use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

pub const GENERATED_PREFIX: &str = "ikai_asai_image";
pub const EDITED_PREFIX: &str = "ikai_asai_edited";

/// Writes result images as `{prefix}_{unix_timestamp}.png` into one directory.
/// Disabled storage accepts every save and writes nothing.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    enabled: bool,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self { dir: dir.into(), enabled }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(prefix: &str, timestamp: i64) -> String {
        format!("{prefix}_{timestamp}.png")
    }

    /// Best effort: a failed write is logged and yields `None`.
    pub async fn save(&self, prefix: &str, bytes: &[u8]) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let filename = Self::file_name(prefix, Utc::now().timestamp());
        let path = self.dir.join(&filename);
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => {
                info!("💾 Saved {} bytes to {}", bytes.len(), path.display());
                Some(filename)
            }
            Err(e) => {
                warn!("⚠️ Could not save image to {}: {}", path.display(), e);
                None
            }
        }
    }
}
