//! On-disk store for synthesized audio.
//!
//! Artifacts are addressed by an opaque reference of the form `<uuid>.<ext>`.
//! References are validated before they touch the filesystem, so a caller can
//! never name a path outside the store directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};
use uuid::Uuid;

const ALLOWED_EXTENSIONS: &[(&str, &str)] = &[("mp3", "audio/mpeg"), ("wav", "audio/wav")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub reference: String,
    pub path: PathBuf,
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub async fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub async fn save(&self, bytes: &[u8], extension: &str) -> std::io::Result<Artifact> {
        if content_type_for(extension).is_none() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsupported artifact extension: {}", extension),
            ));
        }
        let reference = format!("{}.{}", Uuid::new_v4(), extension);
        let path = self.root.join(&reference);
        tokio::fs::write(&path, bytes).await?;
        Ok(Artifact { reference, path })
    }

    /// Map a reference to its path if it is well-formed and the file exists.
    pub async fn resolve(&self, reference: &str) -> Option<Artifact> {
        let (stem, extension) = reference.rsplit_once('.')?;
        Uuid::parse_str(stem).ok()?;
        content_type_for(extension)?;

        let path = self.root.join(reference);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(Artifact {
                reference: reference.to_string(),
                path,
            }),
            _ => None,
        }
    }

    /// Delete artifacts whose modification time is older than `max_age`.
    pub async fn sweep_older_than(&self, max_age: Duration) -> std::io::Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            if meta.modified().map(|m| m <= cutoff).unwrap_or(false) {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

pub fn content_type_for(extension: &str) -> Option<&'static str> {
    ALLOWED_EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, content_type)| *content_type)
}

/// Background task that evicts artifacts past their retention period.
pub async fn run_sweep_loop(store: Arc<ArtifactStore>, max_age: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match store.sweep_older_than(max_age).await {
            Ok(count) => {
                if count > 0 {
                    info!("Artifact sweep: removed {} expired audio files", count);
                }
            }
            Err(e) => {
                warn!("Artifact sweep error: {}", e);
            }
        }
    }
}
