//! A disk cache of fetched media objects, keyed by content URL.
//!
//! Unlike the app-level snapshot cache, media entries never expire: a
//! content URL is immutable, so a file on disk is valid forever. Explicit
//! [`MediaObjectCache::clear`] is the only eviction path.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, error};

use crate::{client::ProtocolVerbs, errors::ClientError, events::ContentUrl};

/// A URL-keyed cache of downloaded media files under one directory.
pub struct MediaObjectCache {
    dir: PathBuf,
    verbs: Arc<dyn ProtocolVerbs>,
}

impl MediaObjectCache {
    pub fn new(dir: impl Into<PathBuf>, verbs: Arc<dyn ProtocolVerbs>) -> Self {
        Self { dir: dir.into(), verbs }
    }

    /// The on-disk path for `source` if the media is already cached.
    pub fn cached_path(&self, source: &ContentUrl) -> Option<PathBuf> {
        let path = self.path_for(source);
        path.is_file().then_some(path)
    }

    /// Returns the cached file for `source`, downloading it first if needed.
    ///
    /// Concurrent callers may both fetch the same URL; whichever write lands
    /// first wins, and since content URLs are immutable the bytes are
    /// identical either way.
    pub async fn download_and_cache(
        &self,
        source: &ContentUrl,
        auth_header: String,
    ) -> Result<PathBuf, ClientError> {
        let path = self.path_for(source);
        if path.is_file() {
            return Ok(path);
        }

        debug!("fetching media {source}");
        let bytes = self.verbs.fetch_media(source.clone(), auth_header).await?;

        // Another task may have finished the same download while we awaited.
        if path.is_file() {
            return Ok(path);
        }
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!("couldn't create media cache dir {}: {e}", self.dir.display());
            ClientError::Other(format!("media cache i/o error: {e}"))
        })?;
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            error!("couldn't write media file {}: {e}", path.display());
            ClientError::Other(format!("media cache i/o error: {e}"))
        })?;
        debug!("cached media {source} ({} bytes)", bytes.len());
        Ok(path)
    }

    /// Deletes every cached media file.
    pub async fn clear(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, source: &ContentUrl) -> PathBuf {
        self.dir.join(file_name_for(source))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Derives a collision-resistant, filesystem-safe file name from a content
/// URL: the sanitized server name and media id, plus an FNV-1a hash of the
/// full URL to disambiguate ids that sanitize to the same string.
fn file_name_for(source: &ContentUrl) -> String {
    format!(
        "{}_{}_{:016x}",
        sanitize_filename::sanitize(source.server_name()),
        sanitize_filename::sanitize(source.media_id()),
        fnv1a64(source.as_str().as_bytes()),
    )
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
