// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Filesystem-backed asset cache.
//!
//! One directory per [`AudioKind`], one file per asset id, raw bytes and no
//! sidecar metadata. There is no in-memory index: every query goes to the
//! filesystem, so the HTTP layer always sees what a refresh has written so far.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::audio::AudioKind;
use crate::error::StoreError;

/// Suffix for bytes still being written.
const PARTIAL_SUFFIX: &str = "part";

/// Outcome of [`CacheStore::clear_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearStats {
    pub removed: usize,
    pub failed: usize,
}

/// Song and sound effect cache directories.
#[derive(Debug, Clone)]
pub struct CacheStore {
    songs_dir: PathBuf,
    sfx_dir: PathBuf,
}

impl CacheStore {
    pub fn new(songs_dir: impl Into<PathBuf>, sfx_dir: impl Into<PathBuf>) -> Self {
        Self {
            songs_dir: songs_dir.into(),
            sfx_dir: sfx_dir.into(),
        }
    }

    pub fn dir(&self, kind: AudioKind) -> &Path {
        match kind {
            AudioKind::Song => &self.songs_dir,
            AudioKind::Sfx => &self.sfx_dir,
        }
    }

    /// Path an asset is cached under.
    pub fn path(&self, kind: AudioKind, id: u64) -> PathBuf {
        self.dir(kind).join(id.to_string())
    }

    /// Create both directories if missing.
    pub async fn ensure_dirs(&self) -> Result<(), StoreError> {
        for kind in AudioKind::ALL {
            let dir = self.dir(kind);
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(dir, e))?;
        }
        Ok(())
    }

    /// Whether `id` is cached for `kind`.
    pub async fn exists(&self, kind: AudioKind, id: u64) -> bool {
        let path = self.path(kind, id);
        match tokio::fs::try_exists(&path).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to check cache entry: {}", e);
                false
            }
        }
    }

    /// Store bytes for `id`, replacing any previous file.
    ///
    /// Bytes land in a sibling partial file first and are renamed into
    /// place, so readers never see a half-written asset.
    pub async fn write(&self, kind: AudioKind, id: u64, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path(kind, id);
        let partial = path.with_extension(PARTIAL_SUFFIX);

        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| StoreError::io(&partial, e))?;
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StoreError::io(&path, e));
        }
        Ok(())
    }

    /// Cached bytes for `id`, or `None` when not cached.
    pub async fn read_bytes(&self, kind: AudioKind, id: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path(kind, id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Delete every file in both directories, keeping the directories.
    ///
    /// A missing directory counts as empty. A directory or file that cannot
    /// be read or removed is logged and counted, and the sweep continues.
    pub async fn clear_all(&self) -> ClearStats {
        let mut stats = ClearStats::default();

        for kind in AudioKind::ALL {
            let dir = self.dir(kind);
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), "Failed to read cache directory: {}", e);
                    stats.failed += 1;
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), "Failed to read cache directory entry: {}", e);
                        stats.failed += 1;
                        break;
                    }
                };

                if entry.file_type().await.is_ok_and(|ft| ft.is_dir()) {
                    continue;
                }
                let path = entry.path();
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => stats.removed += 1,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "Failed to remove cached file: {}", e);
                        stats.failed += 1;
                    }
                }
            }
        }

        stats
    }
}
