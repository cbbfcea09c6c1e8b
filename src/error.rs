// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Error types for gd-audio-cache.
//!
//! Each concern gets its own error enum so callers can decide, per failure,
//! whether to skip one asset, one level, or one page. Nothing here aborts a
//! whole refresh run on its own; the orchestrator logs and moves on.
//!
//! Two failure modes are deliberately *not* errors:
//!
//! - A malformed (odd-length) upstream record is logged and the partial
//!   record is used. See [`crate::robtop::parse_record`].
//! - A song marked "not available for use" is a terminal state carried on
//!   the asset itself. See [`crate::audio::AssetSource::Unavailable`].

use std::path::PathBuf;
use thiserror::Error;

/// Marker prefix the platform puts in front of error responses.
pub const UPSTREAM_ERROR_PREFIX: &str = "error code: ";

/// Failure talking to the platform API.
///
/// Aborts only the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The platform answered with an error-coded body.
    #[error("upstream returned error code {0}")]
    Server(String),
    /// The request never produced a usable response body.
    #[error("upstream request failed: {0}")]
    Transport(String),
    /// A record lacked a field the caller cannot do without.
    #[error("upstream record is missing field {0}")]
    MissingField(u32),
}

impl UpstreamError {
    /// Build an error from a raw response body that carries the error marker.
    pub fn from_response(body: &str) -> Self {
        let code = body.strip_prefix(UPSTREAM_ERROR_PREFIX).unwrap_or(body);
        Self::Server(code.trim().to_string())
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Failure fetching the bytes of a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// Non-2xx status from the asset host.
    #[error("download failed with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// Connection, timeout or body-read failure.
    #[error("download request failed: {0}")]
    Transport(String),
}

impl DownloadError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Unexpected I/O failure inside the cache store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("filesystem error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Invalid configuration detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid refresh schedule {expr:?}: {reason}")]
    InvalidSchedule { expr: String, reason: String },
}
