// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Audio asset resolution.
//!
//! Turns an `(id, kind)` pair into an immutable [`AssetRef`] that either
//! carries a literal download URL or is marked unavailable. Sound effects
//! always resolve to the CDN; songs need a `getGJSongInfo` round trip.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UpstreamError;
use crate::robtop::{SongInfo, Upstream};

/// CDN that mirrors sound effects and platform-hosted songs.
pub const CDN_BASE_URL: &str = "https://geometrydashfiles.b-cdn.net";

/// Song info field 10 value meaning "the song lives on the CDN".
pub const CUSTOM_URL_MARKER: &str = "CUSTOMURL";

/// Host serving Newgrounds song audio.
pub const NEWGROUNDS_AUDIO_HOST: &str = "audio.ngfiles.com";

/// Host that proxies [`NEWGROUNDS_AUDIO_HOST`] when proxy mode is on.
pub const NEWGROUNDS_PROXY_HOST: &str = "ngproxy.dankmeme.dev";

/// Song info field holding the (percent-encoded) download URL.
const SONG_URL_FIELD: u32 = 10;

/// The two kinds of audio a level can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioKind {
    Sfx,
    Song,
}

impl AudioKind {
    pub const ALL: [AudioKind; 2] = [AudioKind::Song, AudioKind::Sfx];

    /// Name used in URLs and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sfx => "sfx",
            Self::Song => "song",
        }
    }

    /// `Content-Type` cached bytes of this kind are served with.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Sfx => "audio/ogg",
            Self::Song => "audio/mpeg",
        }
    }
}

impl fmt::Display for AudioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sfx" => Ok(Self::Sfx),
            "song" => Ok(Self::Song),
            other => Err(format!("unknown audio kind: {}", other)),
        }
    }
}

/// Where a resolved asset's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// Literal URL to GET.
    Url(String),
    /// Song flagged "not available for use". Never fetched.
    Unavailable,
}

/// A resolved audio reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub id: u64,
    pub kind: AudioKind,
    pub source: AssetSource,
}

impl AssetRef {
    pub fn new(id: u64, kind: AudioKind, source: AssetSource) -> Self {
        Self { id, kind, source }
    }

    /// Sound effects resolve without asking upstream.
    pub fn sfx(id: u64) -> Self {
        Self::new(id, AudioKind::Sfx, AssetSource::Url(sfx_url(id)))
    }

    pub fn is_available(&self) -> bool {
        matches!(self.source, AssetSource::Url(_))
    }

    pub fn download_url(&self) -> Option<&str> {
        match &self.source {
            AssetSource::Url(url) => Some(url),
            AssetSource::Unavailable => None,
        }
    }
}

/// Knobs that alter resolved URLs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Rewrite Newgrounds audio URLs to the proxy host.
    pub use_ng_proxy: bool,
}

pub fn sfx_url(id: u64) -> String {
    format!("{}/sfx/s{}.ogg", CDN_BASE_URL, id)
}

pub fn custom_song_url(id: u64) -> String {
    format!("{}/music/{}.ogg", CDN_BASE_URL, id)
}

/// Resolve one id through upstream where needed.
pub async fn resolve_audio(
    upstream: &dyn Upstream,
    id: u64,
    kind: AudioKind,
    options: ResolveOptions,
) -> Result<AssetRef, UpstreamError> {
    match kind {
        AudioKind::Sfx => Ok(AssetRef::sfx(id)),
        AudioKind::Song => {
            tracing::debug!(asset_id = id, "Fetching song info");
            let info = upstream.fetch_song_info(id).await?;
            song_ref_from_info(id, &info, options)
        }
    }
}

/// Build a song reference from already-fetched song info.
pub fn song_ref_from_info(
    id: u64,
    info: &SongInfo,
    options: ResolveOptions,
) -> Result<AssetRef, UpstreamError> {
    let record = match info {
        SongInfo::Unavailable => {
            tracing::warn!(asset_id = id, "Song not available for use");
            return Ok(AssetRef::new(id, AudioKind::Song, AssetSource::Unavailable));
        }
        SongInfo::Available(record) => record,
    };

    let raw = record
        .get(SONG_URL_FIELD)
        .ok_or(UpstreamError::MissingField(SONG_URL_FIELD))?;

    let url = if raw == CUSTOM_URL_MARKER {
        custom_song_url(id)
    } else {
        match urlencoding::decode(raw) {
            Ok(decoded) => decoded.into_owned(),
            Err(e) => {
                tracing::warn!(asset_id = id, "Song URL is not valid percent-encoding ({}), using it as-is", e);
                raw.to_string()
            }
        }
    };

    Ok(AssetRef::new(id, AudioKind::Song, AssetSource::Url(apply_proxy(url, options))))
}

fn apply_proxy(url: String, options: ResolveOptions) -> String {
    if options.use_ng_proxy {
        url.replace(NEWGROUNDS_AUDIO_HOST, NEWGROUNDS_PROXY_HOST)
    } else {
        url
    }
}
