// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Level asset collection.
//!
//! Reads a level's audio fields and resolves every referenced song and sound
//! effect. Resolutions run concurrently and are failure-isolated: one bad id
//! is logged and dropped, the rest still resolve.

use futures_util::future::join_all;

use crate::audio::{resolve_audio, AssetRef, AudioKind, ResolveOptions};
use crate::error::UpstreamError;
use crate::robtop::{LevelListType, Record, Upstream};

/// Level id in listing records.
pub const LEVEL_ID_FIELD: u32 = 1;
/// Single song id used by pre-2.2 levels.
pub const LEGACY_SONG_FIELD: u32 = 35;
/// Comma-separated song ids (2.2+).
pub const SONG_LIST_FIELD: u32 = 52;
/// Comma-separated sound effect ids (2.2+).
pub const SFX_LIST_FIELD: u32 = 53;

/// Daily, weekly and event levels, by platform convention.
pub const SPECIAL_LEVEL_IDS: [i64; 3] = [-1, -2, -3];

/// Level id carried by a listing record.
pub fn level_id(record: &Record) -> Option<i64> {
    record.get(LEVEL_ID_FIELD)?.trim().parse().ok()
}

/// Level ids listed on one featured page, in listing order.
///
/// Records without a usable id are logged and skipped.
pub async fn featured_level_ids(upstream: &dyn Upstream, page: u32) -> Result<Vec<i64>, UpstreamError> {
    let records = upstream.list_levels(LevelListType::Featured, page).await?;
    Ok(records
        .iter()
        .filter_map(|record| {
            let id = level_id(record);
            if id.is_none() {
                tracing::warn!(page, "Featured listing entry has no level id");
            }
            id
        })
        .collect())
}

/// Song ids referenced by a level.
///
/// Field 52 wins when present; otherwise the legacy field 35. Id 0 means the
/// level uses a built-in track and is left out.
pub fn song_ids(record: &Record) -> Vec<u64> {
    let ids = match record.get_non_empty(SONG_LIST_FIELD) {
        Some(list) => parse_id_list(list, SONG_LIST_FIELD),
        None => record
            .get_non_empty(LEGACY_SONG_FIELD)
            .map(|id| parse_id_list(id, LEGACY_SONG_FIELD))
            .unwrap_or_default(),
    };
    ids.into_iter().filter(|&id| id != 0).collect()
}

/// Sound effect ids referenced by a level.
pub fn sfx_ids(record: &Record) -> Vec<u64> {
    record
        .get_non_empty(SFX_LIST_FIELD)
        .map(|list| parse_id_list(list, SFX_LIST_FIELD))
        .unwrap_or_default()
}

fn parse_id_list(list: &str, field: u32) -> Vec<u64> {
    list.split(',')
        .filter_map(|raw| match raw.trim().parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(field, value = raw, "Ignoring unparsable audio id");
                None
            }
        })
        .collect()
}

/// Everything one level needs fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelAssets {
    pub level_id: i64,
    /// Resolved references, songs first, each list in field order.
    pub assets: Vec<AssetRef>,
    /// Ids whose resolution failed and were dropped.
    pub failed: usize,
}

/// Fetch a level and resolve all of its audio references.
///
/// Fails only if the level itself cannot be fetched.
pub async fn collect_level_assets(
    upstream: &dyn Upstream,
    level_id: i64,
    options: ResolveOptions,
) -> Result<LevelAssets, UpstreamError> {
    tracing::info!(level_id, "Downloading data for level");
    let record = upstream.fetch_level(level_id).await?;

    let wanted: Vec<(u64, AudioKind)> = song_ids(&record)
        .into_iter()
        .map(|id| (id, AudioKind::Song))
        .chain(sfx_ids(&record).into_iter().map(|id| (id, AudioKind::Sfx)))
        .collect();

    let results = join_all(wanted.iter().map(|&(id, kind)| async move {
        (id, kind, resolve_audio(upstream, id, kind, options).await)
    }))
    .await;

    let mut collected = LevelAssets {
        level_id,
        ..LevelAssets::default()
    };
    for (id, kind, result) in results {
        match result {
            Ok(asset) => collected.assets.push(asset),
            Err(e) => {
                tracing::warn!(level_id, asset_id = id, %kind, "Failed to resolve audio: {}", e);
                collected.failed += 1;
            }
        }
    }

    tracing::debug!(
        level_id,
        assets = collected.assets.len(),
        failed = collected.failed,
        "Collected level assets"
    );
    Ok(collected)
}
