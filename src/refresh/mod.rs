// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Refresh orchestration.
//!
//! A refresh run clears the cache, enumerates the levels of interest and
//! repopulates the cache with their audio.
//!
//! # Phases
//!
//! ```text
//! Idle ─▶ Clearing ─▶ EnumeratingLevels ─▶ ┌▶ CollectingAssets ─▶ Downloading ┐ ─▶ Idle
//!                                          └──────────── next level ◀────────┘
//! ```
//!
//! Levels are processed one at a time. Within a level, resolutions and
//! downloads fan out concurrently and are awaited as a whole; any single
//! failure skips that asset only.
//!
//! Only one run executes at a time. A trigger that arrives mid-run waits for
//! that run and reports it as [`RefreshOutcome::Joined`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

use crate::audio::{AssetRef, ResolveOptions};
use crate::config::Config;
use crate::error::DownloadError;
use crate::level::{collect_level_assets, featured_level_ids, SPECIAL_LEVEL_IDS};
use crate::robtop::Upstream;
use crate::store::CacheStore;

/// Longest error body kept from a failed download.
const MAX_ERROR_BODY: usize = 256;

/// Where a refresh run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    Idle,
    Clearing,
    EnumeratingLevels,
    CollectingAssets,
    Downloading,
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    Startup,
    Schedule,
    Manual,
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "startup",
            Self::Schedule => "schedule",
            Self::Manual => "manual",
        })
    }
}

/// Counters for one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub trigger: RefreshTrigger,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Files removed by the clear step.
    pub cleared: usize,
    /// Files (or directories) the clear step could not remove.
    pub clear_failed: usize,
    /// Featured pages whose listing failed.
    pub pages_failed: usize,
    pub levels_processed: usize,
    /// Levels whose metadata could not be fetched.
    pub levels_failed: usize,
    /// Audio ids whose resolution failed.
    pub resolve_failed: usize,
    pub downloaded: usize,
    pub already_cached: usize,
    pub unavailable: usize,
    pub download_failed: usize,
    pub write_failed: usize,
}

impl RefreshReport {
    fn new(trigger: RefreshTrigger) -> Self {
        Self {
            trigger,
            started_at: Utc::now(),
            duration_ms: 0,
            cleared: 0,
            clear_failed: 0,
            pages_failed: 0,
            levels_processed: 0,
            levels_failed: 0,
            resolve_failed: 0,
            downloaded: 0,
            already_cached: 0,
            unavailable: 0,
            download_failed: 0,
            write_failed: 0,
        }
    }

    fn record(&mut self, outcome: AssetOutcome) {
        match outcome {
            AssetOutcome::Downloaded => self.downloaded += 1,
            AssetOutcome::AlreadyCached => self.already_cached += 1,
            AssetOutcome::Unavailable => self.unavailable += 1,
            AssetOutcome::DownloadFailed => self.download_failed += 1,
            AssetOutcome::WriteFailed => self.write_failed += 1,
        }
    }

    /// True when nothing was skipped because of an error.
    pub fn is_clean(&self) -> bool {
        self.clear_failed == 0
            && self.pages_failed == 0
            && self.levels_failed == 0
            && self.resolve_failed == 0
            && self.download_failed == 0
            && self.write_failed == 0
    }
}

/// Result of asking for a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This call performed the run.
    Completed(RefreshReport),
    /// A run was already in flight; this call waited for it.
    Joined(Option<RefreshReport>),
}

impl RefreshOutcome {
    pub fn report(&self) -> Option<&RefreshReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Joined(report) => report.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetOutcome {
    Downloaded,
    AlreadyCached,
    Unavailable,
    DownloadFailed,
    WriteFailed,
}

/// Fetches the raw bytes behind a download URL.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// Plain HTTP GET fetcher. Transport failures are retried once.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    /// `None` waits indefinitely.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut request = self.client.get(url);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(DownloadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        match self.fetch_once(url).await {
            Err(e) if e.is_transient() => {
                tracing::debug!(url, "Retrying download after transport error: {}", e);
                self.fetch_once(url).await
            }
            other => other,
        }
    }
}

/// Per-run knobs taken from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub featured_pages: u32,
    pub resolve: ResolveOptions,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            featured_pages: 2,
            resolve: ResolveOptions::default(),
        }
    }
}

impl From<&Config> for RefreshSettings {
    fn from(config: &Config) -> Self {
        Self {
            featured_pages: config.featured_pages,
            resolve: config.resolve_options(),
        }
    }
}

/// Runs refresh cycles against one cache store.
pub struct Refresher {
    upstream: Arc<dyn Upstream>,
    fetcher: Arc<dyn AssetFetcher>,
    store: CacheStore,
    settings: RefreshSettings,
    /// Held for the whole run; guards the report of the last finished run.
    run_lock: Mutex<Option<RefreshReport>>,
    phase: watch::Sender<RefreshPhase>,
}

impl Refresher {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        fetcher: Arc<dyn AssetFetcher>,
        store: CacheStore,
        settings: RefreshSettings,
    ) -> Self {
        let (phase, _) = watch::channel(RefreshPhase::Idle);
        Self {
            upstream,
            fetcher,
            store,
            settings,
            run_lock: Mutex::new(None),
            phase,
        }
    }

    /// Wire up the HTTP-backed upstream client and fetcher from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(config.upstream_client()),
            Arc::new(HttpFetcher::new(config.http_timeout())),
            config.cache_store(),
            RefreshSettings::from(config),
        )
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn settings(&self) -> RefreshSettings {
        self.settings
    }

    pub fn phase(&self) -> RefreshPhase {
        *self.phase.borrow()
    }

    /// Report of the most recent finished run. Waits for a run in flight.
    pub async fn last_report(&self) -> Option<RefreshReport> {
        self.run_lock.lock().await.clone()
    }

    /// Watch phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<RefreshPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: RefreshPhase) {
        self.phase.send_if_modified(|current| {
            let changed = *current != phase;
            *current = phase;
            changed
        });
    }

    /// Clear the cache and download everything again.
    ///
    /// Never fails: every error is logged, counted in the report and skipped.
    pub async fn run(&self, trigger: RefreshTrigger) -> RefreshOutcome {
        let mut last_report = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!(%trigger, "Refresh already running, waiting for it to finish");
                let guard = self.run_lock.lock().await;
                return RefreshOutcome::Joined(guard.clone());
            }
        };

        tracing::info!(%trigger, "Refresh started");
        let started = Instant::now();
        let mut report = RefreshReport::new(trigger);

        self.set_phase(RefreshPhase::Clearing);
        let cleared = self.store.clear_all().await;
        report.cleared = cleared.removed;
        report.clear_failed = cleared.failed;
        tracing::info!(removed = cleared.removed, failed = cleared.failed, "Cache cleared");
        if let Err(e) = self.store.ensure_dirs().await {
            tracing::error!("Failed to create cache directories: {}", e);
        }

        self.set_phase(RefreshPhase::EnumeratingLevels);
        let level_ids = self.enumerate_levels(&mut report).await;
        tracing::info!(levels = level_ids.len(), "Enumerated levels");

        for level_id in level_ids {
            self.set_phase(RefreshPhase::CollectingAssets);
            let collected =
                match collect_level_assets(self.upstream.as_ref(), level_id, self.settings.resolve).await {
                    Ok(collected) => collected,
                    Err(e) => {
                        tracing::warn!(level_id, "Skipping level: {}", e);
                        report.levels_failed += 1;
                        continue;
                    }
                };
            report.resolve_failed += collected.failed;

            self.set_phase(RefreshPhase::Downloading);
            for outcome in self.download_assets(&collected.assets).await {
                report.record(outcome);
            }
            report.levels_processed += 1;
        }

        self.set_phase(RefreshPhase::Idle);
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            %trigger,
            duration_ms = report.duration_ms,
            levels = report.levels_processed,
            downloaded = report.downloaded,
            unavailable = report.unavailable,
            failed = report.download_failed + report.write_failed + report.resolve_failed,
            "Refresh finished"
        );

        *last_report = Some(report.clone());
        RefreshOutcome::Completed(report)
    }

    /// Special levels, then every featured page in order.
    ///
    /// A failed page is logged and skipped.
    async fn enumerate_levels(&self, report: &mut RefreshReport) -> Vec<i64> {
        let mut ids = SPECIAL_LEVEL_IDS.to_vec();

        tracing::info!(pages = self.settings.featured_pages, "Listing featured pages");
        for page in 0..self.settings.featured_pages {
            match featured_level_ids(self.upstream.as_ref(), page).await {
                Ok(page_ids) => ids.extend(page_ids),
                Err(e) => {
                    tracing::warn!(page, "Skipping featured page: {}", e);
                    report.pages_failed += 1;
                }
            }
        }
        ids
    }

    /// Download one level's assets concurrently.
    async fn download_assets(&self, assets: &[AssetRef]) -> Vec<AssetOutcome> {
        let mut seen = HashSet::new();
        let unique = assets.iter().filter(|a| seen.insert((a.kind, a.id)));
        join_all(unique.map(|asset| self.download_asset(asset))).await
    }

    async fn download_asset(&self, asset: &AssetRef) -> AssetOutcome {
        let Some(url) = asset.download_url() else {
            tracing::debug!(asset_id = asset.id, kind = %asset.kind, "Skipping unavailable asset");
            return AssetOutcome::Unavailable;
        };

        if self.store.exists(asset.kind, asset.id).await {
            tracing::debug!(asset_id = asset.id, kind = %asset.kind, "Already cached");
            return AssetOutcome::AlreadyCached;
        }

        tracing::info!(asset_id = asset.id, kind = %asset.kind, "Downloading asset");
        let bytes = match self.fetcher.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(asset_id = asset.id, kind = %asset.kind, url, "Download failed, skipping: {}", e);
                return AssetOutcome::DownloadFailed;
            }
        };

        match self.store.write(asset.kind, asset.id, &bytes).await {
            Ok(()) => AssetOutcome::Downloaded,
            Err(e) => {
                tracing::error!(asset_id = asset.id, kind = %asset.kind, "Failed to cache asset: {}", e);
                AssetOutcome::WriteFailed
            }
        }
    }
}

/// Run a refresh on its own task so a panic is logged instead of unwinding
/// into the caller.
pub async fn run_in_task(refresher: Arc<Refresher>, trigger: RefreshTrigger) -> Option<RefreshOutcome> {
    match tokio::spawn(async move { refresher.run(trigger).await }).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::error!(%trigger, "Refresh task failed: {}", e);
            None
        }
    }
}
