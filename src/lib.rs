// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! gd-audio-cache - caching proxy for level audio
//!
//! Periodically scrapes the platform's daily, weekly, event and featured
//! levels, resolves the songs and sound effects they reference, downloads
//! whatever is missing and serves the cached files over HTTP.
//!
//! **Refresh** -> **Cache store** -> **HTTP server**
//!
//! # Core Modules
//!
//! - [`robtop`] - Upstream API client and record parsing
//! - [`audio`] - Song / sound effect URL resolution
//! - [`level`] - Per-level asset collection
//! - [`store`] - Filesystem cache
//! - [`refresh`] - Clear-and-repopulate orchestration
//! - [`scheduler`] - Cron-driven refresh trigger
//! - [`server`] - HTTP surface
//! - [`config`] - File + environment configuration
//! - [`error`] - Error taxonomy

pub mod audio;
pub mod config;
pub mod error;
pub mod level;
pub mod refresh;
pub mod robtop;
pub mod scheduler;
pub mod server;
pub mod store;

pub use audio::{AssetRef, AssetSource, AudioKind, ResolveOptions};
pub use config::Config;
pub use error::{ConfigError, DownloadError, StoreError, UpstreamError};
pub use refresh::{
    AssetFetcher, HttpFetcher, RefreshOutcome, RefreshPhase, RefreshReport, RefreshTrigger, Refresher,
};
pub use robtop::{parse_record, LevelListType, Record, RobtopClient, SongInfo, Upstream};
pub use scheduler::RefreshSchedule;
pub use server::Server;
pub use store::CacheStore;
