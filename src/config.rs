// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime configuration.
//!
//! Built once at startup from defaults, then `config.json` (if present), then
//! environment variables. The environment wins. The resulting [`Config`] is
//! passed explicitly to everything that needs it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::ResolveOptions;
use crate::error::ConfigError;
use crate::robtop::{RobtopClient, DEFAULT_UPSTREAM_URL};
use crate::scheduler::RefreshSchedule;
use crate::store::CacheStore;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Every two hours, on the hour.
pub const DEFAULT_REFRESH_INTERVAL: &str = "0 */2 * * *";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub ip: String,
    pub port: u16,
    /// Cron expression for scheduled refreshes.
    pub refresh_interval: String,
    /// Rewrite Newgrounds audio URLs to the proxy host.
    #[serde(rename = "useNGProxy", alias = "useNgProxy")]
    pub use_ng_proxy: bool,
    pub sfx_folder: PathBuf,
    pub songs_folder: PathBuf,
    /// Featured pages scraped per refresh.
    pub featured_pages: u32,
    pub upstream_url: String,
    /// Timeout for upstream and download requests. 0 waits forever.
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: 3000,
            refresh_interval: DEFAULT_REFRESH_INTERVAL.to_string(),
            use_ng_proxy: false,
            sfx_folder: PathBuf::from("storage/sfx"),
            songs_folder: PathBuf::from("storage/songs"),
            featured_pages: 2,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            http_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load `path` (if it exists), apply process environment overrides and
    /// validate the result.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the JSON file at `path`. A missing file yields
    /// the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    ///
    /// Each key is looked up under its JSON name (`refreshInterval`) and its
    /// conventional form (`REFRESH_INTERVAL`); the JSON name is tried first.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |names: [&str; 2]| names.into_iter().find_map(&lookup);

        if let Some(v) = get(["ip", "IP"]) {
            self.ip = v;
        }
        if let Some(v) = get(["port", "PORT"]) {
            self.port = parse_number("port", &v)?;
        }
        if let Some(v) = get(["refreshInterval", "REFRESH_INTERVAL"]) {
            self.refresh_interval = v;
        }
        if let Some(v) = get(["useNGProxy", "USE_NG_PROXY"]) {
            self.use_ng_proxy = parse_bool("useNGProxy", &v)?;
        }
        if let Some(v) = get(["sfxFolder", "SFX_FOLDER"]) {
            self.sfx_folder = PathBuf::from(v);
        }
        if let Some(v) = get(["songsFolder", "SONGS_FOLDER"]) {
            self.songs_folder = PathBuf::from(v);
        }
        if let Some(v) = get(["featuredPages", "FEATURED_PAGES"]) {
            self.featured_pages = parse_number("featuredPages", &v)?;
        }
        if let Some(v) = get(["upstreamUrl", "UPSTREAM_URL"]) {
            self.upstream_url = v;
        }
        if let Some(v) = get(["httpTimeoutSecs", "HTTP_TIMEOUT_SECS"]) {
            self.http_timeout_secs = parse_number("httpTimeoutSecs", &v)?;
        }
        Ok(())
    }

    /// Reject values that would only fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        RefreshSchedule::parse(&self.refresh_interval)?;
        if self.upstream_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "upstreamUrl",
                value: self.upstream_url.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// `None` means requests may wait indefinitely.
    pub fn http_timeout(&self) -> Option<Duration> {
        (self.http_timeout_secs > 0).then(|| Duration::from_secs(self.http_timeout_secs))
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            use_ng_proxy: self.use_ng_proxy,
        }
    }

    pub fn cache_store(&self) -> CacheStore {
        CacheStore::new(&self.songs_folder, &self.sfx_folder)
    }

    pub fn upstream_client(&self) -> RobtopClient {
        RobtopClient::new()
            .with_base_url(&self.upstream_url)
            .with_timeout(self.http_timeout())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
