// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Upstream platform client.
//!
//! The platform speaks a POST-only, plain-text API. Responses are split into
//! `#`-separated sections; the first section holds one or more records, and
//! each record is a flat list of alternating `key<delim>value` pieces.
//!
//! # Example
//!
//! ```no_run
//! use gd_audio_cache::robtop::{RobtopClient, Upstream, LevelListType};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = RobtopClient::new();
//! let featured = client.list_levels(LevelListType::Featured, 0).await?;
//! for level in &featured {
//!     println!("level {:?}", level.get(1));
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{UpstreamError, UPSTREAM_ERROR_PREFIX};

/// Default platform API endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "https://www.boomlings.com/database";

/// Shared secret every request carries.
const GJ_SECRET: &str = "Wmfd2893gb7";

/// "No data" sentinel returned by most endpoints.
pub const NO_DATA: &str = "-1";

/// Song info sentinel for "not available for use".
pub const SONG_UNAVAILABLE: &str = "-2";

/// Number of extra attempts after a transport failure.
const TRANSPORT_RETRIES: u32 = 1;

/// Level list category codes understood by `getGJLevels21`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelListType {
    Search,
    MostDownloaded,
    MostLiked,
    Trending,
    Recent,
    UserLevels,
    Featured,
    Magic,
    Awarded,
    HallOfFame,
}

impl LevelListType {
    /// Numeric code sent as the `type` form parameter.
    pub fn code(self) -> u8 {
        match self {
            Self::Search => 0,
            Self::MostDownloaded => 1,
            Self::MostLiked => 2,
            Self::Trending => 3,
            Self::Recent => 4,
            Self::UserLevels => 5,
            Self::Featured => 6,
            Self::Magic => 7,
            Self::Awarded => 11,
            Self::HallOfFame => 16,
        }
    }
}

/// A sparse, integer-keyed record parsed from an upstream response.
///
/// Absent keys mean "not present", never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<u32, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value at `key`, if the record carries it.
    pub fn get(&self, key: u32) -> Option<&str> {
        self.fields.get(&key).map(String::as_str)
    }

    /// Value at `key`, treating an empty string as absent.
    pub fn get_non_empty(&self, key: u32) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn insert(&mut self, key: u32, value: impl Into<String>) {
        self.fields.insert(key, value.into());
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl<V: Into<String>> FromIterator<(u32, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (u32, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }
}

/// Parse one delimited record.
///
/// Pieces alternate key, value. `"-1"` yields an empty record. An odd number
/// of pieces is tolerated: the trailing key is dropped and a warning logged.
/// Keys that are not non-negative integers are skipped.
pub fn parse_record(text: &str, delimiter: &str) -> Record {
    if text == NO_DATA {
        tracing::debug!("Upstream returned no data, using empty record");
        return Record::default();
    }

    let pieces: Vec<&str> = text.split(delimiter).collect();
    if pieces.len() % 2 != 0 {
        tracing::warn!(
            pieces = pieces.len(),
            delimiter,
            "Malformed upstream record: odd number of pieces, dropping trailing key"
        );
    }

    let mut record = Record::default();
    for pair in pieces.chunks_exact(2) {
        match pair[0].parse::<u32>() {
            Ok(key) => record.insert(key, pair[1]),
            Err(_) => tracing::debug!(key = pair[0], "Skipping non-numeric record key"),
        }
    }
    record
}

/// Parse a `getGJLevels21` body into its level records.
pub fn parse_level_list(body: &str) -> Result<Vec<Record>, UpstreamError> {
    check_error(body, &[NO_DATA])?;
    let levels = first_section(body);
    if levels == NO_DATA {
        return Ok(Vec::new());
    }
    Ok(levels
        .split('|')
        .filter(|level| !level.is_empty())
        .map(|level| parse_record(level, ":"))
        .collect())
}

/// Parse a `downloadGJLevel22` body into the level's record.
pub fn parse_level(body: &str) -> Result<Record, UpstreamError> {
    check_error(body, &[NO_DATA])?;
    Ok(parse_record(first_section(body), ":"))
}

/// Parse a `getGJSongInfo` body.
pub fn parse_song_info(body: &str) -> Result<SongInfo, UpstreamError> {
    if body.trim() == SONG_UNAVAILABLE {
        return Ok(SongInfo::Unavailable);
    }
    check_error(body, &[NO_DATA])?;
    Ok(SongInfo::Available(parse_record(body, "~|~")))
}

fn first_section(body: &str) -> &str {
    body.split('#').next().unwrap_or_default()
}

/// Reject error-coded bodies. A bare negative integer counts as an error
/// token unless it is one of the endpoint's `allowed` sentinels.
fn check_error(body: &str, allowed: &[&str]) -> Result<(), UpstreamError> {
    if body.starts_with(UPSTREAM_ERROR_PREFIX) {
        return Err(UpstreamError::from_response(body));
    }
    let trimmed = body.trim();
    if allowed.contains(&trimmed) {
        return Ok(());
    }
    if trimmed.parse::<i64>().is_ok_and(|n| n < 0) {
        return Err(UpstreamError::from_response(trimmed));
    }
    Ok(())
}

/// Song metadata as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SongInfo {
    /// The song exists but may not be used in levels.
    Unavailable,
    /// Song record, delimited by `~|~` upstream.
    Available(Record),
}

impl SongInfo {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Available(record) => Some(record),
            Self::Unavailable => None,
        }
    }
}

/// The three platform requests the refresh pipeline needs.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// One page of a level listing.
    async fn list_levels(&self, list: LevelListType, page: u32) -> Result<Vec<Record>, UpstreamError>;

    /// Full metadata for one level. Ids `<= 0` address daily/weekly/event levels.
    async fn fetch_level(&self, id: i64) -> Result<Record, UpstreamError>;

    /// Metadata for one song.
    async fn fetch_song_info(&self, id: u64) -> Result<SongInfo, UpstreamError>;
}

/// HTTP client for the platform API.
#[derive(Debug, Clone)]
pub struct RobtopClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl Default for RobtopClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RobtopClient {
    /// Client against the public endpoint with no request timeout.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            timeout: None,
        }
    }

    /// Point the client at another API root (mirrors, private servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Per-request timeout. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, endpoint: &str, params: &[(&str, String)]) -> Result<String, UpstreamError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut form: Vec<(&str, String)> = vec![("secret", GJ_SECRET.to_string())];
        form.extend(params.iter().cloned());

        let mut last_error = None;
        for attempt in 0..=TRANSPORT_RETRIES {
            if attempt > 0 {
                tracing::debug!(endpoint, attempt = attempt + 1, "Retrying upstream request");
            }

            let mut request = self
                .client
                .post(&url)
                .header("User-Agent", "")
                .form(&form);
            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }

            let result = match request.send().await {
                Ok(response) => response.text().await,
                Err(e) => Err(e),
            };

            match result {
                Ok(body) => return Ok(body),
                Err(e) => {
                    tracing::warn!(endpoint, "Upstream request failed: {}", e);
                    last_error = Some(UpstreamError::from(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| UpstreamError::Transport("no attempts made".to_string())))
    }
}

#[async_trait]
impl Upstream for RobtopClient {
    async fn list_levels(&self, list: LevelListType, page: u32) -> Result<Vec<Record>, UpstreamError> {
        let body = self
            .post(
                "getGJLevels21.php",
                &[("type", list.code().to_string()), ("page", page.to_string())],
            )
            .await?;
        parse_level_list(&body)
    }

    async fn fetch_level(&self, id: i64) -> Result<Record, UpstreamError> {
        let body = self
            .post("downloadGJLevel22.php", &[("levelID", id.to_string())])
            .await?;
        parse_level(&body)
    }

    async fn fetch_song_info(&self, id: u64) -> Result<SongInfo, UpstreamError> {
        let body = self
            .post("getGJSongInfo.php", &[("songID", id.to_string())])
            .await?;
        parse_song_info(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(pairs: &[(u32, &str)], delimiter: &str) -> String {
        pairs
            .iter()
            .map(|(k, v)| format!("{}{}{}", k, delimiter, v))
            .collect::<Vec<_>>()
            .join(delimiter)
    }

    #[test]
    fn test_parse_record_round_trip() {
        let pairs = [(1, "128"), (2, "1st level"), (35, "0"), (52, "10,20"), (53, "")];
        for delimiter in [":", "~|~", ","] {
            // The comma-delimited case cannot carry a comma in a value.
            let pairs: Vec<_> = pairs.iter().filter(|(_, v)| !v.contains(delimiter)).cloned().collect();
            let record = parse_record(&join(&pairs, delimiter), delimiter);
            let expected: Record = pairs.iter().cloned().collect();
            assert_eq!(record, expected, "delimiter {:?}", delimiter);
        }
    }

    #[test]
    fn test_parse_record_no_data() {
        assert!(parse_record("-1", ":").is_empty());
        assert!(parse_record("-1", "~|~").is_empty());
    }

    #[test]
    fn test_parse_record_odd_length_keeps_pairs() {
        let record = parse_record("1:42:2:name:35", ":");
        assert_eq!(record.len(), 2);
        assert_eq!(record.get(1), Some("42"));
        assert_eq!(record.get(2), Some("name"));
        assert_eq!(record.get(35), None);
    }

    #[test]
    fn test_parse_record_sparse_lookup() {
        let record = parse_record("1:7:53:30", ":");
        assert_eq!(record.get(52), None);
        assert_eq!(record.get_non_empty(53), Some("30"));
        assert_eq!(parse_record("53:", ":").get_non_empty(53), None);
    }

    #[test]
    fn test_parse_record_skips_non_numeric_keys() {
        let record = parse_record("abc:1:2:x", ":");
        assert_eq!(record.len(), 1);
        assert_eq!(record.get(2), Some("x"));
    }

    #[test]
    fn test_parse_level_list() {
        let body = "1:100:2:A|1:200:2:B#creators#songs#page";
        let levels = parse_level_list(body).unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].get(1), Some("100"));
        assert_eq!(levels[1].get(1), Some("200"));
    }

    #[test]
    fn test_parse_level_list_no_data() {
        assert!(parse_level_list("-1").unwrap().is_empty());
    }

    #[test]
    fn test_parse_level_list_error_marker() {
        let err = parse_level_list("error code: 1005").unwrap_err();
        assert_eq!(err, UpstreamError::Server("1005".to_string()));
    }

    #[test]
    fn test_parse_level_bare_error_token() {
        assert!(parse_level("-2").is_err());
        assert!(parse_level("-1").unwrap().is_empty());
    }

    #[test]
    fn test_parse_level_takes_first_section() {
        let record = parse_level("1:128:35:501:52:10,20#hash#more").unwrap();
        assert_eq!(record.get(35), Some("501"));
        assert_eq!(record.get(52), Some("10,20"));
    }

    #[test]
    fn test_parse_song_info_unavailable() {
        assert_eq!(parse_song_info("-2").unwrap(), SongInfo::Unavailable);
    }

    #[test]
    fn test_parse_song_info_available() {
        let info = parse_song_info("1~|~501~|~2~|~Song~|~10~|~CUSTOMURL").unwrap();
        assert!(info.is_available());
        assert_eq!(info.record().and_then(|r| r.get(10)), Some("CUSTOMURL"));
    }

    #[test]
    fn test_parse_song_info_error_marker() {
        assert!(parse_song_info("error code: 1015").is_err());
    }

    #[test]
    fn test_level_list_codes() {
        assert_eq!(LevelListType::Featured.code(), 6);
        assert_eq!(LevelListType::Search.code(), 0);
        assert_eq!(LevelListType::HallOfFame.code(), 16);
    }

    #[test]
    fn test_client_base_url_trims_slash() {
        let client = RobtopClient::new().with_base_url("http://localhost:8000/db/");
        assert_eq!(client.base_url(), "http://localhost:8000/db");
    }
}
