//! Integration tests for gd-audio-cache
//!
//! Drive the HTTP router in-process with `tower::ServiceExt::oneshot` and run
//! whole refresh cycles against fake upstream and download backends, so no
//! network access is needed.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

use gd_audio_cache::refresh::RefreshSettings;
use gd_audio_cache::{
    parse_record, AssetFetcher, AudioKind, CacheStore, DownloadError, LevelListType, Record,
    RefreshTrigger, Refresher, Server, SongInfo, Upstream, UpstreamError,
};

// =============================================================================
// Fakes
// =============================================================================

/// One featured page, one level, songs 10 and 20, sfx 30.
struct FakeUpstream {
    level_body: String,
    song_info: HashMap<u64, SongInfo>,
}

impl FakeUpstream {
    fn new(level_body: &str) -> Self {
        Self {
            level_body: level_body.to_string(),
            song_info: HashMap::new(),
        }
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn list_levels(&self, _: LevelListType, page: u32) -> Result<Vec<Record>, UpstreamError> {
        if page == 0 {
            Ok(vec![parse_record("1:128:2:Featured", ":")])
        } else {
            Ok(Vec::new())
        }
    }

    async fn fetch_level(&self, id: i64) -> Result<Record, UpstreamError> {
        if id == 128 {
            Ok(parse_record(&self.level_body, ":"))
        } else {
            Ok(parse_record("-1", ":"))
        }
    }

    async fn fetch_song_info(&self, id: u64) -> Result<SongInfo, UpstreamError> {
        Ok(self
            .song_info
            .get(&id)
            .cloned()
            .unwrap_or_else(|| SongInfo::Available(parse_record("1~|~0~|~10~|~CUSTOMURL", "~|~"))))
    }
}

#[derive(Default)]
struct RecordingFetcher {
    urls: Mutex<Vec<String>>,
}

impl RecordingFetcher {
    fn count(&self) -> usize {
        self.urls.lock().unwrap().len()
    }
}

#[async_trait]
impl AssetFetcher for RecordingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(format!("bytes of {}", url).into_bytes())
    }
}

struct Harness {
    _dir: TempDir,
    store: CacheStore,
    fetcher: Arc<RecordingFetcher>,
    refresher: Arc<Refresher>,
}

fn harness(upstream: FakeUpstream) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path().join("songs"), dir.path().join("sfx"));
    let fetcher = Arc::new(RecordingFetcher::default());
    let settings = RefreshSettings {
        featured_pages: 1,
        ..RefreshSettings::default()
    };
    let refresher = Arc::new(Refresher::new(
        Arc::new(upstream),
        fetcher.clone(),
        store.clone(),
        settings,
    ));
    Harness {
        _dir: dir,
        store,
        fetcher,
        refresher,
    }
}

fn router(h: &Harness) -> Router {
    Server::new(Arc::clone(&h.refresher)).build_router()
}

async fn get(router: Router, uri: &str) -> axum::response::Response {
    router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_json(router: Router, uri: &str) -> Value {
    let response = get(router, uri).await;
    assert_eq!(response.status(), StatusCode::OK, "GET {}", uri);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Refresh Scenarios
// =============================================================================

#[tokio::test]
async fn test_refresh_downloads_level_assets() {
    let h = harness(FakeUpstream::new("1:128:52:10,20:53:30"));
    h.store.ensure_dirs().await.unwrap();

    let outcome = h.refresher.run(RefreshTrigger::Manual).await;

    assert_eq!(h.fetcher.count(), 3);
    assert_eq!(outcome.report().unwrap().downloaded, 3);
    assert!(h.store.exists(AudioKind::Song, 10).await);
    assert!(h.store.exists(AudioKind::Song, 20).await);
    assert!(h.store.exists(AudioKind::Sfx, 30).await);
    assert!(!h.store.exists(AudioKind::Sfx, 10).await);
}

#[tokio::test]
async fn test_refresh_is_not_incremental() {
    let h = harness(FakeUpstream::new("1:128:52:10,20:53:30"));
    h.store.ensure_dirs().await.unwrap();
    for (kind, id) in [(AudioKind::Song, 10), (AudioKind::Song, 20), (AudioKind::Sfx, 30)] {
        h.store.write(kind, id, b"stale").await.unwrap();
    }

    let outcome = h.refresher.run(RefreshTrigger::Schedule).await;
    let report = outcome.report().unwrap();

    assert_eq!(report.cleared, 3);
    assert_eq!(report.already_cached, 0);
    assert_eq!(h.fetcher.count(), 3);
    let bytes = h.store.read_bytes(AudioKind::Song, 10).await.unwrap().unwrap();
    assert_ne!(bytes, b"stale".to_vec());
}

#[tokio::test]
async fn test_unavailable_song_is_never_downloaded() {
    let mut upstream = FakeUpstream::new("1:128:52:10,20:53:30");
    upstream.song_info.insert(20, SongInfo::Unavailable);
    let h = harness(upstream);

    let outcome = h.refresher.run(RefreshTrigger::Manual).await;

    assert_eq!(outcome.report().unwrap().unavailable, 1);
    assert_eq!(h.fetcher.count(), 2);
    assert!(!h.store.exists(AudioKind::Song, 20).await);
}

#[tokio::test]
async fn test_legacy_level_uses_single_song_field() {
    let h = harness(FakeUpstream::new("1:128:35:501"));

    h.refresher.run(RefreshTrigger::Manual).await;

    let urls = h.fetcher.urls.lock().unwrap().clone();
    assert_eq!(urls, vec!["https://geometrydashfiles.b-cdn.net/music/501.ogg".to_string()]);
}

// =============================================================================
// HTTP Surface
// =============================================================================

#[tokio::test]
async fn test_info_endpoint() {
    let h = harness(FakeUpstream::new("1:128"));
    let json = get_json(router(&h), "/").await;

    assert_eq!(json["version"], format!("v{}", env!("CARGO_PKG_VERSION")));
    assert_eq!(json["refreshInterval"], "0 */2 * * *");
}

#[tokio::test]
async fn test_poll_endpoint() {
    let h = harness(FakeUpstream::new("1:128"));
    h.store.ensure_dirs().await.unwrap();
    h.store.write(AudioKind::Sfx, 30, b"ogg").await.unwrap();

    let json = get_json(router(&h), "/poll/sfx/30").await;
    assert_eq!(json, serde_json::json!({"invalid": false, "exists": true}));

    let json = get_json(router(&h), "/poll/song/30").await;
    assert_eq!(json, serde_json::json!({"invalid": false, "exists": false}));
}

#[tokio::test]
async fn test_poll_rejects_malformed_input() {
    let h = harness(FakeUpstream::new("1:128"));

    for uri in ["/poll/songs/10", "/poll/song/abc", "/poll/music/1"] {
        let json = get_json(router(&h), uri).await;
        assert_eq!(json, serde_json::json!({"invalid": true}), "GET {}", uri);
    }
}

#[tokio::test]
async fn test_download_endpoint_content_types() {
    let h = harness(FakeUpstream::new("1:128"));
    h.store.ensure_dirs().await.unwrap();
    h.store.write(AudioKind::Song, 10, b"mp3").await.unwrap();
    h.store.write(AudioKind::Sfx, 30, b"ogg").await.unwrap();

    let response = get(router(&h), "/download/song/10").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"mp3");

    let response = get(router(&h), "/download/sfx/30").await;
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/ogg");
}

#[tokio::test]
async fn test_download_missing_or_malformed_is_invalid() {
    let h = harness(FakeUpstream::new("1:128"));
    h.store.ensure_dirs().await.unwrap();

    for uri in ["/download/song/10", "/download/sfx/x", "/download/songs/10", "/download/sfx/-1"] {
        let json = get_json(router(&h), uri).await;
        assert_eq!(json, serde_json::json!({"invalid": true}), "GET {}", uri);
    }
}

#[tokio::test]
async fn test_refresh_endpoint_runs_to_completion() {
    let h = harness(FakeUpstream::new("1:128:52:10,20:53:30"));

    let json = get_json(router(&h), "/refresh").await;

    assert_eq!(json, serde_json::json!({"success": true}));
    assert_eq!(h.fetcher.count(), 3);
    assert!(h.store.exists(AudioKind::Sfx, 30).await);
}

#[tokio::test]
async fn test_unknown_path_redirects() {
    let h = harness(FakeUpstream::new("1:128"));
    let response = get(router(&h), "/favicon.ico").await;

    assert!(response.status().is_redirection());
    assert_eq!(response.headers()[header::LOCATION], "https://http.cat/404");
}
