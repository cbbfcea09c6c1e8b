// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Recurring refresh trigger.
//!
//! Parses the configured cron expression and fires [`Refresher::run`] at each
//! upcoming time. The scheduled trigger goes through the same entry point as
//! the startup and `/refresh` triggers, so overlapping fires join the run
//! already in flight instead of racing it.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::ConfigError;
use crate::refresh::{run_in_task, RefreshTrigger, Refresher};

/// A validated cron schedule.
#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    expression: String,
    schedule: Schedule,
}

impl RefreshSchedule {
    /// Parse a cron expression.
    ///
    /// Classic five-field expressions (`min hour dom month dow`) are accepted
    /// and run at second 0.
    pub fn parse(expression: &str) -> Result<Self, ConfigError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {}", trimmed)
        } else {
            trimmed.to_string()
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| ConfigError::InvalidSchedule {
            expr: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The expression as configured.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// How long to sleep from `now` until the next fire time.
    pub fn until_next(&self, now: DateTime<Utc>) -> Option<Duration> {
        let next = self.next_after(now)?;
        Some((next - now).to_std().unwrap_or_default())
    }
}

/// Spawn the scheduling loop. It runs until the process exits.
pub fn spawn(refresher: Arc<Refresher>, schedule: RefreshSchedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(wait) = schedule.until_next(now) else {
                tracing::warn!(
                    schedule = schedule.expression(),
                    "Refresh schedule has no upcoming fire time, scheduler stopping"
                );
                return;
            };

            tracing::debug!(
                schedule = schedule.expression(),
                wait_secs = wait.as_secs(),
                "Waiting for next scheduled refresh"
            );
            tokio::time::sleep(wait).await;

            run_in_task(Arc::clone(&refresher), RefreshTrigger::Schedule).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DownloadError, UpstreamError};
    use crate::refresh::{AssetFetcher, RefreshSettings};
    use crate::robtop::{LevelListType, Record, SongInfo, Upstream};
    use crate::store::CacheStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    #[test]
    fn test_five_field_expression() {
        let schedule = RefreshSchedule::parse("0 */2 * * *").unwrap();
        assert_eq!(schedule.expression(), "0 */2 * * *");

        let now = Utc.with_ymd_and_hms(2025, 5, 14, 1, 30, 0).unwrap();
        let next = schedule.next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 5, 14, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_six_field_expression() {
        let schedule = RefreshSchedule::parse("30 0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 5, 14, 1, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(now),
            Some(Utc.with_ymd_and_hms(2025, 5, 14, 1, 0, 30).unwrap())
        );
    }

    #[test]
    fn test_until_next() {
        let schedule = RefreshSchedule::parse("0 */2 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 5, 14, 1, 59, 0).unwrap();
        assert_eq!(schedule.until_next(now), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_expression() {
        let err = RefreshSchedule::parse("every two hours").unwrap_err();
        assert!(err.to_string().contains("every two hours"));
    }

    /// Empty platform that reports each featured listing.
    struct SignallingUpstream {
        listed: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl Upstream for SignallingUpstream {
        async fn list_levels(&self, _: LevelListType, _: u32) -> Result<Vec<Record>, UpstreamError> {
            let _ = self.listed.send(());
            Ok(Vec::new())
        }

        async fn fetch_level(&self, _: i64) -> Result<Record, UpstreamError> {
            Ok(Record::default())
        }

        async fn fetch_song_info(&self, _: u64) -> Result<SongInfo, UpstreamError> {
            Ok(SongInfo::Unavailable)
        }
    }

    struct NoFetch;

    #[async_trait]
    impl AssetFetcher for NoFetch {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
            Err(DownloadError::Transport(format!("unexpected fetch of {}", url)))
        }
    }

    #[tokio::test]
    async fn test_spawn_fires_scheduled_refresh() {
        let dir = tempfile::TempDir::new().unwrap();
        let (listed, mut fired) = mpsc::unbounded_channel();
        let settings = RefreshSettings {
            featured_pages: 1,
            ..RefreshSettings::default()
        };
        let refresher = Arc::new(Refresher::new(
            Arc::new(SignallingUpstream { listed }),
            Arc::new(NoFetch),
            CacheStore::new(dir.path().join("songs"), dir.path().join("sfx")),
            settings,
        ));
        let schedule = RefreshSchedule::parse("* * * * * *").unwrap();

        let handle = spawn(Arc::clone(&refresher), schedule);
        tokio::time::timeout(Duration::from_secs(5), fired.recv())
            .await
            .expect("scheduler did not fire")
            .unwrap();
        let report = refresher.last_report().await.unwrap();
        handle.abort();

        assert_eq!(report.trigger, RefreshTrigger::Schedule);
        assert_eq!(report.levels_processed, 3);
        assert_eq!(report.downloaded, 0);
    }
}
