use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    models::{ItemId, WatchReport},
    settings::FeedSettings,
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WatchStatus {
    Idle,
    Tracking,
    Paused,
    Flushed,
}

impl Default for WatchStatus {
    fn default() -> Self {
        WatchStatus::Idle
    }
}

/// Lifecycle signal that produced a report.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReportKind {
    FirstView,
    Heartbeat,
    Completion,
    Loop,
    Pause,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryReport {
    pub kind: ReportKind,
    pub report: WatchReport,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub view_threshold_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub completion_percent: f64,
    pub loop_restart_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&FeedSettings::default())
    }
}

impl From<&FeedSettings> for Thresholds {
    fn from(settings: &FeedSettings) -> Self {
        Self {
            view_threshold_secs: settings.view_threshold_secs,
            heartbeat_interval_secs: settings.heartbeat_interval_secs.max(1),
            completion_percent: settings.completion_percent,
            loop_restart_percent: settings.loop_restart_percent,
        }
    }
}

/// Read-only view of a session for callers outside the collector.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchSnapshot {
    pub session_id: String,
    pub item_id: ItemId,
    pub status: WatchStatus,
    pub started_at: DateTime<Utc>,
    pub accumulated_secs: u64,
    pub has_crossed_report_threshold: bool,
    pub has_reached_completion: bool,
    pub loop_count: u32,
    pub last_progress_percent: f64,
}

/// Watch-time accounting for one active item.
///
/// Elapsed time is always recomputed from wall-clock anchors, so a delayed or
/// skipped poll never undercounts.
#[derive(Debug)]
pub struct WatchSession {
    pub id: Uuid,
    pub item_id: ItemId,
    pub status: WatchStatus,
    pub started_at: DateTime<Utc>,
    /// Time banked from earlier tracking windows; combines with `running_anchor`
    /// to compute the true accumulated duration.
    accumulated_baseline: Duration,
    running_anchor: Option<Instant>,
    pub has_crossed_report_threshold: bool,
    pub has_reached_completion: bool,
    pub loop_count: u32,
    pub last_progress_percent: f64,
    last_heartbeat_bucket: u64,
    thresholds: Thresholds,
    ticker: Option<CancellationToken>,
}

impl WatchSession {
    pub fn new(item_id: ItemId, thresholds: Thresholds) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            status: WatchStatus::Idle,
            started_at: Utc::now(),
            accumulated_baseline: Duration::ZERO,
            running_anchor: None,
            has_crossed_report_threshold: false,
            has_reached_completion: false,
            loop_count: 0,
            last_progress_percent: 0.0,
            last_heartbeat_bucket: 0,
            thresholds,
            ticker: None,
        }
    }

    /// Attach the cancellation handle of the poll task driving this session.
    pub fn attach_ticker(&mut self, token: CancellationToken) {
        if let Some(previous) = self.ticker.replace(token) {
            previous.cancel();
        }
    }

    pub fn accumulated(&self, now: Instant) -> Duration {
        match (self.status, self.running_anchor) {
            (WatchStatus::Tracking, Some(anchor)) => self
                .accumulated_baseline
                .saturating_add(now.saturating_duration_since(anchor)),
            _ => self.accumulated_baseline,
        }
    }

    pub fn accumulated_secs(&self, now: Instant) -> u64 {
        self.accumulated(now).as_secs()
    }

    /// Idle or Paused to Tracking.
    pub fn resume(&mut self, now: Instant) -> bool {
        match self.status {
            WatchStatus::Idle | WatchStatus::Paused => {
                self.status = WatchStatus::Tracking;
                self.running_anchor = Some(now);
                true
            }
            WatchStatus::Tracking | WatchStatus::Flushed => false,
        }
    }

    /// One wall-clock poll: first-view once the threshold is crossed, then a
    /// heartbeat each time accumulated time enters a new heartbeat interval.
    pub fn tick(&mut self, now: Instant) -> Option<TelemetryReport> {
        if self.status != WatchStatus::Tracking {
            return None;
        }
        let secs = self.accumulated_secs(now);
        if secs < self.thresholds.view_threshold_secs {
            return None;
        }
        if !self.has_crossed_report_threshold {
            return Some(self.emit(ReportKind::FirstView, secs));
        }
        if secs / self.thresholds.heartbeat_interval_secs > self.last_heartbeat_bucket {
            return Some(self.emit(ReportKind::Heartbeat, secs));
        }
        None
    }

    /// Feed one playback position reading, as a percentage of the duration.
    pub fn on_progress(&mut self, percent: f64, now: Instant) -> Option<TelemetryReport> {
        if self.status == WatchStatus::Flushed || !percent.is_finite() {
            return None;
        }
        let previous = std::mem::replace(&mut self.last_progress_percent, percent);

        let kind = if self.has_reached_completion
            && previous > self.thresholds.completion_percent
            && percent < self.thresholds.loop_restart_percent
        {
            self.loop_count += 1;
            ReportKind::Loop
        } else if !self.has_reached_completion && percent >= self.thresholds.completion_percent {
            self.has_reached_completion = true;
            ReportKind::Completion
        } else {
            return None;
        };

        // Below the threshold the flag and counter are only recorded; they ride
        // on the first report instead.
        let secs = self.accumulated_secs(now);
        (secs >= self.thresholds.view_threshold_secs).then(|| self.emit(kind, secs))
    }

    /// Tracking to Paused, flushing the time watched so far.
    pub fn pause(&mut self, now: Instant) -> Option<TelemetryReport> {
        if self.status != WatchStatus::Tracking {
            return None;
        }
        self.bank(now);
        self.status = WatchStatus::Paused;
        let secs = self.accumulated_baseline.as_secs();
        (secs >= self.thresholds.view_threshold_secs).then(|| self.emit(ReportKind::Pause, secs))
    }

    /// Any state to Flushed. Cancels the poll task; only the first call reports.
    pub fn finish(&mut self, now: Instant) -> Option<TelemetryReport> {
        if self.status == WatchStatus::Flushed {
            return None;
        }
        self.bank(now);
        self.status = WatchStatus::Flushed;
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
        let secs = self.accumulated_baseline.as_secs();
        (secs >= self.thresholds.view_threshold_secs).then(|| self.emit(ReportKind::Final, secs))
    }

    pub fn snapshot(&self, now: Instant) -> WatchSnapshot {
        WatchSnapshot {
            session_id: self.id.to_string(),
            item_id: self.item_id.clone(),
            status: self.status,
            started_at: self.started_at,
            accumulated_secs: self.accumulated_secs(now),
            has_crossed_report_threshold: self.has_crossed_report_threshold,
            has_reached_completion: self.has_reached_completion,
            loop_count: self.loop_count,
            last_progress_percent: self.last_progress_percent,
        }
    }

    fn bank(&mut self, now: Instant) {
        self.accumulated_baseline = self.accumulated(now);
        self.running_anchor = None;
    }

    fn emit(&mut self, kind: ReportKind, secs: u64) -> TelemetryReport {
        let skip_view_count = self.has_crossed_report_threshold;
        self.has_crossed_report_threshold = true;
        self.last_heartbeat_bucket = secs / self.thresholds.heartbeat_interval_secs;
        TelemetryReport {
            kind,
            report: WatchReport {
                item_id: self.item_id.clone(),
                watched_seconds: secs,
                is_completed: self.has_reached_completion,
                rewatch_count: self.loop_count,
                skip_view_count,
            },
        }
    }
}
