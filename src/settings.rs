use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub api_base_url: String,
    /// Hub endpoint; carries no item scoping, groups are joined after connect.
    pub realtime_url: String,
    pub page_size: u32,
    /// A recommendation batch with fewer unique new ids than this ends the feed.
    pub min_new_items: usize,
    pub view_threshold_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub tick_interval_ms: u64,
    pub completion_percent: f64,
    pub loop_restart_percent: f64,
    pub request_timeout_ms: u64,
    /// Reconnect schedule; the last entry repeats once the list is exhausted.
    pub reconnect_delays_ms: Vec<u64>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".into(),
            realtime_url: "ws://localhost:5000/hubs/feed".into(),
            page_size: 10,
            min_new_items: 1,
            view_threshold_secs: 3,
            heartbeat_interval_secs: 10,
            tick_interval_ms: 1000,
            completion_percent: 95.0,
            loop_restart_percent: 5.0,
            request_timeout_ms: 8000,
            reconnect_delays_ms: vec![0, 2000, 10_000, 30_000],
        }
    }
}

impl FeedSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self, attempt: usize) -> Duration {
        let delay_ms = self
            .reconnect_delays_ms
            .get(attempt)
            .or_else(|| self.reconnect_delays_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(delay_ms)
    }

    /// Apply `REELFEED_*` environment overrides on top of file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("REELFEED_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(url) = std::env::var("REELFEED_REALTIME_URL") {
            self.realtime_url = url;
        }

        let debug_mode = std::env::var("REELFEED_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.heartbeat_interval_secs = 1;
        }

        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<FeedSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Malformed settings at {} ({err}); using defaults",
                    path.display()
                );
                FeedSettings::default()
            })
        } else {
            FeedSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Current settings with environment overrides applied.
    pub fn current(&self) -> FeedSettings {
        self.data.read().clone().with_env_overrides()
    }

    pub fn update(&self, settings: FeedSettings) -> Result<()> {
        let mut guard = self.data.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &FeedSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        assert_eq!(store.data.read().clone(), FeedSettings::default());
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"page_size": 4, "view_threshold_secs": 5}"#).unwrap();

        let store = SettingsStore::new(path).unwrap();
        let settings = store.data.read().clone();

        assert_eq!(settings.page_size, 4);
        assert_eq!(settings.view_threshold_secs, 5);
        assert_eq!(settings.heartbeat_interval_secs, 10);
    }

    #[test]
    fn update_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = FeedSettings::default();
        settings.page_size = 25;
        store.update(settings).unwrap();

        let reloaded = SettingsStore::new(path).unwrap();
        assert_eq!(reloaded.data.read().page_size, 25);
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"api_base_url": "http://file:1", "page_size": 4}"#).unwrap();
        let store = SettingsStore::new(path).unwrap();

        std::env::set_var("REELFEED_API_URL", "http://env:2");
        std::env::set_var("REELFEED_REALTIME_URL", "ws://env:2/hubs/feed");
        std::env::set_var("REELFEED_DEBUG", "true");
        let settings = store.current();
        std::env::remove_var("REELFEED_DEBUG");
        let quiet = store.current();
        std::env::remove_var("REELFEED_API_URL");
        std::env::remove_var("REELFEED_REALTIME_URL");

        assert_eq!(settings.api_base_url, "http://env:2");
        assert_eq!(settings.realtime_url, "ws://env:2/hubs/feed");
        assert_eq!(settings.heartbeat_interval_secs, 1);
        assert_eq!(settings.page_size, 4);
        assert_eq!(quiet.heartbeat_interval_secs, 10);
        // overrides never leak into the stored copy
        assert_eq!(store.data.read().api_base_url, "http://file:1");
    }

    #[test]
    fn reconnect_schedule_repeats_last_delay() {
        let settings = FeedSettings::default();

        assert_eq!(settings.reconnect_delay(0), Duration::ZERO);
        assert_eq!(settings.reconnect_delay(2), Duration::from_secs(10));
        assert_eq!(settings.reconnect_delay(9), Duration::from_secs(30));
    }
}
