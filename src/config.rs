use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RedeemError, Result};

pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Code feeds, URLs or local paths, read in order.
    #[serde(default = "default_feed_sources")]
    pub feed_sources: Vec<String>,

    #[serde(default = "default_redeem_url")]
    pub redeem_url: String,

    pub session_cookie: Option<String>,

    #[serde(default)]
    pub pacing: Pacing,

    #[serde(default = "default_max_unknown_attempts")]
    pub max_unknown_attempts: u32,

    #[serde(default = "default_golden_limit")]
    pub default_golden_limit: u32,

    #[serde(default = "default_min_schedule_hours")]
    pub min_schedule_hours: f64,
}

/// Request cadence towards the redemption service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pacing {
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: f64,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    #[serde(default = "default_burst_pause")]
    pub burst_pause_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_max_rate_limits")]
    pub max_consecutive_rate_limits: u32,
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shift-redeemer")
        .to_string_lossy()
        .to_string()
}

fn default_feed_sources() -> Vec<String> {
    vec!["https://shift.orcicorn.com/shift-code/index.json".to_string()]
}

fn default_redeem_url() -> String {
    "https://shift.gearboxsoftware.com/code_redemptions".to_string()
}

fn default_max_unknown_attempts() -> u32 {
    5
}

fn default_golden_limit() -> u32 {
    200
}

fn default_min_schedule_hours() -> f64 {
    2.0
}

fn default_min_delay() -> f64 {
    3.0
}

fn default_burst_size() -> u32 {
    15
}

fn default_burst_pause() -> u64 {
    60
}

fn default_backoff_base() -> u64 {
    60
}

fn default_backoff_max() -> u64 {
    900
}

fn default_max_rate_limits() -> u32 {
    3
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min_delay_secs: default_min_delay(),
            burst_size: default_burst_size(),
            burst_pause_secs: default_burst_pause(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            max_consecutive_rate_limits: default_max_rate_limits(),
        }
    }
}

impl Pacing {
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs_f64(self.min_delay_secs.max(0.0))
    }

    pub fn burst_pause(&self) -> Duration {
        Duration::from_secs(self.burst_pause_secs)
    }

    /// No waiting at all; used by tests.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            min_delay_secs: 0.0,
            burst_size: 0,
            burst_pause_secs: 0,
            backoff_base_secs: 0,
            backoff_max_secs: 0,
            max_consecutive_rate_limits: 2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            feed_sources: default_feed_sources(),
            redeem_url: default_redeem_url(),
            session_cookie: None,
            pacing: Pacing::default(),
            max_unknown_attempts: default_max_unknown_attempts(),
            default_golden_limit: default_golden_limit(),
            min_schedule_hours: default_min_schedule_hours(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read the config at `path`, writing defaults there first if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RedeemError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shift-redeemer")
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        if self.pacing.backoff_max_secs < self.pacing.backoff_base_secs {
            return Err(RedeemError::Config(format!(
                "backoff_max_secs ({}) is below backoff_base_secs ({})",
                self.pacing.backoff_max_secs, self.pacing.backoff_base_secs
            )));
        }
        if self.pacing.max_consecutive_rate_limits == 0 {
            return Err(RedeemError::Config(
                "max_consecutive_rate_limits must be at least 1".to_string(),
            ));
        }
        if !(self.min_schedule_hours > 0.0) {
            return Err(RedeemError::Config(
                "min_schedule_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `SHIFT_SOURCE` and `SHIFT_SESSION`.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(source) = env("SHIFT_SOURCE").filter(|s| !s.trim().is_empty()) {
            self.feed_sources = vec![source.trim().to_string()];
        }
        if let Some(cookie) = env("SHIFT_SESSION").filter(|s| !s.trim().is_empty()) {
            self.session_cookie = Some(cookie.trim().to_string());
        }
    }

    /// Each profile gets its own store file.
    pub fn store_path(&self, profile: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(profile).join("keys.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.default_golden_limit, 200);
        assert_eq!(config.pacing.burst_size, 15);

        let again = Config::load_from(&path).unwrap();
        assert_eq!(again.feed_sources, config.feed_sources);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "data_dir = \"/srv/shift\"\n[pacing]\nmin_delay_secs = 0.5\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.data_dir, "/srv/shift");
        assert_eq!(config.pacing.min_delay(), Duration::from_millis(500));
        assert_eq!(config.pacing.backoff_base_secs, 60);
        assert_eq!(config.min_schedule_hours, 2.0);
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pacing]\nbackoff_base_secs = 100\nbackoff_max_secs = 10\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(RedeemError::Config(_))));
    }

    #[test]
    fn env_overrides_sources_and_session() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "SHIFT_SOURCE" => Some("/tmp/codes.json".to_string()),
            "SHIFT_SESSION" => Some(" si=abc ".to_string()),
            _ => None,
        });
        assert_eq!(config.feed_sources, vec!["/tmp/codes.json"]);
        assert_eq!(config.session_cookie.as_deref(), Some("si=abc"));
    }

    #[test]
    fn profiles_map_to_separate_stores() {
        let config = Config {
            data_dir: "/data".to_string(),
            ..Config::default()
        };
        assert_eq!(config.store_path("alt"), PathBuf::from("/data/alt/keys.db"));
        assert_ne!(config.store_path("alt"), config.store_path(DEFAULT_PROFILE));
    }
}
