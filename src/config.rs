use crate::error::{Result, SynclipError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Cut-point search parameters for the silence-aware segmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Upper bound on segment duration.
    pub target_duration_ms: u64,

    /// How far back from the window end a silence may sit and still be used
    /// as the cut point.
    pub search_back_ms: u64,

    /// Minimum length of a below-threshold span to count as silence.
    pub min_silence_ms: u64,

    /// RMS level (dBFS) below which a frame is considered silent.
    pub silence_threshold_db: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            target_duration_ms: 59_000,
            search_back_ms: 5_000,
            min_silence_ms: 400,
            silence_threshold_db: -40.0,
        }
    }
}

/// Timeouts and poll cadences for one unit's journey through the remote
/// service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// How long to wait for a verification code to land in the inbox.
    pub otp_timeout_secs: u64,

    /// Inbox sweep cadence while waiting for the code.
    pub otp_poll_interval_secs: u64,

    /// Bounded polls for the job to leave the queued state.
    pub started_poll_attempts: u32,

    /// Cadence of the bounded start polls.
    pub started_poll_interval_secs: u64,

    /// Cadence of the unbounded completion polls.
    pub status_poll_interval_secs: u64,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            otp_timeout_secs: 180,
            otp_poll_interval_secs: 2,
            started_poll_attempts: 20,
            started_poll_interval_secs: 1,
            status_poll_interval_secs: 5,
        }
    }
}

impl UnitConfig {
    pub fn otp_timeout(&self) -> Duration {
        Duration::from_secs(self.otp_timeout_secs)
    }

    pub fn otp_poll_interval(&self) -> Duration {
        Duration::from_secs(self.otp_poll_interval_secs)
    }

    pub fn started_poll_interval(&self) -> Duration {
        Duration::from_secs(self.started_poll_interval_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the lip-sync rendering service API.
    pub service_url: String,

    /// Base URL of the disposable mail service.
    pub mail_url: String,

    /// Substring matched against inbox senders/subjects when looking for the
    /// verification mail.
    pub mail_sender_filter: String,

    /// Directory holding the source audio and video.
    pub input_dir: PathBuf,

    /// Directory receiving segment clips, result artifacts, and the final
    /// merged output.
    pub output_dir: PathBuf,

    /// Directory receiving one persisted credential record per unit.
    pub profiles_dir: PathBuf,

    pub segmenter: SegmenterConfig,
    pub unit: UnitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_url: "https://api.sync.example".to_string(),
            mail_url: "https://mail.example".to_string(),
            mail_sender_filter: "sync".to_string(),
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            profiles_dir: PathBuf::from("profiles"),
            segmenter: SegmenterConfig::default(),
            unit: UnitConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                if let Ok(file_config) = toml::from_str::<Config>(&contents) {
                    config = file_config;
                }
            }
        }

        // Override with environment variables
        if let Ok(url) = std::env::var("SYNCLIP_SERVICE_URL") {
            config.service_url = url;
        }
        if let Ok(url) = std::env::var("SYNCLIP_MAIL_URL") {
            config.mail_url = url;
        }
        if let Ok(filter) = std::env::var("SYNCLIP_MAIL_SENDER_FILTER") {
            config.mail_sender_filter = filter;
        }
        if let Ok(dir) = std::env::var("SYNCLIP_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SYNCLIP_PROFILES_DIR") {
            config.profiles_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_url.trim().is_empty() {
            return Err(SynclipError::Config(
                "Service URL must not be empty. Set SYNCLIP_SERVICE_URL or edit the config file."
                    .to_string(),
            ));
        }
        if self.mail_url.trim().is_empty() {
            return Err(SynclipError::Config(
                "Mail URL must not be empty. Set SYNCLIP_MAIL_URL or edit the config file."
                    .to_string(),
            ));
        }
        if self.segmenter.target_duration_ms == 0 {
            return Err(SynclipError::Config(
                "Segment target duration must be greater than zero".to_string(),
            ));
        }
        if self.segmenter.search_back_ms > self.segmenter.target_duration_ms {
            return Err(SynclipError::Config(
                "Search-back window must not exceed the segment target duration".to_string(),
            ));
        }
        if self.unit.otp_poll_interval_secs == 0 || self.unit.status_poll_interval_secs == 0 {
            return Err(SynclipError::Config(
                "Poll intervals must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Create the input/output/profiles directories if they are missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.input_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(&self.profiles_dir)?;
        Ok(())
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("synclip").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.segmenter.target_duration_ms, 59_000);
        assert_eq!(config.unit.otp_timeout_secs, 180);
        assert_eq!(config.unit.otp_poll_interval_secs, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_service_url() {
        let config = Config {
            service_url: "".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_target_duration() {
        let mut config = Config::default();
        config.segmenter.target_duration_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_search_back_exceeds_target() {
        let mut config = Config::default();
        config.segmenter.target_duration_ms = 1_000;
        config.segmenter.search_back_ms = 2_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unit_config_durations() {
        let unit = UnitConfig::default();
        assert_eq!(unit.otp_timeout(), Duration::from_secs(180));
        assert_eq!(unit.status_poll_interval(), Duration::from_secs(5));
    }
}
