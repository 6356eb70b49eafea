//! Configuration system for echo.
//!
//! Every component receives a typed slice of [`EchoConfig`] at construction.
//! Runtime edits go through a [`ConfigStore`], which the scheduler re-reads on
//! every iteration.

mod store;

pub use store::{ConfigStore, FileConfigStore, InMemoryConfigStore};

use chrono::{Duration, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{EchoError, EchoResult, ErrorCode};
use crate::schedule::Frequency;
use crate::selection::{QualityLevel, SelectorConfig};
use crate::sentiment::SentimentConfig;

/// Fallback trigger time when `schedule.time` cannot be parsed.
pub const DEFAULT_SCHEDULE_TIME: &str = "08:00";

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("echo"))
        .unwrap_or_else(|| PathBuf::from(".echo"))
}

/// Recurring broadcast settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Whether recurring sends are enabled.
    pub enabled: bool,
    /// Trigger time as `HH:MM` (minute only is used for hourly).
    pub time: String,
    /// Recurrence class.
    pub frequency: Frequency,
    /// Weekday for weekly frequency (`mon`, `tuesday`, ...).
    pub weekday: String,
    /// Sessions that receive scheduled broadcasts.
    pub target_sessions: Vec<String>,
    /// Explicit content tags; empty means time-of-day heuristic.
    pub tags: Vec<String>,
    /// Catch-up tolerance after a missed instant, in minutes.
    pub grace_minutes: u64,
    /// Length of the on-time window, in seconds.
    pub on_time_secs: u64,
    /// Lower bound of the random delay between recipients.
    pub min_send_delay_ms: u64,
    /// Upper bound of the random delay between recipients.
    pub max_send_delay_ms: u64,
    /// Seed each recipient's context memory with the delivered tag.
    pub feed_context: bool,
    /// Delivery attempts per session and bucket before giving up.
    pub max_attempts: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time: DEFAULT_SCHEDULE_TIME.to_string(),
            frequency: Frequency::Daily,
            weekday: "mon".to_string(),
            target_sessions: Vec::new(),
            tags: Vec::new(),
            grace_minutes: 30,
            on_time_secs: 60,
            min_send_delay_ms: 1000,
            max_send_delay_ms: 5000,
            feed_context: true,
            max_attempts: 3,
        }
    }
}

impl ScheduleConfig {
    /// Parse `time`, falling back to 08:00 with a warning.
    pub fn trigger_time(&self) -> NaiveTime {
        parse_hh_mm(&self.time).unwrap_or_else(|e| {
            warn!(
                error = %e,
                code = e.code().as_str(),
                "Malformed schedule time, using {}",
                DEFAULT_SCHEDULE_TIME
            );
            NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default()
        })
    }

    /// Parse `weekday`, falling back to Monday with a warning.
    pub fn trigger_weekday(&self) -> Weekday {
        self.weekday.trim().parse::<Weekday>().unwrap_or_else(|_| {
            warn!(value = %self.weekday, "Unrecognized schedule weekday, using Monday");
            Weekday::Mon
        })
    }
}

/// Parse a strict `HH:MM` string.
pub fn parse_hh_mm(raw: &str) -> EchoResult<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| EchoError::invalid_time(raw))
}

/// Longest span any configured duration may describe (ten years).
pub const MAX_CONFIG_SECS: u64 = 10 * 365 * 24 * 3600;

/// Configured seconds as a `Duration`, clamped to [`MAX_CONFIG_SECS`].
pub fn config_secs(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_CONFIG_SECS) as i64)
}

/// Configured minutes as a `Duration`, clamped like [`config_secs`].
pub fn config_minutes(minutes: u64) -> Duration {
    config_secs(minutes.saturating_mul(60))
}

/// Reactive trigger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Messages starting with this prefix are commands, never scored.
    pub prefix: String,
    /// Mentioning any of these summons a reply even without emotional signal.
    pub keywords: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: "/theresia".to_string(),
            keywords: vec![
                "特雷西娅".to_string(),
                "特蕾西娅".to_string(),
                "Theresia".to_string(),
            ],
        }
    }
}

/// Voice asset settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Root directory of the voice files.
    pub directory: PathBuf,
    /// Assets below this quality are never selected.
    pub min_quality: QualityLevel,
    /// Tag used for direct requests that name no tag.
    pub default_tag: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            directory: default_data_dir().join("voices"),
            min_quality: QualityLevel::Low,
            default_tag: String::new(),
        }
    }
}

/// Night-hours window, `start` inclusive and `end` exclusive; may wrap midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NightHours {
    pub start: u32,
    pub end: u32,
}

impl Default for NightHours {
    fn default() -> Self {
        Self { start: 23, end: 6 }
    }
}

impl NightHours {
    /// Whether `hour` falls inside the window.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start == self.end {
            return false;
        }
        if self.start < self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Per-session reply cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub base_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self { base_secs: 10 }
    }
}

/// Session store bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_sessions: 1024 }
    }
}

/// Main echo configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Master switch for reactive and scheduled behaviour.
    pub enabled: bool,
    /// Directory for learned state (usage index, schedule ledger).
    pub state_dir: PathBuf,
    pub schedule: ScheduleConfig,
    pub command: CommandConfig,
    pub voice: VoiceConfig,
    pub night_hours: NightHours,
    pub cooldown: CooldownConfig,
    pub sentiment: SentimentConfig,
    pub selector: SelectorConfig,
    pub sessions: SessionConfig,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_dir: default_data_dir(),
            schedule: ScheduleConfig::default(),
            command: CommandConfig::default(),
            voice: VoiceConfig::default(),
            night_hours: NightHours::default(),
            cooldown: CooldownConfig::default(),
            sentiment: SentimentConfig::default(),
            selector: SelectorConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

/// Serialization format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    pub(crate) fn from_path(path: &Path) -> EchoResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            _ => Err(EchoError::Configuration {
                message: "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                code: ErrorCode::CfgUnsupportedFormat,
            }),
        }
    }

    pub(crate) fn parse(self, content: &str) -> EchoResult<EchoConfig> {
        match self {
            Self::Toml => toml::from_str(content).map_err(|e| EchoError::configuration(e.to_string())),
            Self::Json => serde_json::from_str(content).map_err(|e| EchoError::configuration(e.to_string())),
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| EchoError::configuration(e.to_string())),
        }
    }

    pub(crate) fn render(self, config: &EchoConfig) -> EchoResult<String> {
        match self {
            Self::Toml => toml::to_string_pretty(config).map_err(|e| EchoError::configuration(e.to_string())),
            Self::Json => Ok(serde_json::to_string_pretty(config)?),
            Self::Yaml => serde_yaml::to_string(config).map_err(|e| EchoError::configuration(e.to_string())),
        }
    }
}

impl EchoConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> EchoResult<Self> {
        let format = ConfigFormat::from_path(path.as_ref())?;
        let content = std::fs::read_to_string(path.as_ref())?;
        format.parse(&content)
    }

    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `ECHO_*` environment variables.
    ///
    /// Reads:
    /// - `ECHO_ENABLED` (true/false)
    /// - `ECHO_SCHEDULE_ENABLED` (true/false)
    /// - `ECHO_SCHEDULE_TIME` (HH:MM)
    /// - `ECHO_SCHEDULE_FREQUENCY` (daily/hourly/weekly/once)
    /// - `ECHO_SCHEDULE_TARGETS` (comma separated)
    /// - `ECHO_SCHEDULE_TAGS` (comma separated)
    /// - `ECHO_VOICE_DIR`
    /// - `ECHO_STATE_DIR`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("ECHO_ENABLED") {
            self.enabled = parse_bool(&v).unwrap_or(self.enabled);
        }
        if let Ok(v) = std::env::var("ECHO_SCHEDULE_ENABLED") {
            self.schedule.enabled = parse_bool(&v).unwrap_or(self.schedule.enabled);
        }
        if let Ok(v) = std::env::var("ECHO_SCHEDULE_TIME") {
            self.schedule.time = v;
        }
        if let Ok(v) = std::env::var("ECHO_SCHEDULE_FREQUENCY") {
            self.schedule.frequency = Frequency::from(v);
        }
        if let Ok(v) = std::env::var("ECHO_SCHEDULE_TARGETS") {
            self.schedule.target_sessions = split_list(&v);
        }
        if let Ok(v) = std::env::var("ECHO_SCHEDULE_TAGS") {
            self.schedule.tags = split_list(&v);
        }
        if let Ok(v) = std::env::var("ECHO_VOICE_DIR") {
            self.voice.directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ECHO_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        self
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> EchoConfigBuilder {
        EchoConfigBuilder::default()
    }

    /// Signature of the fields the scheduler reacts to.
    pub fn schedule_signature(&self) -> String {
        let bytes = serde_json::to_vec(&(self.enabled, &self.schedule)).unwrap_or_default();
        format!("{:x}", md5::compute(bytes))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builder for EchoConfig.
#[derive(Default)]
pub struct EchoConfigBuilder {
    config: EchoConfig,
}

impl EchoConfigBuilder {
    /// Set the voice directory.
    pub fn voice_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.voice.directory = dir.into();
        self
    }

    /// Set the state directory.
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.state_dir = dir.into();
        self
    }

    /// Enable scheduled sends at `time` with the given frequency.
    pub fn schedule(mut self, time: impl Into<String>, frequency: Frequency) -> Self {
        self.config.schedule.enabled = true;
        self.config.schedule.time = time.into();
        self.config.schedule.frequency = frequency;
        self
    }

    /// Set the scheduled target sessions.
    pub fn targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.schedule.target_sessions = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Set the scheduled content tags.
    pub fn schedule_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.schedule.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Remove the delay between recipients.
    pub fn no_send_delay(mut self) -> Self {
        self.config.schedule.min_send_delay_ms = 0;
        self.config.schedule.max_send_delay_ms = 0;
        self
    }

    /// Set the reply cooldown.
    pub fn cooldown_secs(mut self, secs: u64) -> Self {
        self.config.cooldown.base_secs = secs;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> EchoConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EchoConfig::default();
        assert!(config.enabled);
        assert!(!config.schedule.enabled);
        assert_eq!(config.schedule.time, "08:00");
        assert_eq!(config.schedule.frequency, Frequency::Daily);
        assert_eq!(config.schedule.grace_minutes, 30);
        assert_eq!(config.command.prefix, "/theresia");
    }

    #[test]
    fn test_malformed_time_falls_back() {
        let schedule = ScheduleConfig {
            time: "eight o'clock".to_string(),
            ..Default::default()
        };
        assert_eq!(schedule.trigger_time(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());

        let schedule = ScheduleConfig {
            time: "25:10".to_string(),
            ..Default::default()
        };
        assert_eq!(schedule.trigger_time(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());

        let schedule = ScheduleConfig {
            time: " 21:30 ".to_string(),
            ..Default::default()
        };
        assert_eq!(schedule.trigger_time(), NaiveTime::from_hms_opt(21, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_hh_mm() {
        assert_eq!(parse_hh_mm("07:30").unwrap(), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        for raw in ["25:00", "bogus", "12:61", ""] {
            let err = parse_hh_mm(raw).unwrap_err();
            assert_eq!(err.code(), ErrorCode::ParseInvalidTime, "{}", raw);
        }
    }

    #[test]
    fn test_config_durations_are_clamped() {
        assert_eq!(config_secs(10), Duration::seconds(10));
        assert_eq!(config_minutes(30), Duration::minutes(30));
        let cap = Duration::seconds(MAX_CONFIG_SECS as i64);
        assert_eq!(config_secs(u64::MAX), cap);
        assert_eq!(config_minutes(u64::MAX), cap);
    }

    #[test]
    fn test_weekday_fallback() {
        let schedule = ScheduleConfig {
            weekday: "friday".to_string(),
            ..Default::default()
        };
        assert_eq!(schedule.trigger_weekday(), Weekday::Fri);

        let schedule = ScheduleConfig {
            weekday: "someday".to_string(),
            ..Default::default()
        };
        assert_eq!(schedule.trigger_weekday(), Weekday::Mon);
    }

    #[test]
    fn test_night_hours_wraps_midnight() {
        let night = NightHours::default();
        assert!(night.contains(23));
        assert!(night.contains(0));
        assert!(night.contains(5));
        assert!(!night.contains(6));
        assert!(!night.contains(12));

        let afternoon = NightHours { start: 13, end: 15 };
        assert!(afternoon.contains(14));
        assert!(!afternoon.contains(15));
    }

    #[test]
    fn test_parse_toml_with_unknown_frequency() {
        let raw = r#"
            enabled = true

            [schedule]
            enabled = true
            time = "07:30"
            frequency = "fortnightly"
            target_sessions = ["qq:1", "qq:2"]
        "#;
        let config = ConfigFormat::Toml.parse(raw).unwrap();
        assert!(config.schedule.enabled);
        assert_eq!(config.schedule.frequency, Frequency::Daily);
        assert_eq!(config.schedule.target_sessions.len(), 2);
        // Unspecified sections keep their defaults
        assert_eq!(config.cooldown.base_secs, 10);
    }

    #[test]
    fn test_from_file_json_and_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.json");
        std::fs::write(&path, r#"{"schedule": {"frequency": "hourly", "time": "00:15"}}"#).unwrap();
        let config = EchoConfig::from_file(&path).unwrap();
        assert_eq!(config.schedule.frequency, Frequency::Hourly);

        let bad = dir.path().join("echo.ini");
        std::fs::write(&bad, "x=1").unwrap();
        let err = EchoConfig::from_file(&bad).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CfgUnsupportedFormat);
    }

    #[test]
    fn test_schedule_signature_tracks_schedule_fields() {
        let a = EchoConfig::default();
        let mut b = a.clone();
        assert_eq!(a.schedule_signature(), b.schedule_signature());

        b.cooldown.base_secs = 99;
        assert_eq!(a.schedule_signature(), b.schedule_signature());

        b.schedule.time = "09:00".to_string();
        assert_ne!(a.schedule_signature(), b.schedule_signature());
    }

    #[test]
    fn test_builder() {
        let config = EchoConfig::builder()
            .schedule("06:45", Frequency::Weekly)
            .targets(["a", "b"])
            .schedule_tags(["morning"])
            .no_send_delay()
            .build();
        assert!(config.schedule.enabled);
        assert_eq!(config.schedule.frequency, Frequency::Weekly);
        assert_eq!(config.schedule.target_sessions, vec!["a", "b"]);
        assert_eq!(config.schedule.max_send_delay_ms, 0);
    }
}
