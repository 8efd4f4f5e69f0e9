//! Bridge configuration.
//!
//! Loaded from TOML (every field has a default except secrets), then
//! overridden from the environment, then validated. A missing API key or
//! system prompt is fatal before any call is accepted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::AudioFormat;
use crate::retry::RetryPolicy;
use crate::rtp::FRAME_BYTES;
use crate::stream::StreamSettings;

// ── Errors ────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ── Top level ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub realtime: RealtimeConfig,
    pub telephony: TelephonyConfig,
    pub rtp: RtpConfig,
    pub dialogue: DialogueConfig,
    pub validation: ValidationConfig,
    pub persistence: PersistenceConfig,
    pub limits: LimitsConfig,
    pub recording: RecordingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            realtime: RealtimeConfig::default(),
            telephony: TelephonyConfig::default(),
            rtp: RtpConfig::default(),
            dialogue: DialogueConfig::default(),
            validation: ValidationConfig::default(),
            persistence: PersistenceConfig::default(),
            limits: LimitsConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

// ── Realtime session ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub voice: String,
    /// System prompt sent as session instructions.
    pub instructions: String,
    /// IANA zone used for the date line prefixed to the instructions.
    pub timezone: String,
    /// First user message that makes the assistant greet the caller.
    pub initial_message: String,
    pub transcription_model: String,
    pub transcription_language: String,
    pub temperature: f32,
    pub audio_format: AudioFormat,
    pub vad: VadConfig,
    pub reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    /// Inbound events handled per drain tick.
    pub event_batch_size: usize,
    pub event_tick_ms: u64,
    /// Clear the server input buffer after each response to drop echo.
    pub clear_input_after_response: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".into(),
            model: "gpt-4o-mini-realtime-preview-2024-12-17".into(),
            api_key: None,
            voice: "alloy".into(),
            instructions: String::new(),
            timezone: "Europe/Moscow".into(),
            initial_message: "Hi".into(),
            transcription_model: "whisper-1".into(),
            transcription_language: "ru".into(),
            temperature: 0.6,
            audio_format: AudioFormat::Pcm16,
            vad: VadConfig::default(),
            reconnect_attempts: 3,
            reconnect_backoff_ms: 1000,
            event_batch_size: 5,
            event_tick_ms: 25,
            clear_input_after_response: true,
        }
    }
}

impl RealtimeConfig {
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.reconnect_attempts,
            Duration::from_millis(self.reconnect_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            prefix_padding_ms: 200,
            silence_duration_ms: 600,
        }
    }
}

// ── Telephony ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    /// ARI base URL, e.g. `http://127.0.0.1:8088`.
    pub ari_url: String,
    pub ari_username: String,
    #[serde(skip_serializing)]
    pub ari_password: Option<String>,
    /// Stasis application name.
    pub app: String,
    /// Host:port Asterisk sends external media to; defaults to the RTP bind.
    pub external_host: Option<String>,
    pub bridge_attach_attempts: u32,
    pub bridge_attach_delay_ms: u64,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            ari_url: "http://127.0.0.1:8088".into(),
            ari_username: "asterisk".into(),
            ari_password: None,
            app: "stasis_app".into(),
            external_host: None,
            bridge_attach_attempts: 5,
            bridge_attach_delay_ms: 500,
        }
    }
}

impl TelephonyConfig {
    pub fn attach_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.bridge_attach_attempts,
            Duration::from_millis(self.bridge_attach_delay_ms),
        )
    }
}

// ── RTP ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpConfig {
    pub bind: String,
    /// Concurrent sends admitted across all calls.
    pub send_concurrency: usize,
    pub warmup_frames: usize,
    pub max_buffer_bytes: usize,
    /// Silence prepended to the first audio of every response.
    pub silence_padding_ms: u32,
    /// How often caller audio is flushed upstream.
    pub inbound_flush_ms: u64,
    pub log_every_packets: u64,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:12000".into(),
            send_concurrency: 50,
            warmup_frames: 10,
            max_buffer_bytes: 1024 * 1024,
            silence_padding_ms: 100,
            inbound_flush_ms: 200,
            log_every_packets: 100,
        }
    }
}

impl RtpConfig {
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            warmup_frames: self.warmup_frames,
            max_buffer_bytes: self.max_buffer_bytes,
            log_every_packets: self.log_every_packets,
        }
    }
}

// ── Dialogue ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    pub max_validation_retries: u32,
    pub validator_timeout_secs: u64,
    /// Case-insensitive regexes that mark a caller turn as a correction.
    pub correction_phrases: Vec<String>,
    /// Regexes that mark an assistant turn as moving past the current slot.
    pub skip_phrases: Vec<String>,
    pub prompts: PromptConfig,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_validation_retries: 3,
            validator_timeout_secs: 10,
            correction_phrases: [
                r"\bне\s?верно\b",
                r"\bнеправил",
                r"\bнет[, ]",
                r"\bдруг(ой|ой\s+адрес|ой\s+номер)\b",
                r"\bисправ(ь|ьте)\b",
                r"\bне то\b",
                r"\bзаписал[аи]? не так\b",
                r"\bповтор(и|ите)\b",
                r"\bthat'?s (wrong|not right)\b",
                r"\bcorrect(ion| that)\b",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            skip_phrases: [r"\bперейд[её]м\b", r"\bдалее\b", r"\bmoving on\b"]
                .into_iter()
                .map(String::from)
                .collect(),
            prompts: PromptConfig::default(),
        }
    }
}

impl DialogueConfig {
    pub fn validation_policy(&self) -> RetryPolicy {
        RetryPolicy::attempts_only(self.max_validation_retries)
    }

    pub fn validator_timeout(&self) -> Duration {
        Duration::from_secs(self.validator_timeout_secs)
    }
}

/// Pre-scripted instructions the assistant is asked to speak.
///
/// `{slot}`, `{summary}` and `{order_number}` are substituted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub accepted_unverified: String,
    pub correction: String,
    pub skip_guard: String,
    pub confirm_summary: String,
    pub saved: String,
    pub save_failed: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            accepted_unverified: "Say briefly that the line seems poor and the {slot} has been \
                                  recorded exactly as the caller dictated it, then continue."
                .into(),
            correction: "The caller is correcting the {slot}. Apologize briefly and ask them to \
                         repeat the {slot} in full."
                .into(),
            skip_guard: "Do not move on yet. The {slot} is not confirmed. Ask the caller for the \
                         {slot} again."
                .into(),
            confirm_summary: "Read this back to the caller briefly: {summary}. Then ask: \
                              \"Is everything correct?\""
                .into(),
            saved: "Tell the caller the request has been saved under number {order_number}, \
                    thank them and say goodbye."
                .into(),
            save_failed: "Apologize: the request could not be saved right now. Say a manager \
                          will call back shortly."
                .into(),
        }
    }
}

// ── Collaborators ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Nominatim-compatible search endpoint.
    pub geocoder_url: String,
    pub user_agent: String,
    pub geocoder_timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            geocoder_url: "https://nominatim.openstreetmap.org/search".into(),
            user_agent: concat!("callbridge/", env!("CARGO_PKG_VERSION")).into(),
            geocoder_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Program and arguments; the record JSON is written to its stdin.
    pub command: Vec<String>,
    /// Regex whose first group captures the order number from stdout.
    pub order_number_pattern: String,
    pub timeout_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".into(), "save_client_info.py".into()],
            order_number_pattern: r"Номер новой заявки:\s*(\S+)".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Forced hangup after this many seconds; 0 disables the limit.
    pub max_call_duration_secs: u64,
    pub max_concurrent_calls: usize,
    /// Upper bound on waiting for queued speech to play out.
    pub drain_max_wait_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_call_duration_secs: 300,
            max_concurrent_calls: 10,
            drain_max_wait_ms: 6000,
        }
    }
}

impl LimitsConfig {
    pub fn max_call_duration(&self) -> Option<Duration> {
        (self.max_call_duration_secs > 0).then(|| Duration::from_secs(self.max_call_duration_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("recordings"),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────

impl Config {
    /// Default config file location: `<config dir>/callbridge/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "callbridge")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or `$CALLBRIDGE_CONFIG`, or the default location),
    /// apply environment overrides, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("CALLBRIDGE_CONFIG").map(PathBuf::from));

        let mut config = match explicit {
            Some(p) => Self::from_file(&p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.realtime.api_key = Some(v);
        }
        if let Some(v) = get("REALTIME_MODEL") {
            self.realtime.model = v;
        }
        if let Some(v) = get("SYSTEM_PROMPT") {
            self.realtime.instructions = v;
        }
        if let Some(v) = get("INITIAL_MESSAGE") {
            self.realtime.initial_message = v;
        }
        if let Some(v) = get("ARI_URL") {
            self.telephony.ari_url = v;
        }
        if let Some(v) = get("ARI_USERNAME") {
            self.telephony.ari_username = v;
        }
        if let Some(v) = get("ARI_PASSWORD") {
            self.telephony.ari_password = Some(v);
        }
        if let Some(v) = get("ARI_APP") {
            self.telephony.app = v;
        }
        if let Some(v) = get("RTP_BIND") {
            self.rtp.bind = v;
        }
        if let Some(v) = get("MAX_CALL_DURATION_SECS").and_then(|v| v.parse().ok()) {
            self.limits.max_call_duration_secs = v;
        }
        if let Some(v) = get("MAX_CONCURRENT_CALLS").and_then(|v| v.parse().ok()) {
            self.limits.max_concurrent_calls = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.realtime.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("realtime.api_key (OPENAI_API_KEY)"));
        }
        if self.realtime.instructions.trim().is_empty() {
            return Err(ConfigError::Missing("realtime.instructions (SYSTEM_PROMPT)"));
        }
        if self.realtime.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Invalid {
                key: "realtime.timezone",
                reason: format!("unknown zone {:?}", self.realtime.timezone),
            });
        }
        if self.realtime.event_batch_size == 0 || self.realtime.event_tick_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "realtime.event_batch_size",
                reason: "batch size and tick must be non-zero".into(),
            });
        }
        if self.dialogue.max_validation_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "dialogue.max_validation_retries",
                reason: "must be at least 1".into(),
            });
        }
        if self.rtp.inbound_flush_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "rtp.inbound_flush_ms",
                reason: "must be non-zero".into(),
            });
        }
        if self.rtp.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid {
                key: "rtp.bind",
                reason: format!("not a socket address: {:?}", self.rtp.bind),
            });
        }
        if self.rtp.max_buffer_bytes < FRAME_BYTES {
            return Err(ConfigError::Invalid {
                key: "rtp.max_buffer_bytes",
                reason: "must hold at least one frame".into(),
            });
        }
        if self.persistence.command.is_empty() {
            return Err(ConfigError::Invalid {
                key: "persistence.command",
                reason: "must name a program".into(),
            });
        }
        Ok(())
    }

    /// Where Asterisk should send external media.
    pub fn external_media_host(&self) -> String {
        self.telephony
            .external_host
            .clone()
            .unwrap_or_else(|| self.rtp.bind.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid() -> Config {
        let mut config = Config::from_toml("").unwrap();
        config.apply_env(env(&[("OPENAI_API_KEY", "sk-test"), ("SYSTEM_PROMPT", "Be brief.")]));
        config
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.realtime.reconnect_attempts, 3);
        assert_eq!(config.realtime.event_batch_size, 5);
        assert_eq!(config.realtime.event_tick_ms, 25);
        assert_eq!(config.rtp.bind, "127.0.0.1:12000");
        assert_eq!(config.rtp.send_concurrency, 50);
        assert_eq!(config.dialogue.max_validation_retries, 3);
        assert_eq!(config.limits.max_call_duration(), Some(Duration::from_secs(300)));
        assert_eq!(config.external_media_host(), "127.0.0.1:12000");
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let mut config = Config::from_toml("").unwrap();
        config.apply_env(env(&[("SYSTEM_PROMPT", "x")]));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(k) if k.contains("api_key")));
    }

    #[test]
    fn missing_prompt_is_fatal() {
        let mut config = Config::from_toml("").unwrap();
        config.apply_env(env(&[("OPENAI_API_KEY", "sk")]));
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::from_toml(
            r#"
            [realtime]
            model = "from-file"
            audio_format = "g711_ulaw"

            [limits]
            max_call_duration_secs = 60
            "#,
        )
        .unwrap();
        config.apply_env(env(&[
            ("REALTIME_MODEL", "from-env"),
            ("MAX_CALL_DURATION_SECS", "0"),
            ("ARI_PASSWORD", "secret"),
        ]));
        assert_eq!(config.realtime.model, "from-env");
        assert_eq!(config.realtime.audio_format, AudioFormat::G711Ulaw);
        assert_eq!(config.limits.max_call_duration(), None);
        assert_eq!(config.telephony.ari_password.as_deref(), Some("secret"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = valid();
        config.apply_env(env(&[("REALTIME_MODEL", "  ")]));
        assert_eq!(config.realtime.model, RealtimeConfig::default().model);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = valid();
        assert!(config.validate().is_ok());

        config.realtime.timezone = "Mars/Olympus".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "realtime.timezone", .. })
        ));

        let mut config = valid();
        config.rtp.bind = "nope".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dialogue.max_validation_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_level = \"debug\"\n[rtp]\nwarmup_frames = 4\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.rtp.warmup_frames, 4);
        assert_eq!(config.rtp.stream_settings().warmup_frames, 4);
    }

    #[test]
    fn secrets_are_not_serialized() {
        let config = valid();
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("sk-test"));
    }
}
