//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Runtime environment enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Session lifecycle and protocol timing
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Protocol limits and throttles
    #[serde(default)]
    pub limits: LimitConfig,

    /// Feature flags (read-mostly, loaded at startup)
    #[serde(default)]
    pub features: FeatureFlags,

    /// Provider selection
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// CORS origins; empty means permissive (development)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage connection string. `memory://` selects the bundled
    /// in-memory store; other schemes must be wired by the embedder.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "memory://".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

/// All lifecycle and protocol timings, in milliseconds.
///
/// Every value is env-overridable (`CLASSBRIDGE__TIMEOUTS__*`); the
/// defaults are the production values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Reaper pass interval
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Active session, never had students, older than this => no_students
    #[serde(default = "default_empty_teacher_timeout_ms")]
    pub empty_teacher_timeout_ms: u64,

    /// Grace window after the last student leaves
    #[serde(default = "default_all_students_left_timeout_ms")]
    pub all_students_left_timeout_ms: u64,

    /// No activity at all for this long => no_activity
    #[serde(default = "default_stale_session_timeout_ms")]
    pub stale_session_timeout_ms: u64,

    /// Window in which a returning teacher resumes the prior session
    #[serde(default = "default_teacher_reconnection_grace_ms")]
    pub teacher_reconnection_grace_ms: u64,

    /// Classroom code lifetime from creation
    #[serde(default = "default_classroom_code_expiration_ms")]
    pub classroom_code_expiration_ms: u64,

    /// Code expiry sweep interval
    #[serde(default = "default_classroom_code_cleanup_interval_ms")]
    pub classroom_code_cleanup_interval_ms: u64,

    /// Heartbeat sweep interval
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Delay between session_expired message and the 1008 close
    #[serde(default = "default_session_expired_message_delay_ms")]
    pub session_expired_message_delay_ms: u64,

    /// Delay between INVALID_CLASSROOM error and the 1008 close
    #[serde(default = "default_invalid_classroom_message_delay_ms")]
    pub invalid_classroom_message_delay_ms: u64,

    /// Per-call deadline for STT/Translate/TTS/storage
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Min interval between audio-driven activity writes per connection
    #[serde(default = "default_audio_activity_min_interval_ms")]
    pub audio_activity_min_interval_ms: u64,
}

fn default_cleanup_interval_ms() -> u64 {
    2 * 60 * 1000
}

fn default_empty_teacher_timeout_ms() -> u64 {
    15 * 60 * 1000
}

fn default_all_students_left_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn default_stale_session_timeout_ms() -> u64 {
    90 * 60 * 1000
}

fn default_teacher_reconnection_grace_ms() -> u64 {
    5 * 60 * 1000
}

fn default_classroom_code_expiration_ms() -> u64 {
    2 * 60 * 60 * 1000
}

fn default_classroom_code_cleanup_interval_ms() -> u64 {
    60 * 1000
}

fn default_health_check_interval_ms() -> u64 {
    30 * 1000
}

fn default_session_expired_message_delay_ms() -> u64 {
    1000
}

fn default_invalid_classroom_message_delay_ms() -> u64 {
    100
}

fn default_provider_timeout_ms() -> u64 {
    15 * 1000
}

fn default_audio_activity_min_interval_ms() -> u64 {
    30 * 1000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: default_cleanup_interval_ms(),
            empty_teacher_timeout_ms: default_empty_teacher_timeout_ms(),
            all_students_left_timeout_ms: default_all_students_left_timeout_ms(),
            stale_session_timeout_ms: default_stale_session_timeout_ms(),
            teacher_reconnection_grace_ms: default_teacher_reconnection_grace_ms(),
            classroom_code_expiration_ms: default_classroom_code_expiration_ms(),
            classroom_code_cleanup_interval_ms: default_classroom_code_cleanup_interval_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            session_expired_message_delay_ms: default_session_expired_message_delay_ms(),
            invalid_classroom_message_delay_ms: default_invalid_classroom_message_delay_ms(),
            provider_timeout_ms: default_provider_timeout_ms(),
            audio_activity_min_interval_ms: default_audio_activity_min_interval_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn empty_teacher_timeout(&self) -> Duration {
        Duration::from_millis(self.empty_teacher_timeout_ms)
    }

    pub fn all_students_left_timeout(&self) -> Duration {
        Duration::from_millis(self.all_students_left_timeout_ms)
    }

    pub fn stale_session_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_session_timeout_ms)
    }

    pub fn teacher_reconnection_grace(&self) -> Duration {
        Duration::from_millis(self.teacher_reconnection_grace_ms)
    }

    pub fn classroom_code_expiration(&self) -> Duration {
        Duration::from_millis(self.classroom_code_expiration_ms)
    }

    pub fn classroom_code_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.classroom_code_cleanup_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn session_expired_message_delay(&self) -> Duration {
        Duration::from_millis(self.session_expired_message_delay_ms)
    }

    pub fn invalid_classroom_message_delay(&self) -> Duration {
        Duration::from_millis(self.invalid_classroom_message_delay_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn audio_activity_min_interval(&self) -> Duration {
        Duration::from_millis(self.audio_activity_min_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Minimum base64 length of a final audio chunk
    #[serde(default = "default_min_audio_data_length")]
    pub min_audio_data_length: usize,

    /// Minimum decoded audio buffer length
    #[serde(default = "default_min_audio_buffer_length")]
    pub min_audio_buffer_length: usize,

    /// Min interval between interim transcriptions per connection
    #[serde(default = "default_interim_throttle_ms")]
    pub interim_throttle_ms: u64,

    /// Delivery send attempts before dropping that student
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,

    /// student_request messages allowed per window
    #[serde(default = "default_student_request_limit")]
    pub student_request_limit: u32,

    /// student_request window length
    #[serde(default = "default_student_request_window_ms")]
    pub student_request_window_ms: u64,

    /// Attempts to reach a teacher when none is connected yet
    #[serde(default = "default_teacher_retry_attempts")]
    pub teacher_retry_attempts: u32,

    /// Interval between those attempts
    #[serde(default = "default_teacher_retry_interval_ms")]
    pub teacher_retry_interval_ms: u64,
}

fn default_min_audio_data_length() -> usize {
    100
}

fn default_min_audio_buffer_length() -> usize {
    100
}

fn default_interim_throttle_ms() -> u64 {
    400
}

fn default_send_attempts() -> u32 {
    3
}

fn default_student_request_limit() -> u32 {
    3
}

fn default_student_request_window_ms() -> u64 {
    2000
}

fn default_teacher_retry_attempts() -> u32 {
    5
}

fn default_teacher_retry_interval_ms() -> u64 {
    100
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            min_audio_data_length: default_min_audio_data_length(),
            min_audio_buffer_length: default_min_audio_buffer_length(),
            interim_throttle_ms: default_interim_throttle_ms(),
            send_attempts: default_send_attempts(),
            student_request_limit: default_student_request_limit(),
            student_request_window_ms: default_student_request_window_ms(),
            teacher_retry_attempts: default_teacher_retry_attempts(),
            teacher_retry_interval_ms: default_teacher_retry_interval_ms(),
        }
    }
}

impl LimitConfig {
    pub fn interim_throttle(&self) -> Duration {
        Duration::from_millis(self.interim_throttle_ms)
    }

    pub fn student_request_window(&self) -> Duration {
        Duration::from_millis(self.student_request_window_ms)
    }

    pub fn teacher_retry_interval(&self) -> Duration {
        Duration::from_millis(self.teacher_retry_interval_ms)
    }
}

/// Feature flags, loaded at startup and not hot-reloaded within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Partial STT on non-final audio chunks
    #[serde(default)]
    pub interim_transcription: bool,

    /// Accept `send_translation` (manual teacher fan-out)
    #[serde(default = "default_true")]
    pub manual_translation_control: bool,

    /// Two-way student messaging (server-wide gate; per-connection
    /// override via query param or settings)
    #[serde(default)]
    pub two_way: bool,

    /// PII/profanity redaction of delivered text
    #[serde(default)]
    pub text_sanitization: bool,

    /// Persist delivered translations
    #[serde(default = "default_true")]
    pub detailed_logging: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            interim_transcription: false,
            manual_translation_control: true,
            two_way: false,
            text_sanitization: false,
            detailed_logging: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// STT provider id (`none` selects the disabled built-in)
    #[serde(default = "default_stt_provider")]
    pub stt: String,

    /// Translator id (`passthrough` selects the identity built-in)
    #[serde(default = "default_translator")]
    pub translator: String,

    /// TTS service used when a connection has no ttsServiceType
    #[serde(default = "default_tts_service")]
    pub default_tts_service: String,

    /// Second TTS service tried when the service type is `auto`
    #[serde(default = "default_tts_fallback")]
    pub fallback_tts_service: String,
}

fn default_stt_provider() -> String {
    "none".to_string()
}

fn default_translator() -> String {
    "passthrough".to_string()
}

fn default_tts_service() -> String {
    std::env::var("TTS_SERVICE_TYPE").unwrap_or_else(|_| "openai".to_string())
}

fn default_tts_fallback() -> String {
    "browser".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            stt: default_stt_provider(),
            translator: default_translator(),
            default_tts_service: default_tts_service(),
            fallback_tts_service: default_tts_fallback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON logs
    #[serde(default)]
    pub log_json: bool,

    /// Expose /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port must be non-zero".to_string(),
            });
        }

        // Close-timing commitment: clients must receive the JSON before
        // the socket goes away.
        if self.timeouts.invalid_classroom_message_delay_ms < 100 {
            return Err(ConfigError::InvalidValue {
                field: "timeouts.invalid_classroom_message_delay_ms".to_string(),
                message: "Close delay below 100 ms loses the error message".to_string(),
            });
        }

        if self.limits.send_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "limits.send_attempts".to_string(),
                message: "At least one send attempt is required".to_string(),
            });
        }

        if self.timeouts.cleanup_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeouts.cleanup_interval_ms".to_string(),
                message: "Reaper interval must be non-zero".to_string(),
            });
        }

        if self.storage.database_url.is_empty() {
            return Err(ConfigError::MissingField("storage.database_url".to_string()));
        }

        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("CLASSBRIDGE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
