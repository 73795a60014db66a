//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! Provider credentials are deliberately *not* part of [`AppConfig`]. They are read once
//! from the process environment into [`ProviderCredentials`], which is never serialized,
//! so the `/api/config` endpoint can return the whole `AppConfig` without leaking keys.
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Option<T>**: Optional values (a missing API key is `None`, not an empty string)
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (APP_SERVER__HOST, APP_SESSION__MAX_TURNS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the AssemblyAI (speech-to-text) key.
pub const ASSEMBLYAI_KEY_VAR: &str = "ASSEMBLYAI_API_KEY";
/// Environment variable holding the Gemini (language model) key.
pub const GEMINI_KEY_VAR: &str = "GEMINI_API_KEY";
/// Environment variable holding the Murf (text-to-speech) key.
pub const MURF_KEY_VAR: &str = "MURF_API_KEY";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each upstream provider gets its own section so its base URL and timeout can be
/// tuned (or pointed at a mock server in tests) independently of the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub uploads: UploadsConfig,
    pub session: SessionConfig,
    pub transcription: TranscriptionConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Where request-scoped audio uploads are spooled, and how big they may get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    pub dir: PathBuf,
    pub max_upload_bytes: usize,
}

/// Conversation session behaviour.
///
/// ## Fields:
/// - `max_turns`: Turns kept per session after each completed exchange (0 = unbounded)
/// - `idle_ttl_secs`: Sessions idle for longer than this are evicted (0 = never)
/// - `sweep_interval_secs`: How often the idle sweeper runs
/// - `turn_wait_timeout_ms`: How long a turn waits for another turn on the same session
/// - `reject_empty_transcription`: Abort the turn when speech-to-text returns nothing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_turns: usize,
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub turn_wait_timeout_ms: u64,
    pub reject_empty_transcription: bool,
}

/// Speech-to-text provider (AssemblyAI) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub language_code: Option<String>,
}

/// Language model provider (Gemini) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub system_instruction: Option<String>,
}

/// Text-to-speech provider (Murf) settings, including the default voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub voice_id: String,
    pub style: String,
    pub format: String,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,                     // Common development port
            },
            uploads: UploadsConfig {
                dir: PathBuf::from("uploads"),
                max_upload_bytes: 10_000_000,   // 10MB, enough for a long voice note
            },
            session: SessionConfig {
                max_turns: 10,                  // Five user/assistant exchanges of context
                idle_ttl_secs: 3600,
                sweep_interval_secs: 60,
                turn_wait_timeout_ms: 30_000,
                reject_empty_transcription: true,
            },
            transcription: TranscriptionConfig {
                base_url: "https://api.assemblyai.com".to_string(),
                timeout_secs: 60,
                poll_interval_ms: 1000,
                language_code: None,
            },
            llm: LlmConfig {
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                model: "gemini-2.5-flash".to_string(),
                timeout_secs: 30,
                system_instruction: None,
            },
            tts: TtsConfig {
                base_url: "https://api.murf.ai".to_string(),
                timeout_secs: 30,
                voice_id: "en-US-ken".to_string(),
                style: "Conversational".to_string(),
                format: "MP3".to_string(),
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// Nested keys are separated by a double underscore because several field names
    /// contain single underscores themselves:
    /// - `APP_SERVER__PORT=3000` → `server.port`
    /// - `APP_SESSION__MAX_TURNS=20` → `session.max_turns`
    /// - `APP_LLM__MODEL=gemini-2.5-pro` → `llm.model`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Handle special environment variables used by deployment platforms
        // These don't follow the APP_ prefix convention but are commonly used
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Upload limit is greater than 0
    /// - Every provider timeout and the transcription poll interval are greater than 0
    /// - The LLM model name and default voice are not blank
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.uploads.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.session.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("Session sweep interval must be greater than 0"));
        }

        for (name, secs) in [
            ("transcription", self.transcription.timeout_secs),
            ("llm", self.llm.timeout_secs),
            ("tts", self.tts.timeout_secs),
        ] {
            if secs == 0 {
                return Err(anyhow::anyhow!("{} timeout must be greater than 0", name));
            }
        }

        if self.transcription.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Transcription poll interval must be greater than 0"));
        }

        if self.llm.model.trim().is_empty() {
            return Err(anyhow::anyhow!("LLM model cannot be empty"));
        }

        if self.tts.voice_id.trim().is_empty() {
            return Err(anyhow::anyhow!("Default TTS voice cannot be empty"));
        }

        Ok(())  // All validation passed
    }
}

impl SessionConfig {
    /// `max_turns` as the history policy sees it (`None` = unbounded).
    pub fn max_turns(&self) -> Option<usize> {
        (self.max_turns > 0).then_some(self.max_turns)
    }

    /// `idle_ttl_secs` as the history policy sees it (`None` = never expire).
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn turn_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_wait_timeout_ms)
    }
}

/// API keys for the three upstream providers.
///
/// Read exactly once at process start. A missing key only disables the gateway that
/// needs it; everything else keeps working.
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    pub assemblyai: Option<String>,
    pub gemini: Option<String>,
    pub murf: Option<String>,
}

impl ProviderCredentials {
    pub fn from_env() -> Self {
        Self {
            assemblyai: read_key(ASSEMBLYAI_KEY_VAR),
            gemini: read_key(GEMINI_KEY_VAR),
            murf: read_key(MURF_KEY_VAR),
        }
    }
}

/// Blank values count as missing.
fn read_key(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |key: &Option<String>| if key.is_some() { "<set>" } else { "<missing>" };
        f.debug_struct("ProviderCredentials")
            .field("assemblyai", &redact(&self.assemblyai))
            .field("gemini", &redact(&self.gemini))
            .field("murf", &redact(&self.murf))
            .finish()
    }
}
