//! # Upstream Gateways
//!
//! One single-method adapter per external provider. Each call has a fixed timeout and
//! is never retried; failures come back as a [`GatewayError`] that the orchestrator
//! treats as "this step failed".
//!
//! ## Providers:
//! - **assemblyai**: speech-to-text ([`Transcriber`])
//! - **gemini**: language model ([`ResponseGenerator`])
//! - **murf**: text-to-speech ([`SpeechSynthesizer`])

pub mod assemblyai;
pub mod gemini;
pub mod murf;

pub use assemblyai::AssemblyAiTranscriber;
pub use gemini::GeminiGenerator;
pub use murf::MurfSynthesizer;

use crate::session::TranscriptView;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single upstream call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// Network failure, 5xx, or a response we could not make sense of.
    #[error("{provider} is unavailable: {message}")]
    Unavailable { provider: &'static str, message: String },

    /// 4xx, invalid input, or a provider-reported failure.
    #[error("{provider} rejected the request: {message}")]
    Rejected { provider: &'static str, message: String },

    #[error("{provider} timed out after {timeout_ms}ms")]
    Timeout { provider: &'static str, timeout_ms: u64 },

    /// The provider's credential was absent at startup.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl GatewayError {
    pub fn unavailable(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable { provider, message: message.into() }
    }

    pub fn rejected(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected { provider, message: message.into() }
    }

    /// Machine-readable kind, used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "upstream_unavailable",
            Self::Rejected { .. } => "upstream_rejected",
            Self::Timeout { .. } => "upstream_timeout",
            Self::NotConfigured(_) => "upstream_not_configured",
        }
    }

    /// Map a non-success HTTP status from a provider.
    pub fn from_status(provider: &'static str, status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, truncate(body, 300));
        if (400..500).contains(&status) {
            Self::rejected(provider, message)
        } else {
            Self::unavailable(provider, message)
        }
    }

    /// Map a transport error. Timeouts reported by reqwest itself still count as timeouts.
    pub fn from_reqwest(provider: &'static str, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout { provider, timeout_ms: timeout.as_millis() as u64 }
        } else if err.is_decode() {
            Self::unavailable(provider, format!("malformed response: {}", err))
        } else {
            Self::unavailable(provider, err.to_string())
        }
    }
}

/// Run one upstream call under its fixed timeout.
pub async fn with_timeout<T>(
    provider: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout { provider, timeout_ms: timeout.as_millis() as u64 }),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn trim_trailing_slash(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Audio uploaded by a client.
#[derive(Debug, Clone, Default)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, ..Self::default() }
    }
}

/// Voice parameters for synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceOptions {
    pub voice_id: String,
    pub style: String,
}

#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: VoiceOptions,
}

/// Where the synthesized audio can be fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRef {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioClip) -> Result<String, GatewayError>;
}

/// Language model completion over an ordered transcript.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, transcript: &TranscriptView<'_>) -> Result<String, GatewayError>;
}

/// Text-to-speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioRef, GatewayError>;
}
