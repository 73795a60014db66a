//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request handlers
//! simultaneously.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: Multiple HTTP requests run simultaneously and all need access to the same state
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Used for**: metrics only. Each lock is held for a counter update and never across `.await`
//!
//! ## What lives here:
//! - **config**: loaded once at startup, read-only afterwards
//! - **orchestrator**: the gateways plus the session store that every chat request shares
//! - **metrics**: request and turn counters for `/api/health` and `/api/metrics`

use crate::config::{AppConfig, ProviderCredentials};
use crate::gateway::{
    AssemblyAiTranscriber, GeminiGenerator, MurfSynthesizer, ResponseGenerator, SpeechSynthesizer,
    Transcriber,
};
use crate::orchestrator::{Gateways, TurnError, TurnOrchestrator, TurnOutcome, TurnPolicy};
use crate::session::SessionStore;
use std::collections::HashMap;       // For storing per-endpoint metrics
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};  // Thread-safe shared ownership and locking
use std::time::Instant;              // For tracking server uptime
use tracing::warn;

/// The main application state that's shared across all HTTP request handlers.
///
/// Cloning is cheap: every field is either an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (never changes after startup)
    pub config: Arc<AppConfig>,

    /// Gateways + session store
    pub orchestrator: Arc<TurnOrchestrator>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: load and reliability
/// - **active_turns**: chat turns currently in flight
/// - **turns_completed / turns_failed**: how often the full pipeline succeeds
/// - **degraded_replies**: replies that went out as text only because synthesis failed
/// - **endpoint_metrics**: per-endpoint statistics
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_turns: u32,
    pub turns_completed: u64,
    pub turns_failed: u64,
    pub degraded_replies: u64,
    /// Key: endpoint name (e.g., "POST /api/agent/chat/{session_id}")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Build the real provider gateways from configuration and credentials.
    ///
    /// ## What this does:
    /// 1. Creates one shared HTTP client (connection pooling across all providers)
    /// 2. Builds a gateway for every provider whose API key is present
    /// 3. Logs a warning for each missing key; those endpoints answer 503
    pub fn new(config: AppConfig, credentials: ProviderCredentials) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .build()?;

        let transcriber: Option<Arc<dyn Transcriber>> = credentials.assemblyai.map(|key| {
            Arc::new(AssemblyAiTranscriber::new(client.clone(), key, &config.transcription)) as Arc<dyn Transcriber>
        });
        let generator: Option<Arc<dyn ResponseGenerator>> = credentials.gemini.map(|key| {
            Arc::new(GeminiGenerator::new(client.clone(), key, &config.llm)) as Arc<dyn ResponseGenerator>
        });
        let synthesizer: Option<Arc<dyn SpeechSynthesizer>> = credentials.murf.map(|key| {
            Arc::new(MurfSynthesizer::new(client.clone(), key, &config.tts)) as Arc<dyn SpeechSynthesizer>
        });
        let gateways = Gateways { transcriber, generator, synthesizer };

        for (name, present) in [
            (crate::config::ASSEMBLYAI_KEY_VAR, gateways.transcriber.is_some()),
            (crate::config::GEMINI_KEY_VAR, gateways.generator.is_some()),
            (crate::config::MURF_KEY_VAR, gateways.synthesizer.is_some()),
        ] {
            if !present {
                warn!(variable = name, "API key missing; endpoints that need it will answer 503");
            }
        }

        Ok(Self::with_gateways(config, gateways, SessionStore::new()))
    }

    /// Assemble state around already-built gateways (also used by tests).
    pub fn with_gateways(config: AppConfig, gateways: Gateways, sessions: SessionStore) -> Self {
        let policy = TurnPolicy::from_config(&config);
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(TurnOrchestrator::new(gateways, sessions, policy)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        self.orchestrator.sessions()
    }

    /// Which gateways are usable, by name.
    pub fn gateway_status(&self) -> [(&'static str, bool); 3] {
        let gateways = self.orchestrator.gateways();
        [
            ("transcription", gateways.transcriber.is_some()),
            ("llm", gateways.generator.is_some()),
            ("tts", gateways.synthesizer.is_some()),
        ]
    }

    // A panic while holding the metrics lock leaves plain counters behind; keep using them.
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();

        // Get or create metrics for this specific endpoint
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Mark a chat turn as started. The returned guard marks it finished when dropped,
    /// so a turn that errors out (or whose client disconnects) is still accounted for.
    pub fn begin_turn(&self) -> ActiveTurn {
        self.metrics_write().active_turns += 1;
        ActiveTurn { state: self.clone() }
    }

    /// Record how a turn (or one-shot pipeline run) ended.
    pub fn record_turn_result(&self, result: &Result<TurnOutcome, TurnError>) {
        let mut metrics = self.metrics_write();
        match result {
            Ok(outcome) => {
                metrics.turns_completed += 1;
                if outcome.is_degraded() {
                    metrics.degraded_replies += 1;
                }
            }
            Err(_) => metrics.turns_failed += 1,
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// ## Why a snapshot:
    /// Clones the data so we don't hold the lock while sending the HTTP response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("sessions", &self.sessions().len())
            .field("gateways", &self.gateway_status())
            .finish()
    }
}

/// Decrements `active_turns` on drop.
pub struct ActiveTurn {
    state: AppState,
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        let mut metrics = self.state.metrics_write();
        metrics.active_turns = metrics.active_turns.saturating_sub(1);
    }
}

/// Implementation of utility methods for EndpointMetric.
impl EndpointMetric {
    /// Calculate the average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no average to calculate
        }
    }

    /// Calculate the error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no errors possible
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{AudioRef, GatewayError};

    fn state() -> AppState {
        AppState::with_gateways(AppConfig::default(), Gateways::default(), SessionStore::new())
    }

    #[test]
    fn missing_credentials_disable_only_their_gateway() {
        let credentials = ProviderCredentials {
            assemblyai: Some("stt".to_string()),
            gemini: None,
            murf: Some("tts".to_string()),
        };
        let state = AppState::new(AppConfig::default(), credentials).unwrap();
        assert_eq!(
            state.gateway_status(),
            [("transcription", true), ("llm", false), ("tts", true)]
        );
    }

    #[test]
    fn active_turn_guard_balances_the_counter() {
        let state = state();
        {
            let _first = state.begin_turn();
            let _second = state.begin_turn();
            assert_eq!(state.get_metrics_snapshot().active_turns, 2);
        }
        assert_eq!(state.get_metrics_snapshot().active_turns, 0);
    }

    #[test]
    fn turn_results_are_counted() {
        let state = state();
        let full = TurnOutcome {
            session_id: None,
            transcription: "a".to_string(),
            reply_text: "b".to_string(),
            audio: Some(AudioRef { url: "u".to_string(), duration_seconds: None }),
            audio_error: None,
        };
        let degraded = TurnOutcome { audio: None, audio_error: Some("x".to_string()), ..full.clone() };

        state.record_turn_result(&Ok(full));
        state.record_turn_result(&Ok(degraded));
        state.record_turn_result(&Err(TurnError::Generation(GatewayError::NotConfigured("llm"))));

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.turns_completed, 2);
        assert_eq!(metrics.degraded_replies, 1);
        assert_eq!(metrics.turns_failed, 1);
    }

    #[test]
    fn endpoint_averages() {
        let state = state();
        state.record_endpoint_request("GET /api/health", 10, false);
        state.record_endpoint_request("GET /api/health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let endpoint = &metrics.endpoint_metrics["GET /api/health"];
        assert_eq!(endpoint.average_duration_ms(), 20.0);
        assert_eq!(endpoint.error_rate(), 0.5);
    }
}
