//! # Turn Orchestrator
//!
//! Runs one request-response cycle: speech-to-text, language model, text-to-speech,
//! with the session transcript updated in between. The three upstream calls are
//! strictly sequential because each one consumes the previous one's output.
//!
//! ## Stages:
//! 1. **Transcribed**: the user's words as text (skipped for text input)
//! 2. **Replied**: the model's answer, generated from the whole transcript
//! 3. **Synthesized**: the answer as audio, or the reason there is none
//!
//! ## Failure policy:
//! - Transcription fails → nothing is written to the session
//! - Generation fails → the `user` turn stays, no `assistant` turn is written
//! - Synthesis fails → the text reply is still returned, with `audio` left empty
//!
//! The stateless flows (speak, transcribe, echo, one-shot query) live here too so the
//! HTTP handlers only deal with request parsing.

use crate::config::AppConfig;
use crate::gateway::{
    AudioClip, AudioRef, GatewayError, ResponseGenerator, SpeechRequest, SpeechSynthesizer,
    Transcriber, VoiceOptions,
};
use crate::session::{HistoryPolicy, Role, SessionStore, TranscriptView, Turn};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// What the client sent for this turn.
#[derive(Debug, Clone)]
pub enum TurnInput {
    Audio(AudioClip),
    Text(String),
}

/// Stage 1 result.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcribed {
    pub text: String,
}

/// Stage 2 result.
#[derive(Debug, Clone, PartialEq)]
pub struct Replied {
    pub text: String,
}

/// Stage 3 result. Never an error: a failed synthesis degrades to text only.
#[derive(Debug, Clone, PartialEq)]
pub enum Synthesized {
    Audio(AudioRef),
    Degraded(GatewayError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TurnError {
    #[error("transcription failed: {0}")]
    Transcription(GatewayError),

    #[error("transcription was empty")]
    EmptyTranscription,

    #[error("response generation failed: {0}")]
    Generation(GatewayError),

    #[error("speech synthesis failed: {0}")]
    Synthesis(GatewayError),

    #[error("session '{0}' is busy with another turn")]
    SessionBusy(String),
}

/// Result of a full cycle, shaped for the HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub transcription: String,
    pub reply_text: String,
    pub audio: Option<AudioRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_error: Option<String>,
}

impl TurnOutcome {
    fn new(session_id: Option<String>, transcription: String, replied: Replied, synthesized: Synthesized) -> Self {
        let (audio, audio_error) = match synthesized {
            Synthesized::Audio(audio) => (Some(audio), None),
            Synthesized::Degraded(err) => (None, Some(err.to_string())),
        };
        Self {
            session_id,
            transcription,
            reply_text: replied.text,
            audio,
            audio_error,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.audio.is_none()
    }
}

/// The three upstream capabilities. A `None` slot means the provider's key was missing.
#[derive(Clone, Default)]
pub struct Gateways {
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub generator: Option<Arc<dyn ResponseGenerator>>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
}

impl Gateways {
    fn transcriber(&self) -> Result<&Arc<dyn Transcriber>, GatewayError> {
        self.transcriber.as_ref().ok_or(GatewayError::NotConfigured("transcription"))
    }

    fn generator(&self) -> Result<&Arc<dyn ResponseGenerator>, GatewayError> {
        self.generator.as_ref().ok_or(GatewayError::NotConfigured("llm"))
    }

    fn synthesizer(&self) -> Result<&Arc<dyn SpeechSynthesizer>, GatewayError> {
        self.synthesizer.as_ref().ok_or(GatewayError::NotConfigured("tts"))
    }
}

/// Knobs that shape a turn; taken from the `session` and `tts` config sections.
#[derive(Debug, Clone)]
pub struct TurnPolicy {
    pub history: HistoryPolicy,
    pub turn_wait_timeout: Duration,
    pub reject_empty_transcription: bool,
    pub default_voice: VoiceOptions,
}

impl TurnPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history: HistoryPolicy::from_config(&config.session),
            turn_wait_timeout: config.session.turn_wait_timeout(),
            reject_empty_transcription: config.session.reject_empty_transcription,
            default_voice: VoiceOptions {
                voice_id: config.tts.voice_id.clone(),
                style: config.tts.style.clone(),
            },
        }
    }
}

pub struct TurnOrchestrator {
    gateways: Gateways,
    sessions: SessionStore,
    policy: TurnPolicy,
}

impl TurnOrchestrator {
    pub fn new(gateways: Gateways, sessions: SessionStore, policy: TurnPolicy) -> Self {
        Self { gateways, sessions, policy }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn policy(&self) -> &TurnPolicy {
        &self.policy
    }

    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    /// One chat cycle against `session_id`'s transcript.
    pub async fn run_turn(&self, session_id: &str, input: TurnInput) -> Result<TurnOutcome, TurnError> {
        let started = Instant::now();

        let permit = self
            .sessions
            .acquire(session_id, self.policy.turn_wait_timeout)
            .await
            .ok_or_else(|| TurnError::SessionBusy(session_id.to_string()))?;

        let transcribed = match self.transcribe_input(input).await {
            Ok(transcribed) => transcribed,
            Err(err) => {
                self.sessions.with_session(session_id, |session| session.touch());
                warn!(session_id = %session_id, error = %err, "Turn aborted before touching the transcript");
                return Err(err);
            }
        };

        self.sessions.append_turn(session_id, Role::User, transcribed.text.clone());
        // Only this turn appends while the permit is held, so the copy stays current.
        let history = self.sessions.history(session_id);

        let replied = match self.reply(&TranscriptView::new(&history)).await {
            Ok(replied) => replied,
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    turns = history.len(),
                    error = %err,
                    "Response generation failed; user turn kept"
                );
                return Err(TurnError::Generation(err));
            }
        };

        self.sessions.append_turn(session_id, Role::Assistant, replied.text.clone());
        let turns = self
            .sessions
            .with_session(session_id, |session| {
                self.policy.history.trim(session);
                session.turns().len()
            })
            .unwrap_or_default();
        // Synthesis does not touch the transcript, so the next turn may start.
        drop(permit);

        let synthesized = self.synthesize(&replied.text, &self.policy.default_voice).await;
        if let Synthesized::Degraded(err) = &synthesized {
            warn!(session_id = %session_id, error = %err, "Speech synthesis failed; returning text only");
        }

        info!(
            session_id = %session_id,
            turns,
            audio = matches!(synthesized, Synthesized::Audio(_)),
            duration_ms = started.elapsed().as_millis() as u64,
            "Turn completed"
        );

        Ok(TurnOutcome::new(Some(session_id.to_string()), transcribed.text, replied, synthesized))
    }

    /// Text to audio. Here synthesis *is* the result, so failure is an error.
    pub async fn speak(&self, text: &str, voice: Option<VoiceOptions>) -> Result<AudioRef, TurnError> {
        let voice = voice.unwrap_or_else(|| self.policy.default_voice.clone());
        let request = SpeechRequest { text: text.to_string(), voice };
        let synthesizer = self.gateways.synthesizer().map_err(TurnError::Synthesis)?;
        synthesizer.synthesize(&request).await.map_err(TurnError::Synthesis)
    }

    /// Audio to text, without any session.
    pub async fn transcribe(&self, clip: &AudioClip) -> Result<String, TurnError> {
        let transcriber = self.gateways.transcriber().map_err(TurnError::Transcription)?;
        transcriber.transcribe(clip).await.map_err(TurnError::Transcription)
    }

    /// Say back what was heard.
    pub async fn echo(&self, clip: AudioClip) -> Result<TurnOutcome, TurnError> {
        let transcribed = self.transcribe_input(TurnInput::Audio(clip)).await?;
        let replied = Replied { text: transcribed.text.clone() };
        let synthesized = self.synthesize(&replied.text, &self.policy.default_voice).await;
        Ok(TurnOutcome::new(None, transcribed.text, replied, synthesized))
    }

    /// One-shot question with no session history.
    pub async fn query(&self, input: TurnInput) -> Result<TurnOutcome, TurnError> {
        let transcribed = self.transcribe_input(input).await?;
        let single = [Turn {
            position: 0,
            role: Role::User,
            content: transcribed.text.clone(),
            created_at: Utc::now(),
        }];
        let replied = self
            .reply(&TranscriptView::new(&single))
            .await
            .map_err(TurnError::Generation)?;
        let synthesized = self.synthesize(&replied.text, &self.policy.default_voice).await;
        Ok(TurnOutcome::new(None, transcribed.text, replied, synthesized))
    }

    async fn transcribe_input(&self, input: TurnInput) -> Result<Transcribed, TurnError> {
        let text = match input {
            TurnInput::Text(text) => text,
            TurnInput::Audio(clip) => self.transcribe(&clip).await?,
        };

        if text.trim().is_empty() && self.policy.reject_empty_transcription {
            return Err(TurnError::EmptyTranscription);
        }
        Ok(Transcribed { text })
    }

    async fn reply(&self, transcript: &TranscriptView<'_>) -> Result<Replied, GatewayError> {
        let generator = self.gateways.generator()?;
        let text = generator.generate(transcript).await?;
        Ok(Replied { text })
    }

    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Synthesized {
        let synthesizer = match self.gateways.synthesizer() {
            Ok(synthesizer) => synthesizer,
            Err(err) => return Synthesized::Degraded(err),
        };
        let request = SpeechRequest { text: text.to_string(), voice: voice.clone() };
        match synthesizer.synthesize(&request).await {
            Ok(audio) => Synthesized::Audio(audio),
            Err(err) => Synthesized::Degraded(err),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted gateways for orchestrator and handler tests.

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct ScriptedTranscriber {
        pub result: Result<String, GatewayError>,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn transcribe(&self, _audio: &AudioClip) -> Result<String, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    /// Replies with a fixed answer and records every transcript it was shown.
    pub struct ScriptedGenerator {
        pub result: Result<String, GatewayError>,
        pub seen: Mutex<Vec<Vec<(Role, String)>>>,
    }

    #[async_trait]
    impl ResponseGenerator for ScriptedGenerator {
        async fn generate(&self, transcript: &TranscriptView<'_>) -> Result<String, GatewayError> {
            let snapshot = transcript.iter().map(|t| (t.role, t.content.clone())).collect();
            self.seen.lock().unwrap().push(snapshot);
            self.result.clone()
        }
    }

    pub struct ScriptedSynthesizer {
        pub result: Result<AudioRef, GatewayError>,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for ScriptedSynthesizer {
        async fn synthesize(&self, _request: &SpeechRequest) -> Result<AudioRef, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    pub struct Script {
        pub transcriber: Arc<ScriptedTranscriber>,
        pub generator: Arc<ScriptedGenerator>,
        pub synthesizer: Arc<ScriptedSynthesizer>,
    }

    impl Script {
        pub fn new(
            transcription: Result<&str, GatewayError>,
            reply: Result<&str, GatewayError>,
            audio: Result<&str, GatewayError>,
        ) -> Self {
            Self {
                transcriber: Arc::new(ScriptedTranscriber {
                    result: transcription.map(str::to_string),
                    calls: AtomicUsize::new(0),
                }),
                generator: Arc::new(ScriptedGenerator {
                    result: reply.map(str::to_string),
                    seen: Mutex::new(Vec::new()),
                }),
                synthesizer: Arc::new(ScriptedSynthesizer {
                    result: audio.map(|url| AudioRef { url: url.to_string(), duration_seconds: None }),
                    calls: AtomicUsize::new(0),
                }),
            }
        }

        pub fn happy() -> Self {
            Self::new(Ok("hello"), Ok("hi there"), Ok("https://audio.example/1.mp3"))
        }

        pub fn gateways(&self) -> Gateways {
            Gateways {
                transcriber: Some(self.transcriber.clone()),
                generator: Some(self.generator.clone()),
                synthesizer: Some(self.synthesizer.clone()),
            }
        }

        pub fn orchestrator(&self, policy: TurnPolicy) -> TurnOrchestrator {
            TurnOrchestrator::new(self.gateways(), SessionStore::new(), policy)
        }
    }

    pub fn policy() -> TurnPolicy {
        TurnPolicy {
            history: HistoryPolicy::unbounded(),
            turn_wait_timeout: Duration::from_secs(5),
            reject_empty_transcription: true,
            default_voice: VoiceOptions {
                voice_id: "en-US-ken".to_string(),
                style: "Conversational".to_string(),
            },
        }
    }

    pub fn unavailable(provider: &'static str) -> GatewayError {
        GatewayError::unavailable(provider, "connection refused")
    }
}
