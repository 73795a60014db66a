//! Text-to-speech endpoints.
//!
//! - `POST /api/text-to-speech` - JSON text in, audio URL out
//! - `POST /api/tts/echo` - audio in, the same words spoken back

use crate::error::{AppError, AppResult};
use crate::gateway::{AudioRef, VoiceOptions};
use crate::state::AppState;
use crate::uploads::read_form;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    pub voice_id: Option<String>,
    pub style: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SpeakResponse {
    pub text: String,
    pub audio: AudioRef,
}

pub async fn text_to_speech(
    state: web::Data<AppState>,
    body: web::Json<SpeakRequest>,
) -> AppResult<HttpResponse> {
    let SpeakRequest { text, voice_id, style } = body.into_inner();
    if text.trim().is_empty() {
        return Err(AppError::ValidationError("'text' must not be empty".to_string()));
    }

    // Either override falls back to the configured default for the other.
    let voice = (voice_id.is_some() || style.is_some()).then(|| {
        let default = &state.orchestrator.policy().default_voice;
        VoiceOptions {
            voice_id: voice_id.unwrap_or_else(|| default.voice_id.clone()),
            style: style.unwrap_or_else(|| default.style.clone()),
        }
    });

    let audio = state.orchestrator.speak(&text, voice).await?;
    info!(chars = text.len(), url = %audio.url, "Synthesized speech");

    Ok(HttpResponse::Ok().json(SpeakResponse { text, audio }))
}

pub async fn tts_echo(state: web::Data<AppState>, payload: actix_multipart::Multipart) -> AppResult<HttpResponse> {
    let upload = read_form(payload, &state.config.uploads).await?.require_file()?;
    let clip = upload.to_clip().await?;
    drop(upload);

    let _active = state.begin_turn();
    let result = state.orchestrator.echo(clip).await;
    state.record_turn_result(&result);

    Ok(HttpResponse::Ok().json(result?))
}
