//! Upload and speech-to-text endpoints.
//!
//! - `POST /api/upload-audio/` - accepts an audio file and reports what arrived
//! - `POST /api/transcribe/file` - returns the text spoken in an audio file

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::uploads::read_form;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub content_type: Option<String>,
    pub size_in_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub transcription: String,
}

pub async fn upload_audio(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let upload = read_form(payload, &state.config.uploads).await?.require_file()?;
    if !upload.is_audio() {
        return Err(AppError::ValidationError(format!(
            "Expected an audio file, got '{}'",
            upload.content_type.as_deref().unwrap_or("unknown")
        )));
    }

    let response = UploadResponse {
        filename: upload.filename.clone(),
        content_type: upload.content_type.clone(),
        size_in_bytes: upload.size_in_bytes,
    };
    info!(filename = %response.filename, size_in_bytes = response.size_in_bytes, "Audio received");
    drop(upload);

    Ok(HttpResponse::Ok().json(response))
}

pub async fn transcribe_file(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let upload = read_form(payload, &state.config.uploads).await?.require_file()?;
    let clip = upload.to_clip().await?;
    drop(upload);

    let transcription = state.orchestrator.transcribe(&clip).await?;
    Ok(HttpResponse::Ok().json(TranscriptionResponse { transcription }))
}
