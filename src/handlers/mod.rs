//! # HTTP Handlers
//!
//! Thin request/response adapters. Each handler parses its input (JSON body, multipart
//! form or path), hands it to the [`TurnOrchestrator`](crate::orchestrator::TurnOrchestrator)
//! and serializes whatever comes back. Errors bubble up as [`AppError`] via `?`.

pub mod agent;
pub mod config;
pub mod llm;
pub mod speech;
pub mod transcribe;

pub use agent::*;
pub use config::*;
pub use llm::*;
pub use speech::*;
pub use transcribe::*;

use crate::error::AppError;
use crate::health;
use crate::orchestrator::TurnInput;
use crate::uploads::UploadForm;
use actix_web::web;

/// Register every `/api` route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .app_data(json_config())
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config))
            .route("/text-to-speech", web::post().to(text_to_speech))
            .route("/upload-audio/", web::post().to(upload_audio))
            .route("/transcribe/file", web::post().to(transcribe_file))
            .route("/tts/echo", web::post().to(tts_echo))
            .route("/llm/query", web::post().to(llm_query))
            .route("/agent/chat", web::post().to(start_chat))
            .service(
                web::resource("/agent/chat/{session_id}")
                    .route(web::post().to(chat))
                    .route(web::delete().to(reset_session)),
            )
            .route("/agent/chat/{session_id}/history", web::get().to(chat_history)),
    );
}

/// Malformed JSON bodies get the same error shape as every other failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| AppError::ValidationError(err.to_string()).into())
}

/// Audio wins over text when a form carries both.
pub(crate) async fn turn_input(form: UploadForm) -> Result<TurnInput, AppError> {
    if let Some(upload) = form.file {
        return Ok(TurnInput::Audio(upload.to_clip().await?));
    }
    match form.text {
        Some(text) if !text.trim().is_empty() => Ok(TurnInput::Text(text)),
        Some(_) => Err(AppError::ValidationError("'text' must not be empty".to_string())),
        None => Err(AppError::ValidationError(
            "Expected a 'file' or 'text' part in the form".to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for handler tests: state over scripted gateways and
    //! hand-built multipart bodies.

    use crate::config::AppConfig;
    use crate::orchestrator::Gateways;
    use crate::session::SessionStore;
    use crate::state::AppState;
    use actix_web::http::header;
    use actix_web::test::TestRequest;
    use std::path::Path;

    const BOUNDARY: &str = "----voiceagentboundary";

    pub struct Part<'a> {
        pub name: &'a str,
        pub filename: Option<&'a str>,
        pub content_type: Option<&'a str>,
        pub body: &'a [u8],
    }

    impl<'a> Part<'a> {
        pub fn audio(body: &'a [u8]) -> Self {
            Self { name: "file", filename: Some("clip.wav"), content_type: Some("audio/wav"), body }
        }

        pub fn text(body: &'a str) -> Self {
            Self { name: "text", filename: None, content_type: None, body: body.as_bytes() }
        }
    }

    pub fn state(gateways: Gateways, uploads_dir: &Path) -> AppState {
        let mut config = AppConfig::default();
        config.uploads.dir = uploads_dir.to_path_buf();
        AppState::with_gateways(config, gateways, SessionStore::new())
    }

    pub fn multipart(request: TestRequest, parts: &[Part<'_>]) -> TestRequest {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
            if let Some(filename) = part.filename {
                disposition.push_str(&format!("; filename=\"{}\"", filename));
            }
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(b"\r\n");
            if let Some(content_type) = part.content_type {
                body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
            }
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(part.body);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        request
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    pub fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).map(|mut entries| entries.next().is_none()).unwrap_or(true)
    }
}
