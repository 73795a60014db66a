//! # Conversational Agent Endpoints
//!
//! One request is one turn of a conversation: the user's audio goes in, the assistant's
//! text and audio come out, and the session transcript grows by a `user` and an
//! `assistant` turn.
//!
//! ## Available Endpoints:
//! - `POST /api/agent/chat/{session_id}` - next turn of an existing (or new) conversation
//! - `POST /api/agent/chat` - first turn of a conversation with a generated id
//! - `GET /api/agent/chat/{session_id}/history` - the transcript so far
//! - `DELETE /api/agent/chat/{session_id}` - forget a conversation
//!
//! Sessions are created on first use, so chatting with an unknown id is never an error.

use crate::error::{AppError, AppResult};
use crate::handlers::turn_input;
use crate::session::{Removal, Turn};
use crate::state::AppState;
use crate::uploads::read_form;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    /// `None` for a session that does not exist.
    pub created_at: Option<DateTime<Utc>>,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub session_id: String,
    pub removed: bool,
}

pub async fn chat(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    run_chat(&state, path.into_inner(), payload).await
}

pub async fn start_chat(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let session_id = Uuid::new_v4().to_string();
    debug!(session_id = %session_id, "Starting new conversation");
    run_chat(&state, session_id, payload).await
}

async fn run_chat(state: &AppState, session_id: String, payload: Multipart) -> AppResult<HttpResponse> {
    let form = read_form(payload, &state.config.uploads).await?;
    let input = turn_input(form).await?;

    let _active = state.begin_turn();
    let result = state.orchestrator.run_turn(&session_id, input).await;
    state.record_turn_result(&result);

    Ok(HttpResponse::Ok().json(result?))
}

pub async fn chat_history(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let sessions = state.sessions();
    let created_at = sessions.with_session(&session_id, |session| session.created_at);
    let turns = sessions.history(&session_id);
    Ok(HttpResponse::Ok().json(HistoryResponse { session_id, created_at, turns }))
}

pub async fn reset_session(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let wait = state.orchestrator.policy().turn_wait_timeout;
    match state.sessions().remove(&session_id, wait).await {
        Removal::Removed => {}
        Removal::Missing => return Err(AppError::NotFound(format!("Session '{}'", session_id))),
        Removal::Busy => return Err(AppError::SessionBusy(session_id)),
    }

    info!(session_id = %session_id, "Session reset");
    Ok(HttpResponse::Ok().json(ResetResponse { session_id, removed: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure;
    use crate::handlers::test_support::{self, Part};
    use crate::orchestrator::testing::{unavailable, Script};
    use crate::config::AppConfig;
    use crate::session::{Role, SessionStore};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn chat_request(session_id: &str) -> test::TestRequest {
        test_support::multipart(
            test::TestRequest::post().uri(&format!("/api/agent/chat/{}", session_id)),
            &[Part::audio(b"RIFFfake")],
        )
    }

    #[actix_web::test]
    async fn first_message_creates_the_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(Script::happy().gateways(), dir.path());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, chat_request("abc").to_request()).await;

        assert_eq!(body["session_id"], "abc");
        assert_eq!(body["transcription"], "hello");
        assert_eq!(body["reply_text"], "hi there");
        assert_eq!(body["audio"]["url"], "https://audio.example/1.mp3");

        let history: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/agent/chat/abc/history").to_request(),
        )
        .await;
        assert!(history["created_at"].is_string());
        let turns: Vec<(String, String)> = history["turns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| (t["role"].as_str().unwrap().to_string(), t["content"].as_str().unwrap().to_string()))
            .collect();
        assert_eq!(
            turns,
            vec![
                ("user".to_string(), "hello".to_string()),
                ("assistant".to_string(), "hi there".to_string()),
            ]
        );

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.turns_completed, 1);
        assert_eq!(metrics.active_turns, 0);
        assert!(test_support::dir_is_empty(dir.path()));
    }

    #[actix_web::test]
    async fn chat_without_id_generates_one() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(Script::happy().gateways(), dir.path());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let req = test_support::multipart(
            test::TestRequest::post().uri("/api/agent/chat"),
            &[Part::audio(b"RIFFfake")],
        )
        .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let session_id = body["session_id"].as_str().unwrap();
        assert!(Uuid::parse_str(session_id).is_ok());
        assert_eq!(state.sessions().history(session_id).len(), 2);
    }

    #[actix_web::test]
    async fn typed_message_continues_the_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::happy();
        let state = test_support::state(script.gateways(), dir.path());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        test::call_service(&app, chat_request("abc").to_request()).await;
        let req = test_support::multipart(
            test::TestRequest::post().uri("/api/agent/chat/abc"),
            &[Part::text("tell me more")],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(script.transcriber.calls.load(Ordering::SeqCst), 1);
        let seen = script.generator.seen.lock().unwrap().clone();
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][2], (Role::User, "tell me more".to_string()));
    }

    #[actix_web::test]
    async fn unknown_session_has_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(Script::happy().gateways(), dir.path());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/agent/chat/nobody/history").to_request(),
        )
        .await;

        assert_eq!(body["session_id"], "nobody");
        assert_eq!(body["created_at"], serde_json::Value::Null);
        assert_eq!(body["turns"].as_array().unwrap().len(), 0);
        assert_eq!(state.sessions().len(), 0);
    }

    #[actix_web::test]
    async fn generation_failure_keeps_the_user_turn() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(Ok("hello"), Err(unavailable("gemini")), Ok("unused"));
        let state = test_support::state(script.gateways(), dir.path());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let resp = test::call_service(&app, chat_request("abc").to_request()).await;

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"]["message"].as_str().unwrap().starts_with("response generation failed"));

        let history = state.sessions().history("abc");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(state.get_metrics_snapshot().turns_failed, 1);
    }

    #[actix_web::test]
    async fn empty_transcription_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(Ok(""), Ok("unused"), Ok("unused"));
        let state = test_support::state(script.gateways(), dir.path());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let resp = test::call_service(&app, chat_request("abc").to_request()).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(state.sessions().history("abc").is_empty());
    }

    #[actix_web::test]
    async fn reset_forgets_the_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(Script::happy().gateways(), dir.path());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        test::call_service(&app, chat_request("abc").to_request()).await;

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::delete().uri("/api/agent/chat/abc").to_request(),
        )
        .await;
        assert_eq!(body["removed"], true);
        assert!(state.sessions().history("abc").is_empty());

        let again = test::call_service(&app, test::TestRequest::delete().uri("/api/agent/chat/abc").to_request()).await;
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn history_answers_while_a_turn_is_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(Script::happy().gateways(), dir.path());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        state.sessions().append_turn("abc", Role::User, "hello");
        let _permit = state.sessions().acquire("abc", Duration::ZERO).await.expect("unlocked");

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/agent/chat/abc/history").to_request(),
        )
        .await;
        assert_eq!(body["turns"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn reset_during_a_turn_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.uploads.dir = dir.path().to_path_buf();
        config.session.turn_wait_timeout_ms = 10;
        let state = AppState::with_gateways(config, Script::happy().gateways(), SessionStore::new());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        state.sessions().append_turn("abc", Role::User, "hello");
        let permit = state.sessions().acquire("abc", Duration::ZERO).await.expect("unlocked");

        let busy = test::call_service(&app, test::TestRequest::delete().uri("/api/agent/chat/abc").to_request()).await;
        assert_eq!(busy.status(), StatusCode::CONFLICT);
        assert_eq!(state.sessions().history("abc").len(), 1);

        drop(permit);
        let removed = test::call_service(&app, test::TestRequest::delete().uri("/api/agent/chat/abc").to_request()).await;
        assert_eq!(removed.status(), StatusCode::OK);
    }
}
