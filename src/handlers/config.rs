use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration. API keys live outside `AppConfig`, so nothing secret leaks here.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": serde_json::to_value(state.config.as_ref())?,
        "gateways": state
            .gateway_status()
            .iter()
            .map(|(name, available)| (name.to_string(), json!(available)))
            .collect::<serde_json::Map<_, _>>(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{configure, test_support};
    use crate::orchestrator::testing::Script;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn config_is_returned_without_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(Script::happy().gateways(), dir.path());
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/config").to_request()).await;

        assert_eq!(body["config"]["session"]["max_turns"], 10);
        assert_eq!(body["config"]["tts"]["voice_id"], "en-US-ken");
        assert_eq!(body["gateways"]["transcription"], true);
        assert!(!body.to_string().to_lowercase().contains("api_key"));
    }
}
