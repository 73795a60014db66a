use crate::error::AppResult;
use crate::handlers::turn_input;
use crate::state::AppState;
use crate::uploads::read_form;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};

/// `POST /api/llm/query`: a one-shot question, spoken (`file`) or typed (`text`).
/// No session is read or written.
pub async fn llm_query(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let form = read_form(payload, &state.config.uploads).await?;
    let input = turn_input(form).await?;

    let _active = state.begin_turn();
    let result = state.orchestrator.query(input).await;
    state.record_turn_result(&result);

    Ok(HttpResponse::Ok().json(result?))
}
