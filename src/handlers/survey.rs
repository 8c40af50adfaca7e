// src/handlers/survey.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use crate::{
    error::AppError,
    models::evaluation::SubmitSurveyRequest,
    services::{gate, recorder},
    state::AppState,
    store::SharedStore,
};

/// Loads the survey behind an evaluation link.
///
/// Public. An expired link answers 410 and a used one 409, each with a
/// `reason` the page can show.
pub async fn get_survey(
    State(store): State<SharedStore>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let view = gate::open_survey(store.as_ref(), &token, Utc::now()).await?;
    Ok(Json(view))
}

/// Records the answers and consumes the link.
pub async fn submit_survey(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<SubmitSurveyRequest>,
) -> Result<impl IntoResponse, AppError> {
    recorder::submit(
        state.store.as_ref(),
        state.anonymizer.as_ref(),
        &state.config.app_key,
        &token,
        payload,
        Utc::now(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "status": "completed",
            "message": "Thank you, your evaluation has been recorded"
        })),
    ))
}
