// src/handlers/form.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use crate::{
    error::AppError,
    models::form::{FormDraft, FormRequest},
    store::SharedStore,
};

/// Lists non-archived forms with their sections and questions.
pub async fn list_forms(State(store): State<SharedStore>) -> Result<impl IntoResponse, AppError> {
    let forms = store.list_forms().await?;
    Ok(Json(forms))
}

/// Creates a form with its whole section/question tree.
///
/// Sections point at their controlling question by `key`; the returned form
/// carries the resolved ids.
pub async fn create_form(
    State(store): State<SharedStore>,
    Json(payload): Json<FormRequest>,
) -> Result<impl IntoResponse, AppError> {
    let draft = FormDraft::from_request(payload)?;
    let form = store.create_form(draft).await?;
    tracing::info!(form_id = form.id, sections = form.sections.len(), "Form created");

    Ok((StatusCode::CREATED, Json(form)))
}

/// Replaces title, description and every section and question.
pub async fn update_form(
    State(store): State<SharedStore>,
    Path(id): Path<i64>,
    Json(payload): Json<FormRequest>,
) -> Result<impl IntoResponse, AppError> {
    let draft = FormDraft::from_request(payload)?;
    let form = store.replace_form(id, draft).await?;
    tracing::info!(form_id = form.id, "Form replaced");

    Ok(Json(form))
}

pub async fn toggle_form_active(
    State(store): State<SharedStore>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let form = store.toggle_form_active(id).await?;
    Ok(Json(form))
}

/// Soft delete: old links and reports keep rendering the form.
pub async fn delete_form(
    State(store): State<SharedStore>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !store.archive_form(id, Utc::now()).await? {
        return Err(AppError::NotFound(format!("Form {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
