// src/services/gate.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::AppError,
    models::{
        catalog::Module,
        form::Form,
        token::{EvaluationToken, Validity},
    },
    store::Store,
};

/// What the student sees when opening a valid link.
#[derive(Debug, Clone, Serialize)]
pub struct SurveyView {
    pub module: Module,
    pub form: Form,
    pub expires_at: DateTime<Utc>,
}

pub async fn resolve(store: &dyn Store, token: &str) -> Result<EvaluationToken, AppError> {
    store
        .find_token(token)
        .await?
        .ok_or_else(|| AppError::NotFound("Evaluation link not found".to_string()))
}

pub fn ensure_valid(token: &EvaluationToken, now: DateTime<Utc>) -> Result<(), AppError> {
    match token.check_validity(now) {
        Validity::Ok => Ok(()),
        Validity::Expired => Err(AppError::TokenExpired),
        Validity::AlreadyUsed => Err(AppError::TokenAlreadyUsed),
    }
}

/// Archived forms still render: the link was issued while the form was live.
pub async fn open_survey(
    store: &dyn Store,
    token: &str,
    now: DateTime<Utc>,
) -> Result<SurveyView, AppError> {
    let token = resolve(store, token).await?;
    ensure_valid(&token, now)?;

    let module = store
        .find_module(token.module_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Module not found".to_string()))?;
    let form = store
        .find_form(token.form_id, true)
        .await?
        .ok_or_else(|| AppError::NotFound("Form not found".to_string()))?;

    Ok(SurveyView { module, form, expires_at: token.expires_at })
}
