// src/handlers/evaluation.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    error::AppError,
    models::token::{
        IssueTokensRequest, PurgeQuery, RECENT_TOKENS_DEFAULT, RecentToken, RecentTokensQuery,
    },
    services::issuer,
    state::AppState,
    store::SharedStore,
};

/// Sends a fresh evaluation link to every student of a module/class cohort.
/// Admin only.
pub async fn issue_tokens(
    State(state): State<AppState>,
    Json(payload): Json<IssueTokensRequest>,
) -> Result<impl IntoResponse, AppError> {
    let summary = issuer::issue_tokens_for_cohort(
        state.store.as_ref(),
        state.notifier.as_ref(),
        &state.config,
        payload,
        Utc::now(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Issuance batches with sent/completed/expired counts, newest first.
pub async fn list_batches(State(store): State<SharedStore>) -> Result<impl IntoResponse, AppError> {
    let batches = store.token_batches(Utc::now()).await?;
    Ok(Json(batches))
}

pub async fn purge_expired_tokens(
    State(store): State<SharedStore>,
    Query(query): Query<PurgeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = store.purge_tokens_expired_before(query.before).await?;
    tracing::info!(deleted, before = %query.before, "Purged expired evaluation tokens");

    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// Latest issued links (default 10) with module title and status.
pub async fn recent_tokens(
    State(store): State<SharedStore>,
    Query(query): Query<RecentTokensQuery>,
) -> Result<impl IntoResponse, AppError> {
    query.validate()?;
    let now = Utc::now();
    let tokens = store
        .recent_tokens(query.limit.unwrap_or(RECENT_TOKENS_DEFAULT))
        .await?;

    let mut titles: HashMap<i64, Option<String>> = HashMap::new();
    let mut rows = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !titles.contains_key(&token.module_id) {
            let title = store.find_module(token.module_id).await?.map(|m| m.title);
            titles.insert(token.module_id, title);
        }
        rows.push(RecentToken {
            module_title: titles.get(&token.module_id).cloned().flatten(),
            status: token.status_at(now),
            token,
        });
    }

    Ok(Json(rows))
}
