// src/handlers/report.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{NaiveDate, Utc};

use crate::{
    error::AppError,
    models::report::{ReportQuery, StatsQuery},
    services::{report, stats},
    state::AppState,
    store::SharedStore,
};

/// Respondents and answers of one issuance batch.
///
/// With `?export=true` the rows are also appended to the workbook.
pub async fn cohort_report(
    State(state): State<AppState>,
    Path((module_id, class_id, date)): Path<(i64, i64, NaiveDate)>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let mut cohort = report::build_cohort_report(
        state.store.as_ref(),
        &state.config.app_key,
        module_id,
        class_id,
        date,
        Utc::now(),
    )
    .await?;

    if query.export {
        cohort.export = Some(report::export_report(state.sheets.as_ref(), &cohort).await?);
    }

    Ok(Json(cohort))
}

pub async fn dashboard_stats(
    State(store): State<SharedStore>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let stats = stats::dashboard_stats(store.as_ref(), query, Utc::now().date_naive()).await?;
    Ok(Json(stats))
}
