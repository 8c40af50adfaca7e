// src/services/stats.rs

use chrono::NaiveDate;

use crate::{
    error::AppError,
    models::report::{DashboardStats, StatsQuery},
    store::Store,
    utils::academic::{academic_year_for, academic_year_window, selectable_years},
};

/// Rounded percentage, 0 when nothing was issued.
pub fn participation_rate(used: i64, issued: i64) -> i64 {
    if issued <= 0 {
        return 0;
    }
    (used * 100 + issued / 2) / issued
}

pub async fn dashboard_stats(
    store: &dyn Store,
    query: StatsQuery,
    today: NaiveDate,
) -> Result<DashboardStats, AppError> {
    let current = academic_year_for(today);
    let year = query.year.unwrap_or(current);
    let window = academic_year_window(year)
        .ok_or_else(|| AppError::invalid_field("year", "Academic year out of range"))?;

    let evaluations = store.evaluation_tally(query.module_id, Some(window)).await?;
    let tokens = store.token_tally(query.module_id, Some(window)).await?;
    let total_modules = store.count_modules_with_evaluations().await?;

    Ok(DashboardStats {
        total_modules,
        total_evaluations: evaluations.total,
        completed_evaluations: evaluations.done,
        participation_rate: participation_rate(tokens.done, tokens.total),
        current_academic_year: current,
        years: selectable_years(current),
    })
}
