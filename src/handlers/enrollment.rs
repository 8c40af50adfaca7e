// src/handlers/enrollment.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::enrollment::{
        CreateEnrollmentRequest, EnrollmentQuery, UpdateEnrollmentRequest, check_window,
    },
    store::SharedStore,
};

/// Class groups that have students enrolled in the module, for picking a
/// `class_group` when issuing.
pub async fn module_groups(
    State(store): State<SharedStore>,
    Path(module_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if store.find_module(module_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Module {} not found", module_id)));
    }
    let groups = store.module_groups(module_id).await?;
    Ok(Json(groups))
}

/// Students enrolled in a module for a class.
pub async fn list_enrollments(
    State(store): State<SharedStore>,
    Query(query): Query<EnrollmentQuery>,
) -> Result<impl IntoResponse, AppError> {
    let rows = store.list_enrollments(query.module_id, query.class_id).await?;
    Ok(Json(rows))
}

pub async fn create_enrollment(
    State(store): State<SharedStore>,
    Json(payload): Json<CreateEnrollmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    check_window(payload.start_date, payload.end_date)?;

    let enrollment = store.create_enrollment(&payload).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// Date correction; the enrolled triple itself never changes.
pub async fn update_enrollment(
    State(store): State<SharedStore>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateEnrollmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_window(payload.start_date, payload.end_date)?;

    let enrollment = store
        .update_enrollment_dates(id, payload.start_date, payload.end_date)
        .await?;
    Ok(Json(enrollment))
}

pub async fn delete_enrollment(
    State(store): State<SharedStore>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !store.delete_enrollment(id).await? {
        return Err(AppError::NotFound(format!("Enrollment {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
