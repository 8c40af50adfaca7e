// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{enrollment, evaluation, form, report, survey},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Assembles the main application router.
///
/// * Public survey routes under `/api/survey`.
/// * Admin routes under `/api/admin`, behind JWT auth then the admin check.
/// * Global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let survey_routes = Router::new().route(
        "/{token}",
        get(survey::get_survey).post(survey::submit_survey),
    );

    let admin_routes = Router::new()
        .route("/evaluations/send", post(evaluation::issue_tokens))
        .route("/evaluations/batches", get(evaluation::list_batches))
        .route("/evaluations/recent", get(evaluation::recent_tokens))
        .route("/modules/{module_id}/groups", get(enrollment::module_groups))
        .route("/tokens/expired", delete(evaluation::purge_expired_tokens))
        .route(
            "/reports/{module_id}/{class_id}/{date}",
            get(report::cohort_report),
        )
        .route("/dashboard/stats", get(report::dashboard_stats))
        .route("/forms", get(form::list_forms).post(form::create_form))
        .route(
            "/forms/{id}",
            put(form::update_form).delete(form::delete_form),
        )
        .route("/forms/{id}/toggle-active", put(form::toggle_form_active))
        .route(
            "/enrollments",
            get(enrollment::list_enrollments).post(enrollment::create_enrollment),
        )
        .route(
            "/enrollments/{id}",
            put(enrollment::update_enrollment).delete(enrollment::delete_enrollment),
        )
        // Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/survey", survey_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
