// src/services/issuer.rs

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use url::Url;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::{
        catalog::ClassGroup,
        enrollment::EnrolledStudent,
        token::{IssueSummary, IssueTokensRequest, NewToken},
    },
    notify::{Invitation, NotificationSender},
    store::Store,
    utils::token::{generate_token, redact},
};

/// Identifies the cohort and form a batch is issued for.
#[derive(Debug, Clone, Copy)]
pub struct BatchTarget {
    pub module_id: i64,
    pub class_id: i64,
    pub form_id: i64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One token per distinct student, in enrollment order.
pub fn plan_tokens(
    enrollments: &[EnrolledStudent],
    target: BatchTarget,
    mut next_token: impl FnMut() -> String,
) -> Vec<NewToken> {
    let mut seen = HashSet::new();
    enrollments
        .iter()
        .filter(|e| seen.insert(e.student_id))
        .map(|e| NewToken {
            token: next_token(),
            module_id: target.module_id,
            class_id: target.class_id,
            form_id: target.form_id,
            student_email: e.notification_email().to_string(),
            expires_at: target.expires_at,
            created_at: target.issued_at,
        })
        .collect()
}

/// `<base>/evaluate/<token>`, keeping any path prefix of the base URL.
pub fn survey_url(base: &Url, token: &str) -> Result<String, AppError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AppError::InternalServerError("APP_URL cannot be a base URL".to_string()))?
        .pop_if_empty()
        .push("evaluate")
        .push(token);
    Ok(url.to_string())
}

async fn resolve_class(store: &dyn Store, req: &IssueTokensRequest) -> Result<ClassGroup, AppError> {
    let name = req.class_group.as_deref().map(str::trim);
    match (req.class_id, name) {
        (Some(id), None) => store
            .find_class(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Class {} not found", id))),
        (None, Some(name)) if !name.is_empty() => store
            .find_class_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Class '{}' not found", name))),
        _ => Err(AppError::invalid_field(
            "class_id",
            "Provide exactly one of class_id or class_group",
        )),
    }
}

/// Issues a fresh token to every student of the cohort.
///
/// Old unused tokens of those students for the module are invalidated in the
/// same unit of work. Invitations go out after the batch is stored; a failed
/// invitation is logged and only lowers `notified`.
pub async fn issue_tokens_for_cohort(
    store: &dyn Store,
    notifier: &dyn NotificationSender,
    config: &Config,
    req: IssueTokensRequest,
    now: DateTime<Utc>,
) -> Result<IssueSummary, AppError> {
    req.validate()?;

    let base_url = Url::parse(&config.app_url)
        .map_err(|e| AppError::InternalServerError(format!("Invalid APP_URL: {}", e)))?;

    let module = store
        .find_module(req.module_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Module {} not found", req.module_id)))?;
    let class = resolve_class(store, &req).await?;
    let form = store
        .find_form(req.form_id, false)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Form {} not found", req.form_id)))?;
    if !form.is_active {
        return Err(AppError::BadRequest(format!("Form {} is not active", form.id)));
    }

    let enrollments = store.list_enrollments(module.id, class.id).await?;
    if enrollments.is_empty() {
        return Err(AppError::EmptyCohort(format!(
            "No students enrolled in {} for class {}",
            module.title, class.name
        )));
    }

    let validity = req.validity_minutes.unwrap_or(config.token_validity_minutes);
    let target = BatchTarget {
        module_id: module.id,
        class_id: class.id,
        form_id: form.id,
        issued_at: now,
        expires_at: now + Duration::minutes(validity),
    };
    let plan = plan_tokens(&enrollments, target, generate_token);
    let tokens = store.reissue_tokens(&plan).await?;

    tracing::info!(
        module_id = module.id,
        class_id = class.id,
        form_id = form.id,
        issued = tokens.len(),
        "Issued evaluation tokens"
    );

    let mut notified = 0;
    for token in &tokens {
        let invitation = Invitation {
            module_name: module.title.clone(),
            survey_url: survey_url(&base_url, &token.token)?,
            expires_at: token.expires_at,
        };
        match notifier.send(&token.student_email, &invitation).await {
            Ok(()) => notified += 1,
            Err(e) => tracing::warn!(
                to = %token.student_email,
                token = %redact(&token.token),
                "Failed to send invitation: {}",
                e
            ),
        }
    }

    Ok(IssueSummary {
        issued: tokens.len(),
        total: enrollments.len(),
        notified,
    })
}
