//! Persistence boundary.
//!
//! Every method is one unit of work: multi-step mutations (token reissue,
//! survey submission, form create/replace) either apply completely or leave
//! no trace. `PgStore` does this with a database transaction, `MemoryStore`
//! by applying changes to a copy and swapping it in on success.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    models::{
        catalog::{ClassGroup, Module},
        enrollment::{CreateEnrollmentRequest, EnrolledStudent, Enrollment},
        evaluation::{Evaluation, NewEvaluation},
        form::{Form, FormDraft},
        token::{EvaluationToken, NewToken, TokenBatch},
    },
    utils::academic::TimeWindow,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The token was consumed by a concurrent submission.
    #[error("token already used")]
    TokenAlreadyUsed,

    /// Internal inconsistency (e.g., id reservation mismatch).
    #[error("invalid state: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle used by the application state.
pub type SharedStore = Arc<dyn Store>;

/// Counts used by the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: i64,
    pub done: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ---- catalog (managed elsewhere, read here) ----
    async fn find_module(&self, id: i64) -> StoreResult<Option<Module>>;
    async fn count_modules_with_evaluations(&self) -> StoreResult<i64>;
    async fn find_class(&self, id: i64) -> StoreResult<Option<ClassGroup>>;
    async fn find_class_by_name(&self, name: &str) -> StoreResult<Option<ClassGroup>>;
    /// Classes with at least one enrollment in the module, by name.
    async fn module_groups(&self, module_id: i64) -> StoreResult<Vec<ClassGroup>>;

    // ---- enrollments ----
    async fn list_enrollments(&self, module_id: i64, class_id: i64)
    -> StoreResult<Vec<EnrolledStudent>>;
    /// Conflict when the (student, module, class) triple already exists.
    async fn create_enrollment(&self, input: &CreateEnrollmentRequest) -> StoreResult<Enrollment>;
    async fn update_enrollment_dates(
        &self,
        id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> StoreResult<Enrollment>;
    async fn delete_enrollment(&self, id: i64) -> StoreResult<bool>;

    // ---- tokens ----
    /// For every new token: mark unused tokens of the same (email, module)
    /// as used, then insert it. All or nothing.
    async fn reissue_tokens(&self, tokens: &[NewToken]) -> StoreResult<Vec<EvaluationToken>>;
    async fn find_token(&self, token: &str) -> StoreResult<Option<EvaluationToken>>;
    /// Latest issued tokens, newest first.
    async fn recent_tokens(&self, limit: i64) -> StoreResult<Vec<EvaluationToken>>;
    /// Tokens of one issuance day (UTC calendar date of `created_at`).
    async fn tokens_issued_on(
        &self,
        module_id: i64,
        class_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Vec<EvaluationToken>>;
    async fn token_batches(&self, now: DateTime<Utc>) -> StoreResult<Vec<TokenBatch>>;
    /// Issued vs. used tokens, optionally filtered.
    async fn token_tally(
        &self,
        module_id: Option<i64>,
        window: Option<TimeWindow>,
    ) -> StoreResult<Tally>;
    async fn purge_tokens_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    // ---- evaluations ----
    /// Insert the evaluation and consume the token. `TokenAlreadyUsed` if the
    /// token was consumed in the meantime.
    async fn record_submission(
        &self,
        token_id: i64,
        evaluation: &NewEvaluation,
        used_at: DateTime<Utc>,
    ) -> StoreResult<Evaluation>;
    async fn find_evaluation(&self, user_hash: &str, module_id: i64)
    -> StoreResult<Option<Evaluation>>;
    /// All vs. completed evaluations, optionally filtered.
    async fn evaluation_tally(
        &self,
        module_id: Option<i64>,
        window: Option<TimeWindow>,
    ) -> StoreResult<Tally>;

    // ---- forms ----
    async fn create_form(&self, draft: FormDraft) -> StoreResult<Form>;
    /// Replace title, description and the whole section/question tree.
    async fn replace_form(&self, id: i64, draft: FormDraft) -> StoreResult<Form>;
    async fn find_form(&self, id: i64, include_archived: bool) -> StoreResult<Option<Form>>;
    async fn list_forms(&self) -> StoreResult<Vec<Form>>;
    async fn toggle_form_active(&self, id: i64) -> StoreResult<Form>;
    async fn archive_form(&self, id: i64, at: DateTime<Utc>) -> StoreResult<bool>;
}
