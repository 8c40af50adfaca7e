// src/models/token.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::config::MAX_TOKEN_VALIDITY_MINUTES;

/// Represents the 'evaluation_tokens' table.
///
/// Student email, module and class are copied in at issuance time, so later
/// enrollment changes never touch tokens that are already out.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EvaluationToken {
    pub id: i64,

    /// Opaque single-use credential embedded in the survey link.
    #[serde(skip_serializing)]
    pub token: String,

    pub module_id: i64,
    pub class_id: i64,
    pub form_id: i64,
    pub student_email: String,
    pub expires_at: DateTime<Utc>,

    /// Set on submission, and also when a newer token supersedes this one.
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Reporting classification, derived on read and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Pending,
    Completed,
    Expired,
}

/// Outcome of the survey gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Ok,
    Expired,
    AlreadyUsed,
}

impl EvaluationToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Valid iff unused and the expiry is strictly in the future.
    pub fn check_validity(&self, now: DateTime<Utc>) -> Validity {
        if self.is_used {
            Validity::AlreadyUsed
        } else if self.is_expired_at(now) {
            Validity::Expired
        } else {
            Validity::Ok
        }
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        if self.is_used {
            TokenStatus::Completed
        } else if self.is_expired_at(now) {
            TokenStatus::Expired
        } else {
            TokenStatus::Pending
        }
    }

    pub fn issued_on(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// A token ready to be persisted by a reissue batch.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub token: String,
    pub module_id: i64,
    pub class_id: i64,
    pub form_id: i64,
    pub student_email: String,
    pub expires_at: DateTime<Utc>,
    /// Issuance time; also decides which cohort report date the token falls on.
    pub created_at: DateTime<Utc>,
}

/// Aggregated issuance batch for the management screen.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TokenBatch {
    pub module_id: i64,
    pub class_id: i64,
    pub form_id: i64,
    pub issued_on: NaiveDate,
    pub total_sent: i64,
    pub completed: i64,
    pub expired: i64,
}

/// DTO for issuing tokens to a cohort.
/// Exactly one of `class_id` / `class_group` must be given.
#[derive(Debug, Deserialize, Validate)]
pub struct IssueTokensRequest {
    #[validate(range(min = 1))]
    pub module_id: i64,
    #[validate(range(min = 1))]
    pub class_id: Option<i64>,
    #[validate(length(min = 1, max = 255))]
    pub class_group: Option<String>,
    #[validate(range(min = 1))]
    pub form_id: i64,
    #[validate(range(min = 1, max = MAX_TOKEN_VALIDITY_MINUTES))]
    pub validity_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueSummary {
    /// Distinct students that received a fresh token.
    pub issued: usize,
    /// Enrollment rows matched for the cohort.
    pub total: usize,
    /// Invitations handed to the sender without error.
    pub notified: usize,
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    pub before: DateTime<Utc>,
}

pub const RECENT_TOKENS_DEFAULT: i64 = 10;

#[derive(Debug, Deserialize, Validate)]
pub struct RecentTokensQuery {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
}

/// Management-screen row: the token with its module title and current status.
#[derive(Debug, Clone, Serialize)]
pub struct RecentToken {
    #[serde(flatten)]
    pub token: EvaluationToken,
    pub module_title: Option<String>,
    pub status: TokenStatus,
}
