// src/models/enrollment.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::error::AppError;

/// Represents the 'course_enrollments' table.
/// At most one row exists per (student, module, class).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub module_id: i64,
    pub class_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Enrollment joined with the contact fields needed for issuance.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EnrolledStudent {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub email: String,
    pub school_email: Option<String>,
}

impl EnrolledStudent {
    /// Institutional address when present, primary address otherwise.
    pub fn notification_email(&self) -> &str {
        match self.school_email.as_deref().map(str::trim) {
            Some(school) if !school.is_empty() => school,
            _ => &self.email,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEnrollmentRequest {
    #[validate(range(min = 1))]
    pub student_id: i64,
    #[validate(range(min = 1))]
    pub module_id: i64,
    #[validate(range(min = 1))]
    pub class_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// DTO for correcting the validity window of an enrollment.
#[derive(Debug, Deserialize)]
pub struct UpdateEnrollmentRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct EnrollmentQuery {
    pub module_id: i64,
    pub class_id: i64,
}

/// Rejects windows that end before they start.
pub fn check_window(start_date: NaiveDate, end_date: NaiveDate) -> Result<(), AppError> {
    if end_date < start_date {
        return Err(AppError::invalid_field(
            "end_date",
            "end_date must not be before start_date",
        ));
    }
    Ok(())
}
