// src/models/report.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    catalog::{ClassGroup, Module},
    evaluation::AnswerValue,
    token::TokenStatus,
};

/// One column of the report: question id and its wording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionHeading {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelledAnswer {
    pub question: String,
    pub answer: AnswerValue,
}

/// One issued token and, when found through its hash, the answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Respondent {
    pub student_email: String,
    pub status: TokenStatus,
    pub used_at: Option<DateTime<Utc>>,
    pub answers: Option<BTreeMap<i64, LabelledAnswer>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSummary {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub expired: usize,
}

/// Spreadsheet-ready view: one row per respondent with answers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortReport {
    pub module: Module,
    pub class_group: ClassGroup,
    pub date: chrono::NaiveDate,
    pub form_id: i64,
    pub questions: Vec<QuestionHeading>,
    pub summary: ReportSummary,
    pub respondents: Vec<Respondent>,
    pub table: ReportTable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportOutcome {
    pub sheet: String,
    pub appended: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReportQuery {
    #[serde(default)]
    pub export: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct StatsQuery {
    pub year: Option<i32>,
    pub module_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardStats {
    pub total_modules: i64,
    pub total_evaluations: i64,
    pub completed_evaluations: i64,
    /// Used tokens over issued tokens, rounded percent.
    pub participation_rate: i64,
    pub current_academic_year: i32,
    pub years: Vec<i32>,
}
