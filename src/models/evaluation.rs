// src/models/evaluation.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

/// A single submitted answer: free text, a number (ratings) or a list
/// (multi-select). Values round-trip through JSON unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    List(Vec<String>),
    Number(serde_json::Number),
    Text(String),
}

impl AnswerValue {
    /// Cell representation for tabular export.
    pub fn flatten(&self, delimiter: &str) -> String {
        match self {
            AnswerValue::List(items) => items.join(delimiter),
            AnswerValue::Number(n) => n.to_string(),
            AnswerValue::Text(text) => text.clone(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::List(items) => items.iter().all(|i| i.trim().is_empty()),
            AnswerValue::Number(_) => false,
            AnswerValue::Text(text) => text.trim().is_empty(),
        }
    }

    /// Whether this answer selects `expected` (used for section visibility).
    pub fn selects(&self, expected: &str) -> bool {
        match self {
            AnswerValue::List(items) => items.iter().any(|i| i == expected),
            AnswerValue::Number(n) => n.to_string() == expected,
            AnswerValue::Text(text) => text == expected,
        }
    }
}

/// Question id -> answer.
pub type Answers = BTreeMap<i64, AnswerValue>;

pub const STATUS_COMPLETED: &str = "completed";

/// Represents the 'evaluations' table.
///
/// There is deliberately no token foreign key: the only link back to a token
/// is `user_hash`, which needs the token string to recompute.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: i64,
    pub module_id: i64,
    pub form_id: Option<i64>,
    pub answers: Json<Answers>,

    #[serde(skip)]
    pub user_hash: String,

    /// Optional 1..5 score from the single-score survey variant.
    pub score: Option<i16>,

    /// Write-only: never returned by any endpoint.
    #[serde(skip)]
    pub original_comment: Option<String>,

    pub anonymized_comment: Option<String>,
    pub is_anonymized: bool,

    /// 'pending' or 'completed'.
    pub status: String,

    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

/// Row to insert when a survey is submitted.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub module_id: i64,
    pub form_id: i64,
    pub answers: Answers,
    pub user_hash: String,
    pub score: Option<i16>,
    pub original_comment: Option<String>,
    pub anonymized_comment: Option<String>,
    pub is_anonymized: bool,
}

/// DTO for submitting a survey through its token link.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitSurveyRequest {
    /// Key: Question ID, Value: answer.
    #[serde(default)]
    pub answers: Answers,

    #[validate(range(min = 1, max = 5))]
    pub score: Option<i16>,

    #[validate(length(max = 5000))]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_round_trip_with_integer_keys() {
        let raw = serde_json::json!({ "3": ["A", "B"], "1": "Great", "2": 4 });
        let answers: Answers = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(answers[&3], AnswerValue::List(vec!["A".into(), "B".into()]));
        assert_eq!(answers[&2].flatten(", "), "4");
        assert_eq!(serde_json::to_value(&answers).unwrap(), raw);
    }

    #[test]
    fn list_flattens_in_order() {
        let v = AnswerValue::List(vec!["B".into(), "A".into()]);
        assert_eq!(v.flatten(", "), "B, A");
        assert!(v.selects("A"));
        assert!(!v.selects("C"));
    }

    #[test]
    fn blank_detection() {
        assert!(AnswerValue::Text("  ".into()).is_blank());
        assert!(AnswerValue::List(vec![]).is_blank());
        assert!(!AnswerValue::Text("ok".into()).is_blank());
    }

    #[test]
    fn hidden_fields_are_not_serialized() {
        let evaluation = Evaluation {
            id: 1,
            module_id: 1,
            form_id: Some(1),
            answers: Json(Answers::new()),
            user_hash: "abc".into(),
            score: Some(4),
            original_comment: Some("I am Ada from row 3".into()),
            anonymized_comment: Some("A student".into()),
            is_anonymized: true,
            status: STATUS_COMPLETED.into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&evaluation).unwrap();
        assert!(json.get("original_comment").is_none());
        assert!(json.get("user_hash").is_none());
        assert_eq!(json["anonymized_comment"], "A student");
    }
}
