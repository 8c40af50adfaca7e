// src/services/recorder.rs

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    anonymize::{Anonymizer, anonymize_or_keep},
    error::{AppError, FieldErrors},
    models::{
        evaluation::{AnswerValue, Answers, Evaluation, NewEvaluation, SubmitSurveyRequest},
        form::{Form, Question, QuestionType},
    },
    services::gate,
    store::{Store, StoreError},
    utils::{hash::user_hash, html::clean_html},
};

const RATING_MIN: i64 = 1;
const RATING_MAX: i64 = 10;

/// Ids of the sections the student could see given `answers`.
///
/// Dependencies always point at an earlier section, so one pass in form
/// order is enough: a section is shown when its controlling question was
/// itself shown and its answer selects the reveal value.
pub fn visible_sections(form: &Form, answers: &Answers) -> HashSet<i64> {
    let mut visible_questions = HashSet::new();
    let mut visible = HashSet::new();

    for section in &form.sections {
        let shown = match (section.depends_on_question_id, &section.depends_on_answer) {
            (None, _) => true,
            (Some(qid), Some(expected)) => {
                visible_questions.contains(&qid)
                    && answers.get(&qid).is_some_and(|a| a.selects(expected))
            }
            (Some(_), None) => false,
        };
        if shown {
            visible.insert(section.id);
            visible_questions.extend(section.questions.iter().map(|q| q.id));
        }
    }
    visible
}

fn in_options(question: &Question, value: &str) -> bool {
    question
        .options
        .as_ref()
        .is_some_and(|opts| opts.iter().any(|o| o == value))
}

/// Checks one answer against its question and returns the value to store.
fn normalize(question: &Question, value: AnswerValue) -> Result<AnswerValue, String> {
    match (question.question_type, value) {
        (QuestionType::Checkbox, AnswerValue::List(items)) => {
            match items.iter().find(|i| !in_options(question, i)) {
                Some(bad) => Err(format!("'{}' is not one of the options", bad)),
                None => Ok(AnswerValue::List(items)),
            }
        }
        (QuestionType::Checkbox, _) => Err("Expected a list of options".to_string()),
        (_, AnswerValue::List(_)) => Err("Expected a single value".to_string()),

        (QuestionType::Radio | QuestionType::Select, AnswerValue::Text(text)) => {
            if in_options(question, &text) {
                Ok(AnswerValue::Text(text))
            } else {
                Err(format!("'{}' is not one of the options", text))
            }
        }
        (QuestionType::Radio | QuestionType::Select, AnswerValue::Number(n)) => {
            let text = n.to_string();
            if in_options(question, &text) {
                Ok(AnswerValue::Text(text))
            } else {
                Err(format!("'{}' is not one of the options", text))
            }
        }

        (QuestionType::Rating, value) => {
            let rating = match &value {
                AnswerValue::Number(n) => n.as_i64(),
                AnswerValue::Text(t) => t.trim().parse::<i64>().ok(),
                AnswerValue::List(_) => None,
            };
            match rating {
                Some(r) if (RATING_MIN..=RATING_MAX).contains(&r) => {
                    Ok(AnswerValue::Number(serde_json::Number::from(r)))
                }
                _ => Err(format!(
                    "Rating must be a whole number between {} and {}",
                    RATING_MIN, RATING_MAX
                )),
            }
        }

        (QuestionType::Text | QuestionType::Textarea, AnswerValue::Text(text)) => {
            Ok(AnswerValue::Text(clean_html(&text)))
        }
        (QuestionType::Text | QuestionType::Textarea, AnswerValue::Number(n)) => {
            Ok(AnswerValue::Text(n.to_string()))
        }
    }
}

/// Validates a submission against the form and returns the answers to store.
///
/// Unknown question ids are rejected. Answers to hidden sections are dropped,
/// and required questions are only enforced where their section is visible.
pub fn validate_answers(form: &Form, mut answers: Answers) -> Result<Answers, AppError> {
    let mut errors = FieldErrors::new();

    for id in answers.keys() {
        if form.question(*id).is_none() {
            errors
                .entry(format!("answers.{}", id))
                .or_default()
                .push("Unknown question".to_string());
        }
    }
    if !errors.is_empty() {
        return Err(AppError::ValidationError(errors));
    }

    let visible = visible_sections(form, &answers);
    let mut cleaned = Answers::new();

    for section in &form.sections {
        let shown = visible.contains(&section.id);
        for question in &section.questions {
            let answer = answers.remove(&question.id).filter(|a| !a.is_blank());
            match (shown, answer) {
                (false, _) => {}
                (true, Some(value)) => match normalize(question, value) {
                    Ok(value) => {
                        cleaned.insert(question.id, value);
                    }
                    Err(msg) => errors.entry(format!("answers.{}", question.id)).or_default().push(msg),
                },
                (true, None) if question.is_required => errors
                    .entry(format!("answers.{}", question.id))
                    .or_default()
                    .push("This question is required".to_string()),
                (true, None) => {}
            }
        }
    }

    if errors.is_empty() { Ok(cleaned) } else { Err(AppError::ValidationError(errors)) }
}

/// Records a survey response and consumes its token in one unit of work.
pub async fn submit(
    store: &dyn Store,
    anonymizer: &dyn Anonymizer,
    app_key: &str,
    token: &str,
    req: SubmitSurveyRequest,
    now: DateTime<Utc>,
) -> Result<Evaluation, AppError> {
    req.validate()?;

    let token = gate::resolve(store, token).await?;
    gate::ensure_valid(&token, now)?;

    let form = store
        .find_form(token.form_id, true)
        .await?
        .ok_or_else(|| AppError::NotFound("Form not found".to_string()))?;
    let answers = validate_answers(&form, req.answers)?;

    let comment = req
        .comment
        .as_deref()
        .map(|c| clean_html(c.trim()))
        .filter(|c| !c.is_empty());
    let (anonymized_comment, is_anonymized) = match &comment {
        Some(text) => {
            let (rewritten, done) = anonymize_or_keep(anonymizer, text).await;
            (Some(rewritten), done)
        }
        None => (None, false),
    };

    let evaluation = NewEvaluation {
        module_id: token.module_id,
        form_id: token.form_id,
        answers,
        user_hash: user_hash(&token.token, &token.student_email, app_key),
        score: req.score,
        original_comment: comment,
        anonymized_comment,
        is_anonymized,
    };

    let record = store
        .record_submission(token.id, &evaluation, now)
        .await
        .map_err(|e| match e {
            // Same token, same hash: another request got there first.
            StoreError::Conflict(_) => AppError::TokenAlreadyUsed,
            other => other.into(),
        })?;

    tracing::info!(
        module_id = record.module_id,
        form_id = token.form_id,
        answers = record.answers.len(),
        "Evaluation submitted"
    );

    Ok(record)
}
