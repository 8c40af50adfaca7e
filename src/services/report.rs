// src/services/report.rs

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    config::ANSWER_LIST_DELIMITER,
    error::AppError,
    export::SpreadsheetSink,
    models::{
        catalog::{ClassGroup, Module},
        evaluation::Answers,
        report::{
            CohortReport, ExportOutcome, LabelledAnswer, QuestionHeading, ReportSummary,
            ReportTable, Respondent,
        },
        token::TokenStatus,
    },
    store::Store,
    utils::hash::user_hash,
};

pub const SUBMITTED_AT_HEADER: &str = "Submitted at";

/// Sheet key for a cohort: one sheet per module and class.
pub fn sheet_title(module: &Module, class: &ClassGroup) -> String {
    format!("{} - {}", module.title, class.name)
}

fn label_for(questions: &[QuestionHeading], id: i64) -> String {
    questions
        .iter()
        .find(|q| q.id == id)
        .map(|q| q.text.clone())
        .unwrap_or_else(|| format!("Question {}", id))
}

/// One row per submission, one column per question in form order.
pub fn tabulate(questions: &[QuestionHeading], submissions: &[(DateTime<Utc>, &Answers)]) -> ReportTable {
    let mut headers = Vec::with_capacity(questions.len() + 1);
    headers.push(SUBMITTED_AT_HEADER.to_string());
    headers.extend(questions.iter().map(|q| q.text.clone()));

    let rows = submissions
        .iter()
        .map(|(submitted_at, answers)| {
            let mut row = Vec::with_capacity(headers.len());
            row.push(submitted_at.format("%Y-%m-%d %H:%M:%S").to_string());
            row.extend(questions.iter().map(|q| {
                answers
                    .get(&q.id)
                    .map(|a| a.flatten(ANSWER_LIST_DELIMITER))
                    .unwrap_or_default()
            }));
            row
        })
        .collect();

    ReportTable { headers, rows }
}

/// Cohort report for the tokens of `(module, class)` issued on `date`.
///
/// Responses are found only by recomputing each token's hash.
pub async fn build_cohort_report(
    store: &dyn Store,
    app_key: &str,
    module_id: i64,
    class_id: i64,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<CohortReport, AppError> {
    let module = store
        .find_module(module_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Module {} not found", module_id)))?;
    let class_group = store
        .find_class(class_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Class {} not found", class_id)))?;

    let tokens = store.tokens_issued_on(module_id, class_id, date).await?;
    let Some(first) = tokens.first() else {
        return Err(AppError::NotFound(format!(
            "No evaluation tokens issued for this cohort on {}",
            date
        )));
    };
    let form_id = first.form_id;

    // Columns follow form order; a second form used the same day adds its
    // questions after the first one's.
    let mut questions: Vec<QuestionHeading> = Vec::new();
    let mut seen_forms = HashSet::new();
    for token in &tokens {
        if !seen_forms.insert(token.form_id) {
            continue;
        }
        if let Some(form) = store.find_form(token.form_id, true).await? {
            for q in form.questions() {
                if !questions.iter().any(|h| h.id == q.id) {
                    questions.push(QuestionHeading { id: q.id, text: q.question.clone() });
                }
            }
        }
    }

    let mut evaluations = Vec::with_capacity(tokens.len());
    for token in &tokens {
        let hash = user_hash(&token.token, &token.student_email, app_key);
        evaluations.push(store.find_evaluation(&hash, module_id).await?);
    }

    // Answers stored under ids the forms no longer carry (a form update
    // replaces its questions) get trailing columns of their own.
    let orphaned: BTreeSet<i64> = evaluations
        .iter()
        .flatten()
        .flat_map(|e| e.answers.keys().copied())
        .filter(|id| !questions.iter().any(|h| h.id == *id))
        .collect();
    for id in orphaned {
        let text = label_for(&questions, id);
        questions.push(QuestionHeading { id, text });
    }

    let mut summary = ReportSummary::default();
    let mut respondents = Vec::with_capacity(tokens.len());
    let mut submissions = Vec::new();

    for (token, evaluation) in tokens.iter().zip(evaluations) {
        let status = token.status_at(now);
        summary.total += 1;
        match status {
            TokenStatus::Completed => summary.completed += 1,
            TokenStatus::Pending => summary.pending += 1,
            TokenStatus::Expired => summary.expired += 1,
        }

        let answers = evaluation.as_ref().map(|e| {
            e.answers
                .iter()
                .map(|(id, value)| {
                    (*id, LabelledAnswer { question: label_for(&questions, *id), answer: value.clone() })
                })
                .collect::<BTreeMap<_, _>>()
        });
        if let Some(e) = evaluation {
            submissions.push((e.created_at, e.answers.0));
        }

        respondents.push(Respondent {
            student_email: token.student_email.clone(),
            status,
            used_at: token.used_at,
            answers,
        });
    }

    let borrowed: Vec<(DateTime<Utc>, &Answers)> = submissions.iter().map(|(at, a)| (*at, a)).collect();
    let table = tabulate(&questions, &borrowed);

    Ok(CohortReport {
        module,
        class_group,
        date,
        form_id,
        questions,
        summary,
        respondents,
        table,
        export: None,
    })
}

/// Appends the report rows to the cohort's sheet.
pub async fn export_report(
    sink: &dyn SpreadsheetSink,
    report: &CohortReport,
) -> Result<ExportOutcome, AppError> {
    let sheet = sheet_title(&report.module, &report.class_group);
    let outcome = sink
        .append_rows(&sheet, &report.table.headers, &report.table.rows)
        .await
        .map_err(|e| {
            tracing::error!("Export to sheet '{}' failed: {}", sheet, e);
            AppError::InternalServerError(e.to_string())
        })?;

    tracing::info!(
        sheet = %outcome.sheet,
        appended = outcome.appended,
        skipped = outcome.skipped,
        "Cohort report exported"
    );
    Ok(outcome)
}
