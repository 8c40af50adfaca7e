//! PostgreSQL-backed store. Multi-step writes run inside one transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction, types::Json};

use super::{Store, StoreError, StoreResult, Tally};
use crate::{
    models::{
        catalog::{ClassGroup, Module},
        enrollment::{CreateEnrollmentRequest, EnrolledStudent, Enrollment},
        evaluation::{Evaluation, NewEvaluation, STATUS_COMPLETED},
        form::{Form, FormDraft, FormHeader, FormSection, Question},
        token::{EvaluationToken, NewToken, TokenBatch},
    },
    utils::academic::TimeWindow,
};

const TOKEN_COLUMNS: &str = "\
    id, token, module_id, class_id, form_id, student_email, \
    expires_at, is_used, used_at, created_at";

const EVALUATION_COLUMNS: &str = "\
    id, module_id, form_id, answers, user_hash, score, \
    original_comment, anonymized_comment, is_anonymized, status, created_at";

const ENROLLMENT_COLUMNS: &str = "\
    id, student_id, module_id, class_id, start_date, end_date, created_at";

const FORM_COLUMNS: &str = "id, title, description, is_active, archived_at, created_at";

const SECTION_COLUMNS: &str = "\
    id, form_id, title, description, position, depends_on_question_id, depends_on_answer";

const QUESTION_COLUMNS: &str = "\
    id, form_id, section_id, question, question_type, options, \
    position, is_required, controls_visibility";

#[derive(FromRow)]
struct FormRow {
    id: i64,
    title: String,
    description: Option<String>,
    is_active: bool,
    archived_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SectionRow {
    id: i64,
    form_id: i64,
    title: String,
    description: Option<String>,
    position: i32,
    depends_on_question_id: Option<i64>,
    depends_on_answer: Option<String>,
}

#[derive(FromRow)]
struct QuestionRow {
    id: i64,
    form_id: i64,
    section_id: i64,
    question: String,
    question_type: String,
    options: Option<Json<Vec<String>>>,
    position: i32,
    is_required: bool,
    controls_visibility: bool,
}

fn conflict_or(err: sqlx::Error, message: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(message.to_string())
        }
        _ => StoreError::Database(err),
    }
}

/// Stitches flat rows back into form trees, keeping row order.
fn assemble(
    forms: Vec<FormRow>,
    sections: Vec<SectionRow>,
    questions: Vec<QuestionRow>,
) -> StoreResult<Vec<Form>> {
    let mut by_section: HashMap<i64, Vec<Question>> = HashMap::new();
    for row in questions {
        let question_type = row.question_type.parse().map_err(StoreError::Invalid)?;
        by_section.entry(row.section_id).or_default().push(Question {
            id: row.id,
            form_id: row.form_id,
            section_id: row.section_id,
            question: row.question,
            question_type,
            options: row.options.map(|o| o.0),
            position: row.position,
            is_required: row.is_required,
            controls_visibility: row.controls_visibility,
        });
    }

    let mut by_form: HashMap<i64, Vec<FormSection>> = HashMap::new();
    for row in sections {
        by_form.entry(row.form_id).or_default().push(FormSection {
            id: row.id,
            form_id: row.form_id,
            title: row.title,
            description: row.description,
            position: row.position,
            depends_on_question_id: row.depends_on_question_id,
            depends_on_answer: row.depends_on_answer,
            questions: by_section.remove(&row.id).unwrap_or_default(),
        });
    }

    Ok(forms
        .into_iter()
        .map(|row| Form {
            sections: by_form.remove(&row.id).unwrap_or_default(),
            id: row.id,
            title: row.title,
            description: row.description,
            is_active: row.is_active,
            archived_at: row.archived_at,
            created_at: row.created_at,
        })
        .collect())
}

/// Draws `count` ids from the serial sequence of `table`.
async fn reserve_ids(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    count: usize,
) -> StoreResult<Vec<i64>> {
    let query = format!(
        "SELECT nextval(pg_get_serial_sequence('{table}', 'id')) FROM generate_series(1, $1)"
    );
    let ids = sqlx::query_scalar::<_, i64>(&query)
        .bind(count as i32)
        .fetch_all(&mut **tx)
        .await?;
    Ok(ids)
}

/// Writes a fully resolved tree; every id is already known.
async fn insert_tree(tx: &mut Transaction<'_, Postgres>, form: &Form) -> StoreResult<()> {
    for section in &form.sections {
        sqlx::query(
            "INSERT INTO form_sections \
             (id, form_id, title, description, position, depends_on_question_id, depends_on_answer) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(section.id)
        .bind(form.id)
        .bind(&section.title)
        .bind(section.description.as_deref())
        .bind(section.position)
        .bind(section.depends_on_question_id)
        .bind(section.depends_on_answer.as_deref())
        .execute(&mut **tx)
        .await?;
    }

    for question in form.questions() {
        sqlx::query(
            "INSERT INTO questions \
             (id, form_id, section_id, question, question_type, options, position, is_required, controls_visibility) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(question.id)
        .bind(form.id)
        .bind(question.section_id)
        .bind(&question.question)
        .bind(question.question_type.as_str())
        .bind(question.options.clone().map(Json))
        .bind(question.position)
        .bind(question.is_required)
        .bind(question.controls_visibility)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_forms(&self, rows: Vec<FormRow>) -> StoreResult<Vec<Form>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

        let sections = sqlx::query_as::<_, SectionRow>(&format!(
            "SELECT {SECTION_COLUMNS} FROM form_sections WHERE form_id = ANY($1) ORDER BY position, id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let questions = sqlx::query_as::<_, QuestionRow>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE form_id = ANY($1) ORDER BY position, id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        assemble(rows, sections, questions)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_module(&self, id: i64) -> StoreResult<Option<Module>> {
        let module = sqlx::query_as::<_, Module>("SELECT id, title, code FROM modules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(module)
    }

    async fn count_modules_with_evaluations(&self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT module_id) FROM evaluations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn find_class(&self, id: i64) -> StoreResult<Option<ClassGroup>> {
        let class = sqlx::query_as::<_, ClassGroup>("SELECT id, name FROM class_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(class)
    }

    async fn find_class_by_name(&self, name: &str) -> StoreResult<Option<ClassGroup>> {
        let class =
            sqlx::query_as::<_, ClassGroup>("SELECT id, name FROM class_groups WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(class)
    }

    async fn module_groups(&self, module_id: i64) -> StoreResult<Vec<ClassGroup>> {
        let groups = sqlx::query_as::<_, ClassGroup>(
            "SELECT DISTINCT c.id, c.name FROM class_groups c \
             JOIN course_enrollments e ON e.class_id = c.id \
             WHERE e.module_id = $1 ORDER BY c.name",
        )
        .bind(module_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    async fn list_enrollments(
        &self,
        module_id: i64,
        class_id: i64,
    ) -> StoreResult<Vec<EnrolledStudent>> {
        let rows = sqlx::query_as::<_, EnrolledStudent>(
            r#"
            SELECT e.id AS enrollment_id, s.id AS student_id, s.email, s.school_email
            FROM course_enrollments e
            JOIN students s ON s.id = e.student_id
            WHERE e.module_id = $1 AND e.class_id = $2
            ORDER BY e.id
            "#,
        )
        .bind(module_id)
        .bind(class_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_enrollment(&self, input: &CreateEnrollmentRequest) -> StoreResult<Enrollment> {
        let query = format!(
            "INSERT INTO course_enrollments (student_id, module_id, class_id, start_date, end_date) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ENROLLMENT_COLUMNS}"
        );
        sqlx::query_as::<_, Enrollment>(&query)
            .bind(input.student_id)
            .bind(input.module_id)
            .bind(input.class_id)
            .bind(input.start_date)
            .bind(input.end_date)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    StoreError::NotFound("student, module or class".to_string())
                }
                _ => conflict_or(e, "Student is already enrolled in this module for this class"),
            })
    }

    async fn update_enrollment_dates(
        &self,
        id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> StoreResult<Enrollment> {
        let query = format!(
            "UPDATE course_enrollments SET start_date = $2, end_date = $3 \
             WHERE id = $1 RETURNING {ENROLLMENT_COLUMNS}"
        );
        sqlx::query_as::<_, Enrollment>(&query)
            .bind(id)
            .bind(start_date)
            .bind(end_date)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("enrollment {}", id)))
    }

    async fn delete_enrollment(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM course_enrollments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reissue_tokens(&self, tokens: &[NewToken]) -> StoreResult<Vec<EvaluationToken>> {
        let mut tx = self.pool.begin().await?;
        let insert = format!(
            "INSERT INTO evaluation_tokens \
             (token, module_id, class_id, form_id, student_email, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {TOKEN_COLUMNS}"
        );
        let mut created = Vec::with_capacity(tokens.len());

        for new in tokens {
            sqlx::query(
                "UPDATE evaluation_tokens SET is_used = TRUE \
                 WHERE student_email = $1 AND module_id = $2 AND NOT is_used",
            )
            .bind(&new.student_email)
            .bind(new.module_id)
            .execute(&mut *tx)
            .await?;

            // A concurrent batch for the same student trips the partial
            // unique index here and the whole batch rolls back.
            let token = sqlx::query_as::<_, EvaluationToken>(&insert)
                .bind(&new.token)
                .bind(new.module_id)
                .bind(new.class_id)
                .bind(new.form_id)
                .bind(&new.student_email)
                .bind(new.expires_at)
                .bind(new.created_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    conflict_or(e, "Another issuance for this cohort is in progress; retry")
                })?;
            created.push(token);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn find_token(&self, token: &str) -> StoreResult<Option<EvaluationToken>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM evaluation_tokens WHERE token = $1");
        let token = sqlx::query_as::<_, EvaluationToken>(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(token)
    }

    async fn recent_tokens(&self, limit: i64) -> StoreResult<Vec<EvaluationToken>> {
        let query = format!(
            "SELECT {TOKEN_COLUMNS} FROM evaluation_tokens ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        let tokens = sqlx::query_as::<_, EvaluationToken>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(tokens)
    }

    async fn tokens_issued_on(
        &self,
        module_id: i64,
        class_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Vec<EvaluationToken>> {
        let query = format!(
            "SELECT {TOKEN_COLUMNS} FROM evaluation_tokens \
             WHERE module_id = $1 AND class_id = $2 \
               AND (created_at AT TIME ZONE 'UTC')::date = $3 \
             ORDER BY id"
        );
        let tokens = sqlx::query_as::<_, EvaluationToken>(&query)
            .bind(module_id)
            .bind(class_id)
            .bind(date)
            .fetch_all(&self.pool)
            .await?;
        Ok(tokens)
    }

    async fn token_batches(&self, now: DateTime<Utc>) -> StoreResult<Vec<TokenBatch>> {
        let batches = sqlx::query_as::<_, TokenBatch>(
            r#"
            SELECT
                module_id,
                class_id,
                form_id,
                (created_at AT TIME ZONE 'UTC')::date AS issued_on,
                COUNT(*) AS total_sent,
                COUNT(*) FILTER (WHERE is_used) AS completed,
                COUNT(*) FILTER (WHERE NOT is_used AND expires_at <= $1) AS expired
            FROM evaluation_tokens
            GROUP BY module_id, class_id, form_id, issued_on
            ORDER BY issued_on DESC, module_id DESC, class_id DESC, form_id DESC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(batches)
    }

    async fn token_tally(
        &self,
        module_id: Option<i64>,
        window: Option<TimeWindow>,
    ) -> StoreResult<Tally> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*), COUNT(used_at) FROM evaluation_tokens WHERE TRUE",
        );
        if let Some(module_id) = module_id {
            qb.push(" AND module_id = ").push_bind(module_id);
        }
        if let Some(window) = window {
            qb.push(" AND created_at >= ").push_bind(window.start);
            qb.push(" AND created_at < ").push_bind(window.end);
        }
        let (total, done): (i64, i64) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(Tally { total, done })
    }

    async fn purge_tokens_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM evaluation_tokens WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn record_submission(
        &self,
        token_id: i64,
        evaluation: &NewEvaluation,
        used_at: DateTime<Utc>,
    ) -> StoreResult<Evaluation> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "INSERT INTO evaluations \
             (module_id, form_id, answers, user_hash, score, original_comment, \
              anonymized_comment, is_anonymized, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {EVALUATION_COLUMNS}"
        );
        let record = sqlx::query_as::<_, Evaluation>(&query)
            .bind(evaluation.module_id)
            .bind(evaluation.form_id)
            .bind(Json(&evaluation.answers))
            .bind(&evaluation.user_hash)
            .bind(evaluation.score)
            .bind(evaluation.original_comment.as_deref())
            .bind(evaluation.anonymized_comment.as_deref())
            .bind(evaluation.is_anonymized)
            .bind(STATUS_COMPLETED)
            .bind(used_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| conflict_or(e, "evaluation already recorded"))?;

        let consumed = sqlx::query(
            "UPDATE evaluation_tokens SET is_used = TRUE, used_at = $2 WHERE id = $1 AND NOT is_used",
        )
        .bind(token_id)
        .bind(used_at)
        .execute(&mut *tx)
        .await?;

        if consumed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::TokenAlreadyUsed);
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn find_evaluation(
        &self,
        user_hash: &str,
        module_id: i64,
    ) -> StoreResult<Option<Evaluation>> {
        let query = format!(
            "SELECT {EVALUATION_COLUMNS} FROM evaluations WHERE user_hash = $1 AND module_id = $2"
        );
        let evaluation = sqlx::query_as::<_, Evaluation>(&query)
            .bind(user_hash)
            .bind(module_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(evaluation)
    }

    async fn evaluation_tally(
        &self,
        module_id: Option<i64>,
        window: Option<TimeWindow>,
    ) -> StoreResult<Tally> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*), COUNT(*) FILTER (WHERE status = ");
        qb.push_bind(STATUS_COMPLETED);
        qb.push(") FROM evaluations WHERE TRUE");
        if let Some(module_id) = module_id {
            qb.push(" AND module_id = ").push_bind(module_id);
        }
        if let Some(window) = window {
            qb.push(" AND created_at >= ").push_bind(window.start);
            qb.push(" AND created_at < ").push_bind(window.end);
        }
        let (total, done): (i64, i64) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(Tally { total, done })
    }

    async fn create_form(&self, draft: FormDraft) -> StoreResult<Form> {
        let mut tx = self.pool.begin().await?;

        let (id, is_active, created_at): (i64, bool, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO forms (title, description) VALUES ($1, $2) \
             RETURNING id, is_active, created_at",
        )
        .bind(&draft.title)
        .bind(draft.description.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        let section_ids = reserve_ids(&mut tx, "form_sections", draft.section_count()).await?;
        let question_ids = reserve_ids(&mut tx, "questions", draft.question_count()).await?;
        let header = FormHeader { id, is_active, archived_at: None, created_at };
        let form = draft.assign_ids(header, &section_ids, &question_ids)?;
        insert_tree(&mut tx, &form).await?;

        tx.commit().await?;
        Ok(form)
    }

    async fn replace_form(&self, id: i64, draft: FormDraft) -> StoreResult<Form> {
        let mut tx = self.pool.begin().await?;

        let header: Option<(bool, Option<DateTime<Utc>>, DateTime<Utc>)> = sqlx::query_as(
            "UPDATE forms SET title = $2, description = $3 \
             WHERE id = $1 AND archived_at IS NULL \
             RETURNING is_active, archived_at, created_at",
        )
        .bind(id)
        .bind(&draft.title)
        .bind(draft.description.as_deref())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((is_active, archived_at, created_at)) = header else {
            return Err(StoreError::NotFound(format!("form {}", id)));
        };

        // Questions go with their sections (ON DELETE CASCADE).
        sqlx::query("DELETE FROM form_sections WHERE form_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let section_ids = reserve_ids(&mut tx, "form_sections", draft.section_count()).await?;
        let question_ids = reserve_ids(&mut tx, "questions", draft.question_count()).await?;
        let header = FormHeader { id, is_active, archived_at, created_at };
        let form = draft.assign_ids(header, &section_ids, &question_ids)?;
        insert_tree(&mut tx, &form).await?;

        tx.commit().await?;
        Ok(form)
    }

    async fn find_form(&self, id: i64, include_archived: bool) -> StoreResult<Option<Form>> {
        let query = format!(
            "SELECT {FORM_COLUMNS} FROM forms WHERE id = $1 AND ($2 OR archived_at IS NULL)"
        );
        let row = sqlx::query_as::<_, FormRow>(&query)
            .bind(id)
            .bind(include_archived)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.load_forms(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_forms(&self) -> StoreResult<Vec<Form>> {
        let query = format!("SELECT {FORM_COLUMNS} FROM forms WHERE archived_at IS NULL ORDER BY id");
        let rows = sqlx::query_as::<_, FormRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        self.load_forms(rows).await
    }

    async fn toggle_form_active(&self, id: i64) -> StoreResult<Form> {
        let result = sqlx::query(
            "UPDATE forms SET is_active = NOT is_active WHERE id = $1 AND archived_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("form {}", id)));
        }
        self.find_form(id, false)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("form {}", id)))
    }

    async fn archive_form(&self, id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE forms SET archived_at = $2 WHERE id = $1 AND archived_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
