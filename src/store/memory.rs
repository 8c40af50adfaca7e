//! In-process store for tests and local demos.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use tokio::sync::Mutex;

use super::{Store, StoreError, StoreResult, Tally};
use crate::{
    models::{
        catalog::{ClassGroup, Module, Student},
        enrollment::{CreateEnrollmentRequest, EnrolledStudent, Enrollment},
        evaluation::{Evaluation, NewEvaluation, STATUS_COMPLETED},
        form::{Form, FormDraft, FormHeader},
        token::{EvaluationToken, NewToken, TokenBatch, TokenStatus},
    },
    utils::academic::TimeWindow,
};

#[derive(Debug, Clone, Default)]
struct Data {
    last_id: i64,
    modules: Vec<Module>,
    classes: Vec<ClassGroup>,
    students: Vec<Student>,
    enrollments: Vec<Enrollment>,
    tokens: Vec<EvaluationToken>,
    evaluations: Vec<Evaluation>,
    forms: Vec<Form>,
}

impl Data {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn reserve(&mut self, count: usize) -> Vec<i64> {
        (0..count).map(|_| self.next_id()).collect()
    }

    fn form_mut(&mut self, id: i64) -> StoreResult<&mut Form> {
        self.forms
            .iter_mut()
            .find(|f| f.id == id && f.archived_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("form {}", id)))
    }
}

/// Mutex-guarded tables. Mutations run against a clone that replaces the
/// live data only when the whole operation succeeded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_module(&self, title: &str, code: Option<&str>) -> Module {
        let mut data = self.data.lock().await;
        let module = Module {
            id: data.next_id(),
            title: title.to_string(),
            code: code.map(str::to_string),
        };
        data.modules.push(module.clone());
        module
    }

    pub async fn add_class(&self, name: &str) -> StoreResult<ClassGroup> {
        let mut data = self.data.lock().await;
        if data.classes.iter().any(|c| c.name == name) {
            return Err(StoreError::Conflict(format!("class '{}' already exists", name)));
        }
        let class = ClassGroup {
            id: data.next_id(),
            name: name.to_string(),
        };
        data.classes.push(class.clone());
        Ok(class)
    }

    pub async fn add_student(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        school_email: Option<&str>,
    ) -> Student {
        let mut data = self.data.lock().await;
        let student = Student {
            id: data.next_id(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            school_email: school_email.map(str::to_string),
        };
        data.students.push(student.clone());
        student
    }

    /// Snapshot of every token, oldest first.
    pub async fn tokens(&self) -> Vec<EvaluationToken> {
        self.data.lock().await.tokens.clone()
    }

    pub async fn evaluations(&self) -> Vec<Evaluation> {
        self.data.lock().await.evaluations.clone()
    }
}

fn in_window(window: Option<TimeWindow>, at: DateTime<Utc>) -> bool {
    window.is_none_or(|w| w.contains(at))
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_module(&self, id: i64) -> StoreResult<Option<Module>> {
        let data = self.data.lock().await;
        Ok(data.modules.iter().find(|m| m.id == id).cloned())
    }

    async fn count_modules_with_evaluations(&self) -> StoreResult<i64> {
        let data = self.data.lock().await;
        let ids: HashSet<i64> = data.evaluations.iter().map(|e| e.module_id).collect();
        Ok(ids.len() as i64)
    }

    async fn find_class(&self, id: i64) -> StoreResult<Option<ClassGroup>> {
        let data = self.data.lock().await;
        Ok(data.classes.iter().find(|c| c.id == id).cloned())
    }

    async fn find_class_by_name(&self, name: &str) -> StoreResult<Option<ClassGroup>> {
        let data = self.data.lock().await;
        Ok(data.classes.iter().find(|c| c.name == name).cloned())
    }

    async fn module_groups(&self, module_id: i64) -> StoreResult<Vec<ClassGroup>> {
        let data = self.data.lock().await;
        let mut groups: Vec<ClassGroup> = data
            .classes
            .iter()
            .filter(|c| {
                data.enrollments
                    .iter()
                    .any(|e| e.module_id == module_id && e.class_id == c.id)
            })
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn list_enrollments(
        &self,
        module_id: i64,
        class_id: i64,
    ) -> StoreResult<Vec<EnrolledStudent>> {
        let data = self.data.lock().await;
        let rows = data
            .enrollments
            .iter()
            .filter(|e| e.module_id == module_id && e.class_id == class_id)
            .filter_map(|e| {
                data.students.iter().find(|s| s.id == e.student_id).map(|s| EnrolledStudent {
                    enrollment_id: e.id,
                    student_id: s.id,
                    email: s.email.clone(),
                    school_email: s.school_email.clone(),
                })
            })
            .collect();
        Ok(rows)
    }

    async fn create_enrollment(&self, input: &CreateEnrollmentRequest) -> StoreResult<Enrollment> {
        let mut data = self.data.lock().await;
        if !data.students.iter().any(|s| s.id == input.student_id) {
            return Err(StoreError::NotFound(format!("student {}", input.student_id)));
        }
        if !data.modules.iter().any(|m| m.id == input.module_id) {
            return Err(StoreError::NotFound(format!("module {}", input.module_id)));
        }
        if !data.classes.iter().any(|c| c.id == input.class_id) {
            return Err(StoreError::NotFound(format!("class {}", input.class_id)));
        }
        if data.enrollments.iter().any(|e| {
            e.student_id == input.student_id
                && e.module_id == input.module_id
                && e.class_id == input.class_id
        }) {
            return Err(StoreError::Conflict(
                "Student is already enrolled in this module for this class".to_string(),
            ));
        }

        let enrollment = Enrollment {
            id: data.next_id(),
            student_id: input.student_id,
            module_id: input.module_id,
            class_id: input.class_id,
            start_date: input.start_date,
            end_date: input.end_date,
            created_at: Utc::now(),
        };
        data.enrollments.push(enrollment.clone());
        Ok(enrollment)
    }

    async fn update_enrollment_dates(
        &self,
        id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> StoreResult<Enrollment> {
        let mut data = self.data.lock().await;
        let enrollment = data
            .enrollments
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("enrollment {}", id)))?;
        enrollment.start_date = start_date;
        enrollment.end_date = end_date;
        Ok(enrollment.clone())
    }

    async fn delete_enrollment(&self, id: i64) -> StoreResult<bool> {
        let mut data = self.data.lock().await;
        let before = data.enrollments.len();
        data.enrollments.retain(|e| e.id != id);
        Ok(data.enrollments.len() != before)
    }

    async fn reissue_tokens(&self, tokens: &[NewToken]) -> StoreResult<Vec<EvaluationToken>> {
        let mut guard = self.data.lock().await;
        let mut data = guard.clone();
        let mut created = Vec::with_capacity(tokens.len());

        for new in tokens {
            for old in data.tokens.iter_mut().filter(|t| {
                !t.is_used && t.student_email == new.student_email && t.module_id == new.module_id
            }) {
                old.is_used = true;
            }
            if data.tokens.iter().any(|t| t.token == new.token) {
                return Err(StoreError::Conflict("duplicate token value".to_string()));
            }

            let token = EvaluationToken {
                id: data.next_id(),
                token: new.token.clone(),
                module_id: new.module_id,
                class_id: new.class_id,
                form_id: new.form_id,
                student_email: new.student_email.clone(),
                expires_at: new.expires_at,
                is_used: false,
                used_at: None,
                created_at: new.created_at,
            };
            data.tokens.push(token.clone());
            created.push(token);
        }

        *guard = data;
        Ok(created)
    }

    async fn find_token(&self, token: &str) -> StoreResult<Option<EvaluationToken>> {
        let data = self.data.lock().await;
        Ok(data.tokens.iter().find(|t| t.token == token).cloned())
    }

    async fn recent_tokens(&self, limit: i64) -> StoreResult<Vec<EvaluationToken>> {
        let data = self.data.lock().await;
        let mut tokens = data.tokens.clone();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tokens.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(tokens)
    }

    async fn tokens_issued_on(
        &self,
        module_id: i64,
        class_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Vec<EvaluationToken>> {
        let data = self.data.lock().await;
        Ok(data
            .tokens
            .iter()
            .filter(|t| t.module_id == module_id && t.class_id == class_id && t.issued_on() == date)
            .cloned()
            .collect())
    }

    async fn token_batches(&self, now: DateTime<Utc>) -> StoreResult<Vec<TokenBatch>> {
        let data = self.data.lock().await;
        let mut batches: BTreeMap<(NaiveDate, i64, i64, i64), TokenBatch> = BTreeMap::new();
        for t in &data.tokens {
            let batch = batches
                .entry((t.issued_on(), t.module_id, t.class_id, t.form_id))
                .or_insert_with(|| TokenBatch {
                    module_id: t.module_id,
                    class_id: t.class_id,
                    form_id: t.form_id,
                    issued_on: t.issued_on(),
                    total_sent: 0,
                    completed: 0,
                    expired: 0,
                });
            batch.total_sent += 1;
            match t.status_at(now) {
                TokenStatus::Completed => batch.completed += 1,
                TokenStatus::Expired => batch.expired += 1,
                TokenStatus::Pending => {}
            }
        }
        // Newest day first.
        Ok(batches.into_values().rev().collect())
    }

    async fn token_tally(
        &self,
        module_id: Option<i64>,
        window: Option<TimeWindow>,
    ) -> StoreResult<Tally> {
        let data = self.data.lock().await;
        let mut tally = Tally::default();
        for t in data
            .tokens
            .iter()
            .filter(|t| module_id.is_none_or(|m| t.module_id == m) && in_window(window, t.created_at))
        {
            tally.total += 1;
            if t.used_at.is_some() {
                tally.done += 1;
            }
        }
        Ok(tally)
    }

    async fn purge_tokens_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut data = self.data.lock().await;
        let before = data.tokens.len();
        data.tokens.retain(|t| t.expires_at >= cutoff);
        Ok((before - data.tokens.len()) as u64)
    }

    async fn record_submission(
        &self,
        token_id: i64,
        evaluation: &NewEvaluation,
        used_at: DateTime<Utc>,
    ) -> StoreResult<Evaluation> {
        let mut guard = self.data.lock().await;
        let mut data = guard.clone();

        if data
            .evaluations
            .iter()
            .any(|e| e.user_hash == evaluation.user_hash && e.module_id == evaluation.module_id)
        {
            return Err(StoreError::Conflict("evaluation already recorded".to_string()));
        }

        let record = Evaluation {
            id: data.next_id(),
            module_id: evaluation.module_id,
            form_id: Some(evaluation.form_id),
            answers: Json(evaluation.answers.clone()),
            user_hash: evaluation.user_hash.clone(),
            score: evaluation.score,
            original_comment: evaluation.original_comment.clone(),
            anonymized_comment: evaluation.anonymized_comment.clone(),
            is_anonymized: evaluation.is_anonymized,
            status: STATUS_COMPLETED.to_string(),
            created_at: used_at,
        };
        data.evaluations.push(record.clone());

        let token = data
            .tokens
            .iter_mut()
            .find(|t| t.id == token_id)
            .ok_or_else(|| StoreError::NotFound(format!("token {}", token_id)))?;
        if token.is_used {
            return Err(StoreError::TokenAlreadyUsed);
        }
        token.is_used = true;
        token.used_at = Some(used_at);

        *guard = data;
        Ok(record)
    }

    async fn find_evaluation(
        &self,
        user_hash: &str,
        module_id: i64,
    ) -> StoreResult<Option<Evaluation>> {
        let data = self.data.lock().await;
        Ok(data
            .evaluations
            .iter()
            .find(|e| e.user_hash == user_hash && e.module_id == module_id)
            .cloned())
    }

    async fn evaluation_tally(
        &self,
        module_id: Option<i64>,
        window: Option<TimeWindow>,
    ) -> StoreResult<Tally> {
        let data = self.data.lock().await;
        let mut tally = Tally::default();
        for e in data
            .evaluations
            .iter()
            .filter(|e| module_id.is_none_or(|m| e.module_id == m) && in_window(window, e.created_at))
        {
            tally.total += 1;
            if e.is_completed() {
                tally.done += 1;
            }
        }
        Ok(tally)
    }

    async fn create_form(&self, draft: FormDraft) -> StoreResult<Form> {
        let mut guard = self.data.lock().await;
        let mut data = guard.clone();

        let header = FormHeader {
            id: data.next_id(),
            is_active: true,
            archived_at: None,
            created_at: Utc::now(),
        };
        let section_ids = data.reserve(draft.section_count());
        let question_ids = data.reserve(draft.question_count());
        let form = draft.assign_ids(header, &section_ids, &question_ids)?;
        data.forms.push(form.clone());

        *guard = data;
        Ok(form)
    }

    async fn replace_form(&self, id: i64, draft: FormDraft) -> StoreResult<Form> {
        let mut guard = self.data.lock().await;
        let mut data = guard.clone();

        let existing = data.form_mut(id)?;
        let header = FormHeader {
            id,
            is_active: existing.is_active,
            archived_at: existing.archived_at,
            created_at: existing.created_at,
        };
        let section_ids = data.reserve(draft.section_count());
        let question_ids = data.reserve(draft.question_count());
        let form = draft.assign_ids(header, &section_ids, &question_ids)?;
        *data.form_mut(id)? = form.clone();

        *guard = data;
        Ok(form)
    }

    async fn find_form(&self, id: i64, include_archived: bool) -> StoreResult<Option<Form>> {
        let data = self.data.lock().await;
        Ok(data
            .forms
            .iter()
            .find(|f| f.id == id && (include_archived || f.archived_at.is_none()))
            .cloned())
    }

    async fn list_forms(&self) -> StoreResult<Vec<Form>> {
        let data = self.data.lock().await;
        Ok(data.forms.iter().filter(|f| f.archived_at.is_none()).cloned().collect())
    }

    async fn toggle_form_active(&self, id: i64) -> StoreResult<Form> {
        let mut data = self.data.lock().await;
        let form = data.form_mut(id)?;
        form.is_active = !form.is_active;
        Ok(form.clone())
    }

    async fn archive_form(&self, id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut data = self.data.lock().await;
        match data.form_mut(id) {
            Ok(form) => {
                form.archived_at = Some(at);
                Ok(true)
            }
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
