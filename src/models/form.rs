// src/models/form.rs

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::{AppError, FieldErrors},
    store::StoreError,
};

/// Answer widget of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Text,
    Textarea,
    Radio,
    Checkbox,
    Select,
    Rating,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Text => "text",
            QuestionType::Textarea => "textarea",
            QuestionType::Radio => "radio",
            QuestionType::Checkbox => "checkbox",
            QuestionType::Select => "select",
            QuestionType::Rating => "rating",
        }
    }

    /// Types whose answers must come from a fixed option list.
    pub fn has_options(&self) -> bool {
        matches!(self, QuestionType::Radio | QuestionType::Checkbox | QuestionType::Select)
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(QuestionType::Text),
            "textarea" => Ok(QuestionType::Textarea),
            "radio" => Ok(QuestionType::Radio),
            "checkbox" => Ok(QuestionType::Checkbox),
            "select" => Ok(QuestionType::Select),
            "rating" => Ok(QuestionType::Rating),
            other => Err(format!("unknown question type '{}'", other)),
        }
    }
}

/// A survey form: ordered sections, each holding ordered questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub is_active: bool,
    /// Soft-delete marker. Archived forms stay readable for old tokens and reports.
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sections: Vec<FormSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSection {
    pub id: i64,
    pub form_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub position: i32,
    /// Question (from an earlier section) whose answer controls visibility.
    pub depends_on_question_id: Option<i64>,
    pub depends_on_answer: Option<String>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub form_id: i64,
    pub section_id: i64,
    pub question: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Option<Vec<String>>,
    pub position: i32,
    pub is_required: bool,
    pub controls_visibility: bool,
}

impl Form {
    /// All questions in form order (section order, then question order).
    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.sections.iter().flat_map(|s| s.questions.iter())
    }

    pub fn question(&self, id: i64) -> Option<&Question> {
        self.questions().find(|q| q.id == id)
    }
}

fn default_true() -> bool {
    true
}

/// DTO for creating or replacing a form with its nested sections and questions.
#[derive(Debug, Deserialize, Validate)]
pub struct FormRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(length(min = 1, message = "A form needs at least one section"), nested)]
    pub sections: Vec<SectionInput>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SectionInput {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub order: i32,
    /// `key` of the controlling question.
    #[validate(length(min = 1, max = 100))]
    pub depends_on: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub depends_on_answer: Option<String>,
    #[validate(length(min = 1, message = "A section needs at least one question"), nested)]
    pub questions: Vec<QuestionInput>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct QuestionInput {
    /// Caller-chosen temporary identifier, only needed when a section depends on it.
    #[validate(length(min = 1, max = 100))]
    pub key: Option<String>,
    #[validate(length(min = 1, max = 1000))]
    pub question: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Option<Vec<String>>,
    pub order: i32,
    #[serde(default = "default_true")]
    pub is_required: bool,
    #[serde(default)]
    pub controls_visibility: bool,
}

/// Position of a question in the flattened, ordered question list of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionSlot(pub usize);

/// A validated form whose dependency references point at question slots
/// instead of database ids.
///
/// Persisting is two-phase: the store first reserves one id per section and
/// per question, then `assign_ids` resolves every slot to its reserved id, so
/// rows are written with their dependency already in place.
#[derive(Debug, Clone)]
pub struct FormDraft {
    pub title: String,
    pub description: Option<String>,
    pub sections: Vec<SectionDraft>,
}

#[derive(Debug, Clone)]
pub struct SectionDraft {
    pub title: String,
    pub description: Option<String>,
    pub position: i32,
    pub depends_on: Option<QuestionSlot>,
    pub depends_on_answer: Option<String>,
    pub questions: Vec<QuestionDraft>,
}

#[derive(Debug, Clone)]
pub struct QuestionDraft {
    pub question: String,
    pub question_type: QuestionType,
    pub options: Option<Vec<String>>,
    pub position: i32,
    pub is_required: bool,
    pub controls_visibility: bool,
}

/// Identity and flags of the form row the draft is attached to.
#[derive(Debug, Clone)]
pub struct FormHeader {
    pub id: i64,
    pub is_active: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FormDraft {
    pub fn from_request(req: FormRequest) -> Result<Self, AppError> {
        req.validate()?;

        let mut sections: Vec<(usize, SectionInput)> = req.sections.into_iter().enumerate().collect();
        sections.sort_by_key(|(_, s)| s.order);

        let mut errors = FieldErrors::new();
        let mut push = |field: String, msg: &str| {
            errors.entry(field).or_default().push(msg.to_string());
        };

        // Pass 1: number every question and index the caller keys.
        let mut keys: HashMap<String, (usize, QuestionSlot)> = HashMap::new();
        let mut slot_info: Vec<(bool, Option<Vec<String>>)> = Vec::new();
        let mut drafts = Vec::with_capacity(sections.len());

        for (s_idx, (s_orig, section)) in sections.iter().enumerate() {
            let mut inputs: Vec<(usize, &QuestionInput)> = section.questions.iter().enumerate().collect();
            inputs.sort_by_key(|(_, q)| q.order);
            let mut questions = Vec::with_capacity(inputs.len());

            for (q_orig, input) in inputs {
                let slot = QuestionSlot(slot_info.len());
                let field = format!("sections[{}].questions[{}]", s_orig, q_orig);

                let options = input.options.as_ref().map(|opts| {
                    opts.iter()
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect::<Vec<_>>()
                });
                if input.question_type.has_options()
                    && options.as_ref().is_none_or(|o| o.is_empty())
                {
                    push(format!("{}.options", field), "This question type needs at least one option");
                }

                if let Some(key) = &input.key {
                    if keys.insert(key.clone(), (s_idx, slot)).is_some() {
                        push(format!("{}.key", field), "Duplicate question key");
                    }
                }

                slot_info.push((input.controls_visibility, options.clone()));
                questions.push(QuestionDraft {
                    question: input.question.trim().to_string(),
                    question_type: input.question_type,
                    options: if input.question_type.has_options() { options } else { None },
                    position: input.order,
                    is_required: input.is_required,
                    controls_visibility: input.controls_visibility,
                });
            }

            drafts.push(SectionDraft {
                title: section.title.trim().to_string(),
                description: section.description.clone(),
                position: section.order,
                depends_on: None,
                depends_on_answer: section.depends_on_answer.as_ref().map(|a| a.trim().to_string()),
                questions,
            });
        }

        // Pass 2: wire each section to the slot of its controlling question.
        for (s_idx, (s_orig, section)) in sections.iter().enumerate() {
            let field = format!("sections[{}]", s_orig);
            let Some(key) = &section.depends_on else {
                if section.depends_on_answer.is_some() {
                    push(format!("{}.depends_on", field), "depends_on_answer requires depends_on");
                }
                continue;
            };

            let Some(&(owner_idx, slot)) = keys.get(key) else {
                push(format!("{}.depends_on", field), "Unknown question key");
                continue;
            };
            if owner_idx >= s_idx {
                push(
                    format!("{}.depends_on", field),
                    "A section can only depend on a question from an earlier section",
                );
                continue;
            }

            let (controls_visibility, options) = &slot_info[slot.0];
            if !controls_visibility {
                push(
                    format!("{}.depends_on", field),
                    "The referenced question must have controls_visibility set",
                );
            }
            match &section.depends_on_answer {
                None => push(
                    format!("{}.depends_on_answer", field),
                    "A dependent section needs the answer that reveals it",
                ),
                Some(answer) => {
                    if let Some(options) = options {
                        if !options.iter().any(|o| o == answer.trim()) {
                            push(
                                format!("{}.depends_on_answer", field),
                                "Answer is not one of the question's options",
                            );
                        }
                    }
                }
            }
            drafts[s_idx].depends_on = Some(slot);
        }

        if !errors.is_empty() {
            return Err(AppError::ValidationError(errors));
        }

        Ok(Self {
            title: req.title.trim().to_string(),
            description: req.description,
            sections: drafts,
        })
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn question_count(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }

    /// Resolves the draft against reserved ids (one per section, one per
    /// question, both in draft order).
    pub fn assign_ids(
        self,
        header: FormHeader,
        section_ids: &[i64],
        question_ids: &[i64],
    ) -> Result<Form, StoreError> {
        if section_ids.len() != self.section_count() || question_ids.len() != self.question_count() {
            return Err(StoreError::Invalid(format!(
                "reserved {} section ids and {} question ids for a draft of {} sections and {} questions",
                section_ids.len(),
                question_ids.len(),
                self.section_count(),
                self.question_count()
            )));
        }

        let mut next_question = question_ids.iter().copied();
        let mut sections = Vec::with_capacity(self.sections.len());

        for (section, &section_id) in self.sections.into_iter().zip(section_ids) {
            let depends_on_question_id = section.depends_on.map(|slot| question_ids[slot.0]);
            let questions = section
                .questions
                .into_iter()
                .zip(next_question.by_ref())
                .map(|(q, id)| Question {
                    id,
                    form_id: header.id,
                    section_id,
                    question: q.question,
                    question_type: q.question_type,
                    options: q.options,
                    position: q.position,
                    is_required: q.is_required,
                    controls_visibility: q.controls_visibility,
                })
                .collect();

            sections.push(FormSection {
                id: section_id,
                form_id: header.id,
                title: section.title,
                description: section.description,
                position: section.position,
                depends_on_question_id,
                depends_on_answer: section.depends_on_answer,
                questions,
            });
        }

        Ok(Form {
            id: header.id,
            title: self.title,
            description: self.description,
            is_active: header.is_active,
            archived_at: header.archived_at,
            created_at: header.created_at,
            sections,
        })
    }
}
