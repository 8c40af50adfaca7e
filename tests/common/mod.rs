// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use course_eval::{
    anonymize::{AnonymizeError, Anonymizer},
    config::Config,
    export::MemoryWorkbookSink,
    models::{
        catalog::{ClassGroup, Module, Student},
        enrollment::CreateEnrollmentRequest,
    },
    notify::{Invitation, NotificationSender, NotifyError},
    routes,
    state::AppState,
    store::{MemoryStore, SharedStore, Store},
    utils::jwt::{ADMIN_ROLE, sign_jwt},
};
use serde_json::{Value, json};
use tokio::sync::Mutex;

pub const APP_KEY: &str = "test_app_key";
pub const JWT_SECRET: &str = "test_secret_for_integration_tests";

/// Keeps every invitation instead of mailing it.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, Invitation)>>,
    fail_for: Mutex<Option<String>>,
}

impl RecordingSender {
    pub async fn sent(&self) -> Vec<(String, Invitation)> {
        self.sent.lock().await.clone()
    }

    pub async fn fail_for(&self, email: &str) {
        *self.fail_for.lock().await = Some(email.to_string());
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, to: &str, invitation: &Invitation) -> Result<(), NotifyError> {
        if self.fail_for.lock().await.as_deref() == Some(to) {
            return Err(NotifyError::Transport("mailbox unavailable".into()));
        }
        self.sent.lock().await.push((to.to_string(), invitation.clone()));
        Ok(())
    }
}

/// Prefixes the text so tests can tell it went through.
pub struct TaggingAnonymizer;

#[async_trait]
impl Anonymizer for TaggingAnonymizer {
    async fn anonymize(&self, text: &str) -> Result<String, AnonymizeError> {
        Ok(format!("[anon] {}", text))
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub store: Arc<MemoryStore>,
    pub sender: Arc<RecordingSender>,
    pub sheets: Arc<MemoryWorkbookSink>,
    pub admin_token: String,
}

pub struct Cohort {
    pub module: Module,
    pub class: ClassGroup,
    pub students: Vec<Student>,
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        app_key: APP_KEY.to_string(),
        app_url: "http://evaluations.test".to_string(),
        port: 0,
        rust_log: "error".to_string(),
        token_validity_minutes: 60,
        export_path: "unused.json".to_string(),
        cors_origins: vec!["http://localhost:3000".to_string()],
        smtp: None,
        openrouter: None,
    }
}

/// Spawns the app on a random port, backed by in-memory collaborators.
pub async fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let sender = Arc::new(RecordingSender::default());
    let sheets = Arc::new(MemoryWorkbookSink::new());
    let config = test_config();

    let shared: SharedStore = store.clone();
    let state = AppState {
        store: shared,
        config: config.clone(),
        notifier: sender.clone(),
        anonymizer: Arc::new(TaggingAnonymizer),
        sheets: sheets.clone(),
    };

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let admin_token = sign_jwt("staff-1", ADMIN_ROLE, JWT_SECRET, 600).unwrap();

    TestApp {
        address,
        client: reqwest::Client::new(),
        store,
        sender,
        sheets,
        admin_token,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(&self.admin_token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn admin_post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.admin_token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn admin_put(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .bearer_auth(&self.admin_token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn admin_delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .bearer_auth(&self.admin_token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_survey(&self, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/api/survey/{}", token)))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn submit_survey(&self, token: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/api/survey/{}", token)))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Module + class with `emails.len()` enrolled students.
    pub async fn seed_cohort(&self, emails: &[&str]) -> Cohort {
        let suffix = &uuid::Uuid::new_v4().to_string()[..8];
        let module = self.store.add_module(&format!("Databases {}", suffix), Some("DB101")).await;
        let class = self.store.add_class(&format!("CS-{}", suffix)).await.unwrap();

        let mut students = Vec::new();
        for (i, email) in emails.iter().enumerate() {
            let student = self
                .store
                .add_student(&format!("First{}", i), &format!("Last{}", i), email, None)
                .await;
            self.store
                .create_enrollment(&CreateEnrollmentRequest {
                    student_id: student.id,
                    module_id: module.id,
                    class_id: class.id,
                    start_date: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
                    end_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
                })
                .await
                .unwrap();
            students.push(student);
        }

        Cohort { module, class, students }
    }

    /// Two-section form; the second section shows when question "liked" is "Yes".
    pub async fn create_sample_form(&self) -> Value {
        let response = self.admin_post("/api/admin/forms", &sample_form_body()).await;
        assert_eq!(response.status().as_u16(), 201);
        response.json().await.unwrap()
    }

    pub async fn issue(&self, cohort: &Cohort, form_id: i64) -> reqwest::Response {
        self.admin_post(
            "/api/admin/evaluations/send",
            &json!({
                "module_id": cohort.module.id,
                "class_id": cohort.class.id,
                "form_id": form_id
            }),
        )
        .await
    }

    /// The unused token of `email`, read straight from the store.
    pub async fn open_token(&self, email: &str) -> String {
        self.store
            .tokens()
            .await
            .into_iter()
            .find(|t| t.student_email == email && !t.is_used)
            .map(|t| t.token)
            .expect("no open token for student")
    }
}

pub fn sample_form_body() -> Value {
    json!({
        "title": "End of course survey",
        "description": "Anonymous feedback",
        "sections": [
            {
                "title": "General",
                "order": 1,
                "questions": [
                    {
                        "key": "liked",
                        "question": "Did you like the course?",
                        "type": "radio",
                        "options": ["Yes", "No"],
                        "order": 1,
                        "controls_visibility": true
                    },
                    {
                        "question": "Which topics were useful?",
                        "type": "checkbox",
                        "options": ["A", "B", "C"],
                        "order": 2,
                        "is_required": false
                    },
                    {
                        "question": "Overall rating",
                        "type": "rating",
                        "order": 3
                    }
                ]
            },
            {
                "title": "What worked",
                "order": 2,
                "depends_on": "liked",
                "depends_on_answer": "Yes",
                "questions": [
                    { "question": "Tell us more", "type": "textarea", "order": 1 }
                ]
            }
        ]
    })
}

/// Question ids of the created sample form, in form order.
pub fn question_ids(form: &Value) -> Vec<i64> {
    form["sections"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|s| s["questions"].as_array().unwrap().iter())
        .map(|q| q["id"].as_i64().unwrap())
        .collect()
}
