// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Default lifetime of an evaluation link (7 days).
pub const DEFAULT_TOKEN_VALIDITY_MINUTES: i64 = 7 * 24 * 60;

/// Upper bound accepted for a per-request validity override (30 days).
pub const MAX_TOKEN_VALIDITY_MINUTES: i64 = 30 * 24 * 60;

/// Length of generated evaluation tokens.
pub const TOKEN_LENGTH: usize = 64;

/// Separator used when a multi-select answer is flattened into one cell.
pub const ANSWER_LIST_DELIMITER: &str = ", ";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Server secret mixed into every response hash.
    pub app_key: String,
    /// Public base URL used to build survey links.
    pub app_url: String,
    pub port: u16,
    pub rust_log: String,
    pub token_validity_minutes: i64,
    pub export_path: String,
    pub cors_origins: Vec<String>,
    pub smtp: Option<SmtpConfig>,
    pub openrouter: Option<OpenRouterConfig>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let app_key = env::var("APP_KEY")
            .expect("APP_KEY must be set");

        let app_url = env::var("APP_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let token_validity_minutes = env::var("TOKEN_VALIDITY_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &i64| *v > 0)
            .unwrap_or(DEFAULT_TOKEN_VALIDITY_MINUTES);

        let export_path = env::var("EXPORT_PATH")
            .unwrap_or_else(|_| "exports/evaluations.json".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                ]
            });

        let smtp = env::var("SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(587),
            from_address: env::var("SMTP_FROM")
                .unwrap_or_else(|_| "noreply@course-eval.local".to_string()),
            username: env::var("SMTP_USER").ok(),
            password: env::var("SMTP_PASSWORD").ok(),
        });

        let openrouter = env::var("OPENROUTER_API_KEY").ok().map(|api_key| OpenRouterConfig {
            api_key,
            model: env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| "mistralai/mistral-7b-instruct".to_string()),
            api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
        });

        Self {
            database_url,
            jwt_secret,
            app_key,
            app_url,
            port,
            rust_log,
            token_validity_minutes,
            export_path,
            cors_origins,
            smtp,
            openrouter,
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
