use rand::{Rng, distr::Alphanumeric};

use crate::config::TOKEN_LENGTH;

/// Generates an opaque evaluation token (64 alphanumeric chars, ~380 bits).
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Shortened form for log lines.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}…", prefix)
}
