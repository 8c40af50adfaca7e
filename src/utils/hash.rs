use sha2::{Digest, Sha256};

/// Anonymous response key for a (token, student) pair.
///
/// SHA-256 over `token || student_email || app_key`, lowercase hex. The same
/// inputs always give the same key, and the key cannot be traced back to the
/// student without the token string.
pub fn user_hash(token: &str, student_email: &str, app_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(student_email.as_bytes());
    hasher.update(app_key.as_bytes());
    format!("{:x}", hasher.finalize())
}
