// src/models/catalog.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'modules' table (a taught course unit).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Module {
    pub id: i64,
    pub title: String,
    /// Short catalogue code (e.g., "MATH101").
    pub code: Option<String>,
}

/// Represents the 'class_groups' table. Names are unique.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ClassGroup {
    pub id: i64,
    pub name: String,
}

/// Represents the 'students' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub school_email: Option<String>,
}
