// src/handlers/mod.rs

pub mod enrollment;
pub mod evaluation;
pub mod form;
pub mod report;
pub mod survey;
