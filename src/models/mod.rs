// src/models/mod.rs

pub mod catalog;
pub mod enrollment;
pub mod evaluation;
pub mod form;
pub mod report;
pub mod token;
