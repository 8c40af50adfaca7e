// src/services/mod.rs
//
// Evaluation workflow. Handlers extract and respond; everything they decide
// lives here so it can run against any `Store`.

pub mod gate;
pub mod issuer;
pub mod recorder;
pub mod report;
pub mod stats;
