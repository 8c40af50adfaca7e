// src/lib.rs

pub mod anonymize;
pub mod config;
pub mod error;
pub mod export;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

pub use routes::create_router;
