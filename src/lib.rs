//! Document processing pipeline
//!
//! OCR and level summarization behind a bounded worker pool, with a circuit
//! breaker and admission control in front and an in-process async job queue
//! for deferred work.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
