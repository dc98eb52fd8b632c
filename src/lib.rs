//! pytest-chronicle library.
//!
//! Normalizes pytest result artifacts into runs and cases, stores them
//! idempotently in PostgreSQL or SQLite, and answers which tests are red.

pub mod cli;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod logging;
pub mod migration;
pub mod models;
pub mod services;
