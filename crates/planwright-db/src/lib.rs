//! PostgreSQL persistence for planwright sessions, checkpoints and the
//! append-only agent output log.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
