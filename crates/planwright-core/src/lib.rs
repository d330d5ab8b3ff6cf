//! Planwright engine: turns a business context into a scheduled,
//! budget-checked execution program through seven rounds of multi-agent
//! analysis.

pub mod agent;
pub mod checkpoint;
pub mod conflict;
pub mod error;
pub mod finance;
pub mod knowledge;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod rounds;
pub mod schedule;
pub mod state;
pub mod synthesis;

pub use error::GenerationError;
pub use orchestrator::{GenerateRequest, GenerationOutcome, Orchestrator, OrchestratorConfig};
