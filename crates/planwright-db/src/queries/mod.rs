pub mod agent_outputs;
pub mod checkpoints;
pub mod sessions;
