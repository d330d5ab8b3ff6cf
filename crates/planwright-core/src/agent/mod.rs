//! Analysis agents and the pool they are registered in.

pub mod pool;
pub mod roster;
pub mod trait_def;

pub use pool::AgentPool;
pub use roster::{Role, RosterAgent};
pub use trait_def::{Agent, AgentInput, Analysis};
