pub mod agent_loop;
pub mod nested;

pub use agent_loop::Agent;
pub use nested::{sanitize_name, NestedAgentCapability};
