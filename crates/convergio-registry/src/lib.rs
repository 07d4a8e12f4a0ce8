mod definition;
mod error;
mod registry;

pub use definition::{parse_agent_document, AgentDefinition, AgentFrontmatter, ToolSpec};
pub use error::RegistryError;
pub use registry::{AgentFilter, AgentInstance, AgentRegistry, RegistryEvent};
