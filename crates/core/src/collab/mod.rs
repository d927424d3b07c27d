//! Collaborator contracts the driver depends on but never owns the concrete
//! implementation of: persistence, LLM generation, tellask
//! parsing, agent/team loading, tools, and the event bus.

pub mod agent;
pub mod event_bus;
pub mod llm;
pub mod memory;
pub mod persistence;
pub mod tellask;
pub mod tools;

pub use agent::{AgentLoader, AgentMinds, TeamMember};
pub use event_bus::EventBus;
pub use llm::{GenerationReceiver, GenerationRequest, GenerationResult, LlmError, LlmGenerator};
pub use memory::InMemoryPersistence;
pub use persistence::{DialogMetadata, Persistence};
pub use tellask::{TellaskCall, TellaskParser, TellaskValidation};
pub use tools::{Tool, ToolCallOutput, ToolError, ToolRegistry, ToolSpec};
