//! Agent（能力）层：Agent trait、注册表与内置 Agent

pub mod assistant;
pub mod echo;
pub mod registry;

pub use assistant::AssistantAgent;
pub use echo::EchoAgent;
pub use registry::{Agent, AgentRegistry, AgentResponse};
