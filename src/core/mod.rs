//! 核心编排层：错误类型、进度投影、组件构建与主控循环

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use error::{ExecutionError, OrchestratorError, PlanError, RegistryError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, PlanExecutionResult};
pub use state::PlanProgress;
