//! 错误类型：步骤执行、哨兵轮询、计划生成/修订、注册表
//!
//! 执行器边界内的错误一律转为返回值（Result），不会越过执行器向上抛出；
//! 只有 execute_task 中的计划生成失败会传播给调用方。

use std::time::Duration;

use thiserror::Error;

/// 单步 / 哨兵执行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// 步骤引用的 Agent 未注册（不重试）
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// 单次尝试超时（不重试）
    #[error("Step timed out after {0:?}")]
    StepTimedOut(Duration),

    /// 调用方取消（不重试）
    #[error("Step execution was cancelled")]
    StepCancelled,

    /// Agent 报告失败或执行出错，重试耗尽后返回
    #[error("Step failed after {attempts} attempt(s): {message}")]
    StepExecutionFailed { attempts: u32, message: String },

    #[error("Sentinel exceeded maximum iterations ({0})")]
    SentinelIterationLimitExceeded(u32),

    #[error("Sentinel exceeded maximum errors ({errors}): {last_error}")]
    SentinelErrorBudgetExceeded { errors: u32, last_error: String },

    /// 外部 stop / 计划暂停取消 / 墙钟超时
    #[error("Sentinel execution was cancelled or stopped")]
    SentinelCancelled,
}

impl ExecutionError {
    /// 是否属于取消类错误（暂停、取消、调用方信号）
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::StepCancelled | Self::SentinelCancelled)
    }
}

/// 计划生成、修订与结构校验错误
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Plan generation failed after {attempts} attempt(s): {reason}")]
    PlanGenerationFailed { attempts: u32, reason: String },

    #[error("Plan revision failed after {attempts} attempt(s): {reason}")]
    PlanRevisionFailed { attempts: u32, reason: String },

    #[error("Plan validation failed: {0}")]
    PlanValidationFailed(String),

    #[error("Plan decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Agent 注册表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Agent name must not be empty")]
    EmptyName,
}

/// 编排器对外错误（目前只有计划生成失败会冒泡）
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Plan(#[from] PlanError),
}
