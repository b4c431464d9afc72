//! Bee Plan - 计划编排引擎
//!
//! 模块划分：
//! - **agents**: Agent trait、注册表与内置 Agent（echo、assistant）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、进度投影、编排器与构建器
//! - **executor**: 普通步骤执行（重试、超时、批量）与哨兵步骤轮询
//! - **llm**: Oracle 客户端抽象与 Mock 实现
//! - **observability**: tracing 初始化
//! - **plan**: 计划数据模型、JSON 表示、结构校验与共享句柄
//! - **planner**: 计划生成 / 修订服务

pub mod agents;
pub mod config;
pub mod core;
pub mod executor;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod planner;

pub use crate::core::{Orchestrator, OrchestratorBuilder, PlanExecutionResult};
pub use crate::plan::{Plan, PlanHandle, PlanStatus, PlanStep};
