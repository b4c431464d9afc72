//! 计划生成与修订
//!
//! PlanGenerator 是编排器依赖的抽象；LlmPlanGenerator 是基于 Oracle 的默认实现。

pub mod llm;
pub mod parse;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::PlanError;
use crate::plan::Plan;

pub use llm::{LlmPlanGenerator, PlannerConfig};
pub use parse::extract_json;

/// 计划生成服务
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    /// 由用户请求生成新计划
    async fn generate_plan(&self, user_input: &str, cancel: CancellationToken) -> Result<Plan, PlanError>;

    /// 根据失败描述修订计划；返回的计划只取其步骤列表
    async fn revise_plan(
        &self,
        plan: &Plan,
        feedback: &str,
        cancel: CancellationToken,
    ) -> Result<Plan, PlanError>;
}
