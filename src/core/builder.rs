//! 编排器构建器：统一的组件初始化逻辑
//!
//! 由 AppConfig 生成各执行器配置，注册内置 Agent，组装 Orchestrator。

use std::sync::Arc;

use crate::agents::{AgentRegistry, AssistantAgent, EchoAgent};
use crate::config::AppConfig;
use crate::core::{Orchestrator, RegistryError};
use crate::executor::{SentinelExecutor, StepExecutor};
use crate::llm::LlmClient;
use crate::planner::{LlmPlanGenerator, PlanGenerator};

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    registry: Arc<AgentRegistry>,
    planner: Option<Arc<dyn PlanGenerator>>,
    builtin_agents: bool,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config,
            llm,
            registry: Arc::new(AgentRegistry::new()),
            planner: None,
            builtin_agents: true,
        }
    }

    /// 使用外部注册表（可预先注册自定义 Agent）
    pub fn with_registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// 替换默认的 LlmPlanGenerator
    pub fn with_planner(mut self, planner: Arc<dyn PlanGenerator>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// 是否注册内置的 echo / assistant Agent
    pub fn with_builtin_agents(mut self, enable: bool) -> Self {
        self.builtin_agents = enable;
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn build(self) -> Result<Orchestrator, RegistryError> {
        if self.builtin_agents {
            self.registry.register_agent(EchoAgent)?;
            self.registry
                .register_agent(AssistantAgent::new(self.llm.clone()))?;
        }
        tracing::debug!(agents = self.registry.count(), "Agent registry ready");

        let step_executor = Arc::new(StepExecutor::new(
            self.registry.clone(),
            self.config.step_executor_config(),
        ));
        let sentinel_executor = Arc::new(SentinelExecutor::new(
            self.llm.clone(),
            self.config.sentinel_config(),
        ));
        let planner = self.planner.unwrap_or_else(|| {
            Arc::new(LlmPlanGenerator::new(
                self.llm.clone(),
                self.registry.clone(),
                self.config.planner_config(),
            ))
        });

        Ok(Orchestrator::new(
            step_executor,
            sentinel_executor,
            planner,
            self.config.orchestrator_config(),
        ))
    }
}
