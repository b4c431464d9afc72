//! Agent 注册表
//!
//! 所有 Agent 实现 Agent trait（name / description / execute），由 AgentRegistry 按名注册与查找；
//! StepExecutor 按 step.agent_name 取出 Agent 后加超时与重试调用。
//! 注册表会被多个并发执行中的步骤同时读取，内部用 RwLock 保护。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::RegistryError;

/// Agent 单次执行结果
#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    pub success: bool,
    pub content: Option<String>,
    pub error: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl AgentResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Agent trait：名称、描述（供计划生成 prompt 使用）、异步执行
///
/// 返回 Err 表示执行中出现意外故障，Ok(success = false) 表示 Agent 明确报告失败；两者都会被重试。
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 执行自由文本指令；cancel 在超时或调用方取消时触发
    async fn execute(&self, input: &str, cancel: CancellationToken) -> anyhow::Result<AgentResponse>;
}

/// Agent 注册表：按名称存储 Arc<dyn Agent>
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（同名覆盖）；名称为空视为调用方错误
    pub fn register(&self, name: impl Into<String>, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.write().insert(name.clone(), agent).is_some() {
            tracing::warn!(agent = %name, "Agent already registered, overwriting");
        } else {
            tracing::debug!(agent = %name, "Agent registered");
        }
        Ok(())
    }

    /// 以 agent.name() 注册
    pub fn register_agent(&self, agent: impl Agent + 'static) -> Result<(), RegistryError> {
        let name = agent.name().to_string();
        self.register(name, Arc::new(agent))
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.read().get(name).cloned()
    }

    pub fn list(&self) -> HashSet<String> {
        self.read().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// 返回按名称排序的 (name, description) 列表，用于生成 prompt 中的 Available agents 段落
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .read()
            .iter()
            .map(|(name, agent)| (name.clone(), agent.description().to_string()))
            .collect();
        list.sort();
        list
    }

    // 持锁期间不会 panic，中毒时直接取回内部数据
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Agent>>> {
        self.agents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Agent>>> {
        self.agents.write().unwrap_or_else(|e| e.into_inner())
    }
}
