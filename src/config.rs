//! 应用配置：从 config/default.toml、显式配置文件与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__EXECUTOR__MAX_RETRIES=5`）。
//! 所有字段都有默认值，空配置即可运行。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::OrchestratorConfig;
use crate::executor::{SentinelConfig, StepExecutorConfig};
use crate::planner::PlannerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub executor: ExecutorSection,
    pub sentinel: SentinelSection,
    pub orchestrator: OrchestratorSection,
    pub planner: PlannerSection,
}

/// [executor] 段：重试、超时与并发上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// 最多尝试次数（含第一次）
    pub max_retries: u32,
    pub step_timeout_secs: u64,
    pub retry_delay_ms: u64,
    /// 并行批量执行的默认并发上限
    pub max_concurrency: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step_timeout_secs: 300,
            retry_delay_ms: 1000,
            max_concurrency: 4,
        }
    }
}

/// [sentinel] 段：轮询间隔、迭代/错误/时长预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SentinelSection {
    pub min_sleep_secs: u64,
    pub max_sleep_secs: u64,
    pub max_iterations: u32,
    pub max_errors: u32,
    pub max_execution_time_secs: u64,
    pub adaptive_sleep: bool,
    pub error_backoff_secs: u64,
    /// sleep_duration <= 0 时不套用 min_sleep_secs
    pub allow_zero_sleep: bool,
}

impl Default for SentinelSection {
    fn default() -> Self {
        Self {
            min_sleep_secs: 1,
            max_sleep_secs: 3600,
            max_iterations: 1000,
            max_errors: 5,
            max_execution_time_secs: 24 * 3600,
            adaptive_sleep: true,
            error_backoff_secs: 5,
            allow_zero_sleep: false,
        }
    }
}

/// [orchestrator] 段：自动修订与失败处理
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub auto_revision: bool,
    pub max_revision_attempts: u32,
    pub continue_on_failure: bool,
    pub skip_revision_when_continuing: bool,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            auto_revision: true,
            max_revision_attempts: 3,
            continue_on_failure: false,
            skip_revision_when_continuing: false,
        }
    }
}

/// [planner] 段：计划生成重试与结构限制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    pub generation_retries: u32,
    pub max_steps: usize,
    /// 为空时使用注册表中的 Agent 名称
    pub known_agents: Vec<String>,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            generation_retries: 3,
            max_steps: crate::plan::validator::DEFAULT_MAX_STEPS,
            known_agents: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn step_executor_config(&self) -> StepExecutorConfig {
        StepExecutorConfig {
            max_retries: self.executor.max_retries,
            step_timeout: Duration::from_secs(self.executor.step_timeout_secs),
            retry_delay: Duration::from_millis(self.executor.retry_delay_ms),
            max_concurrency: self.executor.max_concurrency.max(1),
        }
    }

    pub fn sentinel_config(&self) -> SentinelConfig {
        let s = &self.sentinel;
        SentinelConfig {
            min_sleep: Duration::from_secs(s.min_sleep_secs),
            max_sleep: Duration::from_secs(s.max_sleep_secs),
            max_iterations: s.max_iterations,
            max_errors: s.max_errors,
            max_execution_time: Duration::from_secs(s.max_execution_time_secs),
            adaptive_sleep: s.adaptive_sleep,
            error_backoff_step: Duration::from_secs(s.error_backoff_secs),
            allow_zero_sleep: s.allow_zero_sleep,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let o = &self.orchestrator;
        OrchestratorConfig {
            auto_revision: o.auto_revision,
            max_revision_attempts: o.max_revision_attempts,
            continue_on_failure: o.continue_on_failure,
            skip_revision_when_continuing: o.skip_revision_when_continuing,
        }
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            generation_retries: self.planner.generation_retries,
            max_steps: self.planner.max_steps,
            known_agents: self.planner.known_agents.clone(),
        }
    }
}

/// 加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（文件必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
