//! 集成测试共用的 Agent 与计划生成器替身

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bee_plan::agents::{Agent, AgentResponse};
use bee_plan::core::PlanError;
use bee_plan::plan::Plan;
use bee_plan::planner::PlanGenerator;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// 总是失败
pub struct FailingAgent;

#[async_trait]
impl Agent for FailingAgent {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "always reports failure"
    }

    async fn execute(&self, input: &str, _cancel: CancellationToken) -> anyhow::Result<AgentResponse> {
        Ok(AgentResponse::failed(format!("cannot do '{input}'")))
    }
}

/// 记录同时进行中的调用数峰值
#[derive(Default)]
pub struct ProbeAgent {
    active: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Agent for ProbeAgent {
    fn name(&self) -> &str {
        "probe"
    }

    fn description(&self) -> &str {
        "tracks concurrent executions"
    }

    async fn execute(&self, input: &str, _cancel: CancellationToken) -> anyhow::Result<AgentResponse> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(AgentResponse::ok(input))
    }
}

/// 第一次调用阻塞直到被取消，之后立即成功
#[derive(Default)]
pub struct GateAgent {
    pub started: Notify,
    opened: AtomicBool,
    pub calls: AtomicU32,
}

#[async_trait]
impl Agent for GateAgent {
    fn name(&self) -> &str {
        "gate"
    }

    fn description(&self) -> &str {
        "blocks on first call until cancelled"
    }

    async fn execute(&self, input: &str, cancel: CancellationToken) -> anyhow::Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.opened.swap(true, Ordering::SeqCst) {
            self.started.notify_one();
            cancel.cancelled().await;
            anyhow::bail!("interrupted");
        }
        Ok(AgentResponse::ok(format!("passed {input}")))
    }
}

/// 脚本化的计划生成器：generate / revise 都返回预置计划的副本
pub struct ScriptedPlanner {
    plan: Mutex<Option<Plan>>,
    pub revisions: AtomicU32,
    pub feedback: Mutex<Vec<String>>,
}

impl ScriptedPlanner {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan: Mutex::new(Some(plan)),
            revisions: AtomicU32::new(0),
            feedback: Mutex::new(Vec::new()),
        }
    }

    /// 不提供任何计划
    pub fn empty() -> Self {
        Self {
            plan: Mutex::new(None),
            revisions: AtomicU32::new(0),
            feedback: Mutex::new(Vec::new()),
        }
    }

    fn current(&self) -> Option<Plan> {
        self.plan.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlanGenerator for ScriptedPlanner {
    async fn generate_plan(&self, _user_input: &str, _cancel: CancellationToken) -> Result<Plan, PlanError> {
        self.current().ok_or(PlanError::PlanGenerationFailed {
            attempts: 1,
            reason: "no plan scripted".to_string(),
        })
    }

    async fn revise_plan(
        &self,
        _plan: &Plan,
        feedback: &str,
        _cancel: CancellationToken,
    ) -> Result<Plan, PlanError> {
        self.revisions.fetch_add(1, Ordering::SeqCst);
        self.feedback.lock().unwrap().push(feedback.to_string());
        self.current().ok_or(PlanError::PlanRevisionFailed {
            attempts: 1,
            reason: "no plan scripted".to_string(),
        })
    }
}

/// 修订时阻塞直到令牌被取消，然后返回错误
#[derive(Default)]
pub struct StallingPlanner {
    pub revising: Notify,
}

#[async_trait]
impl PlanGenerator for StallingPlanner {
    async fn generate_plan(&self, _user_input: &str, _cancel: CancellationToken) -> Result<Plan, PlanError> {
        Err(PlanError::PlanGenerationFailed {
            attempts: 1,
            reason: "generation disabled".to_string(),
        })
    }

    async fn revise_plan(
        &self,
        _plan: &Plan,
        _feedback: &str,
        cancel: CancellationToken,
    ) -> Result<Plan, PlanError> {
        self.revising.notify_one();
        cancel.cancelled().await;
        Err(PlanError::PlanRevisionFailed {
            attempts: 1,
            reason: "revision interrupted".to_string(),
        })
    }
}
