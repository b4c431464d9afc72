//! 编排器：驱动计划逐步执行，失败时自动修订，支持暂停 / 恢复 / 取消
//!
//! 主循环每次把当前步骤克隆出锁外执行，结束后写回；写锁只在修改计划时短暂持有。
//! 每次运行登记一个运行令牌（调用方令牌的子令牌），pause / cancel 通过它打断正在执行的步骤。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::{ExecutionError, OrchestratorError, PlanProgress};
use crate::executor::{SentinelExecutor, StepExecutor};
use crate::plan::{Plan, PlanHandle, PlanStatus, PlanStep};
use crate::planner::PlanGenerator;

/// 编排参数
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub auto_revision: bool,
    /// 每个计划最多修订次数
    pub max_revision_attempts: u32,
    /// 未修订的失败步骤是否跳过继续
    pub continue_on_failure: bool,
    /// continue_on_failure 开启时不再修订
    pub skip_revision_when_continuing: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_revision: true,
            max_revision_attempts: 3,
            continue_on_failure: false,
            skip_revision_when_continuing: false,
        }
    }
}

/// 一次 execute_plan / resume_plan 的结果
#[derive(Debug, Clone)]
pub struct PlanExecutionResult {
    pub success: bool,
    /// 结束时的计划快照
    pub plan: Plan,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

type StepSuccess = (String, HashMap<String, Value>);

struct RunEntry {
    generation: u64,
    token: CancellationToken,
}

type RunMap = HashMap<String, RunEntry>;

/// 运行登记守卫：Drop 时注销本代登记
struct RunGuard<'a> {
    runs: &'a Mutex<RunMap>,
    plan_id: String,
    generation: u64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if runs
            .get(&self.plan_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            runs.remove(&self.plan_id);
        }
    }
}

pub struct Orchestrator {
    step_executor: Arc<StepExecutor>,
    sentinel_executor: Arc<SentinelExecutor>,
    planner: Arc<dyn PlanGenerator>,
    config: OrchestratorConfig,
    active_runs: Mutex<RunMap>,
    generations: AtomicU64,
    progress_tx: watch::Sender<PlanProgress>,
}

impl Orchestrator {
    pub fn new(
        step_executor: Arc<StepExecutor>,
        sentinel_executor: Arc<SentinelExecutor>,
        planner: Arc<dyn PlanGenerator>,
        config: OrchestratorConfig,
    ) -> Self {
        let (progress_tx, _) = watch::channel(PlanProgress::default());
        Self {
            step_executor,
            sentinel_executor,
            planner,
            config,
            active_runs: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
            progress_tx,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn step_executor(&self) -> &Arc<StepExecutor> {
        &self.step_executor
    }

    pub fn sentinel_executor(&self) -> &Arc<SentinelExecutor> {
        &self.sentinel_executor
    }

    /// 订阅进度投影
    pub fn subscribe(&self) -> watch::Receiver<PlanProgress> {
        self.progress_tx.subscribe()
    }

    /// 该计划是否有正在进行的运行
    pub fn is_running(&self, plan_id: &str) -> bool {
        self.lock_runs().contains_key(plan_id)
    }

    /// 从头执行计划
    pub async fn execute_plan(&self, handle: &PlanHandle, cancel: CancellationToken) -> PlanExecutionResult {
        let started_at = Utc::now();
        {
            let mut plan = handle.write().await;
            plan.start();
            tracing::info!(plan_id = %plan.id, title = %plan.title, steps = plan.steps.len(), "Plan started");
            self.publish(&plan);
        }
        self.run(handle, cancel).await;
        self.finish(handle, started_at).await
    }

    /// 从当前游标继续执行（不归零）
    pub async fn resume_plan(&self, handle: &PlanHandle, cancel: CancellationToken) -> PlanExecutionResult {
        let started_at = Utc::now();
        {
            let mut plan = handle.write().await;
            if plan.is_completed() {
                tracing::debug!(plan_id = %plan.id, "Plan already completed, nothing to resume");
            } else {
                plan.resume();
                tracing::info!(
                    plan_id = %plan.id,
                    step = plan.current_step_index() + 1,
                    "Plan resumed"
                );
                self.publish(&plan);
            }
        }
        self.run(handle, cancel).await;
        self.finish(handle, started_at).await
    }

    /// 暂停：状态置为 Paused，停止该计划的哨兵并打断正在执行的步骤
    ///
    /// 已结束的计划不受影响；continue_on_failure 下仍在运行的 Failed 计划可以暂停。
    /// 打断在持有写锁时完成，运行循环拿到锁时一定能看到已取消的令牌。
    pub async fn pause_plan(&self, handle: &PlanHandle) -> bool {
        let mut plan = handle.write().await;
        let finished = match plan.status {
            PlanStatus::Completed | PlanStatus::Cancelled => true,
            PlanStatus::Failed => !self.is_running(handle.id()),
            _ => false,
        };
        if finished {
            return false;
        }
        plan.pause();
        tracing::info!(plan_id = %plan.id, "Plan paused");
        self.interrupt(handle.id(), &plan.sentinel_ids());
        self.publish(&plan);
        true
    }

    /// 取消：状态置为 Cancelled，停止哨兵并打断正在执行的步骤；已完成的计划不受影响
    pub async fn cancel_plan(&self, handle: &PlanHandle) -> bool {
        let mut plan = handle.write().await;
        if matches!(plan.status, PlanStatus::Completed | PlanStatus::Cancelled) {
            return false;
        }
        plan.cancel();
        tracing::info!(plan_id = %plan.id, "Plan cancelled");
        self.interrupt(handle.id(), &plan.sentinel_ids());
        self.publish(&plan);
        true
    }

    /// 先生成计划再执行；只有生成失败会作为错误返回
    pub async fn execute_task(
        &self,
        user_input: &str,
        cancel: CancellationToken,
    ) -> Result<PlanExecutionResult, OrchestratorError> {
        let plan = self.planner.generate_plan(user_input, cancel.clone()).await?;
        tracing::info!(plan_id = %plan.id, steps = plan.steps.len(), "Generated plan for task");
        let handle = PlanHandle::new(plan);
        Ok(self.execute_plan(&handle, cancel).await)
    }

    async fn run(&self, handle: &PlanHandle, cancel: CancellationToken) {
        let run_token = cancel.child_token();
        let _guard = self.register_run(handle.id(), run_token.clone());

        loop {
            let (index, current) = {
                let plan = handle.read().await;
                // Failed 仍可继续：continue_on_failure 跳过失败步骤后状态保持 Failed
                if !matches!(plan.status, PlanStatus::InProgress | PlanStatus::Failed) || plan.is_completed() {
                    break;
                }
                match plan.current_step() {
                    Some(step) => (plan.current_step_index(), step.clone()),
                    None => break,
                }
            };
            if run_token.is_cancelled() {
                self.mark_cancelled_by_caller(handle, &cancel).await;
                break;
            }

            let title = current.title().to_string();
            tracing::info!(plan_id = %handle.id(), step = index + 1, title = %title, "Executing plan step");
            let (executed, outcome) = self.execute_plan_step(current, run_token.clone()).await;

            let mut plan = handle.write().await;
            if plan.current_step_index() != index {
                tracing::warn!(plan_id = %plan.id, "Plan cursor moved during step execution, stopping run");
                break;
            }
            plan.replace_current_step(executed);

            match outcome {
                Ok((result, metadata)) => {
                    plan.complete_current_step(result, metadata);
                    self.publish(&plan);
                }
                Err(err) if run_token.is_cancelled() || plan.status.is_interrupted() => {
                    // 被暂停 / 取消打断的步骤不记为失败，游标保留以便恢复
                    if cancel.is_cancelled() && !plan.status.is_interrupted() {
                        plan.cancel();
                    }
                    tracing::info!(
                        plan_id = %plan.id,
                        step = index + 1,
                        status = ?plan.status,
                        error = %err,
                        "Plan step interrupted"
                    );
                    self.publish(&plan);
                    break;
                }
                Err(err) => {
                    let message = err.to_string();
                    plan.fail_current_step(message.clone());
                    tracing::warn!(plan_id = %plan.id, step = index + 1, error = %message, "Plan step failed");
                    self.publish(&plan);
                    drop(plan);

                    if self.try_revise(handle, index, &title, &err, run_token.clone()).await {
                        continue;
                    }
                    if run_token.is_cancelled() {
                        self.mark_cancelled_by_caller(handle, &cancel).await;
                        break;
                    }
                    if !self.config.continue_on_failure {
                        break;
                    }

                    let mut plan = handle.write().await;
                    if plan.status.is_interrupted() {
                        break;
                    }
                    plan.advance();
                    tracing::info!(plan_id = %plan.id, step = index + 1, "Skipping failed step");
                    self.publish(&plan);
                }
            }
        }

        // 恢复时游标已在末尾的计划不会进入循环体，这里补上最终状态
        let mut plan = handle.write().await;
        if plan.settle() {
            tracing::debug!(plan_id = %plan.id, status = ?plan.status, "Plan settled");
            self.publish(&plan);
        }
    }

    async fn execute_plan_step(
        &self,
        step: PlanStep,
        token: CancellationToken,
    ) -> (PlanStep, Result<StepSuccess, ExecutionError>) {
        match step {
            PlanStep::Plain(mut step) => {
                let outcome = self
                    .step_executor
                    .execute_step(&mut step, token)
                    .await
                    .map(|output| (output.content, output.metadata));
                (PlanStep::Plain(step), outcome)
            }
            PlanStep::Sentinel(mut sentinel) => {
                let outcome = self
                    .sentinel_executor
                    .execute_sentinel_step(&mut sentinel, token)
                    .await
                    .map(|output| {
                        let mut metadata = HashMap::new();
                        metadata.insert("iterations".to_string(), Value::from(output.iterations));
                        (output.message, metadata)
                    });
                (PlanStep::Sentinel(sentinel), outcome)
            }
        }
    }

    /// 尝试自动修订；返回是否已替换步骤列表
    async fn try_revise(
        &self,
        handle: &PlanHandle,
        index: usize,
        title: &str,
        error: &ExecutionError,
        token: CancellationToken,
    ) -> bool {
        if !self.config.auto_revision {
            return false;
        }
        if self.config.continue_on_failure && self.config.skip_revision_when_continuing {
            return false;
        }

        let snapshot = {
            let plan = handle.read().await;
            if plan.revision_attempts >= self.config.max_revision_attempts {
                tracing::info!(
                    plan_id = %plan.id,
                    revisions = plan.revision_attempts,
                    "Revision budget exhausted"
                );
                return false;
            }
            plan.clone()
        };

        let feedback = format!("Step {} '{}' failed: {}", index + 1, title, error);
        match self.planner.revise_plan(&snapshot, &feedback, token).await {
            Ok(revised) => {
                let mut plan = handle.write().await;
                if plan.status.is_interrupted() {
                    return false;
                }
                plan.apply_revision(revised.steps);
                tracing::info!(
                    plan_id = %plan.id,
                    revision = plan.revision_attempts,
                    steps = plan.steps.len(),
                    "Plan revised"
                );
                self.publish(&plan);
                true
            }
            Err(err) => {
                tracing::warn!(plan_id = %snapshot.id, error = %err, "Plan revision failed");
                false
            }
        }
    }

    async fn finish(&self, handle: &PlanHandle, started_at: DateTime<Utc>) -> PlanExecutionResult {
        let plan = handle.snapshot().await;
        let success = plan.status == PlanStatus::Completed && !plan.has_errors();
        let error = if success {
            None
        } else {
            Some(match plan.last_error() {
                Some(error) => error.to_string(),
                None => format!("Plan ended with status {:?}", plan.status),
            })
        };
        tracing::info!(plan_id = %plan.id, status = ?plan.status, success, "Plan run finished");
        PlanExecutionResult {
            success,
            plan,
            error,
            started_at,
            completed_at: Utc::now(),
        }
    }

    async fn mark_cancelled_by_caller(&self, handle: &PlanHandle, cancel: &CancellationToken) {
        if !cancel.is_cancelled() {
            return;
        }
        let mut plan = handle.write().await;
        if !plan.status.is_interrupted() {
            plan.cancel();
            tracing::info!(plan_id = %plan.id, "Plan cancelled by caller");
            self.publish(&plan);
        }
    }

    fn interrupt(&self, plan_id: &str, sentinel_ids: &[String]) {
        for id in sentinel_ids {
            self.sentinel_executor.stop_sentinel(id);
        }
        if let Some(entry) = self.lock_runs().remove(plan_id) {
            entry.token.cancel();
        }
    }

    fn register_run(&self, plan_id: &str, token: CancellationToken) -> RunGuard<'_> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .lock_runs()
            .insert(plan_id.to_string(), RunEntry { generation, token });
        if let Some(previous) = previous {
            tracing::warn!(plan_id = %plan_id, "Plan already running, interrupting previous run");
            previous.token.cancel();
        }
        RunGuard {
            runs: &self.active_runs,
            plan_id: plan_id.to_string(),
            generation,
        }
    }

    fn lock_runs(&self) -> MutexGuard<'_, RunMap> {
        self.active_runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, plan: &Plan) {
        self.progress_tx.send_replace(PlanProgress::project(plan));
    }
}
