//! 步骤执行器
//!
//! 按 step.agent_name 从注册表取 Agent，每次尝试施加超时，失败按固定间隔重试；
//! 调用方取消与超时都不重试。另提供顺序批量与有界并发批量执行。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentRegistry, AgentResponse};
use crate::core::ExecutionError;
use crate::executor::{BatchReport, StepOutput, StepReport};
use crate::plan::Step;

/// 步骤执行参数
#[derive(Debug, Clone)]
pub struct StepExecutorConfig {
    /// 最多尝试次数（含第一次），至少为 1
    pub max_retries: u32,
    /// 单次尝试超时
    pub step_timeout: Duration,
    /// 两次尝试之间的等待
    pub retry_delay: Duration,
    /// 并发批量执行的默认上限
    pub max_concurrency: usize,
}

impl Default for StepExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(1),
            max_concurrency: 4,
        }
    }
}

enum AttemptOutcome {
    Finished(anyhow::Result<AgentResponse>),
    Cancelled,
    TimedOut,
}

pub struct StepExecutor {
    registry: Arc<AgentRegistry>,
    config: StepExecutorConfig,
}

impl StepExecutor {
    pub fn new(registry: Arc<AgentRegistry>, config: StepExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &StepExecutorConfig {
        &self.config
    }

    /// 执行单个步骤
    pub async fn execute_step(
        &self,
        step: &mut Step,
        cancel: CancellationToken,
    ) -> Result<StepOutput, ExecutionError> {
        let Some(agent) = self.registry.get(&step.agent_name) else {
            tracing::error!(step = %step.title, agent = %step.agent_name, "Agent not found");
            return Err(ExecutionError::AgentNotFound(step.agent_name.clone()));
        };

        step.started_at = Some(Utc::now());
        let max_attempts = self.config.max_retries.max(1);
        let mut last_error = String::from("no attempt was made");

        for attempt in 1..=max_attempts {
            tracing::debug!(step = %step.title, agent = %step.agent_name, attempt, "Executing step");

            // 超时或调用方取消都会触发 attempt_token，Agent 据此中止手头工作
            let attempt_token = cancel.child_token();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => AttemptOutcome::Cancelled,
                _ = tokio::time::sleep(self.config.step_timeout) => AttemptOutcome::TimedOut,
                result = agent.execute(&step.details, attempt_token.clone()) => AttemptOutcome::Finished(result),
            };

            match outcome {
                AttemptOutcome::Cancelled => {
                    attempt_token.cancel();
                    tracing::info!(step = %step.title, attempt, "Step cancelled");
                    return Err(ExecutionError::StepCancelled);
                }
                AttemptOutcome::TimedOut => {
                    attempt_token.cancel();
                    tracing::warn!(
                        step = %step.title,
                        attempt,
                        timeout_ms = self.config.step_timeout.as_millis() as u64,
                        "Step timed out"
                    );
                    return Err(ExecutionError::StepTimedOut(self.config.step_timeout));
                }
                AttemptOutcome::Finished(Ok(response)) if response.success => {
                    step.completed_at = Some(Utc::now());
                    tracing::info!(step = %step.title, agent = %step.agent_name, attempt, "Step succeeded");
                    return Ok(StepOutput {
                        content: response.content.unwrap_or_default(),
                        metadata: response.metadata,
                        attempts: attempt,
                    });
                }
                AttemptOutcome::Finished(Ok(response)) => {
                    last_error = response
                        .error
                        .unwrap_or_else(|| "agent reported failure without message".to_string());
                    tracing::warn!(step = %step.title, attempt, error = %last_error, "Step attempt failed");
                }
                AttemptOutcome::Finished(Err(fault)) => {
                    last_error = format!("{fault:#}");
                    tracing::warn!(step = %step.title, attempt, error = %last_error, "Step attempt faulted");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!(step = %step.title, "Step cancelled during retry delay");
                        return Err(ExecutionError::StepCancelled);
                    }
                    _ = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }
        }

        tracing::error!(step = %step.title, attempts = max_attempts, error = %last_error, "Step failed");
        Err(ExecutionError::StepExecutionFailed {
            attempts: max_attempts,
            message: last_error,
        })
    }

    /// 严格按顺序执行，遇到第一个失败即停止
    pub async fn execute_steps(&self, steps: &mut [Step], cancel: CancellationToken) -> BatchReport {
        let started_at = Utc::now();
        let timer = Instant::now();
        let total = steps.len();
        let mut reports = Vec::with_capacity(total);

        for (index, step) in steps.iter_mut().enumerate() {
            let report = self.execute_reported(index, step, cancel.clone()).await;
            let failed = !report.is_success();
            reports.push(report);
            if failed {
                tracing::warn!(
                    failed_step = index + 1,
                    total,
                    "Stopping sequential batch at first failure"
                );
                break;
            }
        }

        BatchReport::new(reports, total, started_at, timer.elapsed())
    }

    /// 按配置的 max_concurrency 并发执行
    pub async fn execute_steps_concurrent(&self, steps: &mut [Step], cancel: CancellationToken) -> BatchReport {
        self.execute_steps_parallel(steps, self.config.max_concurrency, cancel)
            .await
    }

    /// 并发执行全部步骤，同时进行中的步骤不超过 max_concurrency；报告顺序与输入一致
    pub async fn execute_steps_parallel(
        &self,
        steps: &mut [Step],
        max_concurrency: usize,
        cancel: CancellationToken,
    ) -> BatchReport {
        let started_at = Utc::now();
        let timer = Instant::now();
        let total = steps.len();
        let semaphore = Semaphore::new(max_concurrency.max(1));
        let semaphore = &semaphore;

        let runs = steps.iter_mut().enumerate().map(move |(index, step)| {
            let cancel = cancel.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return StepReport {
                            index,
                            title: step.title.clone(),
                            outcome: Err(ExecutionError::StepCancelled),
                            elapsed: Duration::ZERO,
                        }
                    }
                };
                self.execute_reported(index, step, cancel).await
            }
        });
        let reports = join_all(runs).await;

        BatchReport::new(reports, total, started_at, timer.elapsed())
    }

    async fn execute_reported(
        &self,
        index: usize,
        step: &mut Step,
        cancel: CancellationToken,
    ) -> StepReport {
        let timer = Instant::now();
        let outcome = self.execute_step(step, cancel).await;
        StepReport {
            index,
            title: step.title.clone(),
            outcome,
            elapsed: timer.elapsed(),
        }
    }
}
