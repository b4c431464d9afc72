//! 哨兵执行器：轮询外部条件直至满足
//!
//! 每次运行状态机：Running -> ConditionMet | IterationLimitReached | ErrorBudgetExceeded | Cancelled。
//! 运行期间以 sentinel_id 登记在 running 表中，stop_sentinel 可从外部取消；
//! 任何退出路径（成功、失败、取消）都会通过 RunningGuard 注销。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::ExecutionError;
use crate::executor::SentinelOutput;
use crate::llm::{LlmClient, LlmError, Message};
use crate::plan::{SentinelCondition, SentinelStep};

/// 哨兵执行参数
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub min_sleep: Duration,
    pub max_sleep: Duration,
    /// 单次运行的检查次数上限
    pub max_iterations: u32,
    /// 单次运行允许的故障次数
    pub max_errors: u32,
    /// 单次运行的墙钟上限
    pub max_execution_time: Duration,
    /// 出错后按 1 + error_count * 0.5 放大正常间隔
    pub adaptive_sleep: bool,
    /// 故障退避步长：min(error_count * step, max_sleep)
    pub error_backoff_step: Duration,
    /// sleep_duration <= 0 时不套用 min_sleep
    pub allow_zero_sleep: bool,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_secs(1),
            max_sleep: Duration::from_secs(3600),
            max_iterations: 1000,
            max_errors: 5,
            max_execution_time: Duration::from_secs(24 * 3600),
            adaptive_sleep: true,
            error_backoff_step: Duration::from_secs(5),
            allow_zero_sleep: false,
        }
    }
}

struct RunningEntry {
    generation: u64,
    token: CancellationToken,
}

type RunningMap = HashMap<String, RunningEntry>;

/// 运行登记的作用域守卫：Drop 时注销，只移除属于自己这一代的登记
struct RunningGuard<'a> {
    running: &'a Mutex<RunningMap>,
    id: String,
    generation: u64,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running
            .get(&self.id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            running.remove(&self.id);
        }
    }
}

/// 一次检查的结果
enum Check {
    Met,
    NotMet,
    Fault(LlmError),
}

pub struct SentinelExecutor {
    llm: Arc<dyn LlmClient>,
    config: SentinelConfig,
    running: Mutex<RunningMap>,
    generations: AtomicU64,
}

impl SentinelExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, config: SentinelConfig) -> Self {
        Self {
            llm,
            config,
            running: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// 运行哨兵步骤直至条件满足、预算耗尽或被取消
    pub async fn execute_sentinel_step(
        &self,
        sentinel: &mut SentinelStep,
        cancel: CancellationToken,
    ) -> Result<SentinelOutput, ExecutionError> {
        let run_token = cancel.child_token();
        let deadline = deadline_after(self.config.max_execution_time);
        let _guard = self.register(sentinel.sentinel_id(), run_token.clone());
        let id = sentinel.sentinel_id().to_string();

        sentinel.reset_counters();
        sentinel.step.started_at = Some(Utc::now());
        let started = Instant::now();
        tracing::info!(sentinel_id = %id, step = %sentinel.step.title, "Sentinel started");

        while !run_token.is_cancelled() {
            if Instant::now() >= deadline {
                tracing::warn!(sentinel_id = %id, "Sentinel reached maximum execution time");
                run_token.cancel();
                break;
            }

            sentinel.current_iteration += 1;
            sentinel.last_check_time = Some(Utc::now());

            let check = tokio::select! {
                biased;
                _ = run_token.cancelled() => break,
                _ = sleep_until(deadline) => {
                    tracing::warn!(sentinel_id = %id, "Sentinel reached maximum execution time");
                    run_token.cancel();
                    break;
                }
                check = self.check_condition(sentinel, run_token.clone()) => check,
            };

            match check {
                Check::Met => {
                    let elapsed = started.elapsed();
                    sentinel.step.completed_at = Some(Utc::now());
                    let iterations = sentinel.current_iteration;
                    let message = match sentinel.condition {
                        SentinelCondition::Iterations(_) => format!(
                            "Completed {iterations} iterations in {:.1}s",
                            elapsed.as_secs_f64()
                        ),
                        SentinelCondition::Expression(_) => format!(
                            "Condition met after {iterations} iteration(s) in {:.1}s",
                            elapsed.as_secs_f64()
                        ),
                    };
                    tracing::info!(sentinel_id = %id, iterations, "Sentinel condition met");
                    return Ok(SentinelOutput {
                        message,
                        iterations,
                        elapsed,
                    });
                }
                Check::NotMet => {
                    if sentinel.current_iteration >= self.config.max_iterations {
                        tracing::warn!(
                            sentinel_id = %id,
                            max_iterations = self.config.max_iterations,
                            "Sentinel exceeded maximum iterations"
                        );
                        return Err(ExecutionError::SentinelIterationLimitExceeded(
                            self.config.max_iterations,
                        ));
                    }
                    let pause = self.compute_sleep(sentinel);
                    tracing::debug!(
                        sentinel_id = %id,
                        iteration = sentinel.current_iteration,
                        sleep_ms = pause.as_millis() as u64,
                        "Condition not met, sleeping"
                    );
                    if !self.pause(pause, &run_token, deadline).await {
                        break;
                    }
                }
                Check::Fault(err) => {
                    if run_token.is_cancelled() {
                        break;
                    }
                    sentinel.error_count += 1;
                    tracing::warn!(
                        sentinel_id = %id,
                        errors = sentinel.error_count,
                        error = %err,
                        "Sentinel check failed"
                    );
                    if sentinel.error_count >= self.config.max_errors {
                        return Err(ExecutionError::SentinelErrorBudgetExceeded {
                            errors: sentinel.error_count,
                            last_error: err.to_string(),
                        });
                    }
                    let backoff = self.error_backoff(sentinel.error_count);
                    if !self.pause(backoff, &run_token, deadline).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(sentinel_id = %id, iterations = sentinel.current_iteration, "Sentinel cancelled or stopped");
        Err(ExecutionError::SentinelCancelled)
    }

    /// 正常轮询间隔：钳制到 [min_sleep, max_sleep]，出错时按自适应系数放大
    pub fn compute_sleep(&self, sentinel: &SentinelStep) -> Duration {
        let max = self.config.max_sleep.max(self.config.min_sleep);
        let base = if sentinel.sleep_duration <= 0 && self.config.allow_zero_sleep {
            Duration::ZERO
        } else {
            let requested = Duration::from_secs(sentinel.sleep_duration.max(0) as u64);
            requested.max(self.config.min_sleep).min(max)
        };

        if self.config.adaptive_sleep && sentinel.error_count > 0 {
            let factor = 1.0 + f64::from(sentinel.error_count) * 0.5;
            Duration::try_from_secs_f64(base.as_secs_f64() * factor)
                .unwrap_or(max)
                .min(max)
        } else {
            base
        }
    }

    /// 故障退避：min(error_count * error_backoff_step, max_sleep)
    pub fn error_backoff(&self, error_count: u32) -> Duration {
        self.config
            .error_backoff_step
            .saturating_mul(error_count)
            .min(self.config.max_sleep.max(self.config.min_sleep))
    }

    /// 停止指定哨兵；未知 id 为空操作
    pub fn stop_sentinel(&self, id: &str) -> bool {
        match self.lock_running().remove(id) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!(sentinel_id = %id, "Sentinel stop requested");
                true
            }
            None => {
                tracing::debug!(sentinel_id = %id, "No running sentinel to stop");
                false
            }
        }
    }

    /// 停止全部正在运行的哨兵，返回停止的数量
    pub fn stop_all_sentinels(&self) -> usize {
        let entries: Vec<(String, RunningEntry)> = self.lock_running().drain().collect();
        for (id, entry) in &entries {
            entry.token.cancel();
            tracing::info!(sentinel_id = %id, "Sentinel stop requested");
        }
        entries.len()
    }

    pub fn list_running_sentinels(&self) -> Vec<String> {
        self.lock_running().keys().cloned().collect()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.lock_running().contains_key(id)
    }

    fn register(&self, id: &str, token: CancellationToken) -> RunningGuard<'_> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .lock_running()
            .insert(id.to_string(), RunningEntry { generation, token });
        if previous.is_some() {
            tracing::warn!(sentinel_id = %id, "Sentinel id already registered, replacing");
        }
        RunningGuard {
            running: &self.running,
            id: id.to_string(),
            generation,
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, RunningMap> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn check_condition(&self, sentinel: &SentinelStep, token: CancellationToken) -> Check {
        match &sentinel.condition {
            SentinelCondition::Iterations(target) => {
                if sentinel.current_iteration >= *target {
                    Check::Met
                } else {
                    Check::NotMet
                }
            }
            SentinelCondition::Expression(expression) => {
                let prompt = condition_prompt(&sentinel.step.title, sentinel.current_iteration, expression);
                match self.llm.complete(&[Message::system(prompt)], token).await {
                    Err(err) => Check::Fault(err),
                    Ok(completion) => match completion.text().and_then(parse_condition_reply) {
                        Some(true) => Check::Met,
                        Some(false) => Check::NotMet,
                        None => {
                            tracing::debug!(
                                sentinel_id = %sentinel.sentinel_id(),
                                reply = ?completion.content,
                                error = ?completion.error,
                                "Unusable condition reply, treating as not met"
                            );
                            Check::NotMet
                        }
                    },
                }
            }
        }
    }

    /// 可被取消打断的等待；返回 false 表示运行应结束
    async fn pause(&self, duration: Duration, token: &CancellationToken, deadline: Instant) -> bool {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return !token.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = sleep_until(deadline) => {
                token.cancel();
                false
            }
            _ = sleep(duration) => true,
        }
    }
}

/// 约 30 年；Instant 无法表示的时长上限按它处理
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

fn deadline_after(limit: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(limit).unwrap_or_else(|| now + FAR_FUTURE)
}

fn condition_prompt(title: &str, iteration: u32, expression: &str) -> String {
    format!(
        "You are evaluating whether a monitoring condition is satisfied.\n\
         Step: {title}\n\
         Check number: {iteration}\n\
         Condition: {expression}\n\n\
         Reply with exactly one word: true if the condition is satisfied, false otherwise."
    )
}

/// 只接受 true / false（去空白、忽略大小写）
pub fn parse_condition_reply(reply: &str) -> Option<bool> {
    let reply = reply.trim();
    if reply.eq_ignore_ascii_case("true") {
        Some(true)
    } else if reply.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
