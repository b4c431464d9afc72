//! 执行结果：单步输出、单步报告与批量报告

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::ExecutionError;

/// 单步成功输出
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub content: String,
    pub metadata: HashMap<String, Value>,
    /// 第几次尝试成功
    pub attempts: u32,
}

/// 哨兵成功输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelOutput {
    pub message: String,
    pub iterations: u32,
    pub elapsed: Duration,
}

/// 批量执行中单个步骤的报告；index 与输入切片一一对应
#[derive(Debug, Clone)]
pub struct StepReport {
    pub index: usize,
    pub title: String,
    pub outcome: Result<StepOutput, ExecutionError>,
    pub elapsed: Duration,
}

impl StepReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn result(&self) -> Option<&str> {
        self.outcome.as_ref().ok().map(|o| o.content.as_str())
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.outcome.as_ref().err()
    }
}

/// 批量执行报告
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// 全部步骤都执行且成功
    pub success: bool,
    pub steps: Vec<StepReport>,
    pub executed_steps: usize,
    pub total_steps: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub(crate) fn new(
        steps: Vec<StepReport>,
        total_steps: usize,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let executed_steps = steps.len();
        let success = executed_steps == total_steps && steps.iter().all(StepReport::is_success);
        Self {
            success,
            steps,
            executed_steps,
            total_steps,
            started_at,
            completed_at: Utc::now(),
            elapsed,
        }
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|r| !r.is_success())
    }
}
