//! 计划数据模型：Plan / Step / SentinelStep 与状态转换
//!
//! Plan 只提供保持不变式的修改方法，执行逻辑全部在 executor 与 core::orchestrator 中。
//! 不变式：
//! - 0 <= current_step_index <= steps.len()
//! - status == Completed 当且仅当所有步骤 is_completed
//! - status == Failed 时至少有一个步骤带有非空 error

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 计划状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlanStatus {
    #[default]
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    /// 是否因暂停 / 取消而中断（主循环据此退出）
    pub fn is_interrupted(self) -> bool {
        matches!(self, Self::Paused | Self::Cancelled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// 普通步骤：交给 agent_name 对应的 Agent 执行 details
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub title: String,
    /// 传给 Agent 的自由文本指令
    pub details: String,
    pub agent_name: String,
    pub is_completed: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 成功时合并 Agent 返回的元数据
    pub metadata: HashMap<String, Value>,
}

impl Step {
    pub fn new(
        title: impl Into<String>,
        details: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            details: details.into(),
            agent_name: agent_name.into(),
            is_completed: false,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// 清除上一次运行留下的结果，用于恢复或重新执行
    pub fn reset(&mut self) {
        self.is_completed = false;
        self.result = None;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
    }
}

/// 哨兵条件：迭代次数（检查 N 次后停止）或由 Oracle 判断的文本表达式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentinelCondition {
    Iterations(u32),
    Expression(String),
}

/// 哨兵步骤：反复检查条件直至满足，而不是只执行一次
#[derive(Debug, Clone, PartialEq)]
pub struct SentinelStep {
    pub step: Step,
    /// 两次检查之间的间隔（秒），可能为 0 或负数，由执行器钳制
    pub sleep_duration: i64,
    pub condition: SentinelCondition,
    pub current_iteration: u32,
    pub error_count: u32,
    pub last_check_time: Option<DateTime<Utc>>,
    sentinel_id: String,
}

impl SentinelStep {
    pub fn new(step: Step, sleep_duration: i64, condition: SentinelCondition) -> Self {
        Self {
            step,
            sleep_duration,
            condition,
            current_iteration: 0,
            error_count: 0,
            last_check_time: None,
            sentinel_id: format!("sentinel_{}", uuid::Uuid::new_v4()),
        }
    }

    /// 取消用的唯一标识（构造时生成）
    pub fn sentinel_id(&self) -> &str {
        &self.sentinel_id
    }

    /// 解码持久化表示时沿用原 id
    pub(crate) fn with_sentinel_id(mut self, id: String) -> Self {
        if !id.is_empty() {
            self.sentinel_id = id;
        }
        self
    }

    pub(crate) fn reset_counters(&mut self) {
        self.current_iteration = 0;
        self.error_count = 0;
    }
}

/// 计划中的一步：普通步骤或哨兵步骤
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    Plain(Step),
    Sentinel(SentinelStep),
}

impl PlanStep {
    pub fn step(&self) -> &Step {
        match self {
            Self::Plain(step) => step,
            Self::Sentinel(sentinel) => &sentinel.step,
        }
    }

    pub fn step_mut(&mut self) -> &mut Step {
        match self {
            Self::Plain(step) => step,
            Self::Sentinel(sentinel) => &mut sentinel.step,
        }
    }

    pub fn as_sentinel(&self) -> Option<&SentinelStep> {
        match self {
            Self::Sentinel(sentinel) => Some(sentinel),
            Self::Plain(_) => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Sentinel(_))
    }

    pub fn title(&self) -> &str {
        &self.step().title
    }
}

impl From<Step> for PlanStep {
    fn from(step: Step) -> Self {
        Self::Plain(step)
    }
}

impl From<SentinelStep> for PlanStep {
    fn from(step: SentinelStep) -> Self {
        Self::Sentinel(step)
    }
}

fn new_plan_id() -> String {
    format!("plan_{}", uuid::Uuid::new_v4())
}

/// 计划：有序步骤 + 状态 + 游标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default = "new_plan_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub(crate) current_step_index: usize,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// 已执行的自动修订次数
    #[serde(default)]
    pub revision_attempts: u32,
}

impl Plan {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_plan_id(),
            title: title.into(),
            description: description.into(),
            steps: Vec::new(),
            status: PlanStatus::NotStarted,
            current_step_index: 0,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
            revision_attempts: 0,
        }
    }

    /// 构建时追加步骤
    pub fn with_step(mut self, step: impl Into<PlanStep>) -> Self {
        self.add_step(step);
        self
    }

    pub fn add_step(&mut self, step: impl Into<PlanStep>) {
        self.steps.push(step.into());
        self.touch();
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step_index)
    }

    /// 所有步骤都已完成（空计划视为完成）
    pub fn is_completed(&self) -> bool {
        self.steps.iter().all(|s| s.step().is_completed)
    }

    pub fn has_errors(&self) -> bool {
        self.steps.iter().any(|s| s.step().has_error())
    }

    /// 最后一个带错误的步骤的错误信息
    pub fn last_error(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find_map(|s| s.step().error.as_deref().filter(|e| !e.is_empty()))
    }

    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.step().is_completed).count()
    }

    pub fn sentinel_ids(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(PlanStep::as_sentinel)
            .map(|s| s.sentinel_id().to_string())
            .collect()
    }

    /// 开始执行：InProgress，游标归零
    pub fn start(&mut self) {
        self.current_step_index = 0;
        self.status = if self.steps.is_empty() {
            PlanStatus::Completed
        } else {
            PlanStatus::InProgress
        };
        self.touch();
    }

    /// 用执行后的副本覆盖当前步骤（执行期间不持锁，结束后写回）
    pub fn replace_current_step(&mut self, step: PlanStep) -> bool {
        match self.steps.get_mut(self.current_step_index) {
            Some(slot) => {
                *slot = step;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// 标记当前步骤成功并前移游标
    ///
    /// 到达末尾时：全部完成且无错误为 Completed，否则 Failed；
    /// 未到末尾但已有步骤带错误时保持 Failed（错误状态是粘滞的）。
    /// Paused / Cancelled 状态不会被覆盖。
    pub fn complete_current_step(
        &mut self,
        result: impl Into<String>,
        metadata: HashMap<String, Value>,
    ) -> bool {
        let Some(current) = self.steps.get_mut(self.current_step_index) else {
            return false;
        };
        let step = current.step_mut();
        step.is_completed = true;
        step.result = Some(result.into());
        step.error = None;
        step.completed_at = Some(Utc::now());
        step.metadata.extend(metadata);

        self.current_step_index += 1;
        if !self.status.is_interrupted() {
            if self.current_step_index >= self.steps.len() {
                self.settle();
            } else if self.has_errors() {
                self.status = PlanStatus::Failed;
            }
        }
        self.touch();
        true
    }

    /// 游标已到末尾（或全部完成）时给出最终状态
    ///
    /// 全部完成且无错误为 Completed，否则 Failed；Paused / Cancelled 与仍有待执行步骤时不变。
    /// 返回状态是否被改写。
    pub fn settle(&mut self) -> bool {
        if self.status.is_interrupted() {
            return false;
        }
        if self.current_step_index < self.steps.len() && !self.is_completed() {
            return false;
        }
        let settled = if self.is_completed() && !self.has_errors() {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        };
        if self.status == settled {
            return false;
        }
        self.status = settled;
        self.touch();
        true
    }

    /// 标记当前步骤失败，计划进入 Failed；游标不前移
    pub fn fail_current_step(&mut self, error: impl Into<String>) -> bool {
        let Some(current) = self.steps.get_mut(self.current_step_index) else {
            return false;
        };
        let step = current.step_mut();
        step.is_completed = false;
        step.result = None;
        step.error = Some(error.into());
        step.completed_at = Some(Utc::now());

        self.status = PlanStatus::Failed;
        self.touch();
        true
    }

    /// 跳过当前步骤
    pub fn advance(&mut self) {
        self.current_step_index = (self.current_step_index + 1).min(self.steps.len());
        self.touch();
    }

    pub fn pause(&mut self) {
        self.status = PlanStatus::Paused;
        self.touch();
    }

    /// 从当前游标继续（不归零）
    pub fn resume(&mut self) {
        self.status = PlanStatus::InProgress;
        self.touch();
    }

    pub fn cancel(&mut self) {
        self.status = PlanStatus::Cancelled;
        self.touch();
    }

    /// 自动修订：整体替换步骤列表，游标归零，修订计数 +1
    pub fn apply_revision(&mut self, steps: Vec<PlanStep>) {
        self.steps = steps;
        self.current_step_index = 0;
        self.status = PlanStatus::InProgress;
        self.revision_attempts += 1;
        self.touch();
    }

    /// 解码后修正游标，保证不越界
    pub(crate) fn clamp_cursor(&mut self) {
        self.current_step_index = self.current_step_index.min(self.steps.len());
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
