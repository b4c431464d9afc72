//! 进度投影：PlanProgress
//!
//! 观察者（CLI、上层服务）只持有轻量的 PlanProgress；完整计划由 PlanHandle 维护并投影到这里。

use serde::Serialize;

use crate::plan::{Plan, PlanStatus};

/// 计划执行进度，经 watch 通道发布
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlanProgress {
    pub plan_id: String,
    pub status: PlanStatus,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub current_step_index: usize,
    /// 正在执行的步骤标题
    pub active_step: Option<String>,
    pub revision_attempts: u32,
}

impl PlanProgress {
    /// 从计划快照投影；active_step 仅在计划执行中时给出
    pub fn project(plan: &Plan) -> Self {
        let active_step = if plan.status == PlanStatus::InProgress {
            plan.current_step().map(|step| step.title().to_string())
        } else {
            None
        };
        Self {
            plan_id: plan.id.clone(),
            status: plan.status,
            completed_steps: plan.completed_count(),
            total_steps: plan.steps.len(),
            current_step_index: plan.current_step_index(),
            active_step,
            revision_attempts: plan.revision_attempts,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
