//! 计划结构校验
//!
//! 只做结构检查（标题、步骤数、字段非空、Agent 白名单），不判断步骤语义是否合理。

use std::collections::HashSet;

use crate::core::PlanError;
use crate::plan::Plan;

/// 默认最大步骤数
pub const DEFAULT_MAX_STEPS: usize = 50;

/// 结构校验器
#[derive(Debug, Clone)]
pub struct PlanValidator {
    max_steps: usize,
    /// 已知 Agent 名单；为空时不检查 agent_name 是否存在
    known_agents: HashSet<String>,
}

impl Default for PlanValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

impl PlanValidator {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
            known_agents: HashSet::new(),
        }
    }

    pub fn with_known_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self, plan: &Plan) -> Result<(), PlanError> {
        if plan.title.trim().is_empty() {
            return Err(invalid("plan title is missing"));
        }
        if plan.steps.is_empty() {
            return Err(invalid("plan has no steps"));
        }
        if plan.steps.len() > self.max_steps {
            return Err(invalid(format!(
                "plan has {} steps, maximum is {}",
                plan.steps.len(),
                self.max_steps
            )));
        }

        for (index, plan_step) in plan.steps.iter().enumerate() {
            let step = plan_step.step();
            let position = index + 1;
            if step.title.trim().is_empty() {
                return Err(invalid(format!("step {position} has an empty title")));
            }
            if step.details.trim().is_empty() {
                return Err(invalid(format!("step {position} has empty details")));
            }
            if step.agent_name.trim().is_empty() {
                return Err(invalid(format!("step {position} has no agent_name")));
            }
            if !self.known_agents.is_empty() && !self.known_agents.contains(&step.agent_name) {
                return Err(invalid(format!(
                    "step {position} references unknown agent '{}'",
                    step.agent_name
                )));
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> PlanError {
    PlanError::PlanValidationFailed(reason.into())
}
