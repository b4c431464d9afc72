//! 基于 Oracle 的计划生成器
//!
//! 生成与修订共用一套流程：拼 prompt -> complete -> 提取 JSON -> 解码 -> 结构校验。
//! 任一环节失败都会把错误反馈给 Oracle 再试，直到 generation_retries 次用完。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentRegistry;
use crate::core::PlanError;
use crate::llm::{LlmClient, LlmError, Message};
use crate::plan::{Plan, PlanValidator, SENTINEL_STEP_TYPE};
use crate::planner::{extract_json, PlanGenerator};

/// 生成器参数
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// 单次生成/修订的最多尝试次数
    pub generation_retries: u32,
    pub max_steps: usize,
    /// Agent 白名单；为空时使用注册表中的名称
    pub known_agents: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            generation_retries: 3,
            max_steps: crate::plan::validator::DEFAULT_MAX_STEPS,
            known_agents: Vec::new(),
        }
    }
}

#[derive(Clone, Copy)]
enum Purpose {
    Generate,
    Revise,
}

impl Purpose {
    fn failure(self, attempts: u32, reason: String) -> PlanError {
        match self {
            Self::Generate => PlanError::PlanGenerationFailed { attempts, reason },
            Self::Revise => PlanError::PlanRevisionFailed { attempts, reason },
        }
    }
}

pub struct LlmPlanGenerator {
    llm: Arc<dyn LlmClient>,
    registry: Arc<AgentRegistry>,
    config: PlannerConfig,
}

impl LlmPlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<AgentRegistry>, config: PlannerConfig) -> Self {
        Self {
            llm,
            registry,
            config,
        }
    }

    fn validator(&self) -> PlanValidator {
        let validator = PlanValidator::new(self.config.max_steps);
        if self.config.known_agents.is_empty() {
            validator.with_known_agents(self.registry.list())
        } else {
            validator.with_known_agents(self.config.known_agents.iter().cloned())
        }
    }

    fn system_prompt(&self) -> String {
        let agents = self
            .registry
            .descriptions()
            .into_iter()
            .map(|(name, description)| format!("- {name}: {description}"))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are a planning assistant. Break the user's request into ordered steps.\n\n\
             Available agents:\n{agents}\n\n\
             Reply with a single JSON document and nothing else:\n\
             {{\"title\": string, \"description\": string, \"steps\": [\n\
             \x20 {{\"title\": string, \"details\": string, \"agent_name\": string}}\n\
             ]}}\n\n\
             A step that must wait for something to happen is a sentinel step. Add\n\
             \"step_type\": \"{SENTINEL_STEP_TYPE}\", \"sleep_duration\": seconds between checks, and\n\
             \"condition\": either a number of checks or a sentence describing when the wait is over.\n\
             Use at most {} steps and only the agents listed above.",
            self.config.max_steps
        )
    }

    async fn request_plan(
        &self,
        purpose: Purpose,
        mut messages: Vec<Message>,
        cancel: CancellationToken,
    ) -> Result<Plan, PlanError> {
        let attempts = self.config.generation_retries.max(1);
        let validator = self.validator();
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(purpose.failure(attempt - 1, "cancelled".to_string()));
            }

            let completion = match self.llm.complete(&messages, cancel.clone()).await {
                Ok(completion) => completion,
                Err(LlmError::Cancelled) => {
                    return Err(purpose.failure(attempt, "cancelled".to_string()));
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Plan request failed");
                    last_error = err.to_string();
                    continue;
                }
            };

            let Some(reply) = completion.text() else {
                last_error = completion
                    .error
                    .clone()
                    .unwrap_or_else(|| "empty reply".to_string());
                tracing::warn!(attempt, error = %last_error, "Oracle returned no plan");
                continue;
            };

            match decode_plan(reply, &validator) {
                Ok(plan) => {
                    tracing::info!(attempt, steps = plan.steps.len(), title = %plan.title, "Plan decoded");
                    return Ok(plan);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Plan reply rejected");
                    last_error = err.to_string();
                    messages.push(Message::assistant(reply));
                    messages.push(Message::user(format!(
                        "That reply could not be used: {err}. Reply again with the corrected JSON document only."
                    )));
                }
            }
        }

        Err(purpose.failure(attempts, last_error))
    }
}

fn decode_plan(reply: &str, validator: &PlanValidator) -> Result<Plan, PlanError> {
    let json = extract_json(reply)
        .ok_or_else(|| PlanError::PlanValidationFailed("reply contains no JSON object".to_string()))?;
    let plan = Plan::from_json(json)?;
    validator.validate(&plan)?;
    Ok(plan)
}

#[async_trait]
impl PlanGenerator for LlmPlanGenerator {
    async fn generate_plan(&self, user_input: &str, cancel: CancellationToken) -> Result<Plan, PlanError> {
        let messages = vec![Message::system(self.system_prompt()), Message::user(user_input)];
        self.request_plan(Purpose::Generate, messages, cancel).await
    }

    async fn revise_plan(
        &self,
        plan: &Plan,
        feedback: &str,
        cancel: CancellationToken,
    ) -> Result<Plan, PlanError> {
        let current = plan.to_json_pretty()?;
        let messages = vec![
            Message::system(self.system_prompt()),
            Message::user(format!(
                "The following plan ran into a problem.\n\n{current}\n\n\
                 Problem: {feedback}\n\n\
                 Produce a revised plan covering the work that is still needed."
            )),
        ];
        self.request_plan(Purpose::Revise, messages, cancel).await
    }
}
