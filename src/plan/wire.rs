//! 计划的 JSON 表示
//!
//! 步骤按 step_type 判别：等于 "SentinelPlanStep" 时解码为 SentinelStep，否则为普通 Step。
//! condition 为整数时解码为迭代次数，其余情况解码为文本表达式。
//! 生成文档只有 title / description / steps；持久化表示额外携带状态、游标、时间戳与元数据。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

use crate::core::PlanError;
use crate::plan::{Plan, PlanStep, SentinelCondition, SentinelStep, Step};

pub const SENTINEL_STEP_TYPE: &str = "SentinelPlanStep";
pub const PLAIN_STEP_TYPE: &str = "PlanStep";

/// 步骤的扁平线上记录，两种步骤共用
#[derive(Debug, Default, Serialize, Deserialize)]
struct StepRecord {
    #[serde(default)]
    title: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sleep_duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<SentinelCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sentinel_id: Option<String>,
    #[serde(default)]
    is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, Value>,
}

impl StepRecord {
    fn from_step(step: &Step, step_type: &str) -> Self {
        Self {
            title: step.title.clone(),
            details: step.details.clone(),
            agent_name: step.agent_name.clone(),
            step_type: Some(step_type.to_string()),
            is_completed: step.is_completed,
            result: step.result.clone(),
            error: step.error.clone(),
            started_at: step.started_at,
            completed_at: step.completed_at,
            metadata: step.metadata.clone(),
            ..Self::default()
        }
    }
}

impl From<&PlanStep> for StepRecord {
    fn from(step: &PlanStep) -> Self {
        match step {
            PlanStep::Plain(step) => StepRecord::from_step(step, PLAIN_STEP_TYPE),
            PlanStep::Sentinel(sentinel) => {
                let mut record = StepRecord::from_step(&sentinel.step, SENTINEL_STEP_TYPE);
                record.sleep_duration = Some(sentinel.sleep_duration);
                record.condition = Some(sentinel.condition.clone());
                record.sentinel_id = Some(sentinel.sentinel_id().to_string());
                record
            }
        }
    }
}

impl From<StepRecord> for PlanStep {
    fn from(record: StepRecord) -> Self {
        let step = Step {
            title: record.title,
            details: record.details,
            agent_name: record.agent_name,
            is_completed: record.is_completed,
            result: record.result,
            error: record.error,
            started_at: record.started_at,
            completed_at: record.completed_at,
            metadata: record.metadata,
        };
        if record.step_type.as_deref() != Some(SENTINEL_STEP_TYPE) {
            return PlanStep::Plain(step);
        }
        let condition = record.condition.unwrap_or_else(|| {
            tracing::warn!(step = %step.title, "Sentinel step without condition, defaulting to 1 iteration");
            SentinelCondition::Iterations(1)
        });
        let sentinel = SentinelStep::new(step, record.sleep_duration.unwrap_or(0), condition)
            .with_sentinel_id(record.sentinel_id.unwrap_or_default());
        PlanStep::Sentinel(sentinel)
    }
}

impl Serialize for PlanStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StepRecord::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PlanStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        StepRecord::deserialize(deserializer).map(PlanStep::from)
    }
}

impl SentinelCondition {
    /// 整数（含 3.0 这类整值浮点）为迭代次数，负数按 0 处理；其余为表达式
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Number(n) => match whole_number(&n) {
                Some(count) => Self::Iterations(count),
                None => Self::Expression(n.to_string()),
            },
            Value::String(s) => Self::Expression(s),
            other => Self::Expression(other.to_string()),
        }
    }
}

fn whole_number(n: &Number) -> Option<u32> {
    if let Some(u) = n.as_u64() {
        return Some(u32::try_from(u).unwrap_or(u32::MAX));
    }
    if n.as_i64().is_some() {
        return Some(0);
    }
    let f = n.as_f64()?;
    if f.fract() != 0.0 {
        return None;
    }
    Some(f.clamp(0.0, f64::from(u32::MAX)) as u32)
}

impl Serialize for SentinelCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Iterations(n) => serializer.serialize_u32(*n),
            Self::Expression(text) => serializer.serialize_str(text),
        }
    }
}

impl<'de> Deserialize<'de> for SentinelCondition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

impl Plan {
    /// 从生成文档或持久化表示解码
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        let mut plan: Plan = serde_json::from_str(json)?;
        plan.clamp_cursor();
        Ok(plan)
    }

    pub fn from_value(value: Value) -> Result<Self, PlanError> {
        let mut plan: Plan = serde_json::from_value(value)?;
        plan.clamp_cursor();
        Ok(plan)
    }

    pub fn to_json(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
