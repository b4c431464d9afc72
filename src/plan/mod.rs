//! 计划数据模型：类型、JSON 表示、结构校验与共享句柄

pub mod handle;
pub mod types;
pub mod validator;
pub mod wire;

pub use handle::PlanHandle;
pub use types::{Plan, PlanStatus, PlanStep, SentinelCondition, SentinelStep, Step};
pub use validator::PlanValidator;
pub use wire::{PLAIN_STEP_TYPE, SENTINEL_STEP_TYPE};
