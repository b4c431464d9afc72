//! 执行层：普通步骤（重试 + 超时）与哨兵步骤（条件轮询）

pub mod report;
pub mod sentinel;
pub mod step;

pub use report::{BatchReport, SentinelOutput, StepOutput, StepReport};
pub use sentinel::{parse_condition_reply, SentinelConfig, SentinelExecutor};
pub use step::{StepExecutor, StepExecutorConfig};
