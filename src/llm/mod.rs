//! Oracle 层：客户端抽象、消息类型与 Mock 实现
//!
//! 具体的 HTTP 后端不在本 crate 内，由调用方实现 LlmClient 注入。

pub mod message;
pub mod mock;
pub mod traits;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use traits::{Completion, LlmClient, LlmError, TokenUsage};
