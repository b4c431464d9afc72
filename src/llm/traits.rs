//! Oracle 客户端抽象
//!
//! 计划生成、计划修订与哨兵条件判断共用同一个 complete 接口。
//! Err 表示调用本身出错（网络、传输等）；Ok 但 success = false 表示后端明确拒绝或失败。

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::llm::Message;

/// 单次调用的 token 使用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// complete 的返回值
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub success: bool,
    pub content: Option<String>,
    pub error: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
            usage: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
            usage: None,
        }
    }

    /// 成功时的文本内容；失败或无内容返回 None
    pub fn text(&self) -> Option<&str> {
        if self.success {
            self.content.as_deref()
        } else {
            None
        }
    }
}

/// 调用层面的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM request cancelled")]
    Cancelled,

    #[error("LLM backend unavailable: {0}")]
    Unavailable(String),
}

/// Oracle 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；实现方应在 cancel 触发时尽快返回
    async fn complete(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<Completion, LlmError>;
}
