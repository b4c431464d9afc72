//! Mock Oracle 客户端（用于测试与无后端时的本地运行）
//!
//! 按顺序弹出预置回复，队列为空后返回默认回复；记录每次调用收到的消息。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::llm::{Completion, LlmClient, LlmError, Message};

/// Mock 客户端：脚本化回复
#[derive(Debug)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    fallback: Result<Completion, LlmError>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::with_fallback(Ok(Completion::ok("true")))
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 队列耗尽后的固定回复
    pub fn with_fallback(fallback: Result<Completion, LlmError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 总是以 Err 返回（模拟传输故障）
    pub fn failing(error: LlmError) -> Self {
        Self::with_fallback(Err(error))
    }

    /// 追加一条成功回复
    pub fn push_reply(&self, content: impl Into<String>) -> &Self {
        self.push(Ok(Completion::ok(content)))
    }

    pub fn push(&self, reply: Result<Completion, LlmError>) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 最近一次调用的消息
    pub fn last_call(&self) -> Option<Vec<Message>> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<Completion, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_pops_script_then_fallback() {
        let mock = MockLlmClient::with_fallback(Ok(Completion::ok("false")));
        mock.push_reply("first");

        let token = CancellationToken::new();
        let msgs = [Message::user("hi")];
        let a = mock.complete(&msgs, token.clone()).await.unwrap();
        let b = mock.complete(&msgs, token).await.unwrap();

        assert_eq!(a.text(), Some("first"));
        assert_eq!(b.text(), Some("false"));
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.last_call().unwrap()[0].content, "hi");
    }

    #[tokio::test]
    async fn test_mock_respects_cancel() {
        let mock = MockLlmClient::default();
        let token = CancellationToken::new();
        token.cancel();
        let err = mock.complete(&[], token).await.unwrap_err();
        assert_eq!(err, LlmError::Cancelled);
        assert_eq!(mock.call_count(), 0);
    }
}
