//! Echo Agent（测试与演示用）

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::{Agent, AgentResponse};

/// Echo Agent：原样返回指令文本
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the step details back as the result (for testing)."
    }

    async fn execute(&self, input: &str, _cancel: CancellationToken) -> anyhow::Result<AgentResponse> {
        let text = if input.is_empty() { "(empty)" } else { input };
        Ok(AgentResponse::ok(text).with_metadata("chars", text.chars().count()))
    }
}
