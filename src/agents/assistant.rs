//! Assistant Agent：把步骤指令直接交给 Oracle 完成

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::{Agent, AgentResponse};
use crate::llm::{LlmClient, Message};

const ASSISTANT_SYSTEM_PROMPT: &str =
    "You are a task execution assistant. Carry out the instruction and reply with the result only.";

pub struct AssistantAgent {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl AssistantAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: ASSISTANT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[async_trait]
impl Agent for AssistantAgent {
    fn name(&self) -> &str {
        "assistant"
    }

    fn description(&self) -> &str {
        "General-purpose assistant that answers or performs a free-text instruction."
    }

    async fn execute(&self, input: &str, cancel: CancellationToken) -> anyhow::Result<AgentResponse> {
        let messages = [
            Message::system(self.system_prompt.clone()),
            Message::user(input),
        ];
        let completion = self.llm.complete(&messages, cancel).await?;

        let mut response = match completion.text() {
            Some(content) => AgentResponse::ok(content),
            None => AgentResponse::failed(
                completion
                    .error
                    .unwrap_or_else(|| "assistant returned no content".to_string()),
            ),
        };
        if let Some(usage) = completion.usage {
            response = response
                .with_metadata("prompt_tokens", usage.prompt_tokens)
                .with_metadata("completion_tokens", usage.completion_tokens);
        }
        Ok(response)
    }
}
