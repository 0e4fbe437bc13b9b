//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：识别规划 prompt 时返回空计划，否则返回一个合法的答案信封
//! - ScriptedLlmClient：按顺序返回预置回复，并记录收到的 prompt

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};
use crate::planning::planner::PLANNER_PREAMBLE;

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User))
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Mock 客户端：不调用任何能力，直接给出低置信度答案
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let prompt = last_user(messages);
        if prompt.contains(PLANNER_PREAMBLE) {
            return Ok(r#"{"action": "use_tool", "invocations": []}"#.to_string());
        }
        let question = prompt
            .lines()
            .find_map(|l| l.strip_prefix("Question: "))
            .unwrap_or("(no question)");
        let answer = serde_json::json!({
            "answer": format!("Mock answer for: {}", question),
            "reasoning": "Generated by the mock language model; no capability output was interpreted.",
            "confidence": 0.1,
        });
        Ok(answer.to_string())
    }
}

/// 脚本化客户端：依次弹出预置回复；用尽后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 全部成功回复的便捷构造
    pub fn replies<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// 每次回复前等待（用于超时测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已收到的 prompt（每次调用取最后一条 user 消息）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(last_user(messages).to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .unwrap_or_else(|| Err("scripted responses exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_returns_empty_plan_for_planner_prompt() {
        let prompt = format!("{}\nQuestion: hi", PLANNER_PREAMBLE);
        let out = MockLlmClient.complete(&[Message::user(prompt)]).await.unwrap();
        assert!(out.contains("\"invocations\": []"));
    }

    #[tokio::test]
    async fn test_mock_answers_other_prompts() {
        let out = MockLlmClient
            .complete(&[Message::user("Question: what?\n")])
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["answer"], "Mock answer for: what?");
    }

    #[tokio::test]
    async fn test_scripted_in_order_then_exhausted() {
        let llm = ScriptedLlmClient::replies(["a", "b"]);
        assert_eq!(llm.complete(&[Message::user("1")]).await.unwrap(), "a");
        assert_eq!(llm.complete(&[Message::user("2")]).await.unwrap(), "b");
        assert!(llm.complete(&[Message::user("3")]).await.is_err());
        assert_eq!(llm.prompts(), vec!["1", "2", "3"]);
    }
}
