//! 语言模型服务边界
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：输入消息，返回原始文本，不保证任何结构。
//! 规划与合成都经 complete_prompt 调用，统一施加超时并把传输失败映射为 PipelineError。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::PipelineError;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 返回模型原始输出；Err 表示传输/服务失败
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 以单条 user 消息发送 prompt；超时与传输失败都是请求级致命错误
pub async fn complete_prompt(
    llm: &dyn LlmClient,
    prompt: &str,
    timeout: Duration,
) -> Result<String, PipelineError> {
    let messages = [Message::user(prompt)];
    match tokio::time::timeout(timeout, llm.complete(&messages)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(PipelineError::ServiceUnavailable(e)),
        Err(_) => Err(PipelineError::ServiceTimeout(whole_secs_rounded_up(timeout))),
    }
}

/// 不足一秒的部分向上取整，亚秒级超时不会报成 0s
fn whole_secs_rounded_up(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
