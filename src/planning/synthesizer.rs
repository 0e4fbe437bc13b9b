//! Answer Synthesizer：问题 + 能力输出 + 上下文 -> 最终答案
//!
//! 第二次调用 LLM，要求返回 answer / reasoning / confidence 三字段信封；
//! 解析失败时返回固定的兜底答案，LLM 调用失败才是错误。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::core::PipelineError;
use crate::llm::{complete_prompt, LlmClient};
use crate::planning::{parse_json_payload, AggregatedOutputs, FinalAnswer};

/// 兜底答案
pub fn fallback_answer() -> FinalAnswer {
    FinalAnswer::failed(
        Value::String("unable to generate final answer".to_string()),
        "parsing error",
    )
}

/// 解析模型输出为 FinalAnswer；永不失败
pub fn parse_final_answer(raw: &str) -> FinalAnswer {
    let Some(value) = parse_json_payload(raw) else {
        tracing::warn!("final answer is not valid JSON, using fallback answer");
        return fallback_answer();
    };
    match serde_json::from_value::<FinalAnswer>(value) {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!("final answer has the wrong shape ({}), using fallback answer", e);
            fallback_answer()
        }
    }
}

/// Answer Synthesizer：持有 LLM 与调用超时
pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub fn build_prompt(&self, question: &str, outputs: &AggregatedOutputs, context: &str) -> String {
        let outputs_json =
            serde_json::to_string_pretty(outputs).unwrap_or_else(|_| "{}".to_string());
        format!(
            r#"You are a reasoning agent.

Context:
{context}

Question: {question}

Capability outputs:
{outputs_json}

Instructions:
- Combine all capability outputs above into one answer to the question.
- Include all stock metrics (symbol, lastPrice, yearHigh, yearLow) from market data if available.
- Include totals and the best-performing row from tabular data if available.
- Include insights from web research and sentiment scores if available.
- If a capability failed or is not implemented (confidence 0.0), say so and do not invent its data.
- Return JSON with keys: answer, reasoning, confidence (a number between 0.0 and 1.0).
"#
        )
    }

    pub async fn synthesize(
        &self,
        question: &str,
        outputs: &AggregatedOutputs,
        context: &str,
    ) -> Result<FinalAnswer, PipelineError> {
        let prompt = self.build_prompt(question, outputs, context);
        let raw = complete_prompt(self.llm.as_ref(), &prompt, self.timeout).await?;
        tracing::debug!(raw = %raw, "synthesizer raw output");
        Ok(parse_final_answer(&raw))
    }
}
