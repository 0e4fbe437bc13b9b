//! Plan Generator：问题 -> 能力调用计划
//!
//! 拼接规划 prompt（表格预览、问题、能力清单、Plan Schema），调用 LLM，
//! 再用 extract 模块修复输出并解析为 Plan。解析失败一律退化为空计划，只有 LLM 调用本身失败才返回错误。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::capabilities::{plan_schema_json, CapabilityRegistry};
use crate::core::PipelineError;
use crate::data::Table;
use crate::llm::{complete_prompt, LlmClient};
use crate::planning::{parse_json_payload, Invocation, Plan, USE_TOOL_ACTION};

/// 规划 prompt 的开头（Mock 客户端据此识别规划请求）
pub const PLANNER_PREAMBLE: &str = "You are an AI planner.";

/// 表格预览默认最多行数
pub const DEFAULT_MAX_PREVIEW_ROWS: usize = 50;

const NO_DATA_MARKER: &str = "No structured data provided.";

/// 将模型输出解析为 Plan；永不失败
pub fn parse_plan(raw: &str) -> Plan {
    match parse_json_payload(raw) {
        Some(value) => plan_from_value(value),
        None => {
            tracing::warn!("plan output is not valid JSON, falling back to empty plan");
            Plan::empty()
        }
    }
}

fn plan_from_value(value: Value) -> Plan {
    let (action, items) = match value {
        Value::Array(items) => (USE_TOOL_ACTION.to_string(), items),
        Value::Object(mut map) => {
            let action = map
                .get("action")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| USE_TOOL_ACTION.to_string());
            let items = match map.remove("invocations").or_else(|| map.remove("tools")) {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    tracing::warn!(found = %other, "plan invocations is not a list, ignoring");
                    Vec::new()
                }
                // 模型只给了一个调用对象
                None if map.contains_key("capability") || map.contains_key("tool") => {
                    vec![Value::Object(map)]
                }
                None => Vec::new(),
            };
            (action, items)
        }
        other => {
            tracing::warn!(found = %other, "plan output is neither object nor list, falling back to empty plan");
            return Plan::empty();
        }
    };

    let invocations = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Invocation>(item) {
            Ok(invocation) => Some(invocation),
            Err(e) => {
                tracing::warn!("dropping malformed invocation: {}", e);
                None
            }
        })
        .collect();

    Plan {
        action,
        invocations,
    }
}

/// Plan Generator：持有 LLM 与调用超时
pub struct PlanGenerator {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    max_preview_rows: usize,
}

impl PlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self {
            llm,
            timeout,
            max_preview_rows: DEFAULT_MAX_PREVIEW_ROWS,
        }
    }

    pub fn with_max_preview_rows(mut self, rows: usize) -> Self {
        self.max_preview_rows = rows;
        self
    }

    pub fn build_prompt(
        &self,
        question: &str,
        table: Option<&Table>,
        registry: &CapabilityRegistry,
    ) -> String {
        let data_text = match table {
            Some(t) => t.to_csv_preview(self.max_preview_rows),
            None => NO_DATA_MARKER.to_string(),
        };
        format!(
            r#"{preamble} Based on the structured data and the question below, decide which capabilities to use.
Do NOT answer the question, only return JSON with the format:

{{
  "action": "use_tool",
  "invocations": [
    {{"capability": "<capability_name>", "details": "Explain what the capability should do", "requires_structured_input": true|false}}
  ]
}}

Structured data:
{data_text}

Question: {question}

Available capabilities:
{capabilities}

Plan JSON Schema:
{schema}

Rules:
- Include "tabular-totals" if structured data is provided.
- Include "market-data" if the question asks about companies, tickers, or stock/market data; put the ticker symbols in details.
- Include "web-research" if the question asks about news or trends.
- Include "sentiment" to score news headlines; list one headline per line in details.
- Use an empty "invocations" list if no capability is needed.
- Return valid JSON only.
"#,
            preamble = PLANNER_PREAMBLE,
            data_text = data_text.trim_end(),
            question = question,
            capabilities = registry.to_listing_json(),
            schema = plan_schema_json(),
        )
    }

    /// 生成计划：LLM 传输失败/超时为致命错误，其余情况总能得到结构合法的 Plan
    pub async fn generate(
        &self,
        question: &str,
        table: Option<&Table>,
        registry: &CapabilityRegistry,
    ) -> Result<Plan, PipelineError> {
        let prompt = self.build_prompt(question, table, registry);
        let raw = complete_prompt(self.llm.as_ref(), &prompt, self.timeout).await?;
        tracing::debug!(raw = %raw, "planner raw output");
        Ok(parse_plan(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Sentiment, TabularTotals};
    use crate::llm::ScriptedLlmClient;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new().with(TabularTotals).with(Sentiment)
    }

    #[test]
    fn test_parse_plan_object() {
        let plan = parse_plan(
            r#"```json
{"action": "use_tool", "invocations": [{"capability": "tabular-totals", "details": "sum", "requires_structured_input": true}]}
```"#,
        );
        assert_eq!(plan.action, "use_tool");
        assert_eq!(plan.invocations.len(), 1);
        assert!(plan.invocations[0].requires_structured_input);
    }

    #[test]
    fn test_parse_plan_bare_list_is_wrapped() {
        let plan = parse_plan(r#"[{"capability": "sentiment", "details": "a"}, {"capability": "market-data", "details": "HSBC"}]"#);
        assert_eq!(plan.action, USE_TOOL_ACTION);
        assert_eq!(plan.capability_names(), vec!["sentiment", "market-data"]);
    }

    #[test]
    fn test_parse_plan_garbage_is_empty() {
        for raw in ["", "I think you should search the web.", "{broken", "42", "\"text\"", "null"] {
            let plan = parse_plan(raw);
            assert_eq!(plan, Plan::empty(), "input: {raw}");
        }
    }

    #[test]
    fn test_parse_plan_defaults_missing_keys() {
        assert_eq!(parse_plan(r#"{"action": "use_tool"}"#), Plan::empty());
        let plan = parse_plan(r#"{"invocations": [{"capability": "sentiment"}]}"#);
        assert_eq!(plan.action, USE_TOOL_ACTION);
        assert_eq!(plan.invocations[0].details, "");
        let plan = parse_plan(r#"{"action": "use_tool", "invocations": "sentiment"}"#);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_parse_plan_legacy_keys() {
        let plan = parse_plan(r#"{"action": "use_tool", "tools": [{"tool": "sentiment", "details": "x", "require_csv": false}]}"#);
        assert_eq!(plan.capability_names(), vec!["sentiment"]);
    }

    #[test]
    fn test_parse_plan_single_invocation_object() {
        let plan = parse_plan(r#"{"capability": "market-data", "details": "UBS"}"#);
        assert_eq!(plan.capability_names(), vec!["market-data"]);
    }

    #[test]
    fn test_parse_plan_drops_malformed_entries() {
        let plan = parse_plan(
            r#"{"action": "use_tool", "invocations": ["sentiment", {"details": "no name"}, {"capability": "unknown-x", "details": "n/a"}]}"#,
        );
        assert_eq!(plan.capability_names(), vec!["unknown-x"]);
    }

    #[test]
    fn test_prompt_contents() {
        let generator = PlanGenerator::new(Arc::new(ScriptedLlmClient::default()), Duration::from_secs(1))
            .with_max_preview_rows(1);
        let table = Table::from_columns(vec![("q", vec!["Q1", "Q2"]), ("v", vec!["1", "2"])]).unwrap();

        let prompt = generator.build_prompt("How did we do?", Some(&table), &registry());
        assert!(prompt.starts_with(PLANNER_PREAMBLE));
        assert!(prompt.contains("q,v\nQ1,1\n... 1 more rows"));
        assert!(prompt.contains("Question: How did we do?"));
        assert!(prompt.contains("\"tabular-totals\""));
        assert!(prompt.contains("\"sentiment\""));

        let prompt = generator.build_prompt("", None, &registry());
        assert!(prompt.contains(NO_DATA_MARKER));
    }

    #[tokio::test]
    async fn test_generate_calls_llm_once() {
        let llm = Arc::new(ScriptedLlmClient::replies([
            r#"Here you go: {"action": "use_tool", "invocations": [{"capability": "sentiment", "details": "x"}]}"#,
        ]));
        let generator = PlanGenerator::new(llm.clone(), Duration::from_secs(1));
        let plan = generator.generate("news tone?", None, &registry()).await.unwrap();
        assert_eq!(plan.capability_names(), vec!["sentiment"]);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_generate_empty_question_yields_empty_plan() {
        let llm = Arc::new(ScriptedLlmClient::replies([r#"{"action": "use_tool", "invocations": []}"#]));
        let generator = PlanGenerator::new(llm.clone(), Duration::from_secs(1));
        let plan = generator.generate("", None, &registry()).await.unwrap();
        assert!(plan.is_empty());
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_generate_service_failure_is_fatal() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err("503".to_string())]));
        let generator = PlanGenerator::new(llm, Duration::from_secs(1));
        let err = generator.generate("q", None, &registry()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ServiceUnavailable(_)));
    }
}
