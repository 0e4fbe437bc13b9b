//! 数据模型：Invocation / Plan / CapabilityResult / AggregatedOutputs
//!
//! CapabilityResult 是所有能力与最终答案共用的三字段信封（answer / reasoning / confidence），
//! confidence 在构造时统一截断到 [0.0, 1.0]。

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Plan.action 的期望取值
pub const USE_TOOL_ACTION: &str = "use_tool";

/// 一次能力调用请求（由 Plan Generator 产生；capability 不保证已注册）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Invocation {
    /// 能力名，如 tabular-totals、market-data
    #[serde(alias = "tool")]
    pub capability: String,
    /// 给能力的自由文本说明
    #[serde(default)]
    pub details: String,
    /// 是否需要结构化数据（表格）
    #[serde(default, alias = "require_csv", alias = "requires_csv")]
    pub requires_structured_input: bool,
}

impl Invocation {
    pub fn new(capability: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            details: details.into(),
            requires_structured_input: false,
        }
    }

    pub fn with_structured_input(mut self) -> Self {
        self.requires_structured_input = true;
        self
    }
}

/// 调用计划：invocations 恒存在（可为空），顺序即调度顺序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// 固定为 "use_tool"
    pub action: String,
    /// 按顺序执行的能力调用
    #[serde(alias = "tools")]
    pub invocations: Vec<Invocation>,
}

impl Plan {
    pub fn new(invocations: Vec<Invocation>) -> Self {
        Self {
            action: USE_TOOL_ACTION.to_string(),
            invocations,
        }
    }

    /// 解析失败时的安全默认值
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn capability_names(&self) -> Vec<&str> {
        self.invocations.iter().map(|i| i.capability.as_str()).collect()
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::empty()
    }
}

/// 通用结果信封
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityResult {
    pub answer: Value,
    pub reasoning: String,
    pub confidence: f64,
}

/// 最终答案与能力结果同构
pub type FinalAnswer = CapabilityResult;

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

impl CapabilityResult {
    pub fn new(answer: Value, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            answer,
            reasoning: reasoning.into(),
            confidence: clamp_confidence(confidence),
        }
    }

    /// 零置信度结果（失败、未实现等）
    pub fn failed(answer: Value, reasoning: impl Into<String>) -> Self {
        Self::new(answer, reasoning, 0.0)
    }

    /// 未注册能力的固定结果
    pub fn not_implemented() -> Self {
        Self::failed(Value::Null, "capability not implemented")
    }
}

/// 反序列化（如解析模型返回的答案）同样经过 new，保证 confidence 合法
impl<'de> Deserialize<'de> for CapabilityResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Envelope {
            answer: Value,
            #[serde(default)]
            reasoning: String,
            confidence: f64,
        }

        let raw = Envelope::deserialize(deserializer)?;
        Ok(CapabilityResult::new(raw.answer, raw.reasoning, raw.confidence))
    }
}

/// 能力输出：单一结果，或按子项（如 ticker）展开的多个结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CapabilityOutput {
    Single(CapabilityResult),
    Fanout(BTreeMap<String, CapabilityResult>),
}

impl CapabilityOutput {
    /// 遍历其中所有结果（展开项按 key 顺序）
    pub fn results(&self) -> Vec<&CapabilityResult> {
        match self {
            CapabilityOutput::Single(r) => vec![r],
            CapabilityOutput::Fanout(items) => items.values().collect(),
        }
    }

    /// 单一结果的置信度；展开结果取最大值（空展开为 0.0）
    pub fn confidence(&self) -> f64 {
        self.results()
            .into_iter()
            .map(|r| r.confidence)
            .fold(0.0, f64::max)
    }
}

impl From<CapabilityResult> for CapabilityOutput {
    fn from(result: CapabilityResult) -> Self {
        CapabilityOutput::Single(result)
    }
}

/// 能力名 -> 输出；BTreeMap 保证渲染顺序稳定
pub type AggregatedOutputs = BTreeMap<String, CapabilityOutput>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(CapabilityResult::new(Value::Null, "", 1.7).confidence, 1.0);
        assert_eq!(CapabilityResult::new(Value::Null, "", -0.2).confidence, 0.0);
        assert_eq!(CapabilityResult::new(Value::Null, "", f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_deserialize_clamps_confidence() {
        let r: CapabilityResult =
            serde_json::from_value(json!({"answer": "x", "reasoning": "r", "confidence": 3}))
                .unwrap();
        assert_eq!(r.confidence, 1.0);
        assert_eq!(r.answer, json!("x"));
    }

    #[test]
    fn test_deserialize_requires_answer_and_confidence() {
        assert!(serde_json::from_value::<CapabilityResult>(json!({"reasoning": "r"})).is_err());
        assert!(serde_json::from_value::<CapabilityResult>(json!({"answer": 1})).is_err());
    }

    #[test]
    fn test_invocation_accepts_legacy_keys() {
        let inv: Invocation =
            serde_json::from_value(json!({"tool": "tabular-totals", "require_csv": true}))
                .unwrap();
        assert_eq!(inv.capability, "tabular-totals");
        assert_eq!(inv.details, "");
        assert!(inv.requires_structured_input);
    }

    #[test]
    fn test_not_implemented_shape() {
        let r = CapabilityResult::not_implemented();
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"answer": null, "reasoning": "capability not implemented", "confidence": 0.0})
        );
    }

    #[test]
    fn test_fanout_serializes_as_nested_map() {
        let mut items = BTreeMap::new();
        items.insert("HSBC".to_string(), CapabilityResult::new(json!({}), "ok", 0.95));
        let out = CapabilityOutput::Fanout(items);
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["HSBC"]["confidence"], json!(0.95));
        assert_eq!(out.confidence(), 0.95);
    }
}
