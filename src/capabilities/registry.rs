//! 能力注册表
//!
//! 能力标识是一个封闭枚举 CapabilityId；模型给出的任意字符串只在 resolve 这一处转换，
//! 结果为 Resolved（已注册执行器）或 Unresolved（未知名称，由调度器按"未实现"处理）。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::CapabilityError;
use crate::data::Table;
use crate::planning::CapabilityOutput;

/// 内置能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CapabilityId {
    TabularTotals,
    WebResearch,
    MarketData,
    Sentiment,
}

impl CapabilityId {
    pub const ALL: [CapabilityId; 4] = [
        CapabilityId::TabularTotals,
        CapabilityId::WebResearch,
        CapabilityId::MarketData,
        CapabilityId::Sentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityId::TabularTotals => "tabular-totals",
            CapabilityId::WebResearch => "web-research",
            CapabilityId::MarketData => "market-data",
            CapabilityId::Sentiment => "sentiment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(name))
    }

    /// 静态元数据（供 prompt 中的能力清单）
    pub fn spec(&self) -> CapabilitySpec {
        let (description, requires_structured_input) = match self {
            CapabilityId::TabularTotals => (
                "Analyze the uploaded table: total of a numeric column and the best-performing row.",
                true,
            ),
            CapabilityId::WebResearch => (
                "Research online news or recent updates about a topic.",
                false,
            ),
            CapabilityId::MarketData => (
                "Fetch stock/market data for company ticker symbols mentioned in the details.",
                false,
            ),
            CapabilityId::Sentiment => (
                "Score the sentiment of news headlines listed in the details (one per line).",
                false,
            ),
        };
        CapabilitySpec {
            name: self.as_str().to_string(),
            description: description.to_string(),
            requires_structured_input,
        }
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 能力元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub requires_structured_input: bool,
}

/// 单次请求中能力可见的上下文
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub question: String,
    pub table: Option<Arc<Table>>,
}

impl RequestContext {
    pub fn new(question: impl Into<String>, table: Option<Arc<Table>>) -> Self {
        Self {
            question: question.into(),
            table,
        }
    }

    pub fn require_table(&self) -> Result<&Table, CapabilityError> {
        self.table
            .as_deref()
            .ok_or(CapabilityError::MissingStructuredData)
    }
}

/// 能力执行器：details 为计划中的自由文本说明
#[async_trait]
pub trait Capability: Send + Sync {
    fn id(&self) -> CapabilityId;

    async fn execute(
        &self,
        details: &str,
        ctx: &RequestContext,
    ) -> Result<CapabilityOutput, CapabilityError>;
}

/// resolve 的结果
#[derive(Clone)]
pub enum Resolution {
    Resolved(CapabilityId, Arc<dyn Capability>),
    Unresolved(String),
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Resolved(id, _) => f.debug_tuple("Resolved").field(id).finish(),
            Resolution::Unresolved(name) => f.debug_tuple("Unresolved").field(name).finish(),
        }
    }
}

/// 能力注册表：启动时注册，之后只读
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<CapabilityId, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册执行器；同一 id 重复注册时后者覆盖前者
    pub fn register(&mut self, capability: impl Capability + 'static) {
        let id = capability.id();
        if self.capabilities.insert(id, Arc::new(capability)).is_some() {
            tracing::warn!(capability = %id, "capability registered twice, replacing");
        }
    }

    pub fn with(mut self, capability: impl Capability + 'static) -> Self {
        self.register(capability);
        self
    }

    pub fn list(&self) -> Vec<CapabilitySpec> {
        self.capabilities.keys().map(|id| id.spec()).collect()
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        match CapabilityId::from_name(name).and_then(|id| {
            self.capabilities.get(&id).map(|c| (id, c.clone()))
        }) {
            Some((id, capability)) => Resolution::Resolved(id, capability),
            None => Resolution::Unresolved(name.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// 能力清单的 JSON（拼入规划 prompt）
    pub fn to_listing_json(&self) -> String {
        serde_json::to_string_pretty(&self.list()).unwrap_or_else(|_| "[]".to_string())
    }
}
