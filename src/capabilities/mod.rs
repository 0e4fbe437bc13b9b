//! 能力层：注册表、调度器与内置能力（表格汇总 / 网络研究 / 行情 / 情绪）

pub mod dispatcher;
pub mod market;
pub mod registry;
pub mod schema;
pub mod sentiment;
pub mod tabular;
pub mod web;

pub use dispatcher::{Dispatcher, DEFAULT_MAX_CONCURRENT};
pub use market::{MarketData, Quote, QuoteSource, YahooQuoteSource};
pub use registry::{
    Capability, CapabilityId, CapabilityRegistry, CapabilitySpec, RequestContext, Resolution,
};
pub use schema::plan_schema_json;
pub use sentiment::Sentiment;
pub use tabular::TabularTotals;
pub use web::{SearchBackend, SearchHit, SerpApiBackend, WebResearch};
