//! market-data：按 ticker 查询行情，每个 ticker 一条结果
//!
//! ticker 从 details（为空时用原问题）中按全大写 1-5 字母的词提取，去掉常见缩写；
//! 一个也没提取到时使用配置的兜底列表。单个 ticker 查询失败只影响它自己那一项。

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::capabilities::{Capability, CapabilityId, RequestContext};
use crate::core::CapabilityError;
use crate::planning::{CapabilityOutput, CapabilityResult};

pub const DEFAULT_QUOTE_BASE_URL: &str = "https://query1.finance.yahoo.com";

const CONFIDENCE: f64 = 0.95;

/// 不当作 ticker 的全大写词
const STOP_WORDS: [&str; 22] = [
    "API", "A", "I", "AI", "CEO", "CFO", "CSV", "ETF", "EPS", "IPO", "UK", "US", "USA", "EU",
    "GDP", "YTD", "ROI", "CAGR", "NEWS", "DATA", "THE", "AND",
];

static TICKER_RE: OnceLock<Regex> = OnceLock::new();

/// 从文本中提取 ticker（保持首次出现顺序并去重）
pub fn extract_tickers(text: &str) -> Vec<String> {
    let re = TICKER_RE.get_or_init(|| Regex::new(r"\b[A-Z]{1,5}\b").expect("valid ticker pattern"));
    let mut tickers: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let t = m.as_str();
        if !STOP_WORDS.contains(&t) && !tickers.iter().any(|seen| seen == t) {
            tickers.push(t.to_string());
        }
    }
    tickers
}

/// 行情快照
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub last_price: f64,
    pub year_high: Option<f64>,
    pub year_low: Option<f64>,
    pub currency: Option<String>,
    pub name: Option<String>,
}

impl Quote {
    /// 供模型阅读的多行文本
    pub fn formatted(&self) -> String {
        let opt = |v: Option<f64>| v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "n/a".to_string());
        format!(
            "Symbol: {}\nName: {}\nLast Price: {:.2} {}\n52-Week High: {}\n52-Week Low: {}",
            self.symbol,
            self.name.as_deref().unwrap_or("n/a"),
            self.last_price,
            self.currency.as_deref().unwrap_or(""),
            opt(self.year_high),
            opt(self.year_low),
        )
    }
}

/// 行情数据源；Ok(None) 表示该 ticker 无数据（无效或已退市）
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, ticker: &str) -> Result<Option<Quote>, CapabilityError>;
}

/// 解析 Yahoo Finance chart 接口的响应
pub fn parse_chart_response(body: &Value) -> Result<Option<Quote>, CapabilityError> {
    let chart = body
        .get("chart")
        .ok_or_else(|| CapabilityError::MalformedResponse("missing 'chart'".to_string()))?;
    let meta = match chart
        .get("result")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .and_then(|r| r.get("meta"))
    {
        Some(meta) => meta,
        None => return Ok(None),
    };
    let Some(last_price) = meta.get("regularMarketPrice").and_then(Value::as_f64) else {
        return Ok(None);
    };
    let symbol = meta
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| CapabilityError::MalformedResponse("missing 'symbol'".to_string()))?;
    let text = |key: &str| meta.get(key).and_then(Value::as_str).map(String::from);
    Ok(Some(Quote {
        symbol: symbol.to_uppercase(),
        last_price,
        year_high: meta.get("fiftyTwoWeekHigh").and_then(Value::as_f64),
        year_low: meta.get("fiftyTwoWeekLow").and_then(Value::as_f64),
        currency: text("currency"),
        name: text("longName").or_else(|| text("shortName")),
    }))
}

/// Yahoo Finance chart 接口
pub struct YahooQuoteSource {
    client: Client,
    base_url: String,
}

impl YahooQuoteSource {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl QuoteSource for YahooQuoteSource {
    async fn quote(&self, ticker: &str) -> Result<Option<Quote>, CapabilityError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        let resp = self
            .client
            .get(&url)
            .query(&[("range", "1d"), ("interval", "1d")])
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(CapabilityError::Transport(format!("HTTP {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;
        parse_chart_response(&body)
    }
}

/// 行情能力
pub struct MarketData {
    source: Arc<dyn QuoteSource>,
    fallback_tickers: Vec<String>,
}

impl MarketData {
    pub fn new(source: Arc<dyn QuoteSource>, fallback_tickers: Vec<String>) -> Self {
        Self {
            source,
            fallback_tickers,
        }
    }

    async fn lookup(&self, ticker: &str) -> CapabilityResult {
        match self.source.quote(ticker).await {
            Ok(Some(quote)) => {
                let mut answer = serde_json::to_value(&quote).unwrap_or(Value::Null);
                if let Value::Object(map) = &mut answer {
                    map.insert("summary".to_string(), Value::String(quote.formatted()));
                }
                CapabilityResult::new(
                    answer,
                    format!("Fetched market data for ticker '{}'.", ticker),
                    CONFIDENCE,
                )
            }
            Ok(None) => CapabilityResult::failed(
                Value::Object(Default::default()),
                format!(
                    "No financial data found for ticker '{}' (possibly invalid or delisted)",
                    ticker
                ),
            ),
            Err(e) => CapabilityResult::failed(
                Value::Object(Default::default()),
                format!("Error fetching data for ticker '{}': {}", ticker, e),
            ),
        }
    }
}

#[async_trait]
impl Capability for MarketData {
    fn id(&self) -> CapabilityId {
        CapabilityId::MarketData
    }

    async fn execute(
        &self,
        details: &str,
        ctx: &RequestContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let text = if details.trim().is_empty() {
            ctx.question.as_str()
        } else {
            details
        };
        let mut tickers = extract_tickers(text);
        if tickers.is_empty() {
            tracing::info!(fallback = ?self.fallback_tickers, "no tickers found, using fallback list");
            tickers = self.fallback_tickers.clone();
        }
        if tickers.is_empty() {
            return Err(CapabilityError::InvalidInput(
                "no ticker symbols found".to_string(),
            ));
        }
        tracing::info!(tickers = ?tickers, "ticker(s) extracted");

        let mut results = BTreeMap::new();
        for ticker in tickers {
            let result = self.lookup(&ticker).await;
            results.insert(ticker, result);
        }
        Ok(CapabilityOutput::Fanout(results))
    }
}
