//! web-research：搜索 + 抓取 + （可选）摘要
//!
//! 通过 SearchBackend（默认 SerpAPI）取前 N 条自然搜索结果，并发抓取各页并用 html2text 提取可读文本，
//! 超过 max_page_chars 时截断；配置了摘要模型时每页再压缩成 2-3 句。
//! 整个能力在 budget 内完成：到期时已抓到的页面保留原文摘录，未抓到的页面记录错误。
//! 单页抓取或摘要失败只记录在该条结果里，不影响其它页面。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use html2text::from_read;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::time::{timeout_at, Instant};

use crate::capabilities::{Capability, CapabilityId, RequestContext};
use crate::core::CapabilityError;
use crate::llm::{complete_prompt, LlmClient};
use crate::planning::{CapabilityOutput, CapabilityResult};

pub const DEFAULT_SEARCH_URL: &str = "https://serpapi.com/search.json";

/// 默认整体预算（秒），需小于调度器的单次调用超时
pub const DEFAULT_BUDGET_SECS: u64 = 25;

const CONFIDENCE: f64 = 0.9;

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// 抓取后的页面
#[derive(Debug, Clone, Serialize)]
pub struct ScrapedPage {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub content: String,
    pub error: Option<String>,
}

impl ScrapedPage {
    fn from_hit(hit: &SearchHit, content: String, error: Option<String>) -> Self {
        Self {
            title: hit.title.clone(),
            url: hit.url.clone(),
            snippet: hit.snippet.clone(),
            content,
            error,
        }
    }
}

/// 搜索与抓取后端
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, CapabilityError>;

    /// 返回页面原始 HTML
    async fn fetch_page(&self, url: &str) -> Result<String, CapabilityError>;
}

/// 从 SerpAPI 响应中取前 limit 条带链接的 organic_results
pub fn parse_organic_results(body: &Value, limit: usize) -> Vec<SearchHit> {
    let text = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).unwrap_or("").to_string();
    body.get("organic_results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter(|r| r.get("link").and_then(Value::as_str).is_some())
                .take(limit)
                .map(|r| SearchHit {
                    title: text(r, "title"),
                    url: text(r, "link"),
                    snippet: text(r, "snippet"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// HTML 转可读文本
pub fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

/// 按字符数截断
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text.to_string()
    }
}

/// SerpAPI 搜索 + reqwest 抓取
pub struct SerpApiBackend {
    client: Client,
    search_url: String,
    api_key: Option<String>,
}

impl SerpApiBackend {
    pub fn new(search_url: impl Into<String>, api_key: Option<String>, timeout_secs: u64) -> Self {
        const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            search_url: search_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

#[async_trait]
impl SearchBackend for SerpApiBackend {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, CapabilityError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CapabilityError::NotConfigured("search API key is not set".to_string()))?;
        let num = limit.to_string();
        let resp = self
            .client
            .get(&self.search_url)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("api_key", api_key),
                ("num", num.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CapabilityError::Transport(format!("search HTTP {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;
        Ok(parse_organic_results(&body, limit))
    }

    async fn fetch_page(&self, url: &str) -> Result<String, CapabilityError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(CapabilityError::Transport(format!("HTTP {}", resp.status())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| CapabilityError::Transport(format!("read body: {}", e)))?;
        Ok(body.trim_start_matches('\u{FEFF}').to_string())
    }
}

/// 网络研究能力
pub struct WebResearch {
    backend: Arc<dyn SearchBackend>,
    num_results: usize,
    max_page_chars: usize,
    budget: Duration,
    summarizer: Option<(Arc<dyn LlmClient>, Duration)>,
}

impl WebResearch {
    pub fn new(backend: Arc<dyn SearchBackend>, num_results: usize, max_page_chars: usize) -> Self {
        Self {
            backend,
            num_results: num_results.max(1),
            max_page_chars,
            budget: Duration::from_secs(DEFAULT_BUDGET_SECS),
            summarizer: None,
        }
    }

    /// 整体时间预算（搜索、抓取与摘要合计）
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// 用语言模型把每页压缩为简短摘要
    pub fn with_summarizer(mut self, llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        self.summarizer = Some((llm, timeout));
        self
    }

    async fn summarize(&self, hit: &SearchHit, content: String, deadline: Instant) -> String {
        let Some((llm, timeout)) = &self.summarizer else {
            return content;
        };
        let prompt = format!(
            "You are an expert summarizer. Summarise the following web page content in 2-3 concise sentences:\n\nTitle: {}\nURL: {}\nContent: {}\n\nReturn strictly plain text summary.",
            hit.title, hit.url, content
        );
        match timeout_at(deadline, complete_prompt(llm.as_ref(), &prompt, *timeout)).await {
            Ok(Ok(summary)) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(Ok(_)) => content,
            Ok(Err(e)) => {
                tracing::warn!(url = %hit.url, "page summary failed: {}", e);
                content
            }
            Err(_) => {
                tracing::warn!(url = %hit.url, "page summary hit the research deadline, keeping excerpt");
                content
            }
        }
    }

    async fn scrape(&self, hit: &SearchHit, deadline: Instant) -> ScrapedPage {
        tracing::info!(url = %hit.url, "web research fetch");
        match timeout_at(deadline, self.backend.fetch_page(&hit.url)).await {
            Ok(Ok(html)) => {
                let excerpt = truncate_chars(&html_to_text(&html), self.max_page_chars);
                let content = self.summarize(hit, excerpt, deadline).await;
                ScrapedPage::from_hit(hit, content, None)
            }
            Ok(Err(e)) => ScrapedPage::from_hit(hit, String::new(), Some(e.to_string())),
            Err(_) => ScrapedPage::from_hit(
                hit,
                String::new(),
                Some("page fetch hit the research deadline".to_string()),
            ),
        }
    }
}

#[async_trait]
impl Capability for WebResearch {
    fn id(&self) -> CapabilityId {
        CapabilityId::WebResearch
    }

    async fn execute(
        &self,
        details: &str,
        ctx: &RequestContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let query = if ctx.question.trim().is_empty() {
            details.trim()
        } else {
            ctx.question.trim()
        };
        if query.is_empty() {
            return Err(CapabilityError::InvalidInput("empty search query".to_string()));
        }
        let deadline = Instant::now() + self.budget;

        let hits = timeout_at(deadline, self.backend.search(query, self.num_results))
            .await
            .map_err(|_| CapabilityError::Transport("search hit the research deadline".to_string()))??;
        if hits.is_empty() {
            return Ok(CapabilityResult::failed(
                Value::Array(Vec::new()),
                format!("No results found for '{}'", query),
            )
            .into());
        }

        let pages = join_all(
            hits.iter()
                .take(self.num_results)
                .map(|hit| self.scrape(hit, deadline)),
        )
        .await;

        let fetched = pages.iter().filter(|p| p.error.is_none()).count();
        let answer = serde_json::to_value(&pages).unwrap_or(Value::Null);
        Ok(CapabilityResult::new(
            answer,
            format!(
                "Fetched {} of {} top search results for '{}'.",
                fetched,
                pages.len(),
                query
            ),
            CONFIDENCE,
        )
        .into())
    }
}
