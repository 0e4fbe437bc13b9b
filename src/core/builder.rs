//! Orchestrator 构建器：按配置选择 LLM 后端、注册能力并装配各组件
//!
//! CLI 与测试共用同一套装配逻辑；测试可注入脚本化 LLM 与假行情源。

use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::{
    CapabilityId, CapabilityRegistry, Dispatcher, MarketData, QuoteSource, Sentiment,
    SerpApiBackend, TabularTotals, WebResearch, YahooQuoteSource,
};
use crate::config::AppConfig;
use crate::core::{Orchestrator, PipelineError};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, DEEPSEEK_CHAT};
use crate::memory::ContextStore;
use crate::planning::{AnswerSynthesizer, PlanGenerator};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient);
    }
    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek && provider != "openai" {
        let model = cfg
            .llm
            .model
            .clone()
            .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(OpenAiClient::deepseek(Some(&model)))
    } else if use_openai {
        let model = cfg
            .llm
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

/// Orchestrator 构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    quote_source: Option<Arc<dyn QuoteSource>>,
    context: Option<Arc<ContextStore>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            quote_source: None,
            context: None,
        }
    }

    /// 替换按配置选择的 LLM
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 替换默认的 Yahoo 行情源
    pub fn with_quote_source(mut self, source: Arc<dyn QuoteSource>) -> Self {
        self.quote_source = Some(source);
        self
    }

    /// 共享已有的上下文日志
    pub fn with_context(mut self, context: Arc<ContextStore>) -> Self {
        self.context = Some(context);
        self
    }

    /// 按 capabilities.enabled 注册能力；未知名称视为配置错误
    pub fn build_registry(&self, llm: &Arc<dyn LlmClient>) -> Result<CapabilityRegistry, PipelineError> {
        let caps = &self.config.capabilities;
        let mut registry = CapabilityRegistry::new();
        for name in &caps.enabled {
            let id = CapabilityId::from_name(name).ok_or_else(|| {
                PipelineError::Config(format!("unknown capability in capabilities.enabled: {}", name))
            })?;
            match id {
                CapabilityId::TabularTotals => registry.register(TabularTotals),
                CapabilityId::Sentiment => registry.register(Sentiment),
                CapabilityId::MarketData => {
                    let source = self.quote_source.clone().unwrap_or_else(|| {
                        Arc::new(YahooQuoteSource::new(
                            caps.market.base_url.clone(),
                            caps.market.timeout_secs,
                        ))
                    });
                    registry.register(MarketData::new(source, caps.market.fallback_tickers.clone()));
                }
                CapabilityId::WebResearch => {
                    let api_key = caps
                        .web
                        .api_key
                        .clone()
                        .or_else(|| std::env::var("SERPAPI_KEY").ok());
                    let backend =
                        SerpApiBackend::new(caps.web.search_url.clone(), api_key, caps.web.timeout_secs);
                    let mut web = WebResearch::new(
                        Arc::new(backend),
                        caps.web.num_results,
                        caps.web.max_page_chars,
                    )
                    .with_budget(self.web_budget());
                    if caps.web.summarize {
                        web = web.with_summarizer(llm.clone(), self.llm_timeout());
                    }
                    registry.register(web);
                }
            }
        }
        tracing::info!(capabilities = registry.len(), "capability registry ready");
        Ok(registry)
    }

    fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.config.capabilities.timeout_secs.max(1))
    }

    /// web-research 的整体预算：不超过 web.budget_secs，且留出调度器超时的 10% 余量
    pub fn web_budget(&self) -> Duration {
        Duration::from_secs(self.config.capabilities.web.budget_secs)
            .min(self.capability_timeout() * 9 / 10)
    }

    fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeouts.request.max(1))
    }

    pub fn build(self) -> Result<Orchestrator, PipelineError> {
        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let registry = self.build_registry(&llm)?;
        let timeout = self.llm_timeout();

        let planner = PlanGenerator::new(llm.clone(), timeout)
            .with_max_preview_rows(self.config.planner.max_preview_rows);
        let dispatcher = Dispatcher::new(
            registry,
            self.capability_timeout(),
            self.config.capabilities.max_concurrent,
        );
        let synthesizer = AnswerSynthesizer::new(llm, timeout);
        let context = self.context.unwrap_or_else(|| {
            Arc::new(ContextStore::new(self.config.context.warn_after_entries))
        });

        Ok(Orchestrator::new(planner, dispatcher, synthesizer, context))
    }
}
