//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SAGE__*` 覆盖（双下划线表示嵌套，如 `SAGE__LLM__PROVIDER=openai`）。
//! 所有段与字段都有默认值，配置文件可以只写需要改的部分。

use std::path::PathBuf;

use serde::Deserialize;

use crate::capabilities::market::DEFAULT_QUOTE_BASE_URL;
use crate::capabilities::web::{DEFAULT_BUDGET_SECS, DEFAULT_SEARCH_URL};
use crate::capabilities::DEFAULT_MAX_CONCURRENT;
use crate::memory::DEFAULT_WARN_AFTER_ENTRIES;
use crate::planning::planner::DEFAULT_MAX_PREVIEW_ROWS;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub planner: PlannerSection,
    pub context: ContextSection,
    pub capabilities: CapabilitiesSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；实际选择还取决于是否设置了 API Key
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次模型调用超时（秒）；超时视为服务不可用
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// 规划 prompt 中表格预览的最大行数
    pub max_preview_rows: usize,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            max_preview_rows: DEFAULT_MAX_PREVIEW_ROWS,
        }
    }
}

/// [context] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// 上下文日志超过此条数时告警（日志本身不裁剪）
    pub warn_after_entries: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            warn_after_entries: DEFAULT_WARN_AFTER_ENTRIES,
        }
    }
}

/// [capabilities] 段：启用列表、单次调用超时、并发上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapabilitiesSection {
    pub enabled: Vec<String>,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub market: MarketSection,
    pub web: WebSection,
}

impl Default for CapabilitiesSection {
    fn default() -> Self {
        Self {
            enabled: vec![
                "tabular-totals".into(),
                "web-research".into(),
                "market-data".into(),
                "sentiment".into(),
            ],
            timeout_secs: 30,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            market: MarketSection::default(),
            web: WebSection::default(),
        }
    }
}

/// [capabilities.market] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketSection {
    pub base_url: String,
    pub timeout_secs: u64,
    /// 文本中找不到 ticker 时查询的列表
    pub fallback_tickers: Vec<String>,
}

impl Default for MarketSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_QUOTE_BASE_URL.to_string(),
            timeout_secs: 15,
            fallback_tickers: vec!["HSBC".into(), "UBS".into()],
        }
    }
}

/// [capabilities.web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub search_url: String,
    /// 未设置时读取环境变量 SERPAPI_KEY
    pub api_key: Option<String>,
    /// 单个 HTTP 请求超时（秒）
    pub timeout_secs: u64,
    /// 搜索、抓取与摘要的整体预算（秒）；会被收紧到 capabilities.timeout_secs 之内
    pub budget_secs: u64,
    pub num_results: usize,
    pub max_page_chars: usize,
    /// 是否用语言模型为每页生成摘要
    pub summarize: bool,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            search_url: DEFAULT_SEARCH_URL.to_string(),
            api_key: None,
            timeout_secs: 10,
            budget_secs: DEFAULT_BUDGET_SECS,
            num_results: 3,
            max_page_chars: 5000,
            summarize: true,
        }
    }
}

/// 从 config 目录加载配置，环境变量 SAGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SAGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SAGE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
