//! 错误类型
//!
//! 只有两类错误会中断一次请求：语言模型服务不可用（含超时）与输入校验失败。
//! 计划/答案解析失败、能力执行失败都在各自组件内就地恢复，不会出现在这里。

use thiserror::Error;

/// 请求级致命错误：返回给调用方，不附带任何部分结果
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Language model service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Language model call timed out after {0}s")]
    ServiceTimeout(u64),

    #[error("Input validation failed: {0}")]
    InputValidation(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl PipelineError {
    /// 机器可读的错误类别（CLI 输出用）
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ServiceUnavailable(_) => "service_unavailable",
            PipelineError::ServiceTimeout(_) => "service_timeout",
            PipelineError::InputValidation(_) => "input_validation",
            PipelineError::Config(_) => "config",
        }
    }
}

/// 单个能力执行失败：由调度器在边界处捕获并转为零置信度结果
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("structured data required but none was provided")]
    MissingStructuredData,

    #[error("capability not configured: {0}")]
    NotConfigured(String),
}

impl From<crate::data::TableError> for PipelineError {
    fn from(e: crate::data::TableError) -> Self {
        PipelineError::InputValidation(e.to_string())
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(e: reqwest::Error) -> Self {
        CapabilityError::Transport(e.to_string())
    }
}
