//! Sage - 问答编排系统
//!
//! 一次请求的流程：规划（LLM 选能力）-> 调度（并发执行能力）-> 记录上下文 -> 合成（LLM 汇总答案）。
//!
//! 模块划分：
//! - **capabilities**: 能力注册表、调度器与内置能力（表格汇总 / 网络研究 / 行情 / 情绪）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、组件装配、主控流程
//! - **data**: 结构化表格（CSV 读取、预览、数值列）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 跨运行的上下文日志
//! - **planning**: 计划与答案的数据模型、JSON 修复、Plan Generator 与 Answer Synthesizer

pub mod capabilities;
pub mod config;
pub mod core;
pub mod data;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod planning;

pub use crate::core::{Orchestrator, OrchestratorBuilder, PipelineError, RunOutput, RunRequest};
