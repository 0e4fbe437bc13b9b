//! 核心编排层：错误类型、组件装配、单次请求的主控流程

pub mod builder;
pub mod error;
pub mod orchestrator;

pub use builder::{create_llm_from_config, OrchestratorBuilder};
pub use error::{CapabilityError, PipelineError};
pub use orchestrator::{Orchestrator, RunOutput, RunRequest};
