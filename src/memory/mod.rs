//! 记忆层：跨运行的问答上下文日志

pub mod context;

pub use context::{ContextEntry, ContextStore, DEFAULT_WARN_AFTER_ENTRIES, NO_CONTEXT};
