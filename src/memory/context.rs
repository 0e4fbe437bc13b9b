//! 上下文存储：进程内、只追加的问答日志
//!
//! 每次运行追加一条（问题 + 能力输出），渲染为编号文本注入后续 prompt。
//! 条目追加后不再修改或删除，也不做容量裁剪；超过 warn_after_entries 时只告警一次。
//! 由 Orchestrator 显式持有（Arc），测试中每个用例各建一个实例即可隔离。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::planning::AggregatedOutputs;

/// 日志为空时的渲染结果
pub const NO_CONTEXT: &str = "No previous context.";

/// 默认告警阈值
pub const DEFAULT_WARN_AFTER_ENTRIES: usize = 200;

/// 单条上下文（追加后不可变）
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub question: String,
    pub outputs: AggregatedOutputs,
    pub recorded_at: DateTime<Utc>,
}

/// 上下文日志：读写锁保证并发 append/render 时看到一致快照
#[derive(Debug)]
pub struct ContextStore {
    entries: RwLock<Vec<ContextEntry>>,
    warn_after_entries: usize,
    warned: AtomicBool,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_AFTER_ENTRIES)
    }
}

impl ContextStore {
    pub fn new(warn_after_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            warn_after_entries,
            warned: AtomicBool::new(false),
        }
    }

    pub fn append(&self, question: impl Into<String>, outputs: AggregatedOutputs) {
        let entry = ContextEntry {
            question: question.into(),
            outputs,
            recorded_at: Utc::now(),
        };
        let len = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.push(entry);
            entries.len()
        };
        tracing::debug!(entries = len, "context entry appended");
        if len > self.warn_after_entries && !self.warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                entries = len,
                "context log is growing without bound; prompts will keep getting longer"
            );
        }
    }

    /// 按追加顺序渲染全部条目
    pub fn render(&self) -> String {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        if entries.is_empty() {
            return NO_CONTEXT.to_string();
        }
        let mut text = String::from("Previous interactions:\n");
        for (i, entry) in entries.iter().enumerate() {
            let outputs = serde_json::to_string_pretty(&entry.outputs)
                .unwrap_or_else(|_| "{}".to_string());
            text.push_str(&format!(
                "{}. Q: {}\n   A: {}\n",
                i + 1,
                entry.question,
                outputs
            ));
        }
        text
    }

    /// 当前全部条目的拷贝
    pub fn entries(&self) -> Vec<ContextEntry> {
        self.entries
            .read()
            .map(|e| e.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::planning::CapabilityResult;
    use serde_json::json;

    fn outputs(name: &str, answer: serde_json::Value) -> AggregatedOutputs {
        let mut map = AggregatedOutputs::new();
        map.insert(name.to_string(), CapabilityResult::new(answer, "r", 0.9).into());
        map
    }

    #[test]
    fn test_empty_render() {
        let store = ContextStore::default();
        assert!(store.is_empty());
        assert_eq!(store.render(), NO_CONTEXT);
    }

    #[test]
    fn test_render_in_order() {
        let store = ContextStore::default();
        store.append("first question", outputs("sentiment", json!({"positive": 1})));
        store.append("second question", AggregatedOutputs::new());

        let text = store.render();
        assert!(text.starts_with("Previous interactions:\n1. Q: first question\n   A: {"));
        assert!(text.contains("\"positive\": 1"));
        assert!(text.contains("2. Q: second question\n   A: {}\n"));
        assert!(text.find("first question") < text.find("second question"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.entries()[1].question, "second question");
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let store = Arc::new(ContextStore::new(5));
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(format!("q{i}"), AggregatedOutputs::new());
                store.render()
            }));
        }
        for h in handles {
            let text = h.await.unwrap();
            assert!(text.starts_with("Previous interactions:\n1. Q: q"));
        }
        assert_eq!(store.len(), 20);
        let rendered = store.render();
        for i in 0..20 {
            assert!(rendered.contains(&format!("Q: q{i}\n")));
        }
    }

    #[test]
    fn test_poisoned_lock_keeps_entries_visible() {
        let store = Arc::new(ContextStore::default());
        store.append("before panic", AggregatedOutputs::new());

        let writer = store.clone();
        let joined = std::thread::spawn(move || {
            let _guard = writer.entries.write().unwrap();
            panic!("writer panicked while holding the lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(store.entries.is_poisoned());

        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
        assert_eq!(store.entries()[0].question, "before panic");
        store.append("after panic", AggregatedOutputs::new());
        assert_eq!(store.len(), 2);
        assert!(store.render().contains("2. Q: after panic"));
    }
}
