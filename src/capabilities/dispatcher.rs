//! 能力调度器
//!
//! 按计划顺序解析并执行每个 Invocation：未注册的名称记为"未实现"，执行器的任何失败
//! （传输错误、上游格式错误、输入校验、超时）都在这里转为零置信度结果，不会中断同批其它调用。
//! 调用之间互不依赖，用 Semaphore 限制并发、join_all 汇合；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::capabilities::{CapabilityRegistry, RequestContext, Resolution};
use crate::core::CapabilityError;
use crate::planning::{AggregatedOutputs, CapabilityOutput, CapabilityResult, Invocation, Plan};

/// 默认并发上限
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// 调度器：持有注册表、单次调用超时与并发许可
pub struct Dispatcher {
    registry: CapabilityRegistry,
    timeout: Duration,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Dispatcher {
    pub fn new(registry: CapabilityRegistry, timeout: Duration, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            registry,
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 执行整个计划。结果在全部完成后按计划顺序写入，
    /// 因此同名能力出现多次时，计划中靠后的那次覆盖前面的（与完成先后无关）。
    pub async fn dispatch(&self, plan: &Plan, ctx: &RequestContext) -> AggregatedOutputs {
        let results = join_all(
            plan.invocations
                .iter()
                .map(|invocation| self.dispatch_one(invocation, ctx)),
        )
        .await;

        let mut outputs = AggregatedOutputs::new();
        for (name, output) in results {
            if outputs.insert(name.clone(), output).is_some() {
                tracing::warn!(capability = %name, "capability appears more than once in plan, keeping the last result");
            }
        }
        outputs
    }

    async fn dispatch_one(
        &self,
        invocation: &Invocation,
        ctx: &RequestContext,
    ) -> (String, CapabilityOutput) {
        let (id, capability) = match self.registry.resolve(&invocation.capability) {
            Resolution::Resolved(id, capability) => (id, capability),
            Resolution::Unresolved(name) => {
                tracing::info!(capability = %name, "capability not implemented, skipping");
                return (name, CapabilityResult::not_implemented().into());
            }
        };
        let name = id.as_str().to_string();

        let needs_table = invocation.requires_structured_input || id.spec().requires_structured_input;
        if needs_table && ctx.table.is_none() {
            let err = CapabilityError::MissingStructuredData;
            tracing::warn!(capability = %name, "{}", err);
            return (name.clone(), failure(&name, &err.to_string()));
        }

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return (name.clone(), failure(&name, &e.to_string())),
        };

        let start = Instant::now();
        let result = timeout(self.timeout, capability.execute(&invocation.details, ctx)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "capability_audit",
            "capability": name,
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "details_preview": preview(&invocation.details),
        });
        tracing::info!(audit = %audit.to_string(), "capability");

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => failure(&name, &e.to_string()),
            Err(_) => failure(
                &name,
                &format!("capability timed out after {:.1}s", self.timeout.as_secs_f64()),
            ),
        };
        (name, output)
    }
}

fn failure(name: &str, description: &str) -> CapabilityOutput {
    CapabilityResult::failed(Value::Null, format!("{} failed: {}", name, description)).into()
}

fn preview(details: &str) -> String {
    if details.chars().count() > 200 {
        format!("{}...", details.chars().take(200).collect::<String>())
    } else {
        details.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::capabilities::{Capability, CapabilityId};
    use crate::data::Table;

    /// 记录调用次数、可配置延迟与失败的测试能力
    struct Stub {
        id: CapabilityId,
        delay_ms: u64,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Stub {
        fn ok(id: CapabilityId) -> Self {
            Self {
                id,
                delay_ms: 0,
                fail: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(id: CapabilityId) -> Self {
            Self {
                fail: true,
                ..Self::ok(id)
            }
        }

        fn slow(id: CapabilityId, delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Self::ok(id)
            }
        }
    }

    #[async_trait]
    impl Capability for Stub {
        fn id(&self) -> CapabilityId {
            self.id
        }

        async fn execute(
            &self,
            details: &str,
            _ctx: &RequestContext,
        ) -> Result<CapabilityOutput, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if details.starts_with("slow:") {
                tokio::time::sleep(Duration::from_millis(60)).await;
            }
            if self.fail {
                return Err(CapabilityError::Transport("upstream down".to_string()));
            }
            Ok(CapabilityResult::new(json!(details), "stub", 0.8).into())
        }
    }

    /// 统计同时在执行中的调用数及其峰值
    struct InFlightGauge {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl InFlightGauge {
        fn new() -> Self {
            Self {
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Capability for InFlightGauge {
        fn id(&self) -> CapabilityId {
            CapabilityId::Sentiment
        }

        async fn execute(
            &self,
            details: &str,
            _ctx: &RequestContext,
        ) -> Result<CapabilityOutput, CapabilityError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(CapabilityResult::new(json!(details), "gauge", 0.8).into())
        }
    }

    async fn peak_in_flight(max_concurrent: usize) -> usize {
        let gauge = InFlightGauge::new();
        let peak = gauge.peak.clone();
        let d = Dispatcher::new(
            CapabilityRegistry::new().with(gauge),
            Duration::from_secs(5),
            max_concurrent,
        );
        let plan = Plan::new(
            (0..6)
                .map(|i| Invocation::new("sentiment", format!("headline {}", i)))
                .collect(),
        );
        let out = d.dispatch(&plan, &RequestContext::default()).await;
        assert_eq!(out.len(), 1);
        peak.load(Ordering::SeqCst)
    }

    fn dispatcher(registry: CapabilityRegistry) -> Dispatcher {
        Dispatcher::new(registry, Duration::from_secs(5), DEFAULT_MAX_CONCURRENT)
    }

    fn single(output: &CapabilityOutput) -> &CapabilityResult {
        match output {
            CapabilityOutput::Single(r) => r,
            CapabilityOutput::Fanout(_) => panic!("expected single result"),
        }
    }

    #[tokio::test]
    async fn test_unknown_capability_is_not_implemented() {
        let stub = Stub::ok(CapabilityId::Sentiment);
        let calls = stub.calls.clone();
        let d = dispatcher(CapabilityRegistry::new().with(stub));
        let plan = Plan::new(vec![Invocation::new("unknown-x", "n/a")]);

        let out = d.dispatch(&plan, &RequestContext::default()).await;
        assert_eq!(
            serde_json::to_value(&out["unknown-x"]).unwrap(),
            json!({"answer": null, "reasoning": "capability not implemented", "confidence": 0.0})
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let d = dispatcher(
            CapabilityRegistry::new()
                .with(Stub::failing(CapabilityId::MarketData))
                .with(Stub::ok(CapabilityId::Sentiment)),
        );
        let plan = Plan::new(vec![
            Invocation::new("market-data", "HSBC"),
            Invocation::new("sentiment", "stocks surge"),
        ]);

        let out = d.dispatch(&plan, &RequestContext::default()).await;
        let failed = single(&out["market-data"]);
        assert_eq!(failed.confidence, 0.0);
        assert_eq!(failed.answer, Value::Null);
        assert!(failed.reasoning.contains("upstream down"));
        let ok = single(&out["sentiment"]);
        assert_eq!(ok.confidence, 0.8);
        assert_eq!(ok.answer, json!("stocks surge"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_zero_confidence() {
        let d = Dispatcher::new(
            CapabilityRegistry::new().with(Stub::slow(CapabilityId::WebResearch, 500)),
            Duration::from_millis(20),
            1,
        );
        let plan = Plan::new(vec![Invocation::new("web-research", "news")]);
        let out = d.dispatch(&plan, &RequestContext::default()).await;
        let r = single(&out["web-research"]);
        assert_eq!(r.confidence, 0.0);
        assert!(r.reasoning.contains("timed out"));
    }

    #[tokio::test]
    async fn test_duplicate_capability_last_in_plan_wins() {
        // 第一次调用更慢，完成顺序与计划顺序相反
        let d = dispatcher(CapabilityRegistry::new().with(Stub::ok(CapabilityId::Sentiment)));
        let plan = Plan::new(vec![
            Invocation::new("sentiment", "slow:first"),
            Invocation::new("sentiment", "second"),
        ]);
        let out = d.dispatch(&plan, &RequestContext::default()).await;
        assert_eq!(out.len(), 1);
        assert_eq!(single(&out["sentiment"]).answer, json!("second"));
    }

    #[tokio::test]
    async fn test_missing_table_skips_executor() {
        let stub = Stub::ok(CapabilityId::TabularTotals);
        let calls = stub.calls.clone();
        let d = dispatcher(CapabilityRegistry::new().with(stub));
        let plan = Plan::new(vec![Invocation::new("tabular-totals", "sum revenue")]);

        let out = d.dispatch(&plan, &RequestContext::default()).await;
        let r = single(&out["tabular-totals"]);
        assert_eq!(r.confidence, 0.0);
        assert!(r.reasoning.contains("structured data required"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let table = Table::from_columns(vec![("q", vec!["Q1"]), ("v", vec!["1"])]).unwrap();
        let ctx = RequestContext::new("q", Some(Arc::new(table)));
        let out = d.dispatch(&plan, &ctx).await;
        assert_eq!(single(&out["tabular-totals"]).confidence, 0.8);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invocation_flag_requires_table() {
        let d = dispatcher(CapabilityRegistry::new().with(Stub::ok(CapabilityId::Sentiment)));
        let plan = Plan::new(vec![Invocation::new("sentiment", "x").with_structured_input()]);
        let out = d.dispatch(&plan, &RequestContext::default()).await;
        assert_eq!(single(&out["sentiment"]).confidence, 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_invocations_all_complete() {
        let d = Dispatcher::new(
            CapabilityRegistry::new()
                .with(Stub::slow(CapabilityId::WebResearch, 50))
                .with(Stub::slow(CapabilityId::MarketData, 50))
                .with(Stub::slow(CapabilityId::Sentiment, 50)),
            Duration::from_secs(5),
            2,
        );
        let plan = Plan::new(vec![
            Invocation::new("web-research", "a"),
            Invocation::new("market-data", "b"),
            Invocation::new("sentiment", "c"),
            Invocation::new("nope", "d"),
        ]);
        let out = d.dispatch(&plan, &RequestContext::default()).await;
        assert_eq!(out.len(), 4);
        assert_eq!(single(&out["market-data"]).answer, json!("b"));
        assert_eq!(single(&out["nope"]).confidence, 0.0);
    }

    #[tokio::test]
    async fn test_empty_plan() {
        let d = dispatcher(CapabilityRegistry::new());
        let out = d.dispatch(&Plan::empty(), &RequestContext::default()).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded_by_max_concurrent() {
        assert_eq!(peak_in_flight(2).await, 2);
        assert_eq!(peak_in_flight(1).await, 1);
        let peak = peak_in_flight(DEFAULT_MAX_CONCURRENT).await;
        assert!(peak > 1 && peak <= DEFAULT_MAX_CONCURRENT);
    }

    #[test]
    fn test_max_concurrent_at_least_one() {
        let d = Dispatcher::new(CapabilityRegistry::new(), Duration::from_secs(1), 0);
        assert_eq!(d.max_concurrent(), 1);
    }
}
