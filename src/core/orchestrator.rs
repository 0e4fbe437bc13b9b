//! 主控流程：单次请求 = 规划 -> 调度 -> 记录上下文 -> 合成
//!
//! 各阶段严格顺序执行；只有调度阶段内部并发。致命错误（模型服务不可用、输入校验失败）
//! 直接返回给调用方，不附带部分结果。上下文条目在合成之前写入，合成失败时该条目保留。

use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use crate::capabilities::{Dispatcher, RequestContext};
use crate::core::PipelineError;
use crate::data::Table;
use crate::memory::ContextStore;
use crate::planning::{AnswerSynthesizer, FinalAnswer, Plan, PlanGenerator};

/// 一次运行的输入
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub question: String,
    pub table: Option<Table>,
    /// 为 true 时缺少表格（或表格没有数据行）直接判为输入错误，不调用模型
    pub require_structured_data: bool,
}

impl RunRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.table = Some(table);
        self
    }

    pub fn require_structured_data(mut self) -> Self {
        self.require_structured_data = true;
        self
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if !self.require_structured_data {
            return Ok(());
        }
        match &self.table {
            None => Err(PipelineError::InputValidation(
                "structured data is required but none was provided".to_string(),
            )),
            Some(t) if t.is_empty() => Err(PipelineError::InputValidation(
                "structured data has no rows".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub run_id: String,
    pub plan: Plan,
    pub final_answer: FinalAnswer,
    /// 合成时注入 prompt 的上下文文本（已包含本次运行）
    pub context_transcript: String,
}

/// Orchestrator：持有四个组件与共享的上下文日志
pub struct Orchestrator {
    planner: PlanGenerator,
    dispatcher: Dispatcher,
    synthesizer: AnswerSynthesizer,
    context: Arc<ContextStore>,
}

impl Orchestrator {
    pub fn new(
        planner: PlanGenerator,
        dispatcher: Dispatcher,
        synthesizer: AnswerSynthesizer,
        context: Arc<ContextStore>,
    ) -> Self {
        Self {
            planner,
            dispatcher,
            synthesizer,
            context,
        }
    }

    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// 执行一次完整的问答流程
    pub async fn run(&self, request: RunRequest) -> Result<RunOutput, PipelineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_inner(run_id, request).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        request: RunRequest,
    ) -> Result<RunOutput, PipelineError> {
        request.validate()?;
        let RunRequest {
            question, table, ..
        } = request;
        let table = table.map(Arc::new);

        tracing::info!(stage = "plan", "generating plan");
        let plan = self
            .planner
            .generate(&question, table.as_deref(), self.dispatcher.registry())
            .await?;
        tracing::info!(
            stage = "plan",
            capabilities = ?plan.capability_names(),
            "plan ready"
        );

        tracing::info!(stage = "dispatch", invocations = plan.invocations.len(), "dispatching");
        let ctx = RequestContext::new(question.clone(), table);
        let outputs = self.dispatcher.dispatch(&plan, &ctx).await;

        self.context.append(question.clone(), outputs.clone());
        let transcript = self.context.render();

        tracing::info!(stage = "synthesize", "synthesizing final answer");
        let final_answer = self
            .synthesizer
            .synthesize(&question, &outputs, &transcript)
            .await?;
        tracing::info!(stage = "done", confidence = final_answer.confidence, "run complete");

        Ok(RunOutput {
            run_id,
            plan,
            final_answer,
            context_transcript: transcript,
        })
    }
}
