//! Sage - 问答编排系统
//!
//! 入口：初始化日志、加载配置、装配 Orchestrator，然后回答单个问题或进入交互模式。
//! 结果以 JSON 打印到 stdout；致命错误打印 `{"error": ...}` 并以非零状态退出。

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sage::config::{load_config, AppConfig};
use sage::data::Table;
use sage::{Orchestrator, OrchestratorBuilder, PipelineError, RunRequest};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "sage")]
#[command(about = "Answer questions by planning, running capabilities and synthesizing", long_about = None)]
struct Cli {
    /// 要回答的问题（交互模式下忽略）
    question: Option<String>,

    /// 作为结构化数据的 CSV 文件
    #[arg(long)]
    csv: Option<PathBuf>,

    /// 额外的 TOML 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 缺少表格时直接报错
    #[arg(long)]
    require_data: bool,

    /// 逐行读取 stdin 中的问题，共享同一份上下文
    #[arg(long)]
    interactive: bool,
}

fn print_error(err: &PipelineError) {
    let body = serde_json::json!({ "error": err.to_string(), "kind": err.kind() });
    println!("{}", body);
}

fn build_request(question: String, table: Option<&Table>, require_data: bool) -> RunRequest {
    let mut request = RunRequest::new(question);
    if let Some(t) = table {
        request = request.with_table(t.clone());
    }
    if require_data {
        request = request.require_structured_data();
    }
    request
}

async fn answer(orch: &Orchestrator, request: RunRequest) -> Result<(), PipelineError> {
    let output = orch.run(request).await?;
    let text = serde_json::to_string_pretty(&output)
        .map_err(|e| PipelineError::Config(format!("failed to serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

async fn interactive(
    orch: &Orchestrator,
    table: Option<&Table>,
    require_data: bool,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read question from stdin")?
    {
        let question = line.trim();
        if matches!(question, "exit" | "quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }
        if let Err(e) = answer(orch, build_request(question.to_string(), table, require_data)).await {
            print_error(&e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    sage::observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let orch = match OrchestratorBuilder::new(cfg).build() {
        Ok(o) => o,
        Err(e) => {
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let table = match cli.csv.as_deref().map(Table::from_csv_path).transpose() {
        Ok(t) => t,
        Err(e) => {
            print_error(&PipelineError::from(e));
            return ExitCode::FAILURE;
        }
    };

    if cli.interactive {
        if let Err(e) = interactive(&orch, table.as_ref(), cli.require_data).await {
            tracing::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let question = cli.question.unwrap_or_default();
    match answer(&orch, build_request(question, table.as_ref(), cli.require_data)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}
