//! bee-plan：从 JSON 文件加载计划并执行
//!
//! 用法：bee-plan <plan.json> [config.toml]
//! Ctrl+C 取消执行；结束后把计划快照以 JSON 输出到 stdout，失败时退出码非零。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use bee_plan::config::load_config;
use bee_plan::core::OrchestratorBuilder;
use bee_plan::llm::{LlmClient, MockLlmClient};
use bee_plan::observability;
use bee_plan::plan::{Plan, PlanHandle};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let Some(plan_path) = args.next().map(PathBuf::from) else {
        bail!("usage: bee-plan <plan.json> [config.toml]");
    };
    let config_path = args.next().map(PathBuf::from);

    let config = match load_config(config_path.clone()) {
        Ok(config) => config,
        Err(e) if config_path.is_none() => {
            tracing::warn!("Config load failed ({}), using defaults", e);
            Default::default()
        }
        Err(e) => return Err(e).context("Failed to load config"),
    };

    let json = std::fs::read_to_string(&plan_path)
        .with_context(|| format!("Failed to read plan {}", plan_path.display()))?;
    let plan = Plan::from_json(&json).context("Failed to decode plan")?;

    tracing::warn!("No oracle backend configured, using Mock LLM");
    let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new());
    let orchestrator = OrchestratorBuilder::new(config, llm)
        .build()
        .context("Failed to build orchestrator")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling plan");
            ctrl_c.cancel();
        }
    });

    let handle = PlanHandle::new(plan);
    let result = orchestrator.execute_plan(&handle, cancel).await;

    println!("{}", result.plan.to_json_pretty()?);
    if !result.success {
        bail!(
            "plan {} did not complete: {}",
            result.plan.id,
            result.error.unwrap_or_default()
        );
    }
    Ok(())
}
