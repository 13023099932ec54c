//! automation-run: execute one compiled plan against the configured driver.
//!
//! Usage: automation-run <plan.json> [--mode execution|hybrid] [--workflows <dir>] [--config <path>]
//!
//! Every event envelope is printed to stdout as one JSON line; logs go to stderr.

use anyhow::{bail, Context};
use automation_lib::capabilities::CapabilityRequirement;
use automation_lib::config::{self, validate_config};
use automation_lib::driver::{Driver, HttpDriver};
use automation_lib::events::EventBus;
use automation_lib::session::{SessionManager, SessionMode, SessionSpec};
use automation_lib::workflow::{
    ExecutionPlan, ExecutionRequest, SubflowResolver, WorkflowExecutor, WorkflowManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Args {
    plan: PathBuf,
    mode: SessionMode,
    workflows: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut plan = None;
    let mut mode = SessionMode::Execution;
    let mut workflows = None;
    let mut config = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mode" => {
                let value = args.next().context("--mode needs a value")?;
                mode = match SessionMode::parse(&value) {
                    Some(m) if m.executes() => m,
                    _ => bail!("--mode must be execution or hybrid, got {}", value),
                };
            }
            "--workflows" => workflows = Some(PathBuf::from(args.next().context("--workflows needs a directory")?)),
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            other if other.starts_with("--") => bail!("unknown option {}", other),
            other => plan = Some(PathBuf::from(other)),
        }
    }

    Ok(Args {
        plan: plan.context("usage: automation-run <plan.json> [--mode execution|hybrid] [--workflows <dir>] [--config <path>]")?,
        mode,
        workflows,
        config,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    automation_lib::init_tracing();
    let args = parse_args()?;

    let engine_config = match &args.config {
        Some(path) => {
            let mut loaded = config::load_config_from(path)?;
            config::apply_env_overrides(&mut loaded);
            loaded
        }
        None => config::load_config()?,
    };
    validate_config(&engine_config)?;

    let content = std::fs::read_to_string(&args.plan)
        .with_context(|| format!("Failed to read plan {:?}", args.plan))?;
    let plan: ExecutionPlan = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse plan {:?}", args.plan))?;
    let plan = Arc::new(plan);

    let workflows = Arc::new(WorkflowManager::new());
    if let Some(dir) = &args.workflows {
        workflows.load_dir(dir)?;
    }

    let driver = Arc::new(HttpDriver::from_config(&engine_config.driver)?);
    let capabilities = driver.capabilities().await?;
    capabilities.validate()?;
    tracing::info!(
        "Connected to engine {} ({})",
        capabilities.engine,
        capabilities.version.as_deref().unwrap_or("unknown version")
    );

    let sessions = SessionManager::from_config(driver, &engine_config);
    let mut spec = SessionSpec::new(args.mode);
    spec.execution_id = Some(plan.execution_id);
    spec.capabilities = CapabilityRequirement::from_plan(&plan);
    let session = sessions.create(spec).await?;

    let bus = EventBus::new(engine_config.events);
    let stream = bus.open(plan.execution_id, plan.workflow_id);
    let printer = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move {
            while let Some(envelope) = stream.recv().await {
                match serde_json::to_string(&envelope) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::error!("Failed to encode envelope {}: {}", envelope.sequence, e),
                }
            }
        })
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling execution");
                cancel.cancel();
            }
        });
    }

    let resolver: Arc<dyn SubflowResolver> = workflows;
    let executor = WorkflowExecutor::new(engine_config.executor.clone())
        .with_resolver(resolver)
        .with_capabilities(capabilities);
    let request = ExecutionRequest::new(Arc::clone(&plan)).with_cancel(cancel);
    let report = executor.execute(&session, &stream, request).await;

    if let Err(e) = printer.await {
        tracing::error!("Event printer failed: {}", e);
    }
    bus.remove(&plan.execution_id);

    for (id, result) in sessions.close_all().await {
        match result {
            Ok(artifacts) => tracing::info!("Closed session {}: {:?}", id, artifacts),
            Err(e) => tracing::warn!("Session {} did not close cleanly: {}", id, e),
        }
    }

    tracing::info!(
        "Execution {} finished {:?} after {} step(s)",
        report.execution_id,
        report.status,
        report.steps_run
    );
    if !report.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}
