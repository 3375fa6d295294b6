use std::sync::Arc;

use anyhow::Context;
use probe_common::{EngineConfig, ProbeError};
use probe_engine::{ProbeProcessor, ProbeSpec};
use probe_notifier::{TemplateRegistry, WebhookTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "probe_runner=info,probe_engine=info,probe_notifier=info".into()
            }),
        )
        .json()
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: probe-runner <probes.json>")?;

    tracing::info!(batch = %path, "SQL probe runner starting...");

    // Load configuration
    let config = EngineConfig::from_env()?;

    let mut templates = TemplateRegistry::new();
    if let Some(dir) = &config.template_dir {
        templates.load_dir(dir)?;
    }
    let transport = WebhookTransport::new(config.request_timeout)?;

    let raw = std::fs::read_to_string(&path).with_context(|| format!("cannot read {}", path))?;
    let specs: Vec<ProbeSpec> =
        serde_json::from_str(&raw).with_context(|| format!("invalid probe batch in {}", path))?;

    let processor = ProbeProcessor::connect(config, Arc::new(templates))?
        .with_async_transport(Arc::new(transport));

    match processor.execute_batch_async(&specs, None).await {
        Ok(report) => {
            tracing::info!(
                batch_id = %report.batch_id,
                highest_level = %report.highest_level,
                summary = %report.summary(),
                "Batch finished"
            );
            Ok(())
        }
        Err(ProbeError::Interrupted(interrupt)) => {
            if let Some(report) = &interrupt.report {
                tracing::error!(
                    batch_id = %report.batch_id,
                    summary = %report.summary(),
                    "Batch interrupted"
                );
            }
            Err(ProbeError::Interrupted(interrupt).into())
        }
        Err(e) => Err(e.into()),
    }
}
