use anyhow::{Context, Result};
use polybank_testkit::{run_scenario, JsonlSink, ScenarioConfig, ScenarioSummary};
use std::path::PathBuf;

pub struct HeadlessConfig {
    pub scenario: ScenarioConfig,
    pub event_log: Option<PathBuf>,
}

pub fn run(cfg: HeadlessConfig) -> Result<ScenarioSummary> {
    tracing::info!(
        ticks = cfg.scenario.ticks,
        clients = cfg.scenario.clients,
        seed = cfg.scenario.seed,
        "starting replication simulation"
    );

    let mut sink = match cfg.event_log.as_deref() {
        Some(path) => Some(
            JsonlSink::create(path)
                .with_context(|| format!("failed to create event log {}", path.display()))?,
        ),
        None => None,
    };

    run_scenario(&cfg.scenario, sink.as_mut()).context("replication simulation failed")
}
