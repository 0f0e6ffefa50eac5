#![warn(missing_docs)]
//! Replication test surfaces: sample records, a loopback client/server
//! session, a seeded workload and a JSONL event stream.

mod objects;
mod records;
mod scenario;
mod session;

use anyhow::Result;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub use objects::ObjectTable;
pub use records::*;
pub use scenario::{run_scenario, ScenarioConfig, ScenarioSummary};
pub use session::{CheckpointReport, LoopbackSession, PollStats, TickStats};

/// Primary event record captured by headless runs.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// Simulation tick when the event occurred.
    pub tick: u64,
    /// Human-readable kind label.
    pub kind: &'a str,
    /// Free-form payload, usually JSON.
    pub payload: &'a str,
}

/// A sink that writes newline-delimited JSON to disk.
pub struct JsonlSink {
    file: File,
}

impl JsonlSink {
    /// Create a new sink at `path`, creating parent dirs if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self { file })
    }

    /// Append an event to the log.
    pub fn write(&mut self, event: &EventRecord<'_>) -> Result<()> {
        let line = serde_json::to_string(event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        Ok(())
    }
}
