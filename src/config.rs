use anyhow::Result;
use polybank_testkit::ScenarioConfig;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

const DEFAULT_SIMULATION_PATH: &str = "config/simulation.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Ticks of random mutations before the final checkpoint.
    pub ticks: u64,
    /// Number of loopback clients.
    pub clients: usize,
    pub seed: u64,
    /// Ticks before clients can resolve a newly spawned object.
    pub reveal_delay: u64,
    /// Replicate/poll rounds allowed for the final checkpoint.
    pub checkpoint_rounds: u32,
    /// Optional newline-delimited JSON event log.
    pub event_log: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let scenario = ScenarioConfig::default();
        Self {
            ticks: scenario.ticks,
            clients: scenario.clients,
            seed: scenario.seed,
            reveal_delay: scenario.reveal_delay,
            checkpoint_rounds: scenario.checkpoint_rounds,
            event_log: None,
        }
    }
}

impl SimulationConfig {
    /// Load simulation configuration from the default path.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(DEFAULT_SIMULATION_PATH))
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<SimulationConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    SimulationConfig::default()
                }
            },
            Err(err) => {
                if path != Path::new(DEFAULT_SIMULATION_PATH)
                    || err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                SimulationConfig::default()
            }
        }
    }

    /// Save simulation configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn scenario(&self) -> ScenarioConfig {
        ScenarioConfig {
            ticks: self.ticks,
            clients: self.clients,
            seed: self.seed,
            reveal_delay: self.reveal_delay,
            checkpoint_rounds: self.checkpoint_rounds.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("polybank_{name}_{timestamp}.toml"))
    }

    #[test]
    fn saved_config_loads_back() {
        let path = temp_path("roundtrip");
        let cfg = SimulationConfig {
            ticks: 12,
            clients: 5,
            event_log: Some(PathBuf::from("events.jsonl")),
            ..SimulationConfig::default()
        };
        cfg.save_to_path(&path).expect("save");
        assert_eq!(SimulationConfig::load_from_path(&path), cfg);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn partial_files_keep_defaults() {
        let path = temp_path("partial");
        fs::write(&path, "seed = 99\n").expect("write");
        let cfg = SimulationConfig::load_from_path(&path);
        assert_eq!(cfg.seed, 99);
        assert_eq!(cfg.ticks, SimulationConfig::default().ticks);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn malformed_files_fall_back_to_defaults() {
        let path = temp_path("malformed");
        fs::write(&path, "ticks = \"many\"\n").expect("write");
        assert_eq!(
            SimulationConfig::load_from_path(&path),
            SimulationConfig::default()
        );
        let _ = fs::remove_file(&path);
    }
}
