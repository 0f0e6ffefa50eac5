//! polybank - headless data bank replication simulator
//!
//! Drives a seeded workload through a loopback server and its clients, then
//! checks that every client converged on the server's bank.

mod config;
mod headless;

use anyhow::Result;
use config::SimulationConfig;
use headless::HeadlessConfig;
use std::{env, path::PathBuf};
use tracing::info;

fn main() -> Result<()> {
    // Initialize tracing with WARN level by default (can be overridden via RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    info!("Starting polybank v{}", env!("CARGO_PKG_VERSION"));

    let cli = CliOptions::parse(env::args().skip(1));
    let mut config = match cli.config.as_deref() {
        Some(path) => SimulationConfig::load_from_path(path),
        None => SimulationConfig::load(),
    };
    cli.apply(&mut config);

    if let Some(path) = cli.write_config.as_deref() {
        config.save_to_path(path)?;
        info!(path = %path.display(), "wrote effective configuration");
    }

    let summary = headless::run(HeadlessConfig {
        scenario: config.scenario(),
        event_log: config.event_log.clone(),
    })?;
    info!(
        packets = summary.packets,
        bytes = summary.bytes,
        checkpoint_rounds = summary.checkpoint_rounds,
        "simulation converged"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[derive(Debug, Default)]
struct CliOptions {
    config: Option<PathBuf>,
    write_config: Option<PathBuf>,
    ticks: Option<u64>,
    clients: Option<usize>,
    seed: Option<u64>,
    reveal_delay: Option<u64>,
    event_log: Option<PathBuf>,
}

impl CliOptions {
    fn parse<I: Iterator<Item = String>>(mut args: I) -> Self {
        let mut opts = CliOptions::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    if let Some(path) = args.next() {
                        opts.config = Some(PathBuf::from(path));
                    } else {
                        tracing::error!("--config requires a file path");
                    }
                }
                "--write-config" => {
                    if let Some(path) = args.next() {
                        opts.write_config = Some(PathBuf::from(path));
                    } else {
                        tracing::error!("--write-config requires a file path");
                    }
                }
                "--event-log" => {
                    if let Some(path) = args.next() {
                        opts.event_log = Some(PathBuf::from(path));
                    } else {
                        tracing::error!("--event-log requires a file path");
                    }
                }
                "--ticks" => opts.ticks = parse_number(&arg, args.next()),
                "--clients" => opts.clients = parse_number(&arg, args.next()),
                "--seed" => opts.seed = parse_number(&arg, args.next()),
                "--reveal-delay" => opts.reveal_delay = parse_number(&arg, args.next()),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other => {
                    tracing::warn!(arg = %other, "ignoring unknown argument");
                }
            }
        }

        opts
    }

    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(ticks) = self.ticks {
            config.ticks = ticks;
        }
        if let Some(clients) = self.clients {
            config.clients = clients;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(delay) = self.reveal_delay {
            config.reveal_delay = delay;
        }
        if let Some(path) = self.event_log.clone() {
            config.event_log = Some(path);
        }
    }
}

fn parse_number<T>(flag: &str, raw: Option<String>) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        tracing::error!("{flag} requires an integer");
        return None;
    };
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!(%err, value = %raw, "{flag} must be an integer");
            None
        }
    }
}

fn print_usage() {
    println!(
        "Usage: polybank [--config PATH] [--write-config PATH] [--ticks N] [--clients N]\n\
         \x20               [--seed N] [--reveal-delay N] [--event-log PATH]"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn flags_override_config_values() {
        let cli = parse(&["--ticks", "40", "--clients", "3", "--seed", "9"]);
        let mut config = SimulationConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.ticks, 40);
        assert_eq!(config.clients, 3);
        assert_eq!(config.seed, 9);
        assert_eq!(
            config.reveal_delay,
            SimulationConfig::default().reveal_delay
        );
    }

    #[test]
    fn malformed_numbers_are_ignored() {
        let cli = parse(&["--ticks", "lots", "--reveal-delay"]);
        assert_eq!(cli.ticks, None);
        assert_eq!(cli.reveal_delay, None);
    }

    #[test]
    fn paths_are_collected() {
        let cli = parse(&["--config", "a.toml", "--event-log", "out/events.jsonl"]);
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        let mut config = SimulationConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.event_log, Some(PathBuf::from("out/events.jsonl")));
    }
}
