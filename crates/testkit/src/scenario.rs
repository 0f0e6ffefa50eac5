//! Seeded random workload driven through a [`LoopbackSession`].

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::records::{test_registry, TestEscort, TestLabel, TestScore, TestTarget, TEST_FAMILY};
use crate::session::LoopbackSession;
use crate::{EventRecord, JsonlSink};

const LABEL_WORDS: &[&str] = &["alpha", "bravo", "charlie", "delta", "echo", "foxtrot"];

/// Parameters of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    /// Ticks of random mutations.
    pub ticks: u64,
    /// Connected clients.
    pub clients: usize,
    /// RNG seed.
    pub seed: u64,
    /// Ticks before clients see a spawned object.
    pub reveal_delay: u64,
    /// Rounds allowed for the final checkpoint.
    pub checkpoint_rounds: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            ticks: 200,
            clients: 2,
            seed: 0x5EED,
            reveal_delay: 4,
            checkpoint_rounds: 8,
        }
    }
}

/// Totals over a scenario run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioSummary {
    /// Ticks simulated.
    pub ticks: u64,
    /// Delta packets delivered.
    pub packets: u64,
    /// Framed bytes delivered.
    pub bytes: u64,
    /// Records added or overwritten on clients.
    pub records: u64,
    /// Records removed on clients.
    pub removals: u64,
    /// Records replayed after a reference resolved.
    pub replays: u64,
    /// Objects spawned on the server.
    pub spawned: u64,
    /// Objects destroyed on the server.
    pub despawned: u64,
    /// Rounds the final checkpoint needed.
    pub checkpoint_rounds: u32,
}

/// Run the workload and finish with a checkpoint.
///
/// Fails if any client rejects a packet or the clients do not converge.
pub fn run_scenario(
    config: &ScenarioConfig,
    mut sink: Option<&mut JsonlSink>,
) -> Result<ScenarioSummary> {
    let registry = test_registry()?;
    let mut session = LoopbackSession::new(&registry, TEST_FAMILY, config.reveal_delay)?;
    for _ in 0..config.clients {
        session.connect(&registry)?;
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut summary = ScenarioSummary::default();
    for tick in 1..=config.ticks {
        let op = mutate(&mut rng, &mut session, &mut summary)?;
        let stats = session.replicate(tick)?;
        let poll = session.poll_unmapped();
        summary.ticks = tick;
        summary.packets += stats.packets;
        summary.bytes += stats.bytes;
        summary.records += stats.records;
        summary.removals += stats.removals;
        summary.replays += poll.replays;
        debug!(tick, op, packets = stats.packets, pending = poll.pending_clients, "tick");

        if let Some(sink) = sink.as_deref_mut() {
            let payload = serde_json::to_string(&stats)?;
            sink.write(&EventRecord {
                tick,
                kind: op,
                payload: &payload,
            })?;
        }
    }

    let checkpoint = session.checkpoint(config.checkpoint_rounds)?;
    summary.checkpoint_rounds = checkpoint.rounds;
    if let Some(sink) = sink {
        let payload = serde_json::to_string(&summary)?;
        sink.write(&EventRecord {
            tick: summary.ticks,
            kind: "Checkpoint",
            payload: &payload,
        })?;
    }
    info!(
        ticks = summary.ticks,
        packets = summary.packets,
        bytes = summary.bytes,
        replays = summary.replays,
        "scenario finished"
    );
    Ok(summary)
}

fn mutate(
    rng: &mut StdRng,
    session: &mut LoopbackSession,
    summary: &mut ScenarioSummary,
) -> Result<&'static str> {
    let op = match rng.gen_range(0..12) {
        0..=2 => {
            let value = rng.gen_range(-1_000..1_000);
            session.server_mut().get_or_add::<TestScore>()?.value = value;
            "SetScore"
        }
        3 => {
            let word = LABEL_WORDS[rng.gen_range(0..LABEL_WORDS.len())];
            let text = format!("{word}-{}", session.tick());
            session.server_mut().set_by_copy(&TestLabel { text })?;
            "SetLabel"
        }
        4 | 5 => {
            let target = pick_object(rng, session, summary);
            session.server_mut().set_by_copy(&TestTarget { target })?;
            "SetTarget"
        }
        6 => {
            let leader = pick_object(rng, session, summary);
            let wingman = pick_object(rng, session, summary);
            let formation = rng.gen();
            session.server_mut().set_by_copy(&TestEscort {
                leader,
                wingman,
                formation,
            })?;
            "SetEscort"
        }
        7 => {
            let bank = session.server_mut();
            match rng.gen_range(0..4) {
                0 => bank.remove::<TestScore>(),
                1 => bank.remove::<TestLabel>(),
                2 => bank.remove::<TestTarget>(),
                _ => bank.remove::<TestEscort>(),
            };
            "Remove"
        }
        8 => {
            session.spawn_object(rng.gen_bool(0.5));
            summary.spawned += 1;
            "Spawn"
        }
        9 => {
            let live = session.live_objects();
            if live.is_empty() {
                "Idle"
            } else {
                let victim = live[rng.gen_range(0..live.len())];
                session.despawn_object(victim.id());
                summary.despawned += 1;
                "Despawn"
            }
        }
        10 => {
            if rng.gen_bool(0.1) {
                session.server_mut().empty();
                "Empty"
            } else {
                session.server_mut().mark_dirty::<TestScore>();
                "Touch"
            }
        }
        _ => "Idle",
    };
    Ok(op)
}

fn pick_object(
    rng: &mut StdRng,
    session: &mut LoopbackSession,
    summary: &mut ScenarioSummary,
) -> polybank_core::ObjectRef {
    let live = session.live_objects();
    if live.is_empty() || rng.gen_bool(0.3) {
        summary.spawned += 1;
        return session.spawn_object(rng.gen_bool(0.5));
    }
    live[rng.gen_range(0..live.len())]
}
