//! In-process server/client replication harness.
//!
//! One server bank replicates to any number of client banks over framed
//! packets. Objects spawned on the server become visible to the clients only
//! after a configurable delay, so references regularly arrive unmapped and
//! have to be replayed later.

use std::sync::Arc;

use anyhow::{Context, Result};
use polybank_core::{
    BitReader, BitWriter, NetRefId, ObjectId, ObjectRef, ObjectResolver, TypeIndexCache,
    TypeRegistry,
};
use polybank_net::{
    decode_packet, encode_packet, DataBank, DeltaBaseState, PacketKind, ReadReport,
    ReplicationPacket,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::objects::ObjectTable;

/// Traffic produced by one replication step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickStats {
    /// Packets delivered.
    pub packets: u64,
    /// Framed bytes delivered.
    pub bytes: u64,
    /// Records added or overwritten on clients.
    pub records: u64,
    /// Records removed on clients.
    pub removals: u64,
}

/// Outcome of one unmapped-reference poll across all clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Records replayed from their buffered bits.
    pub replays: u64,
    /// Clients still waiting on some reference.
    pub pending_clients: u64,
}

/// Result of a successful checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckpointReport {
    /// Replicate/poll rounds needed before every client matched the server.
    pub rounds: u32,
}

struct PendingReveal {
    due_tick: u64,
    id: NetRefId,
    object: ObjectId,
}

struct SessionClient {
    bank: DataBank,
    objects: ObjectTable,
    baseline: Option<Arc<DeltaBaseState>>,
    pending: Vec<PendingReveal>,
}

impl SessionClient {
    fn deliver_reveals(&mut self, tick: u64) {
        let objects = &mut self.objects;
        self.pending.retain(|reveal| {
            if reveal.due_tick > tick {
                return true;
            }
            objects.reveal(reveal.id, reveal.object);
            false
        });
    }

    fn receive(&mut self, frame: &[u8], schema_hash: u64) -> Result<ReadReport> {
        let packet = decode_packet(frame)?;
        if packet.schema_hash != schema_hash {
            anyhow::bail!(
                "Packet schema hash {:016x} does not match {:016x}",
                packet.schema_hash,
                schema_hash
            );
        }
        if packet.kind != PacketKind::Delta {
            anyhow::bail!("Expected a delta packet, got {:?}", packet.kind);
        }
        let mut reader = BitReader::with_bit_len(&packet.payload, packet.num_bits as usize);
        let report = self
            .bank
            .delta_read(&mut reader, &self.objects)
            .context("Failed to apply delta packet")?;
        if report.stream_error {
            anyhow::bail!("Delta packet for tick {} was truncated", packet.tick);
        }
        Ok(report)
    }
}

/// Loopback server with its connected clients.
pub struct LoopbackSession {
    server: DataBank,
    objects: ObjectTable,
    clients: Vec<SessionClient>,
    reveal_delay: u64,
    tick: u64,
    next_dynamic: u32,
    next_static: u32,
}

impl LoopbackSession {
    /// Server for `family` built from `registry`.
    pub fn new(registry: &TypeRegistry, family: &str, reveal_delay: u64) -> Result<Self> {
        let cache = TypeIndexCache::build(registry, family)?;
        Ok(Self {
            server: DataBank::new(Arc::new(cache)),
            objects: ObjectTable::new(),
            clients: Vec::new(),
            reveal_delay,
            tick: 0,
            next_dynamic: 1,
            next_static: 2,
        })
    }

    /// Connect a client whose types come from its own `registry`.
    ///
    /// The client builds its cache independently; the connection is refused
    /// when its index assignment differs from the server's.
    pub fn connect(&mut self, registry: &TypeRegistry) -> Result<usize> {
        let family = self.server.cache().family().to_string();
        let cache = TypeIndexCache::build(registry, family)?;
        let (server_hash, client_hash) = (self.schema_hash(), cache.schema_hash());
        if server_hash != client_hash {
            anyhow::bail!(
                "Schema mismatch: server {:016x}, client {:016x}",
                server_hash,
                client_hash
            );
        }

        let mut objects = ObjectTable::new();
        for id in self.objects.live_ids() {
            if let Some(object) = self.objects.resolve(id) {
                objects.reveal(id, object);
            }
        }
        self.clients.push(SessionClient {
            bank: DataBank::new(Arc::new(cache)),
            objects,
            baseline: None,
            pending: Vec::new(),
        });
        info!(client = self.clients.len() - 1, "client connected");
        Ok(self.clients.len() - 1)
    }

    /// Server cache fingerprint.
    pub fn schema_hash(&self) -> u64 {
        self.server.cache().schema_hash()
    }

    /// The authoritative bank.
    pub fn server(&self) -> &DataBank {
        &self.server
    }

    /// Mutable authoritative bank.
    pub fn server_mut(&mut self) -> &mut DataBank {
        &mut self.server
    }

    /// Bank of client `index`.
    pub fn client(&self, index: usize) -> Option<&DataBank> {
        self.clients.get(index).map(|client| &client.bank)
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Current simulation tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Objects alive on the server.
    pub fn live_objects(&self) -> Vec<ObjectRef> {
        self.objects
            .live_ids()
            .map(|id| ObjectRef::new(id, self.objects.resolve(id)))
            .collect()
    }

    /// Spawn an object on the server; clients see it after the reveal delay.
    pub fn spawn_object(&mut self, dynamic: bool) -> ObjectRef {
        let id = if dynamic {
            let id = self.next_dynamic;
            self.next_dynamic = self.next_dynamic.wrapping_add(2).max(1);
            NetRefId(id)
        } else {
            let id = self.next_static;
            self.next_static = self.next_static.wrapping_add(2).max(2);
            NetRefId(id)
        };
        let object = ObjectId(1_000 + u64::from(id.0));
        self.objects.reveal(id, object);
        let due_tick = self.tick + self.reveal_delay;
        for client in &mut self.clients {
            client.pending.push(PendingReveal {
                due_tick,
                id,
                object,
            });
        }
        debug!(%id, due_tick, "object spawned");
        ObjectRef::new(id, Some(object))
    }

    /// Destroy an object everywhere; clients stop waiting for it.
    pub fn despawn_object(&mut self, id: NetRefId) {
        self.objects.break_ref(id);
        for client in &mut self.clients {
            client.pending.retain(|reveal| reveal.id != id);
            client.bank.move_to_unmapped(id);
            client.objects.break_ref(id);
        }
        debug!(%id, "object despawned");
    }

    /// Send every client the changes since its last baseline.
    pub fn replicate(&mut self, tick: u64) -> Result<TickStats> {
        self.tick = tick;
        let schema_hash = self.schema_hash();
        let mut stats = TickStats::default();
        for (index, client) in self.clients.iter_mut().enumerate() {
            client.deliver_reveals(tick);

            let mut writer = BitWriter::new();
            let written = self
                .server
                .delta_write(&mut writer, client.baseline.as_ref())
                .with_context(|| format!("Failed to write delta for client {index}"))?;
            if written.unchanged {
                continue;
            }
            let (payload, num_bits) = writer.into_parts();
            let frame = encode_packet(&ReplicationPacket {
                schema_hash,
                tick,
                kind: PacketKind::Delta,
                num_bits: u32::try_from(num_bits).context("Delta payload too large")?,
                payload,
            })?;

            let read = client
                .receive(&frame, schema_hash)
                .with_context(|| format!("Client {index} rejected tick {tick}"))?;
            client.baseline = Some(written.new_state);

            stats.packets += 1;
            stats.bytes += frame.len() as u64;
            stats.records += (read.added.len() + read.changed.len()) as u64;
            stats.removals += read.removed.len() as u64;
        }
        Ok(stats)
    }

    /// Retry unresolved references on every client.
    pub fn poll_unmapped(&mut self) -> PollStats {
        let mut stats = PollStats::default();
        for client in &mut self.clients {
            let update = client.bank.update_unmapped(&client.objects);
            stats.replays += update.replayed.len() as u64;
            if update.has_more_unmapped {
                stats.pending_clients += 1;
            }
        }
        stats
    }

    /// True when client `index` decodes a full snapshot of the server with
    /// every reference resolved and ends up byte-identical to it.
    pub fn matches_server(&self, index: usize) -> Result<bool> {
        let client = self
            .clients
            .get(index)
            .with_context(|| format!("No client {index}"))?;

        let mut writer = BitWriter::new();
        self.server.net_serialize(&mut writer)?;
        let (payload, num_bits) = writer.into_parts();
        let frame = encode_packet(&ReplicationPacket {
            schema_hash: self.schema_hash(),
            tick: self.tick,
            kind: PacketKind::Full,
            num_bits: u32::try_from(num_bits).context("Snapshot payload too large")?,
            payload,
        })?;
        let packet = decode_packet(&frame)?;

        let mut snapshot = DataBank::new(Arc::clone(client.bank.cache()));
        let mut reader = BitReader::with_bit_len(&packet.payload, packet.num_bits as usize);
        if !snapshot.net_deserialize(&mut reader, &client.objects)? {
            return Ok(false);
        }
        Ok(encode_full(&snapshot)? == encode_full(&client.bank)?)
    }

    /// Reveal everything, then replicate and poll until every client holds
    /// the server state with no reference pending.
    pub fn checkpoint(&mut self, max_rounds: u32) -> Result<CheckpointReport> {
        for client in &mut self.clients {
            client.deliver_reveals(u64::MAX);
        }
        for round in 1..=max_rounds {
            self.replicate(self.tick)?;
            let poll = self.poll_unmapped();
            if poll.pending_clients > 0 {
                continue;
            }
            let mut converged = true;
            for index in 0..self.clients.len() {
                converged &= self.matches_server(index)?;
            }
            if converged {
                info!(rounds = round, clients = self.clients.len(), "checkpoint reached");
                return Ok(CheckpointReport { rounds: round });
            }
        }
        anyhow::bail!("Clients did not converge within {max_rounds} checkpoint rounds")
    }
}

fn encode_full(bank: &DataBank) -> Result<(Vec<u8>, usize)> {
    let mut writer = BitWriter::new();
    bank.net_serialize(&mut writer)?;
    Ok(writer.into_parts())
}
