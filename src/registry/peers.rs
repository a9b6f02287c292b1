//! # Observed remote peers.
//!
//! The peer table stores by-value snapshots of remote [`HostDescriptor`]s
//! keyed by `(host.id, host.name)`, together with the source address of the
//! last announcement and a monotonic last-seen instant. No cross-references,
//! no cycles; eviction drops the snapshot.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::proto::HostDescriptor;

/// Peer table key: announcements from a restarted sibling (same name, new id)
/// form a new entry; the stale one expires on its own.
pub type PeerKey = (u32, String);

/// An observed remote peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Snapshot of the peer's descriptor from its last announcement.
    pub host: HostDescriptor,
    /// Source address of the last announcement datagram.
    pub ipaddr: IpAddr,
    /// When the last announcement arrived.
    pub lastseen: Instant,
}

/// Peer table contents; the registry wraps this in its own lock.
#[derive(Debug, Default)]
pub struct PeerTable {
    entries: HashMap<PeerKey, PeerEntry>,
}

impl PeerTable {
    /// Inserts or refreshes a peer. Returns `true` when the peer was not
    /// known before (first announcement or post-expiry reappearance).
    pub fn upsert(&mut self, host: HostDescriptor, ipaddr: IpAddr, now: Instant) -> bool {
        let key = (host.id, host.name.clone());
        self.entries
            .insert(
                key,
                PeerEntry {
                    host,
                    ipaddr,
                    lastseen: now,
                },
            )
            .is_none()
    }

    /// Finds a peer by host id.
    ///
    /// Result delivery looks peers up by the submitting master's id alone;
    /// ids are unique per boot across the LAN's supervisors.
    pub fn find_by_id(&self, id: u32) -> Option<&PeerEntry> {
        self.entries.values().find(|p| p.host.id == id)
    }

    /// Drops entries not seen within `expiry`. Returns the evicted peers.
    /// Idempotent: sweeping twice evicts nothing the second time.
    pub fn sweep(&mut self, now: Instant, expiry: Duration) -> Vec<PeerEntry> {
        let mut evicted = Vec::new();
        self.entries.retain(|_, entry| {
            let fresh = now.duration_since(entry.lastseen) <= expiry;
            if !fresh {
                evicted.push(entry.clone());
            }
            fresh
        });
        evicted
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no peers are known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
