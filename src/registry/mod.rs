//! # Shared registry.
//!
//! One process-wide [`Registry`] value replaces the original design's
//! module-level singletons: it owns the self descriptor, the peer table, the
//! job queue, the access lists and the policy switches. Every task holds it
//! by `Arc` and coordinates through its operations.
//!
//! ## Locking rules
//! - Each logical aggregate has its **own** lock; no operation takes two
//!   registry locks at once.
//! - No lock is ever held across blocking I/O or an engine call: mutators
//!   return a post-mutation snapshot, and composite reads snapshot under the
//!   lock then release before doing anything slow.
//! - Announcements happen *after* the host lock is released, so receivers may
//!   briefly observe stale status but never a torn descriptor.

mod access;
mod jobs;
mod peers;
mod smart;

pub use access::{AccessLists, DenyReason};
pub use jobs::{JobEntry, SizeMismatch};
pub use peers::{PeerEntry, PeerKey, PeerTable};
pub use smart::{SmartCpu, SmartMem, SmartShare};

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::proto::{HostDescriptor, Status};

/// Process-wide shared state for all service tasks.
pub struct Registry {
    /// This node's descriptor.
    host: RwLock<HostDescriptor>,
    /// Observed remote peers.
    peers: RwLock<PeerTable>,
    /// FIFO queue of accepted jobs.
    jobs: Mutex<VecDeque<JobEntry>>,
    /// Intake allow lists, fixed at startup.
    access: RwLock<AccessLists>,
    /// Adaptive switches.
    smartmem: RwLock<SmartMem>,
    smartcpu: RwLock<SmartCpu>,
    smartshare: Mutex<SmartShare>,
}

impl Registry {
    /// Creates a registry around an initial host descriptor.
    pub fn new(host: HostDescriptor, access: AccessLists) -> Self {
        Self {
            host: RwLock::new(host),
            peers: RwLock::new(PeerTable::default()),
            jobs: Mutex::new(VecDeque::new()),
            access: RwLock::new(access),
            smartmem: RwLock::new(SmartMem::default()),
            smartcpu: RwLock::new(SmartCpu::default()),
            smartshare: Mutex::new(SmartShare::default()),
        }
    }

    /// Overrides the policy switches (from configuration).
    pub async fn configure_smart(&self, mem: bool, cpu: bool, share: bool) {
        self.smartmem.write().await.enabled = mem;
        self.smartcpu.write().await.enabled = cpu;
        self.smartshare.lock().await.enabled = share;
    }

    // ---- host descriptor ----

    /// Mutates the host descriptor under its lock and returns the resulting
    /// snapshot.
    ///
    /// Callers announce the snapshot *after* this returns; the lock is never
    /// held across the send.
    pub async fn update_host<F>(&self, f: F) -> HostDescriptor
    where
        F: FnOnce(&mut HostDescriptor),
    {
        let mut host = self.host.write().await;
        f(&mut host);
        host.clone()
    }

    /// Returns a copy of the current host descriptor.
    pub async fn snapshot_host(&self) -> HostDescriptor {
        self.host.read().await.clone()
    }

    /// Returns the descriptor to put on the wire, with smart adjustments:
    /// while BUSY, enabled smartmem/smartcpu subtract the running job's
    /// requests from the advertised resources.
    pub async fn advertised_host(&self) -> HostDescriptor {
        let mut host = self.snapshot_host().await;
        if host.status == Status::Busy {
            if self.smartmem.read().await.enabled {
                host.memavail = host.memavail.saturating_sub(host.current.memreq);
            }
            if self.smartcpu.read().await.enabled {
                host.cpuavail = host.cpuavail.saturating_sub(host.current.cpureq);
            }
        }
        host
    }

    // ---- access policy ----

    /// Checks a submitter against the allow lists.
    pub async fn admit(&self, submitter: &HostDescriptor) -> Result<(), DenyReason> {
        self.access.read().await.admit(submitter)
    }

    // ---- job queue ----

    /// Appends a job to the queue.
    pub async fn enqueue_job(&self, job: JobEntry) {
        self.jobs.lock().await.push_back(job);
    }

    /// Number of queued jobs.
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Returns a copy of the oldest queued job without removing it.
    ///
    /// The slave loop clears the queue once the result send has been
    /// attempted, mirroring the at-most-one-job-in-flight model.
    pub async fn front_job(&self) -> Option<JobEntry> {
        self.jobs.lock().await.front().cloned()
    }

    /// Drops every queued job.
    pub async fn clear_jobs(&self) {
        self.jobs.lock().await.clear();
    }

    // ---- peer table ----

    /// Inserts or refreshes a peer; returns `true` for first sightings.
    pub async fn upsert_peer(&self, host: HostDescriptor, ipaddr: IpAddr) -> bool {
        self.peers
            .write()
            .await
            .upsert(host, ipaddr, Instant::now())
    }

    /// Looks up a peer by host id, returning a snapshot.
    pub async fn find_peer(&self, id: u32) -> Option<PeerEntry> {
        self.peers.read().await.find_by_id(id).cloned()
    }

    /// Evicts peers unseen for longer than `expiry`; returns the evicted
    /// snapshots for logging.
    pub async fn sweep_peers(&self, expiry: Duration) -> Vec<PeerEntry> {
        self.peers.write().await.sweep(Instant::now(), expiry)
    }

    /// Number of currently known peers.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    // ---- smartshare ----

    /// Computes the post-job announce delay (zero when smartshare is off).
    pub async fn share_delay(&self) -> Duration {
        self.smartshare.lock().await.next_delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{CurrentJob, JobDef};
    use std::net::Ipv4Addr;

    fn registry() -> Registry {
        Registry::new(
            HostDescriptor {
                id: 1,
                name: "node1".into(),
                user: "worker".into(),
                memavail: 1 << 30,
                cpuavail: 1000,
                timavail: 3600,
                ..HostDescriptor::default()
            },
            AccessLists::default(),
        )
    }

    #[tokio::test]
    async fn update_host_returns_post_mutation_snapshot() {
        let reg = registry();
        let snap = reg
            .update_host(|h| {
                h.status = Status::Busy;
                h.current.jobid = 7;
            })
            .await;
        assert_eq!(snap.status, Status::Busy);
        assert_eq!(reg.snapshot_host().await.current.jobid, 7);
    }

    #[tokio::test]
    async fn job_queue_is_fifo_and_clearable() {
        let reg = registry();
        for id in [1u32, 2] {
            let def = JobDef {
                id,
                argsize: 1,
                optsize: 0,
                ..JobDef::default()
            };
            reg.enqueue_job(
                JobEntry::new(HostDescriptor::default(), def, vec![0], vec![]).unwrap(),
            )
            .await;
        }
        assert_eq!(reg.job_count().await, 2);
        assert_eq!(reg.front_job().await.unwrap().def.id, 1);
        reg.clear_jobs().await;
        assert_eq!(reg.job_count().await, 0);
        assert!(reg.front_job().await.is_none());
    }

    #[tokio::test]
    async fn smart_switches_shrink_busy_advertisement() {
        let reg = registry();
        reg.configure_smart(true, true, false).await;
        reg.update_host(|h| {
            h.status = Status::Busy;
            h.current = CurrentJob {
                memreq: 1 << 20,
                cpureq: 100,
                ..CurrentJob::default()
            };
        })
        .await;

        let adv = reg.advertised_host().await;
        assert_eq!(adv.memavail, (1 << 30) - (1 << 20));
        assert_eq!(adv.cpuavail, 900);

        // Idle advertisement is untouched.
        reg.update_host(|h| {
            h.status = Status::Idle;
            h.current = CurrentJob::default();
        })
        .await;
        assert_eq!(reg.advertised_host().await.memavail, 1 << 30);
    }

    #[tokio::test]
    async fn disabled_smart_switches_advertise_raw_values() {
        let reg = registry();
        reg.configure_smart(false, false, false).await;
        reg.update_host(|h| {
            h.status = Status::Busy;
            h.current.memreq = 1 << 20;
        })
        .await;
        assert_eq!(reg.advertised_host().await.memavail, 1 << 30);
        assert_eq!(reg.share_delay().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn peer_ops_roundtrip() {
        let reg = registry();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let peer = HostDescriptor {
            id: 9,
            name: "node9".into(),
            ..HostDescriptor::default()
        };
        assert!(reg.upsert_peer(peer.clone(), ip).await);
        assert!(!reg.upsert_peer(peer, ip).await);
        assert_eq!(reg.find_peer(9).await.unwrap().ipaddr, ip);

        let evicted = reg.sweep_peers(Duration::ZERO).await;
        assert_eq!(evicted.len(), 1);
        assert!(reg.find_peer(9).await.is_none());
    }
}
