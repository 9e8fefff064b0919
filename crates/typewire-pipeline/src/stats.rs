use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use typewire_frame::LinkStats;

/// Live pipeline counters shared by every stage of one service.
#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    pub(crate) dispatched: AtomicU64,
    pub(crate) sent: AtomicU64,
    pub(crate) rejected_sends: AtomicU64,
    pub(crate) inbound_drops: AtomicU64,
    pub(crate) outbound_drops: AtomicU64,
    pub(crate) write_failures: AtomicU64,
    pub(crate) manifests_applied: AtomicU64,
    pub(crate) manifest_requests_sent: AtomicU64,
    pub(crate) manifest_requests_answered: AtomicU64,
    pub(crate) logged: AtomicU64,
}

impl PipelineCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, link: LinkStats) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            dispatched: load(&self.dispatched),
            sent: load(&self.sent),
            rejected_sends: load(&self.rejected_sends),
            inbound_drops: load(&self.inbound_drops),
            outbound_drops: load(&self.outbound_drops),
            write_failures: load(&self.write_failures),
            manifests_applied: load(&self.manifests_applied),
            manifest_requests_sent: load(&self.manifest_requests_sent),
            manifest_requests_answered: load(&self.manifest_requests_answered),
            logged: load(&self.logged),
            link,
        }
    }
}

/// Snapshot of a service's counters.
///
/// Every silent drop on the wire shows up here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Application messages handed to the input handler.
    pub dispatched: u64,
    /// Messages accepted by the serializer.
    pub sent: u64,
    /// `send` calls rejected before reaching the serializer.
    pub rejected_sends: u64,
    /// Inbound messages dropped on a full input queue.
    pub inbound_drops: u64,
    /// Outbound messages dropped on a full output queue.
    pub outbound_drops: u64,
    /// Queued messages whose frame write failed.
    pub write_failures: u64,
    /// Peer manifests applied to the registry.
    pub manifests_applied: u64,
    /// Manifest requests sent by the requester.
    pub manifest_requests_sent: u64,
    /// Peer manifest requests answered with the local manifest.
    pub manifest_requests_answered: u64,
    /// Messages written to the attached logger.
    pub logged: u64,
    /// Frame-level counters of the live link.
    pub link: LinkStats,
}
