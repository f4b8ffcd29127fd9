use parking_lot::RwLock;
use std::sync::Arc;

/// Counters describing what the forwarder did with incoming events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub events_received: u64,
    /// Untracked ports, or any event while in periodic mode.
    pub events_ignored: u64,
    pub events_rate_limited: u64,
    pub sends_succeeded: u64,
    pub sends_failed: u64,
    /// Field values discarded together with a failed batch.
    pub values_dropped: u64,
}

/// Shared, lock-protected stats.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: RwLock<ForwarderStats>,
}

impl StatsRecorder {
    pub fn update(&self, f: impl FnOnce(&mut ForwarderStats)) {
        f(&mut self.inner.write());
    }

    pub fn snapshot(&self) -> ForwarderStats {
        self.inner.read().clone()
    }
}

pub type SharedStats = Arc<StatsRecorder>;
