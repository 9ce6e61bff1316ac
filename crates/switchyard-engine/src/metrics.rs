//! Per-tick and cumulative dispatcher metrics.
//!
//! [`TickMetrics`] captures what a single drain pass did;
//! [`DispatchCounters`] accumulates the same quantities over the
//! dispatcher's lifetime for telemetry.

/// Counts and timing collected during one drain pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickMetrics {
    /// Wall-clock time spent in the pass, in microseconds.
    pub elapsed_us: u64,
    /// Number of completion-queue polls.
    pub polls: u64,
    /// Number of events received (including dropped ones).
    pub events: u64,
    /// Calls accepted (`REQUESTED → HANDLING`). Each one armed exactly
    /// one spare slot.
    pub calls_accepted: u64,
    /// Unary responses written.
    pub final_writes: u64,
    /// Streaming items written.
    pub stream_writes: u64,
    /// Streams closed with a terminal status.
    pub stream_finishes: u64,
    /// Calls retired after their terminal operation completed.
    pub calls_finished: u64,
    /// Accepted calls torn down before finishing: the transport reported
    /// `ok = false`, or the server stopped under them.
    pub calls_aborted: u64,
    /// Armed slots cancelled before any call arrived on them.
    pub slots_cancelled: u64,
    /// Events whose tag no longer maps to a live manager.
    pub events_dropped: u64,
    /// Handler replies discarded because the call had moved on.
    pub replies_discarded: u64,
    /// Writes that were in flight when the pass started.
    pub awaited_writes: u64,
    /// Whether the wall-clock budget ended the pass.
    pub budget_exhausted: bool,
}

/// Lifetime totals of [`TickMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    /// Drain passes executed while initialized.
    pub ticks: u64,
    /// Total calls accepted.
    pub calls_accepted: u64,
    /// Total unary responses written.
    pub final_writes: u64,
    /// Total streaming items written.
    pub stream_writes: u64,
    /// Total streams closed.
    pub stream_finishes: u64,
    /// Total calls retired normally.
    pub calls_finished: u64,
    /// Total accepted calls torn down before finishing.
    pub calls_aborted: u64,
    /// Total armed slots cancelled, mostly by server stops.
    pub slots_cancelled: u64,
    /// Total events dropped for retired tags.
    pub events_dropped: u64,
    /// Total handler replies discarded.
    pub replies_discarded: u64,
    /// Total handling calls failed because their service was deactivated.
    pub deactivation_failures: u64,
    /// Total passes cut short by the wall-clock budget.
    pub budget_exhaustions: u64,
}

impl DispatchCounters {
    /// Fold one pass into the totals.
    pub fn record(&mut self, m: &TickMetrics) {
        self.ticks += 1;
        self.absorb(m);
        if m.budget_exhausted {
            self.budget_exhaustions += 1;
        }
    }

    /// Fold work done outside a drain pass, e.g. replies applied while
    /// deactivating a service.
    pub(crate) fn absorb(&mut self, m: &TickMetrics) {
        self.calls_accepted += m.calls_accepted;
        self.final_writes += m.final_writes;
        self.stream_writes += m.stream_writes;
        self.stream_finishes += m.stream_finishes;
        self.calls_finished += m.calls_finished;
        self.calls_aborted += m.calls_aborted;
        self.slots_cancelled += m.slots_cancelled;
        self.events_dropped += m.events_dropped;
        self.replies_discarded += m.replies_discarded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = TickMetrics::default();
        assert_eq!(m.elapsed_us, 0);
        assert_eq!(m.polls, 0);
        assert_eq!(m.events, 0);
        assert_eq!(m.calls_accepted, 0);
        assert!(!m.budget_exhausted);
        assert_eq!(DispatchCounters::default().ticks, 0);
    }

    #[test]
    fn record_accumulates() {
        let mut c = DispatchCounters::default();
        let m = TickMetrics {
            calls_accepted: 2,
            stream_writes: 3,
            calls_aborted: 1,
            slots_cancelled: 3,
            budget_exhausted: true,
            ..Default::default()
        };
        c.record(&m);
        c.record(&m);
        assert_eq!(c.ticks, 2);
        assert_eq!(c.calls_accepted, 4);
        assert_eq!(c.stream_writes, 6);
        assert_eq!(c.calls_aborted, 2);
        assert_eq!(c.slots_cancelled, 6);
        assert_eq!(c.budget_exhaustions, 2);
    }

    #[test]
    fn absorb_does_not_count_a_tick() {
        let mut c = DispatchCounters::default();
        c.absorb(&TickMetrics {
            final_writes: 1,
            budget_exhausted: true,
            ..Default::default()
        });
        assert_eq!(c.ticks, 0);
        assert_eq!(c.final_writes, 1);
        assert_eq!(c.budget_exhaustions, 0);
    }
}
