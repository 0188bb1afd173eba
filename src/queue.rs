//! Event-queue fan-out: attach/detach consumers on an element, dispatch
//! change notifications on `process_report`.
//!
//! The consumer contract (`ReportQueue`) is intentionally the minimal
//! capability the specification names: `enqueue` plus `options`. Nothing
//! here knows how a queue is actually backed (ring buffer, channel,
//! syscall) — that is the surrounding device layer's concern, explicitly
//! out of scope.

use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Per-consumer delivery preferences.
    #[derive(Default)]
    pub struct QueueOptions: u32 {
        /// Deliver every `process_report` visit for this element, not
        /// just the ones where the value actually changed.
        const ENQUEUE_ALL = 1 << 0;
    }
}

/// A single event-queue consumer. Implementors back `enqueue` with
/// whatever transport they like; this crate only needs the boolean
/// success/failure signal to decide whether to log a one-shot warning.
pub trait ReportQueue: Send + Sync {
    /// Attempt to deliver `payload` (the element's current total-size
    /// value, header included). Returns `false` on backpressure/full —
    /// never blocks.
    fn enqueue(&self, payload: &[u8]) -> bool;

    fn options(&self) -> QueueOptions;
}

/// The list of consumers attached to one element. Attach/detach are
/// idempotent, matching §4.6: a duplicate attach is a no-op that reports
/// failure, detaching something not present is a no-op.
#[derive(Default)]
pub struct QueueList {
    queues: Vec<Arc<dyn ReportQueue>>,
    failure_tally: u64,
}

impl std::fmt::Debug for QueueList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueList")
            .field("len", &self.queues.len())
            .field("failure_tally", &self.failure_tally)
            .finish()
    }
}

impl Clone for QueueList {
    fn clone(&self) -> Self {
        Self { queues: self.queues.clone(), failure_tally: self.failure_tally }
    }
}

impl QueueList {
    /// Returns `true` if the queue was newly attached, `false` if it was
    /// already present (pointer equality, per §4.6).
    pub fn attach(&mut self, queue: Arc<dyn ReportQueue>) -> bool {
        if self.queues.iter().any(|q| Arc::ptr_eq(q, &queue)) {
            return false;
        }
        self.queues.push(queue);
        true
    }

    /// Returns `true` if a matching queue was found and removed.
    pub fn detach(&mut self, queue: &Arc<dyn ReportQueue>) -> bool {
        let before = self.queues.len();
        self.queues.retain(|q| !Arc::ptr_eq(q, queue));
        self.queues.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn failure_tally(&self) -> u64 {
        self.failure_tally
    }

    /// Dispatch `payload` to every attached consumer for which
    /// `should_process` or `ENQUEUE_ALL` applies. Failures are tallied
    /// and logged once; dispatch never stops early on a failure.
    pub fn dispatch(&mut self, payload: &[u8], should_process: bool) {
        for queue in &self.queues {
            if !should_process && !queue.options().contains(QueueOptions::ENQUEUE_ALL) {
                continue;
            }
            if !queue.enqueue(payload) {
                self.failure_tally += 1;
                log::warn!("event queue rejected enqueue (tally={})", self.failure_tally);
            }
        }
    }
}
