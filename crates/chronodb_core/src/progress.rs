//! Submission and indexing progress.
//!
//! Two markers: the latest transaction appended to the log and the latest
//! one the indexer has finished. Each has a single writer. Callers block on
//! a condition variable with a deadline until the indexed marker reaches
//! their target; a timed-out waiter simply returns, leaving nothing behind.

use crate::error::{CoreError, CoreResult};
use crate::types::{AwaitTarget, BitemporalInstant};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ProgressState {
    latest_indexed: Option<BitemporalInstant>,
    latest_submitted: Option<BitemporalInstant>,
    stopped: Option<String>,
    closed: bool,
}

/// Indexing progress shared between the node, the indexer and waiters.
#[derive(Debug, Default)]
pub struct IndexProgress {
    state: Mutex<ProgressState>,
    /// Signalled when `latest_indexed` moves, the indexer stops, or the node
    /// closes.
    indexed: Condvar,
    /// Signalled when `latest_submitted` moves or the node closes.
    submitted: Condvar,
}

impl IndexProgress {
    /// Starts from a log that already holds `submitted`.
    #[must_use]
    pub fn new(submitted: Option<BitemporalInstant>) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                latest_submitted: submitted,
                ..ProgressState::default()
            }),
            ..Self::default()
        }
    }

    /// The latest fully indexed transaction.
    #[must_use]
    pub fn latest_indexed(&self) -> Option<BitemporalInstant> {
        self.state.lock().latest_indexed
    }

    /// The latest appended transaction.
    #[must_use]
    pub fn latest_submitted(&self) -> Option<BitemporalInstant> {
        self.state.lock().latest_submitted
    }

    /// Why the indexer stopped, if it did.
    #[must_use]
    pub fn stop_reason(&self) -> Option<String> {
        self.state.lock().stopped.clone()
    }

    /// Returns `true` once the node is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn record_submitted(&self, tx: BitemporalInstant) {
        let mut state = self.state.lock();
        if state.latest_submitted.map_or(true, |prev| prev < tx) {
            state.latest_submitted = Some(tx);
        }
        drop(state);
        self.submitted.notify_all();
    }

    pub(crate) fn record_indexed(&self, tx: BitemporalInstant) {
        self.state.lock().latest_indexed = Some(tx);
        self.indexed.notify_all();
    }

    pub(crate) fn record_stopped(&self, reason: String) {
        self.state.lock().stopped = Some(reason);
        self.indexed.notify_all();
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.indexed.notify_all();
        self.submitted.notify_all();
    }

    /// Fails fast instead of waiting.
    ///
    /// # Errors
    ///
    /// [`CoreError::NodeOutOfSync`] if `target` is not yet indexed.
    pub fn ensure(&self, target: AwaitTarget) -> CoreResult<BitemporalInstant> {
        let state = self.state.lock();
        match state.latest_indexed {
            Some(indexed) if target.is_reached_by(Some(indexed)) => Ok(indexed),
            latest_indexed => Err(CoreError::NodeOutOfSync {
                requested: target,
                latest_indexed,
            }),
        }
    }

    /// Blocks until `target` is indexed and returns the indexed marker.
    ///
    /// # Errors
    ///
    /// [`CoreError::TimeoutExceeded`] when `timeout` elapses first,
    /// [`CoreError::IndexerStopped`] if the indexer has stopped,
    /// [`CoreError::NodeClosed`] if the node closes while waiting.
    pub fn await_target(
        &self,
        target: AwaitTarget,
        timeout: Duration,
    ) -> CoreResult<BitemporalInstant> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if let Some(indexed) = state.latest_indexed {
                if target.is_reached_by(Some(indexed)) {
                    return Ok(indexed);
                }
            }
            if let Some(reason) = &state.stopped {
                return Err(CoreError::indexer_stopped(reason.clone()));
            }
            if state.closed {
                return Err(CoreError::NodeClosed);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    return Err(CoreError::TimeoutExceeded {
                        target,
                        waited: started.elapsed(),
                        timeout,
                    });
                }
                Some(deadline) => {
                    self.indexed.wait_until(&mut state, deadline);
                }
                None => self.indexed.wait(&mut state),
            }
        }
    }

    /// Blocks until the transaction submitted last at call time is indexed.
    /// Returns immediately when nothing has been submitted.
    ///
    /// # Errors
    ///
    /// As [`await_target`](Self::await_target).
    pub fn sync(&self, timeout: Duration) -> CoreResult<Option<BitemporalInstant>> {
        let (submitted, indexed) = {
            let state = self.state.lock();
            (state.latest_submitted, state.latest_indexed)
        };
        match submitted {
            None => Ok(indexed),
            Some(tx) => self.await_target(AwaitTarget::Tx(tx.tx_id), timeout).map(Some),
        }
    }

    /// Blocks the indexer until something past `after` is submitted.
    /// Returns `false` once the node is closed.
    pub(crate) fn wait_for_submission(
        &self,
        after: Option<BitemporalInstant>,
        poll: Duration,
    ) -> bool {
        let mut state = self.state.lock();
        while !state.closed && state.latest_submitted <= after {
            self.submitted.wait_for(&mut state, poll);
        }
        !state.closed
    }
}
