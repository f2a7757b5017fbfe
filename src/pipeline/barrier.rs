//! One-shot rendezvous for a fixed number of encoder actors.
//!
//! A fresh [`PhaseBarrier`] is allocated for every life-cycle transition
//! (prepare, start, stop). Each participant receives a [`PhaseSignal`] inside
//! the message that asks it to perform the transition, so a signal from an
//! earlier cycle can only ever reach the barrier it was created for.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Result of waiting on a [`PhaseBarrier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Every party arrived and reported success.
    Complete,
    /// Every party arrived and at least one reported failure.
    Failed(Vec<String>),
    /// The timeout elapsed before every party arrived.
    TimedOut {
        /// Parties that had arrived when the wait gave up.
        arrived: usize,
        /// Failures reported by the parties that did arrive.
        failures: Vec<String>,
    },
}

impl PhaseOutcome {
    /// Returns `true` if every party succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    failures: Vec<String>,
}

#[derive(Debug)]
struct BarrierInner {
    phase: &'static str,
    parties: usize,
    state: Mutex<BarrierState>,
    all_arrived: Condvar,
}

impl BarrierInner {
    fn arrive(&self, failure: Option<String>) {
        let mut state = self.state.lock();
        state.arrived += 1;
        if let Some(reason) = failure {
            tracing::debug!(phase = self.phase, %reason, "Barrier party failed");
            state.failures.push(reason);
        }
        if state.arrived >= self.parties {
            self.all_arrived.notify_all();
        }
    }
}

/// Countdown barrier for one transition.
///
/// # Example
///
/// ```
/// use stream_recorder::pipeline::{PhaseBarrier, PhaseOutcome};
/// use std::time::Duration;
///
/// let barrier = PhaseBarrier::new("start", 2);
/// let audio = barrier.signal();
/// let video = barrier.signal();
///
/// std::thread::spawn(move || audio.succeed());
/// video.succeed();
///
/// assert_eq!(barrier.wait(Duration::from_secs(1)), PhaseOutcome::Complete);
/// ```
#[derive(Debug, Clone)]
pub struct PhaseBarrier {
    inner: Arc<BarrierInner>,
}

impl PhaseBarrier {
    /// Creates a barrier that releases once `parties` signals have arrived.
    #[must_use]
    pub fn new(phase: &'static str, parties: usize) -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                phase,
                parties,
                state: Mutex::new(BarrierState::default()),
                all_arrived: Condvar::new(),
            }),
        }
    }

    /// Hands out one participant's signal.
    #[must_use]
    pub fn signal(&self) -> PhaseSignal {
        PhaseSignal {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Name of the transition this barrier guards.
    #[must_use]
    pub fn phase(&self) -> &'static str {
        self.inner.phase
    }

    /// Number of parties that have arrived so far.
    #[must_use]
    pub fn arrived(&self) -> usize {
        self.inner.state.lock().arrived
    }

    /// Blocks until every party has arrived or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> PhaseOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();

        while state.arrived < self.inner.parties {
            if self
                .inner
                .all_arrived
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                if state.arrived >= self.inner.parties {
                    break;
                }
                tracing::warn!(
                    phase = self.inner.phase,
                    arrived = state.arrived,
                    parties = self.inner.parties,
                    "Barrier wait timed out"
                );
                return PhaseOutcome::TimedOut {
                    arrived: state.arrived,
                    failures: state.failures.clone(),
                };
            }
        }

        if state.failures.is_empty() {
            PhaseOutcome::Complete
        } else {
            PhaseOutcome::Failed(state.failures.clone())
        }
    }
}

/// One participant's arrival at a [`PhaseBarrier`].
///
/// The signal is consumed by [`succeed`](Self::succeed) or
/// [`fail`](Self::fail). Dropping it unsignalled counts as a failure so a
/// panicking or exiting actor can never leave the coordinator waiting.
#[derive(Debug)]
#[must_use = "an unsignalled PhaseSignal reports failure when dropped"]
pub struct PhaseSignal {
    inner: Option<Arc<BarrierInner>>,
}

impl PhaseSignal {
    /// Reports that this party completed the transition.
    pub fn succeed(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.arrive(None);
        }
    }

    /// Reports that this party failed the transition.
    pub fn fail(mut self, reason: impl Into<String>) {
        if let Some(inner) = self.inner.take() {
            inner.arrive(Some(reason.into()));
        }
    }

    /// Reports success or failure from a result.
    pub fn complete<T, E: std::fmt::Display>(self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.succeed(),
            Err(e) => self.fail(e.to_string()),
        }
    }
}

impl Drop for PhaseSignal {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.arrive(Some(format!("{} signal dropped", inner.phase)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_completes_when_all_succeed() {
        let barrier = PhaseBarrier::new("prepare", 2);
        let a = barrier.signal();
        let b = barrier.signal();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            a.succeed();
        });
        b.succeed();

        assert_eq!(barrier.wait(Duration::from_secs(2)), PhaseOutcome::Complete);
        handle.join().unwrap();
    }

    #[test]
    fn test_barrier_reports_failure() {
        let barrier = PhaseBarrier::new("prepare", 2);
        barrier.signal().succeed();
        barrier.signal().fail("codec missing");

        match barrier.wait(Duration::from_secs(1)) {
            PhaseOutcome::Failed(reasons) => assert_eq!(reasons, vec!["codec missing"]),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_dropped_signal_counts_as_failure() {
        let barrier = PhaseBarrier::new("stop", 1);
        drop(barrier.signal());

        match barrier.wait(Duration::from_secs(1)) {
            PhaseOutcome::Failed(reasons) => assert!(reasons[0].contains("dropped")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_barrier_times_out() {
        let barrier = PhaseBarrier::new("start", 2);
        let _pending = barrier.signal();
        barrier.signal().succeed();

        let outcome = barrier.wait(Duration::from_millis(30));
        assert!(matches!(outcome, PhaseOutcome::TimedOut { arrived: 1, .. }));
    }

    #[test]
    fn test_signal_from_old_barrier_does_not_reach_new_one() {
        let old = PhaseBarrier::new("start", 1);
        let stale = old.signal();

        let fresh = PhaseBarrier::new("start", 1);
        stale.succeed();

        assert_eq!(old.arrived(), 1);
        assert_eq!(fresh.arrived(), 0);
        assert!(matches!(
            fresh.wait(Duration::from_millis(10)),
            PhaseOutcome::TimedOut { arrived: 0, .. }
        ));
    }
}
