//! Outbound request-rate gate shared by every enrichment call.
//!
//! Admission is a `governor` GCRA cell with no burst allowance. Starts are
//! spaced at least `period / capacity` apart, so no sliding window of length
//! `period` holds more than `capacity` of them. Each scheduled task queues
//! behind the one scheduled before it, so tasks start in submission order
//! even though they may finish in any order.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use governor::Quota;
use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::nanos::Nanos;
use governor::state::{InMemoryState, NotKeyed};
use tokio::sync::oneshot;
use tokio::time::Instant;

use catalogsync_shared::DEFAULT_REQUESTS_PER_SECOND;

/// Process-wide gate handed out by [`RateLimiter::global`].
static GLOBAL: OnceLock<Arc<RateLimiter>> = OnceLock::new();

/// Clock on tokio's timeline, so paused-time tests drive the gate too.
#[derive(Debug, Clone)]
struct TokioClock {
    origin: Instant,
}

impl Clock for TokioClock {
    type Instant = Nanos;

    fn now(&self) -> Nanos {
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Nanos::from(elapsed)
    }
}

type Cell = governor::RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<Nanos>>;

/// Admission gate for outbound catalog requests.
pub struct RateLimiter {
    gate: Option<Arc<Gate>>,
}

struct Gate {
    cell: Cell,
    clock: TokioClock,
    /// Fires once the most recently scheduled task has been admitted.
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Gate {
    /// Take the next place in line. The place is fixed by this call, not by
    /// when the returned future is first polled.
    fn enqueue(self: &Arc<Self>) -> impl Future<Output = ()> + use<> {
        let (admitted, next) = oneshot::channel();
        let previous = self
            .tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(next);
        let gate = Arc::clone(self);

        async move {
            if let Some(previous) = previous {
                // Err: the predecessor was dropped before admission.
                let _ = previous.await;
            }
            gate.admit().await;
            let _ = admitted.send(());
        }
    }

    async fn admit(&self) {
        while let Err(not_until) = self.cell.check() {
            tokio::time::sleep(not_until.wait_time_from(self.clock.now())).await;
        }
    }
}

impl RateLimiter {
    /// Admit at most `capacity` starts in any window of length `period`.
    /// A capacity of zero is treated as one; a zero period disables the gate.
    pub fn new(capacity: u32, period: Duration) -> Self {
        let capacity = capacity.max(1);
        let Some(quota) = Quota::with_period(period / capacity) else {
            return Self::unlimited();
        };

        let clock = TokioClock {
            origin: Instant::now(),
        };
        let cell = Cell::direct_with_clock(quota.allow_burst(NonZeroU32::MIN), &clock);
        Self {
            gate: Some(Arc::new(Gate {
                cell,
                clock,
                tail: Mutex::new(None),
            })),
        }
    }

    /// Admit at most `n` starts per second.
    pub fn per_second(n: u32) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// A gate that never delays anything.
    pub fn unlimited() -> Self {
        Self { gate: None }
    }

    /// The gate shared by every sync in this process
    /// ([`DEFAULT_REQUESTS_PER_SECOND`] starts per second).
    pub fn global() -> Arc<RateLimiter> {
        GLOBAL
            .get_or_init(|| Arc::new(Self::per_second(DEFAULT_REQUESTS_PER_SECOND)))
            .clone()
    }

    /// Run `task` once the gate admits it.
    ///
    /// The place in line is taken immediately, before the returned future is
    /// polled, which fixes the start order to the order of `schedule` calls.
    /// Once started the task runs to completion; the gate itself never fails.
    pub fn schedule<F, T>(&self, task: F) -> impl Future<Output = T> + use<F, T>
    where
        F: Future<Output = T>,
    {
        let admission = self.gate.as_ref().map(Gate::enqueue);
        async move {
            if let Some(admission) = admission {
                admission.await;
            }
            task.await
        }
    }
}
