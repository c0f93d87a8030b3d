//! Keep-alive stream for clients that wait on a job in one request.
//!
//! [`HeartbeatMonitor::watch`] drives a unit of work on its own task and
//! yields [`Beat::KeepAlive`] once per interval while the work is
//! outstanding, then a single [`Beat::Finished`]. The work itself must not
//! block the runtime: engine calls reach this module as a [`JobHandle`]
//! whose blocking section already runs on the blocking thread pool, which
//! is what lets the timer keep firing.
//!
//! [`JobHandle`]: crate::dispatcher::JobHandle

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

/// Buffered beats before keep-alives start being dropped.
const BEAT_BUFFER: usize = 4;

/// Smallest accepted interval; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// One item of a heartbeat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Beat<T> {
    /// The work is still running.
    KeepAlive,
    /// The work finished with this output. Always the last item.
    Finished(T),
}

/// Emits keep-alives on a fixed period while work is outstanding.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMonitor {
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `work` to completion, reporting progress as a stream.
    ///
    /// The first keep-alive arrives one full interval after the call. No
    /// keep-alive is emitted once `work` has finished. Keep-alives that the
    /// consumer has not picked up yet are dropped rather than queued. If
    /// the stream is dropped the monitor stops and `work` is dropped with it;
    /// pass a future whose drop does not cancel anything important (such as
    /// [`JobHandle::wait`](crate::dispatcher::JobHandle::wait)).
    pub fn watch<F>(&self, work: F) -> ReceiverStream<Beat<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(BEAT_BUFFER);
        let period = self.interval;

        tokio::spawn(async move {
            tokio::pin!(work);
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sent: u64 = 0;

            loop {
                tokio::select! {
                    biased;
                    output = &mut work => {
                        tracing::debug!(keep_alives = sent, "Watched work finished");
                        let _ = tx.send(Beat::Finished(output)).await;
                        break;
                    }
                    _ = ticker.tick() => {
                        match tx.try_send(Beat::KeepAlive) {
                            Ok(()) => sent += 1,
                            Err(TrySendError::Full(_)) => {
                                tracing::trace!("Heartbeat consumer behind, skipping beat");
                            }
                            Err(TrySendError::Closed(_)) => {
                                tracing::debug!(keep_alives = sent, "Heartbeat consumer went away");
                                break;
                            }
                        }
                    }
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
