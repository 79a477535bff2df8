//! Recurring counter-offer expiry sweep.
//!
//! Expiry must be detectable without a new inbound request: a counter-offer
//! can lapse with no further action from anyone. This worker runs the batch
//! sweep on a fixed interval. Each booking is swept under its own aggregate
//! lock, so racing a concurrent response is safe: whichever side acquires
//! the critical section first wins, and the loser observes the already
//! updated state.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::warn;

use haulflow_events::{EventBus, EventEnvelope};

use crate::event_store::EventStore;
use crate::services::BookingService;

use super::WorkerHandle;

#[derive(Debug)]
pub struct ExpirySweeper;

impl ExpirySweeper {
    /// Spawn the sweep loop. Shutdown is honored both between ticks and
    /// between aggregate batches inside a running sweep.
    pub fn spawn<S, B>(service: Arc<BookingService<S, B>>, interval: Duration) -> WorkerHandle
    where
        S: EventStore + 'static,
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name("expiry-sweeper".to_string())
            .spawn(move || sweep_loop(service, interval, shutdown_rx))
            .expect("failed to spawn expiry sweeper thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn sweep_loop<S, B>(
    service: Arc<BookingService<S, B>>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    loop {
        // Sleep for one interval, waking early on shutdown.
        match shutdown_rx.recv_timeout(interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        // Mid-sweep cancellation is checked between aggregates; an aggregate
        // already swept stays swept (each one is its own atomic unit), and
        // the next run simply finds less to do.
        let result = service.sweep_expired_with(|| {
            matches!(shutdown_rx.try_recv(), Err(mpsc::TryRecvError::Empty))
        });

        match result {
            Ok(report) if !report.completed => break,
            Ok(_) => {}
            Err(err) => {
                // Self-retrying by design: the next tick re-runs the sweep,
                // and re-processing already-EXPIRED entries is harmless.
                warn!(error = %err, "expiry sweep failed; will retry next interval");
            }
        }
    }
}
