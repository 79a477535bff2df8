//! Asynchronous effect delivery.
//!
//! Commands return their effects synchronously and also enqueue them on the
//! effect queue; this worker drains the queue and hands each effect to the
//! injected delivery boundary. Delivery is at-least-once and fire-and-forget
//! relative to the state machine: a failed delivery is logged and never
//! feeds back into aggregate state.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use tracing::warn;

use haulflow_events::{Effect, EventBus, InMemoryEventBus, Subscription};

use crate::effects::{AuditSink, NotificationDelivery};

use super::WorkerHandle;

#[derive(Debug)]
pub struct EffectWorker;

impl EffectWorker {
    pub fn spawn(
        effect_bus: Arc<InMemoryEventBus<Effect>>,
        notifications: Arc<dyn NotificationDelivery>,
        audit: Arc<dyn AuditSink>,
    ) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let subscription: Subscription<Effect> = effect_bus.subscribe();

        let join = std::thread::Builder::new()
            .name("effect-worker".to_string())
            .spawn(move || delivery_loop(subscription, shutdown_rx, notifications, audit))
            .expect("failed to spawn effect worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn delivery_loop(
    subscription: Subscription<Effect>,
    shutdown_rx: mpsc::Receiver<()>,
    notifications: Arc<dyn NotificationDelivery>,
    audit: Arc<dyn AuditSink>,
) {
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking).
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(tick) {
            Ok(Effect::Notification(request)) => {
                if let Err(err) = notifications.deliver(&request) {
                    warn!(
                        recipient = %request.recipient_user_id,
                        kind = ?request.kind,
                        error = %err,
                        "notification delivery failed"
                    );
                }
            }
            Ok(Effect::Audit(record)) => {
                if let Err(err) = audit.record(&record) {
                    warn!(
                        action = ?record.action,
                        target_id = %record.target_id,
                        error = %err,
                        "audit record persistence failed"
                    );
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
