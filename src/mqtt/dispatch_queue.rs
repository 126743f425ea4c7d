//! Cross-thread dispatch queue
//!
//! Ordered hand-off from the network task to the application thread. The
//! producer never waits (unbounded channel); the consumer drains on its own
//! schedule, either without blocking or with a short bounded wait.
//!
//! ```text
//! SessionWorker ─[PanelEvent]→ DispatchSender ══ mpsc ══ DispatchReceiver → PanelEngine
//!  (network task)                                         (application thread)
//! ```

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::message_manager::PanelEvent;

/// Creates a connected sender/receiver pair
pub fn dispatch_queue() -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DispatchSender { tx }, DispatchReceiver { rx })
}

/// Producer half, handed to one session worker at a time
#[derive(Debug, Clone)]
pub struct DispatchSender {
    tx: mpsc::UnboundedSender<PanelEvent>,
}

impl DispatchSender {
    /// Enqueues without blocking. Returns false once the consumer is gone.
    pub fn send(&self, event: PanelEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dispatch queue closed, dropping event: {:?}", e.0);
                false
            }
        }
    }
}

/// Consumer half, owned by the application thread
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::UnboundedReceiver<PanelEvent>,
}

impl DispatchReceiver {
    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<PanelEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued, in arrival order
    pub fn drain(&mut self) -> Vec<PanelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        if !events.is_empty() {
            debug!("Drained {} queued events", events.len());
        }
        events
    }

    /// Waits at most `max_wait` for the next event
    pub async fn next_timeout(&mut self, max_wait: Duration) -> Option<PanelEvent> {
        tokio::time::timeout(max_wait, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::mqtt_handler::ConnectionState;

    fn marker(session: u64) -> PanelEvent {
        PanelEvent::Connection {
            session,
            state: ConnectionState::Connecting,
        }
    }

    #[tokio::test]
    async fn consumer_sees_producer_order_exactly_once() {
        let (tx, mut rx) = dispatch_queue();

        let producer = std::thread::spawn(move || {
            for n in 0..1000 {
                assert!(tx.send(marker(n)));
            }
        });
        producer.join().unwrap();

        let seen: Vec<u64> = rx
            .drain()
            .into_iter()
            .map(|event| match event {
                PanelEvent::Connection { session, .. } => session,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();

        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
        assert!(rx.try_next().is_none());
    }

    #[tokio::test]
    async fn bounded_wait_returns_when_idle() {
        let (_tx, mut rx) = dispatch_queue();
        let started = std::time::Instant::now();
        assert!(rx.next_timeout(Duration::from_millis(20)).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn bounded_wait_wakes_on_event() {
        let (tx, mut rx) = dispatch_queue();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            tx.send(marker(7));
        });
        assert_eq!(
            rx.next_timeout(Duration::from_secs(5)).await,
            Some(marker(7))
        );
    }

    #[test]
    fn queued_events_survive_producer_drop() {
        let (tx, mut rx) = dispatch_queue();
        tx.send(marker(1));
        tx.send(marker(2));
        drop(tx);
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.drain(), vec![marker(1), marker(2)]);
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn send_reports_closed_consumer() {
        let (tx, rx) = dispatch_queue();
        drop(rx);
        assert!(!tx.send(marker(1)));
    }
}
