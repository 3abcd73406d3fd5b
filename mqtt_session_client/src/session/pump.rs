// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Long-running task draining the outgoing publish queue into the current
//! protocol engine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineErrorKind, PublishError, PublishErrorKind};
use crate::session::connection::ConnectionTracker;
use crate::session::queue::QueuedPublish;

/// Dequeues publishes and hands them to the current engine, blocking while
/// disconnected. At most one publish is held as carryover across reconnects;
/// the queue is not read while carryover is set.
pub(crate) struct PublishPump {
    rx: mpsc::Receiver<QueuedPublish>,
    tracker: Arc<ConnectionTracker>,
    shutdown: CancellationToken,
}

impl PublishPump {
    pub(crate) fn new(
        rx: mpsc::Receiver<QueuedPublish>,
        tracker: Arc<ConnectionTracker>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rx,
            tracker,
            shutdown,
        }
    }

    /// Run the pump until shutdown.
    ///
    /// Pending result channels are dropped unresolved on shutdown; callers
    /// observe the shutdown through their own state checks.
    pub(crate) async fn run(mut self) {
        let mut carryover: Option<QueuedPublish> = None;
        loop {
            let snapshot = self.tracker.current();
            let Some(engine) = snapshot.engine else {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => return,
                    () = snapshot.up.cancelled() => continue,
                }
            };

            if carryover.is_none() {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => return,
                    () = snapshot.down.cancelled() => continue,
                    next = self.rx.recv() => match next {
                        Some(entry) => carryover = Some(entry),
                        None => return,
                    }
                }
            }
            let Some(mut entry) = carryover.take() else {
                continue;
            };
            entry.attempts += 1;

            match engine.publish(entry.publish.clone()).await {
                Ok(()) => {
                    // Accepted for delivery or session storage. Complete.
                    let _ = entry.result_tx.send(Ok(()));
                }
                Err(e) if matches!(e.kind(), EngineErrorKind::InvalidArguments(_)) => {
                    // Permanently invalid. Complete with failure.
                    let _ = entry.result_tx.send(Err(PublishError::new(
                        PublishErrorKind::InvalidArgument(e.to_string()),
                    )));
                }
                Err(e) => {
                    // Not accepted for session storage. Hold as carryover and
                    // retry on the next connection.
                    log::debug!(
                        "Publish attempt {} failed ({e}). Retrying on next connection.",
                        entry.attempts
                    );
                    carryover = Some(entry);
                    tokio::select! {
                        biased;
                        () = self.shutdown.cancelled() => return,
                        () = snapshot.down.cancelled() => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::control_packet::{Publish, QoS};
    use crate::error::{EngineError, EngineErrorKind};
    use crate::interface_mocks::{EngineOperation, MockEngine};
    use crate::session::queue::PublishQueue;

    fn create_publish(payload: &str) -> Publish {
        Publish::new("test/topic", QoS::AtLeastOnce, payload.to_string(), None)
    }

    struct PumpHarness {
        queue: PublishQueue,
        tracker: Arc<ConnectionTracker>,
        shutdown: CancellationToken,
    }

    fn start_pump() -> PumpHarness {
        let (queue, rx) = PublishQueue::new(16);
        let tracker = Arc::new(ConnectionTracker::new());
        let shutdown = CancellationToken::new();
        tokio::spawn(PublishPump::new(rx, tracker.clone(), shutdown.clone()).run());
        PumpHarness {
            queue,
            tracker,
            shutdown,
        }
    }

    #[tokio::test]
    async fn accepted_publish_completes() {
        let harness = start_pump();
        let engine = MockEngine::new();
        harness.tracker.connect(Arc::new(engine.clone()));

        let result_rx = harness.queue.enqueue(create_publish("hello")).unwrap();
        result_rx.await.unwrap().unwrap();
        assert!(matches!(
            engine.operations().first(),
            Some(EngineOperation::Publish(p)) if p.payload == "hello"
        ));
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn blocks_while_disconnected() {
        let harness = start_pump();
        let mut result_rx = harness.queue.enqueue(create_publish("queued")).unwrap();

        // Not connected: the publish must not complete
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(result_rx.try_recv().is_err());

        // Connecting releases it
        let engine = MockEngine::new();
        harness.tracker.connect(Arc::new(engine.clone()));
        result_rx.await.unwrap().unwrap();
        assert_eq!(engine.operations().len(), 1);
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn invalid_publish_fails_permanently() {
        let harness = start_pump();
        let engine = MockEngine::new();
        engine.fail_next_publish(EngineError::new(EngineErrorKind::InvalidArguments(
            "bad topic".to_string(),
        )));
        harness.tracker.connect(Arc::new(engine.clone()));

        let result_rx = harness.queue.enqueue(create_publish("bad")).unwrap();
        let result = result_rx.await.unwrap();
        assert!(matches!(
            result.unwrap_err().kind(),
            PublishErrorKind::InvalidArgument(_)
        ));
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn detached_publish_is_carried_over_to_next_connection() {
        let harness = start_pump();
        let engine1 = MockEngine::new();
        engine1.fail_next_publish(EngineError::new(EngineErrorKind::Detached));
        harness.tracker.connect(Arc::new(engine1.clone()));

        let mut result_rx = harness.queue.enqueue(create_publish("carryover")).unwrap();

        // The first attempt failed without session storage; the pump holds the
        // publish until the connection turns over.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(result_rx.try_recv().is_err());

        harness.tracker.disconnect();
        let engine2 = MockEngine::new();
        harness.tracker.connect(Arc::new(engine2.clone()));

        result_rx.await.unwrap().unwrap();
        assert!(engine1.operations().is_empty());
        assert!(matches!(
            engine2.operations().first(),
            Some(EngineOperation::Publish(p)) if p.payload == "carryover"
        ));
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn shutdown_leaves_pending_results_unresolved() {
        let harness = start_pump();
        let result_rx = harness.queue.enqueue(create_publish("pending")).unwrap();
        harness.shutdown.cancel();
        // The pump exits without resolving the result channel
        assert!(result_rx.await.is_err());
    }
}
