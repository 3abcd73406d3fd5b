// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounded FIFO of outgoing publishes awaiting delivery.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::control_packet::Publish;
use crate::error::{ClientStateError, PublishError, PublishErrorKind};

/// One outgoing publish awaiting delivery by the publish pump.
pub(crate) struct QueuedPublish {
    /// The assembled PUBLISH packet
    pub(crate) publish: Publish,
    /// Where the pump reports the outcome of this publish
    pub(crate) result_tx: oneshot::Sender<Result<(), PublishError>>,
    /// Delivery attempts made so far, for diagnostics
    pub(crate) attempts: u32,
}

/// Sending half of the outgoing publish queue. The receiving half is owned by
/// the publish pump. Entries survive disconnects; they are only lost when the
/// client shuts down.
#[derive(Clone)]
pub(crate) struct PublishQueue {
    tx: mpsc::Sender<QueuedPublish>,
}

impl PublishQueue {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedPublish>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueue a publish without blocking, returning the channel on which its
    /// result will be delivered.
    ///
    /// # Errors
    /// Returns [`PublishErrorKind::QueueFull`] if the queue is at capacity, or
    /// the `ShutDown` state error if the pump has terminated.
    pub(crate) fn enqueue(
        &self,
        publish: Publish,
    ) -> Result<oneshot::Receiver<Result<(), PublishError>>, PublishError> {
        let (result_tx, result_rx) = oneshot::channel();
        match self.tx.try_send(QueuedPublish {
            publish,
            result_tx,
            attempts: 0,
        }) {
            Ok(()) => Ok(result_rx),
            Err(TrySendError::Full(_)) => Err(PublishError::new(PublishErrorKind::QueueFull)),
            Err(TrySendError::Closed(_)) => Err(PublishError::new(PublishErrorKind::State(
                ClientStateError::ShutDown,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_packet::QoS;

    fn create_publish(payload: &str) -> Publish {
        Publish::new("test/topic", QoS::AtLeastOnce, payload.to_string(), None)
    }

    #[tokio::test]
    async fn fifo_order() {
        let (queue, mut rx) = PublishQueue::new(4);
        let _rx1 = queue.enqueue(create_publish("one")).unwrap();
        let _rx2 = queue.enqueue(create_publish("two")).unwrap();
        assert_eq!(rx.recv().await.unwrap().publish.payload, "one");
        assert_eq!(rx.recv().await.unwrap().publish.payload, "two");
    }

    #[tokio::test]
    async fn full_queue_reports_immediately() {
        let (queue, mut rx) = PublishQueue::new(2);
        let _rx1 = queue.enqueue(create_publish("one")).unwrap();
        let _rx2 = queue.enqueue(create_publish("two")).unwrap();

        let result = queue.enqueue(create_publish("three"));
        assert!(matches!(
            result.unwrap_err().kind(),
            PublishErrorKind::QueueFull
        ));

        // Draining makes room again
        let _ = rx.recv().await.unwrap();
        assert!(queue.enqueue(create_publish("three")).is_ok());
    }

    #[tokio::test]
    async fn closed_queue_reports_shutdown() {
        let (queue, rx) = PublishQueue::new(2);
        drop(rx);
        let result = queue.enqueue(create_publish("one"));
        assert!(matches!(
            result.unwrap_err().kind(),
            PublishErrorKind::State(ClientStateError::ShutDown)
        ));
    }
}
