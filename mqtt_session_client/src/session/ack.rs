// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Manual acknowledgement of incoming publishes, scoped to the connection
//! generation under which they arrived.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::control_packet::{Publish, QoS};
use crate::error::{AckError, AckErrorKind};
use crate::session::connection::ConnectionTracker;

struct AckTokenInner {
    tracker: Arc<ConnectionTracker>,
    publish: Publish,
    /// Generation of the connection the publish arrived on
    generation: u64,
    acked: AtomicBool,
}

/// Token for acknowledging a single incoming publish.
///
/// All message handlers invoked for a publish share one token; the first
/// [`ack`](AckToken::ack) call wins and subsequent calls are no-ops. An ack
/// made after the connection the publish arrived on has been lost is silently
/// dropped, since the broker will redeliver on the new connection.
#[derive(Clone)]
pub struct AckToken {
    inner: Arc<AckTokenInner>,
}

impl AckToken {
    pub(crate) fn new(
        tracker: Arc<ConnectionTracker>,
        publish: Publish,
        generation: u64,
    ) -> Self {
        Self {
            inner: Arc::new(AckTokenInner {
                tracker,
                publish,
                generation,
                acked: AtomicBool::new(false),
            }),
        }
    }

    /// Acknowledge the publish.
    ///
    /// # Errors
    /// Returns an [`AckError`] of kind `InvalidOperation` for Quality of
    /// Service 0 publishes, which are not acknowledged.
    pub async fn ack(&self) -> Result<(), AckError> {
        if self.inner.publish.qos == QoS::AtMostOnce {
            return Err(AckError::new(AckErrorKind::InvalidOperation));
        }
        if self.inner.acked.swap(true, Ordering::SeqCst) {
            // Already acked. No-op.
            return Ok(());
        }
        let snapshot = self.inner.tracker.current();
        let Some(engine) = snapshot.engine else {
            log::debug!(
                "Dropping ack for PKID {} made while disconnected",
                self.inner.publish.pkid
            );
            return Ok(());
        };
        if snapshot.generation != self.inner.generation {
            log::debug!(
                "Dropping ack for PKID {} from generation {} (current generation {})",
                self.inner.publish.pkid,
                self.inner.generation,
                snapshot.generation
            );
            return Ok(());
        }
        match engine.ack(&self.inner.publish).await {
            Ok(()) => log::debug!("Sent ACK for PKID {}", self.inner.publish.pkid),
            Err(e) => log::error!(
                "ACK failed for PKID {}. Publish may be redelivered. Reason: {e}",
                self.inner.publish.pkid
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface_mocks::{EngineOperation, MockEngine};

    fn create_publish(qos: QoS, pkid: u16) -> Publish {
        let mut publish = Publish::new("test/topic", qos, "payload".to_string(), None);
        publish.pkid = pkid;
        publish
    }

    fn ack_count(engine: &MockEngine) -> usize {
        engine
            .operations()
            .iter()
            .filter(|op| matches!(op, EngineOperation::Ack(_)))
            .count()
    }

    #[tokio::test]
    async fn first_ack_reaches_engine_subsequent_are_noops() {
        let tracker = Arc::new(ConnectionTracker::new());
        let engine = MockEngine::new();
        let generation = tracker.connect(Arc::new(engine.clone()));

        let token = AckToken::new(tracker, create_publish(QoS::AtLeastOnce, 7), generation);
        token.ack().await.unwrap();
        token.ack().await.unwrap();
        token.clone().ack().await.unwrap();

        assert_eq!(ack_count(&engine), 1);
        assert!(matches!(
            engine.operations().first(),
            Some(EngineOperation::Ack(7))
        ));
    }

    #[tokio::test]
    async fn stale_generation_ack_is_dropped() {
        let tracker = Arc::new(ConnectionTracker::new());
        let engine1 = MockEngine::new();
        let generation = tracker.connect(Arc::new(engine1.clone()));
        let token = AckToken::new(
            tracker.clone(),
            create_publish(QoS::AtLeastOnce, 3),
            generation,
        );

        // Reconnect before the ack is made
        tracker.disconnect();
        let engine2 = MockEngine::new();
        tracker.connect(Arc::new(engine2.clone()));

        token.ack().await.unwrap();
        assert_eq!(ack_count(&engine1), 0);
        assert_eq!(ack_count(&engine2), 0);
    }

    #[tokio::test]
    async fn disconnected_ack_is_dropped() {
        let tracker = Arc::new(ConnectionTracker::new());
        let engine = MockEngine::new();
        let generation = tracker.connect(Arc::new(engine.clone()));
        let token = AckToken::new(
            tracker.clone(),
            create_publish(QoS::AtLeastOnce, 3),
            generation,
        );

        tracker.disconnect();
        token.ack().await.unwrap();
        assert_eq!(ack_count(&engine), 0);
    }

    #[tokio::test]
    async fn qos0_ack_is_invalid() {
        let tracker = Arc::new(ConnectionTracker::new());
        let engine = MockEngine::new();
        let generation = tracker.connect(Arc::new(engine.clone()));
        let token = AckToken::new(tracker, create_publish(QoS::AtMostOnce, 0), generation);

        let result = token.ack().await;
        assert!(matches!(
            result.unwrap_err().kind(),
            AckErrorKind::InvalidOperation
        ));
        assert_eq!(ack_count(&engine), 0);
    }
}
