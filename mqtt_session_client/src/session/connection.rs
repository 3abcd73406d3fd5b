// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tracking of the current protocol engine and connection generation.

use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::interface::MqttEngine;

/// Snapshot of the tracked connection at one point in time.
///
/// The `up` and `down` tokens are edge channels: waiting on `up` completes
/// once a connection is established, waiting on `down` completes once it is
/// lost. Exactly one of the two is signaled at any moment.
#[derive(Clone)]
pub(crate) struct ConnectionSnapshot {
    /// Engine handle of the current connection, if connected
    pub(crate) engine: Option<Arc<dyn MqttEngine>>,
    /// Number of successful connects over the lifetime of the client
    pub(crate) generation: u64,
    /// Signaled while a connection is established
    pub(crate) up: CancellationToken,
    /// Signaled while no connection is established
    pub(crate) down: CancellationToken,
}

struct TrackedConnection {
    engine: Option<Arc<dyn MqttEngine>>,
    generation: u64,
    up: CancellationToken,
    down: CancellationToken,
}

/// Holds the current engine handle, the connection generation, and the
/// up/down edge channels. Only the connection manager transitions this;
/// everything else reads snapshots.
pub(crate) struct ConnectionTracker {
    inner: RwLock<TrackedConnection>,
}

impl ConnectionTracker {
    pub(crate) fn new() -> Self {
        // Start disconnected: `down` is signaled, `up` is pending.
        let down = CancellationToken::new();
        down.cancel();
        Self {
            inner: RwLock::new(TrackedConnection {
                engine: None,
                generation: 0,
                up: CancellationToken::new(),
                down,
            }),
        }
    }

    /// Return a snapshot of the current connection.
    pub(crate) fn current(&self) -> ConnectionSnapshot {
        let inner = self.inner.read().unwrap();
        ConnectionSnapshot {
            engine: inner.engine.clone(),
            generation: inner.generation,
            up: inner.up.clone(),
            down: inner.down.clone(),
        }
    }

    /// Record a successful connect: assign the engine, increment the
    /// generation, and flip the edge channels. Returns the new generation.
    pub(crate) fn connect(&self, engine: Arc<dyn MqttEngine>) -> u64 {
        let mut inner = self.inner.write().unwrap();
        inner.engine = Some(engine);
        inner.generation += 1;
        // Swap in a fresh `down` before signaling `up` so the two edges swap
        // atomically under the write lock.
        inner.down = CancellationToken::new();
        inner.up.cancel();
        log::debug!("Connection tracker up (generation {})", inner.generation);
        inner.generation
    }

    /// Record a disconnect: clear the engine and flip the edge channels.
    /// No-op if already disconnected.
    pub(crate) fn disconnect(&self) {
        let mut inner = self.inner.write().unwrap();
        if inner.engine.is_none() {
            return;
        }
        inner.engine = None;
        inner.up = CancellationToken::new();
        inner.down.cancel();
        log::debug!("Connection tracker down (generation {})", inner.generation);
    }
}
