// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT session client providing a managed connection with automatic reconnection
//! across a single MQTT session.

mod ack;
mod client;
pub(crate) mod connection;
mod manager;
mod pump;
mod queue;
mod registry;
pub mod retry_policy;
mod state;

use thiserror::Error;

use crate::control_packet::{ConnectReturnCode, DisconnectReasonCode};
use crate::error::{ConnectionError, EngineError};

pub use ack::AckToken;
pub use client::{
    PublishOptions, PublishOptionsBuilder, PublishOptionsBuilderError, SessionClient,
    SessionClientOptions, SessionClientOptionsBuilder, SessionClientOptionsBuilderError,
    SubscribeOptions, SubscribeOptionsBuilder, SubscribeOptionsBuilderError, UnsubscribeOptions,
    UnsubscribeOptionsBuilder, UnsubscribeOptionsBuilderError,
};
pub use registry::Registration;

/// Delivered to connect observers on every successful connect.
#[derive(Clone, Debug)]
pub struct ConnectedEvent {
    /// Reason code of the CONNACK
    pub reason_code: ConnectReturnCode,
    /// Whether the broker found existing session state
    pub session_present: bool,
}

/// Delivered to disconnect observers on every disconnect.
#[derive(Clone, Debug)]
pub struct DisconnectedEvent {
    /// Reason code of the server DISCONNECT packet, if the disconnect was
    /// server-initiated. `None` for transport failures and client shutdown.
    pub reason_code: Option<DisconnectReasonCode>,
}

/// Error type for a fatally terminated [`SessionClient`]. The type of error is
/// specified by the value of [`SessionErrorKind`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct SessionError(#[from] SessionErrorKind);

impl SessionError {
    /// Return the corresponding [`SessionErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &SessionErrorKind {
        &self.0
    }
}

/// Error kind for [`SessionError`].
#[derive(Debug, Error)]
pub enum SessionErrorKind {
    /// Invalid configuration options provided to the [`SessionClient`].
    #[error("invalid configuration: {0}")]
    ConfigError(String),
    /// The protocol engine could not be constructed for a connection attempt.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// MQTT session state was not present on the broker after a reconnect.
    #[error("session state not present on broker after reconnect")]
    SessionLost,
    /// The broker rejected the connection with a CONNACK reason code.
    #[error("connection rejected by broker: {0:?}")]
    Connack(ConnectReturnCode),
    /// The broker ended the connection with a fatal DISCONNECT reason code.
    #[error("fatal disconnect from broker: {0:?}")]
    FatalDisconnect(DisconnectReasonCode),
    /// Transport-level connection failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// No CONNACK was received within the connection timeout.
    #[error("timed out waiting for CONNACK")]
    ConnectTimeout,
    /// The enhanced authentication provider failed to open an exchange.
    #[error("enhanced authentication provider error: {0}")]
    AuthProvider(String),
    /// Connection attempts were halted by the retry policy, ending the MQTT session.
    #[error("connection attempts halted by retry policy: {0}")]
    RetryFailure(Box<SessionErrorKind>),
}
