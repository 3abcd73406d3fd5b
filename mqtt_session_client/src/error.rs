// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Common error types

use std::fmt;

use thiserror::Error;

/// Error type for MQTT connection
pub type ConnectionError = rumqttc::v5::ConnectionError;
/// Error subtype for MQTT connection error caused by state
pub type StateError = rumqttc::v5::StateError;

/// Error describing misuse of the client lifecycle
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ClientStateError {
    /// The client has not been started yet
    #[error("client has not been started")]
    NotStarted,
    /// The client was already started
    #[error("client was already started")]
    AlreadyStarted,
    /// The client has been shut down
    #[error("client has been shut down")]
    ShutDown,
}

/// Error executing an MQTT publish
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct PublishError {
    kind: PublishErrorKind,
}

impl PublishError {
    /// Create a new [`PublishError`]
    #[must_use]
    pub fn new(kind: PublishErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`PublishErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &PublishErrorKind {
        &self.kind
    }
}

/// An enumeration of categories of [`PublishError`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublishErrorKind {
    /// Operation attempted outside of the Started lifecycle state
    State(ClientStateError),
    /// Invalid argument provided for the publish
    InvalidArgument(String),
    /// The outgoing publish queue is at capacity
    QueueFull,
}

impl fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishErrorKind::State(e) => write!(f, "{e}"),
            PublishErrorKind::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            PublishErrorKind::QueueFull => write!(f, "publish queue is full"),
        }
    }
}

/// Error executing an MQTT subscribe
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct SubscribeError {
    kind: SubscribeErrorKind,
}

impl SubscribeError {
    /// Create a new [`SubscribeError`]
    #[must_use]
    pub fn new(kind: SubscribeErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`SubscribeErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &SubscribeErrorKind {
        &self.kind
    }
}

/// An enumeration of categories of [`SubscribeError`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubscribeErrorKind {
    /// Operation attempted outside of the Started lifecycle state
    State(ClientStateError),
    /// Invalid argument provided for the subscribe
    InvalidArgument(String),
}

impl fmt::Display for SubscribeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeErrorKind::State(e) => write!(f, "{e}"),
            SubscribeErrorKind::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
        }
    }
}

/// Error executing an MQTT unsubscribe
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct UnsubscribeError {
    kind: UnsubscribeErrorKind,
}

impl UnsubscribeError {
    /// Create a new [`UnsubscribeError`]
    #[must_use]
    pub fn new(kind: UnsubscribeErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`UnsubscribeErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &UnsubscribeErrorKind {
        &self.kind
    }
}

/// An enumeration of categories of [`UnsubscribeError`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UnsubscribeErrorKind {
    /// Operation attempted outside of the Started lifecycle state
    State(ClientStateError),
    /// Invalid argument provided for the unsubscribe
    InvalidArgument(String),
}

impl fmt::Display for UnsubscribeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsubscribeErrorKind::State(e) => write!(f, "{e}"),
            UnsubscribeErrorKind::InvalidArgument(reason) => {
                write!(f, "invalid argument: {reason}")
            }
        }
    }
}

/// Error acknowledging an incoming publish
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct AckError {
    kind: AckErrorKind,
}

impl AckError {
    /// Create a new [`AckError`]
    #[must_use]
    pub fn new(kind: AckErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`AckErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &AckErrorKind {
        &self.kind
    }
}

/// An enumeration of categories of [`AckError`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AckErrorKind {
    /// The publish does not require acknowledgement (Quality of Service 0)
    InvalidOperation,
}

impl fmt::Display for AckErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckErrorKind::InvalidOperation => {
                write!(f, "Quality of Service 0 publishes cannot be acknowledged")
            }
        }
    }
}

/// Error reported by the protocol engine for a single operation
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
pub struct EngineError {
    kind: EngineErrorKind,
}

impl EngineError {
    /// Create a new [`EngineError`]
    #[must_use]
    pub fn new(kind: EngineErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`EngineErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &EngineErrorKind {
        &self.kind
    }
}

/// An enumeration of categories of [`EngineError`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineErrorKind {
    /// The packet handed to the engine was rejected as invalid
    InvalidArguments(String),
    /// The engine is detached from its network connection. The packet was not
    /// accepted for delivery or session storage.
    Detached,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineErrorKind::InvalidArguments(reason) => {
                write!(f, "packet rejected by engine: {reason}")
            }
            EngineErrorKind::Detached => write!(f, "engine is detached from its connection"),
        }
    }
}
