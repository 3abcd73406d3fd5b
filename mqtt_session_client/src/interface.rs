// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Traits and types defining the protocol engine surface the session client drives.
//!
//! The session client is deliberately decoupled from any particular MQTT protocol
//! engine: it consumes engines through [`MqttEngine`] / [`MqttEventLoop`] and
//! constructs one per connection attempt through [`EngineFactory`]. The default
//! factory is backed by rumqttc; tests inject scripted implementations from
//! [`crate::interface_mocks`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::control_packet::{
    AuthProperties, AuthReasonCode, DisconnectReasonCode, Filter, Publish, SubscribeProperties,
    UnsubscribeProperties,
};
use crate::error::{ConnectionError, EngineError};

// Re-export rumqttc event types to avoid user code taking the dependency.
// TODO: Re-implement these instead of just aliasing / add to rumqttc adapter

/// Event yielded by the event loop
pub type Event = rumqttc::v5::Event;
/// Incoming data on the event loop
pub type Incoming = rumqttc::v5::Incoming;
/// Outgoing data on the event loop
pub type Outgoing = rumqttc::Outgoing;

/// Per-attempt CONNECT parameters assembled by the connection manager.
///
/// Values that change between connection attempts (clean start, refreshed
/// credentials, enhanced authentication values) travel here; values that are
/// fixed for the client lifetime come from the connection settings held by the
/// factory.
#[derive(Clone, Debug, Default)]
pub struct ConnectRequest {
    /// Clean start flag for this CONNECT
    pub clean_start: bool,
    /// Username for this CONNECT, if any
    pub username: Option<String>,
    /// Password for this CONNECT, refreshed from its source for every attempt
    pub password: Option<String>,
    /// Enhanced authentication method for this CONNECT, if any
    pub authentication_method: Option<String>,
    /// Enhanced authentication data for this CONNECT, if any
    pub authentication_data: Option<Bytes>,
    /// User properties to carry on the CONNECT packet
    pub user_properties: Vec<(String, String)>,
}

/// Handle to a single protocol engine instance, valid for one connection.
///
/// An accepted operation means the engine has taken the packet for delivery or
/// stored it in its session state; delivery across a reconnect is the engine's
/// responsibility from that point on.
#[async_trait]
pub trait MqttEngine: Send + Sync {
    /// Hand a PUBLISH packet to the engine.
    ///
    /// # Errors
    /// Returns an [`EngineError`] if the packet was rejected or the engine is
    /// detached from its connection.
    async fn publish(&self, publish: Publish) -> Result<(), EngineError>;

    /// Issue a SUBSCRIBE packet and wait for the matching SUBACK.
    ///
    /// # Errors
    /// Returns an [`EngineError`] if the packet was rejected or the engine is
    /// detached from its connection.
    async fn subscribe(
        &self,
        filter: Filter,
        properties: Option<SubscribeProperties>,
    ) -> Result<(), EngineError>;

    /// Issue an UNSUBSCRIBE packet and wait for the matching UNSUBACK.
    ///
    /// # Errors
    /// Returns an [`EngineError`] if the packet was rejected or the engine is
    /// detached from its connection.
    async fn unsubscribe(
        &self,
        topic: String,
        properties: Option<UnsubscribeProperties>,
    ) -> Result<(), EngineError>;

    /// Acknowledge a received PUBLISH.
    ///
    /// # Errors
    /// Returns an [`EngineError`] if the engine is detached from its connection.
    async fn ack(&self, publish: &Publish) -> Result<(), EngineError>;

    /// Send an AUTH packet with the given reason code and properties.
    ///
    /// # Errors
    /// Returns an [`EngineError`] if the engine is detached from its connection.
    async fn auth(
        &self,
        reason: AuthReasonCode,
        properties: AuthProperties,
    ) -> Result<(), EngineError>;

    /// Send a DISCONNECT packet with the given reason code and session expiry
    /// interval, then close the connection.
    ///
    /// # Errors
    /// Returns an [`EngineError`] if the engine is detached from its connection.
    async fn disconnect(
        &self,
        reason: DisconnectReasonCode,
        session_expiry_interval: Option<u32>,
    ) -> Result<(), EngineError>;
}

/// Poll-driven stream of events from a single protocol engine instance.
#[async_trait]
pub trait MqttEventLoop: Send {
    /// Poll the event loop for the next [`Event`].
    ///
    /// # Errors
    /// Returns a [`ConnectionError`] when the connection fails or closes.
    async fn poll(&mut self) -> Result<Event, ConnectionError>;
}

/// Constructor seam for protocol engines.
///
/// Called by the connection manager once per connection attempt. The factory
/// owns transport establishment (TCP or TLS per the connection settings) as
/// well as engine construction.
pub trait EngineFactory: Send + Sync {
    /// Construct a fresh engine and event loop for one connection attempt.
    ///
    /// # Errors
    /// Returns an [`EngineError`] if the engine could not be constructed, e.g.
    /// due to invalid settings or unreadable TLS material.
    fn build(
        &self,
        connect: &ConnectRequest,
    ) -> Result<(Arc<dyn MqttEngine>, Box<dyn MqttEventLoop>), EngineError>;
}
