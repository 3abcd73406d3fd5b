// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bespoke mocks for the traits defined in the interface module.
//!
//! These allow the session client to be driven end-to-end without a broker:
//! a [`MockEngineFactory`] is prepared with one [`MockConnection`] per expected
//! connection attempt, each exposing the recorded engine operations and an
//! [`EventInjector`] that feeds the event loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{error::SendError, unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::control_packet::{
    Auth, AuthProperties, AuthReasonCode, ConnAck, ConnectReturnCode, Disconnect,
    DisconnectReasonCode, Filter, Publish, SubscribeProperties, UnsubscribeProperties,
};
use crate::error::{ConnectionError, EngineError, EngineErrorKind};
use crate::interface::{ConnectRequest, EngineFactory, Event, Incoming, MqttEngine, MqttEventLoop};

/// A single operation recorded by a [`MockEngine`].
#[derive(Clone, Debug)]
pub enum EngineOperation {
    /// A PUBLISH handed to the engine
    Publish(Publish),
    /// A SUBSCRIBE issued on the engine
    Subscribe(Filter, Option<SubscribeProperties>),
    /// An UNSUBSCRIBE issued on the engine
    Unsubscribe(String, Option<UnsubscribeProperties>),
    /// An acknowledgement of a received PUBLISH, identified by packet id
    Ack(u16),
    /// An AUTH packet sent by the engine
    Auth(AuthReasonCode, AuthProperties),
    /// A DISCONNECT with reason code and session expiry interval
    Disconnect(DisconnectReasonCode, Option<u32>),
}

/// Mock implementation of a protocol engine.
///
/// Records every operation and succeeds unless a failure has been scripted
/// with one of the `fail_next_*` methods.
#[derive(Clone, Default)]
pub struct MockEngine {
    operations: Arc<Mutex<Vec<EngineOperation>>>,
    publish_failures: Arc<Mutex<VecDeque<EngineError>>>,
    subscribe_failures: Arc<Mutex<VecDeque<EngineError>>>,
    unsubscribe_failures: Arc<Mutex<VecDeque<EngineError>>>,
}

impl MockEngine {
    /// Return a new mocked engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return all operations recorded so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<EngineOperation> {
        self.operations.lock().unwrap().clone()
    }

    /// Script the next publish to fail with the given error.
    pub fn fail_next_publish(&self, error: EngineError) {
        self.publish_failures.lock().unwrap().push_back(error);
    }

    /// Script the next subscribe to fail with the given error.
    pub fn fail_next_subscribe(&self, error: EngineError) {
        self.subscribe_failures.lock().unwrap().push_back(error);
    }

    /// Script the next unsubscribe to fail with the given error.
    pub fn fail_next_unsubscribe(&self, error: EngineError) {
        self.unsubscribe_failures.lock().unwrap().push_back(error);
    }

    fn record(&self, operation: EngineOperation) {
        self.operations.lock().unwrap().push(operation);
    }
}

#[async_trait]
impl MqttEngine for MockEngine {
    async fn publish(&self, publish: Publish) -> Result<(), EngineError> {
        if let Some(e) = self.publish_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.record(EngineOperation::Publish(publish));
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: Filter,
        properties: Option<SubscribeProperties>,
    ) -> Result<(), EngineError> {
        if let Some(e) = self.subscribe_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.record(EngineOperation::Subscribe(filter, properties));
        Ok(())
    }

    async fn unsubscribe(
        &self,
        topic: String,
        properties: Option<UnsubscribeProperties>,
    ) -> Result<(), EngineError> {
        if let Some(e) = self.unsubscribe_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.record(EngineOperation::Unsubscribe(topic, properties));
        Ok(())
    }

    async fn ack(&self, publish: &Publish) -> Result<(), EngineError> {
        self.record(EngineOperation::Ack(publish.pkid));
        Ok(())
    }

    async fn auth(
        &self,
        reason: AuthReasonCode,
        properties: AuthProperties,
    ) -> Result<(), EngineError> {
        self.record(EngineOperation::Auth(reason, properties));
        Ok(())
    }

    async fn disconnect(
        &self,
        reason: DisconnectReasonCode,
        session_expiry_interval: Option<u32>,
    ) -> Result<(), EngineError> {
        self.record(EngineOperation::Disconnect(reason, session_expiry_interval));
        Ok(())
    }
}

/// Mock implementation of an engine event loop, fed by an [`EventInjector`].
pub struct MockEventLoop {
    rx: UnboundedReceiver<Result<Event, ConnectionError>>,
}

impl MockEventLoop {
    /// Return a new mocked event loop along with its injector.
    #[must_use]
    pub fn new() -> (Self, EventInjector) {
        let (tx, rx) = unbounded_channel();
        (Self { rx }, EventInjector { tx })
    }
}

#[async_trait]
impl MqttEventLoop for MockEventLoop {
    async fn poll(&mut self) -> Result<Event, ConnectionError> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Err(ConnectionError::RequestsDone),
        }
    }
}

/// Used to inject events into a [`MockEventLoop`].
#[derive(Clone)]
pub struct EventInjector {
    tx: UnboundedSender<Result<Event, ConnectionError>>,
}

impl EventInjector {
    /// Inject an arbitrary poll result into the event loop.
    ///
    /// # Errors
    /// Returns a [`SendError`] if the event loop has been dropped.
    pub fn inject(
        &self,
        item: Result<Event, ConnectionError>,
    ) -> Result<(), SendError<Result<Event, ConnectionError>>> {
        self.tx.send(item)
    }

    /// Inject a CONNACK with the given session present flag and reason code.
    pub fn connack(&self, session_present: bool, code: ConnectReturnCode) {
        let _ = self.inject(Ok(Event::Incoming(Incoming::ConnAck(ConnAck {
            session_present,
            code,
            properties: None,
        }))));
    }

    /// Inject an incoming PUBLISH.
    pub fn publish(&self, publish: Publish) {
        let _ = self.inject(Ok(Event::Incoming(Incoming::Publish(publish))));
    }

    /// Inject an incoming AUTH packet.
    pub fn auth(&self, code: AuthReasonCode, properties: Option<AuthProperties>) {
        let _ = self.inject(Ok(Event::Incoming(Incoming::Auth(Auth {
            code,
            properties,
        }))));
    }

    /// Inject a server-sent DISCONNECT with the given reason code.
    pub fn disconnect(&self, reason_code: DisconnectReasonCode) {
        let _ = self.inject(Ok(Event::Incoming(Incoming::Disconnect(Disconnect {
            reason_code,
            properties: None,
        }))));
    }

    /// Inject a transport failure, as seen when the network connection drops.
    pub fn transport_error(&self) {
        let _ = self.inject(Err(ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))));
    }
}

/// Handles to one prepared mock connection: the engine that the factory will
/// hand out, and the injector feeding its event loop.
pub struct MockConnection {
    /// The engine served for this connection attempt
    pub engine: MockEngine,
    /// Injector for this connection attempt's event loop
    pub injector: EventInjector,
}

/// Mock implementation of an engine factory.
///
/// Serves prepared connections in order and records the [`ConnectRequest`] of
/// every build. Once the prepared connections are exhausted, builds fail with
/// a detached-engine error, which the session client treats as a failed
/// (retryable) connection attempt.
#[derive(Clone, Default)]
pub struct MockEngineFactory {
    prepared: Arc<Mutex<VecDeque<(MockEngine, MockEventLoop)>>>,
    connect_requests: Arc<Mutex<Vec<ConnectRequest>>>,
}

impl MockEngineFactory {
    /// Return a new mocked factory with no prepared connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare one connection attempt, returning its handles.
    #[must_use]
    pub fn prepare_connection(&self) -> MockConnection {
        let engine = MockEngine::new();
        let (event_loop, injector) = MockEventLoop::new();
        self.prepared
            .lock()
            .unwrap()
            .push_back((engine.clone(), event_loop));
        MockConnection { engine, injector }
    }

    /// Return the CONNECT parameters of every build so far, in order.
    #[must_use]
    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        self.connect_requests.lock().unwrap().clone()
    }
}

impl EngineFactory for MockEngineFactory {
    fn build(
        &self,
        connect: &ConnectRequest,
    ) -> Result<(Arc<dyn MqttEngine>, Box<dyn MqttEventLoop>), EngineError> {
        let Some((engine, event_loop)) = self.prepared.lock().unwrap().pop_front() else {
            return Err(EngineError::new(EngineErrorKind::Detached));
        };
        self.connect_requests.lock().unwrap().push(connect.clone());
        Ok((Arc::new(engine), Box::new(event_loop)))
    }
}
