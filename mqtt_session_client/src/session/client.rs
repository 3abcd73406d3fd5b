// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Public surface of the session client.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthProvider, ReauthDriver};
use crate::control_packet::{
    Filter, Publish, PublishProperties, QoS, RetainForwardRule, SubscribeProperties,
    UnsubscribeProperties,
};
use crate::error::{
    ClientStateError, EngineErrorKind, PublishError, PublishErrorKind, SubscribeError,
    SubscribeErrorKind, UnsubscribeError, UnsubscribeErrorKind,
};
use crate::interface::EngineFactory;
use crate::rumqttc_adapter as adapter;
use crate::session::ack::AckToken;
use crate::session::connection::ConnectionTracker;
use crate::session::manager::ConnectionManager;
use crate::session::pump::PublishPump;
use crate::session::queue::{PublishQueue, QueuedPublish};
use crate::session::registry::{
    ConnectObserverFn, DisconnectObserverFn, FatalErrorObserverFn, HandlerRegistry,
    MessageHandlerFn,
};
use crate::session::retry_policy::{ExponentialBackoffWithJitter, RetryPolicy};
use crate::session::state::{SessionState, ShutdownCause};
use crate::session::{ConnectedEvent, DisconnectedEvent, Registration, SessionError, SessionErrorKind};
use crate::topic::{TopicFilter, TopicName};
use crate::MqttConnectionSettings;

/// Options for configuring a new [`SessionClient`]
#[derive(Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct SessionClientOptions {
    /// MQTT Connection Settings for configuring the [`SessionClient`]
    pub connection_settings: MqttConnectionSettings,
    /// Retry policy consulted between failed connection attempts
    #[builder(default = "Box::new(ExponentialBackoffWithJitter::default())")]
    pub retry_policy: Box<dyn RetryPolicy>,
    /// Enhanced authentication provider, if the broker requires one
    #[builder(default = "None")]
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    /// Capacity of the outgoing publish queue
    #[builder(default = "65535")]
    pub publish_queue_capacity: usize,
}

/// Options for a single publish.
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", setter(into))]
pub struct PublishOptions {
    /// Quality of Service (0 or 1)
    #[builder(default = "QoS::AtLeastOnce")]
    pub qos: QoS,
    /// Retain flag
    #[builder(default = "false")]
    pub retain: bool,
    /// Content type property
    #[builder(default = "None")]
    pub content_type: Option<String>,
    /// Correlation data property
    #[builder(default = "None")]
    pub correlation_data: Option<Bytes>,
    /// Payload format indicator property (0 or 1)
    #[builder(default = "None")]
    pub payload_format_indicator: Option<u8>,
    /// Response topic property
    #[builder(default = "None")]
    pub response_topic: Option<String>,
    /// Message expiry. Carried as a property when longer than zero seconds.
    #[builder(default = "None")]
    pub message_expiry: Option<Duration>,
    /// User properties
    #[builder(default = "Vec::new()")]
    pub user_properties: Vec<(String, String)>,
}

/// Options for a single subscribe.
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", setter(into))]
pub struct SubscribeOptions {
    /// Maximum Quality of Service for the subscription (0 or 1)
    #[builder(default = "QoS::AtLeastOnce")]
    pub qos: QoS,
    /// Do not deliver publishes originated by this client
    #[builder(default = "false")]
    pub no_local: bool,
    /// Keep the retain flag of forwarded publishes as published
    #[builder(default = "false")]
    pub retain_as_published: bool,
    /// Forwarding rule for retained messages
    #[builder(default = "RetainForwardRule::OnEverySubscribe")]
    pub retain_handling: RetainForwardRule,
    /// User properties
    #[builder(default = "Vec::new()")]
    pub user_properties: Vec<(String, String)>,
}

/// Options for a single unsubscribe.
#[derive(Builder, Clone, Debug, Default)]
#[builder(pattern = "owned", setter(into))]
pub struct UnsubscribeOptions {
    /// User properties
    #[builder(default = "Vec::new()")]
    pub user_properties: Vec<(String, String)>,
}

/// Components handed to the background tasks on start.
struct StartParts {
    queue_rx: mpsc::Receiver<QueuedPublish>,
    manager: ConnectionManager,
}

/// Resilient MQTT v5 session client.
///
/// Maintains a single MQTT session across reconnections: outgoing QoS 1
/// publishes are queued until the engine accepts them for delivery or session
/// storage, incoming publishes are dispatched to registered message handlers
/// with a generation-scoped [`AckToken`], and subscribe/unsubscribe calls are
/// retried across reconnects until they succeed.
pub struct SessionClient {
    client_id: String,
    state: Arc<SessionState>,
    tracker: Arc<ConnectionTracker>,
    queue: PublishQueue,
    shutdown: CancellationToken,
    connect_observers: HandlerRegistry<ConnectObserverFn>,
    disconnect_observers: HandlerRegistry<DisconnectObserverFn>,
    fatal_error_observers: HandlerRegistry<FatalErrorObserverFn>,
    message_handlers: HandlerRegistry<MessageHandlerFn>,
    start_parts: Mutex<Option<StartParts>>,
}

impl SessionClient {
    /// Create a new [`SessionClient`] with the provided options structure,
    /// backed by the rumqttc protocol engine.
    ///
    /// # Errors
    /// Returns a [`SessionError`] if the connection settings cannot be used.
    pub fn new(options: SessionClientOptions) -> Result<Self, SessionError> {
        let factory = adapter::RumqttcEngineFactory::new(options.connection_settings.clone())
            .map_err(|e| SessionErrorKind::ConfigError(e.to_string()))?;
        Ok(Self::new_from_injection(Arc::new(factory), options))
    }

    /// Create a new [`SessionClient`] over an injected engine factory.
    ///
    /// This is primarily a test seam; use [`SessionClient::new`] to connect to
    /// a real broker.
    #[must_use]
    pub fn new_from_injection(
        factory: Arc<dyn EngineFactory>,
        options: SessionClientOptions,
    ) -> Self {
        let mut settings = options.connection_settings;
        if settings.client_id.is_empty() {
            settings.client_id = format!("session-client-{}", uuid::Uuid::new_v4().simple());
            log::info!("Generated client id: {}", settings.client_id);
        }

        let state = Arc::new(SessionState::new());
        let tracker = Arc::new(ConnectionTracker::new());
        let (queue, queue_rx) = PublishQueue::new(options.publish_queue_capacity);
        let shutdown = CancellationToken::new();
        let auth = options
            .auth_provider
            .map(|provider| Arc::new(ReauthDriver::new(provider, tracker.clone())));

        let connect_observers = HandlerRegistry::new();
        let disconnect_observers = HandlerRegistry::new();
        let fatal_error_observers = HandlerRegistry::new();
        let message_handlers = HandlerRegistry::new();

        let manager = ConnectionManager {
            factory,
            tracker: tracker.clone(),
            retry_policy: options.retry_policy,
            auth,
            shutdown: shutdown.clone(),
            connect_observers: connect_observers.clone(),
            disconnect_observers: disconnect_observers.clone(),
            message_handlers: message_handlers.clone(),
            first_connection_clean_start: settings.first_connection_clean_start,
            username: settings.username.clone(),
            password: settings.password.clone(),
            password_file: settings.password_file.clone(),
            user_properties: settings.user_properties.clone(),
            connect_timeout: settings.connection_timeout,
        };

        Self {
            client_id: settings.client_id,
            state,
            tracker,
            queue,
            shutdown,
            connect_observers,
            disconnect_observers,
            fatal_error_observers,
            message_handlers,
            start_parts: Mutex::new(Some(StartParts { queue_rx, manager })),
        }
    }

    /// Return the client id used for the MQTT connection.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Start the client: begin connecting and delivering queued publishes.
    ///
    /// If the connection manager encounters a fatal error, the client shuts
    /// down and fatal error observers are notified exactly once.
    ///
    /// # Errors
    /// Returns a [`ClientStateError`] if the client was already started or
    /// shut down.
    pub fn start(&self) -> Result<(), ClientStateError> {
        self.state.transition_started()?;
        let Some(parts) = self.start_parts.lock().unwrap().take() else {
            return Err(ClientStateError::AlreadyStarted);
        };

        tokio::spawn(
            PublishPump::new(parts.queue_rx, self.tracker.clone(), self.shutdown.clone()).run(),
        );

        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        let fatal_error_observers = self.fatal_error_observers.clone();
        tokio::spawn(async move {
            let result = parts.manager.run().await;
            if let Err(error) = result {
                log::error!("Session client terminated by fatal error: {error}");
                let _ = state.transition_shutdown(ShutdownCause::FatalError);
                shutdown.cancel();
                // Observers are notified from their own task so a slow
                // observer cannot hold up teardown.
                tokio::spawn(async move {
                    for observer in fatal_error_observers.snapshot() {
                        observer(&error);
                    }
                });
            } else {
                log::debug!(
                    "Connection manager exited cleanly ({:?})",
                    state.shutdown_cause()
                );
            }
        });
        Ok(())
    }

    /// Stop the client, cancelling all in-flight operations and gracefully
    /// disconnecting from the broker if connected.
    ///
    /// # Errors
    /// Returns [`ClientStateError::ShutDown`] if the client was already shut down.
    pub fn stop(&self) -> Result<(), ClientStateError> {
        self.state.transition_shutdown(ShutdownCause::UserStop)?;
        self.shutdown.cancel();
        Ok(())
    }

    /// Register an observer invoked synchronously, in registration order, on
    /// every successful connect.
    pub fn register_connect_observer(
        &self,
        observer: impl Fn(&ConnectedEvent) + Send + Sync + 'static,
    ) -> Registration {
        self.connect_observers.register(Arc::new(observer))
    }

    /// Register an observer invoked synchronously, in registration order, on
    /// every disconnect.
    pub fn register_disconnect_observer(
        &self,
        observer: impl Fn(&DisconnectedEvent) + Send + Sync + 'static,
    ) -> Registration {
        self.disconnect_observers.register(Arc::new(observer))
    }

    /// Register an observer invoked from a dedicated task if the client
    /// terminates with a fatal error.
    pub fn register_fatal_error_observer(
        &self,
        observer: impl Fn(&SessionError) + Send + Sync + 'static,
    ) -> Registration {
        self.fatal_error_observers.register(Arc::new(observer))
    }

    /// Register a handler invoked synchronously, in registration order, for
    /// every incoming publish.
    ///
    /// Handlers run on the engine's delivery path and must return quickly;
    /// long work should be offloaded. Each handler receives the publish and a
    /// shared [`AckToken`]; the application is responsible for acking QoS 1
    /// publishes.
    pub fn register_message_handler(
        &self,
        handler: impl Fn(Publish, AckToken) + Send + Sync + 'static,
    ) -> Registration {
        self.message_handlers.register(Arc::new(handler))
    }

    /// Publish a message, waiting until the engine has accepted it for
    /// delivery or session storage.
    ///
    /// The publish is queued without blocking; if the queue is at capacity the
    /// call fails immediately with `QueueFull`. Queued publishes survive
    /// reconnections.
    ///
    /// # Errors
    /// Returns a [`PublishError`] if the client is not started, the arguments
    /// are invalid, the queue is full, or the client shuts down first.
    pub async fn publish(
        &self,
        topic: impl Into<String> + Send,
        payload: impl Into<Bytes> + Send,
        options: PublishOptions,
    ) -> Result<(), PublishError> {
        self.state
            .require_started()
            .map_err(|e| PublishError::new(PublishErrorKind::State(e)))?;
        let topic: String = topic.into();
        let publish = build_publish(&topic, payload.into(), &options)
            .map_err(|reason| PublishError::new(PublishErrorKind::InvalidArgument(reason)))?;

        let result_rx = self.queue.enqueue(publish)?;
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(PublishError::new(PublishErrorKind::State(
                ClientStateError::ShutDown,
            ))),
            result = result_rx => match result {
                Ok(result) => result,
                Err(_) => Err(PublishError::new(PublishErrorKind::State(
                    ClientStateError::ShutDown,
                ))),
            }
        }
    }

    /// Subscribe to a topic filter, retrying across reconnects until the
    /// broker acknowledges the subscription.
    ///
    /// Incoming publishes are delivered to all registered message handlers;
    /// use [`crate::topic::TopicFilter`] for caller-side routing between
    /// multiple subscriptions.
    ///
    /// # Errors
    /// Returns a [`SubscribeError`] if the client is not started, the
    /// arguments are invalid, or the client shuts down first.
    pub async fn subscribe(
        &self,
        topic: impl Into<String> + Send,
        options: SubscribeOptions,
    ) -> Result<(), SubscribeError> {
        self.state
            .require_started()
            .map_err(|e| SubscribeError::new(SubscribeErrorKind::State(e)))?;
        let topic: String = topic.into();
        TopicFilter::from_str(&topic).map_err(|e| {
            SubscribeError::new(SubscribeErrorKind::InvalidArgument(format!(
                "topic filter: {e}"
            )))
        })?;
        if matches!(options.qos, QoS::ExactlyOnce) {
            return Err(SubscribeError::new(SubscribeErrorKind::InvalidArgument(
                "Quality of Service 2 is not supported".to_string(),
            )));
        }
        let filter = Filter {
            path: topic,
            qos: options.qos,
            nolocal: options.no_local,
            preserve_retain: options.retain_as_published,
            retain_forward_rule: options.retain_handling,
        };
        let properties = (!options.user_properties.is_empty()).then(|| SubscribeProperties {
            id: None,
            user_properties: options.user_properties.clone(),
        });

        loop {
            let snapshot = self.tracker.current();
            let Some(engine) = snapshot.engine else {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => {
                        return Err(SubscribeError::new(SubscribeErrorKind::State(
                            ClientStateError::ShutDown,
                        )));
                    }
                    () = snapshot.up.cancelled() => continue,
                }
            };
            match engine.subscribe(filter.clone(), properties.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if matches!(e.kind(), EngineErrorKind::InvalidArguments(_)) => {
                    return Err(SubscribeError::new(SubscribeErrorKind::InvalidArgument(
                        e.to_string(),
                    )));
                }
                Err(_) => {
                    // Assume the failure was caused by a disconnect; retry on
                    // the next connection.
                    tokio::select! {
                        biased;
                        () = self.shutdown.cancelled() => {
                            return Err(SubscribeError::new(SubscribeErrorKind::State(
                                ClientStateError::ShutDown,
                            )));
                        }
                        () = snapshot.down.cancelled() => {}
                    }
                }
            }
        }
    }

    /// Unsubscribe from a topic filter, retrying across reconnects until the
    /// broker acknowledges it.
    ///
    /// # Errors
    /// Returns an [`UnsubscribeError`] if the client is not started, the
    /// arguments are invalid, or the client shuts down first.
    pub async fn unsubscribe(
        &self,
        topic: impl Into<String> + Send,
        options: UnsubscribeOptions,
    ) -> Result<(), UnsubscribeError> {
        self.state
            .require_started()
            .map_err(|e| UnsubscribeError::new(UnsubscribeErrorKind::State(e)))?;
        let topic: String = topic.into();
        TopicFilter::from_str(&topic).map_err(|e| {
            UnsubscribeError::new(UnsubscribeErrorKind::InvalidArgument(format!(
                "topic filter: {e}"
            )))
        })?;
        let properties = (!options.user_properties.is_empty()).then(|| UnsubscribeProperties {
            user_properties: options.user_properties.clone(),
        });

        loop {
            let snapshot = self.tracker.current();
            let Some(engine) = snapshot.engine else {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => {
                        return Err(UnsubscribeError::new(UnsubscribeErrorKind::State(
                            ClientStateError::ShutDown,
                        )));
                    }
                    () = snapshot.up.cancelled() => continue,
                }
            };
            match engine.unsubscribe(topic.clone(), properties.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if matches!(e.kind(), EngineErrorKind::InvalidArguments(_)) => {
                    return Err(UnsubscribeError::new(
                        UnsubscribeErrorKind::InvalidArgument(e.to_string()),
                    ));
                }
                Err(_) => {
                    tokio::select! {
                        biased;
                        () = self.shutdown.cancelled() => {
                            return Err(UnsubscribeError::new(UnsubscribeErrorKind::State(
                                ClientStateError::ShutDown,
                            )));
                        }
                        () = snapshot.down.cancelled() => {}
                    }
                }
            }
        }
    }
}

/// Validate publish arguments and assemble the PUBLISH packet.
fn build_publish(topic: &str, payload: Bytes, options: &PublishOptions) -> Result<Publish, String> {
    TopicName::from_str(topic).map_err(|e| format!("topic name: {e}"))?;
    if matches!(options.qos, QoS::ExactlyOnce) {
        return Err("Quality of Service 2 is not supported".to_string());
    }
    if let Some(indicator) = options.payload_format_indicator {
        if indicator > 1 {
            return Err(format!(
                "payload format indicator must be 0 or 1, got {indicator}"
            ));
        }
    }
    let message_expiry_interval = match options.message_expiry {
        Some(expiry) => {
            let seconds = u32::try_from(expiry.as_secs())
                .map_err(|_| "message expiry must fit in 32 bits".to_string())?;
            (seconds > 0).then_some(seconds)
        }
        None => None,
    };
    let properties = PublishProperties {
        payload_format_indicator: options.payload_format_indicator,
        message_expiry_interval,
        topic_alias: None,
        response_topic: options.response_topic.clone(),
        correlation_data: options.correlation_data.clone(),
        user_properties: options.user_properties.clone(),
        subscription_identifiers: Vec::new(),
        content_type: options.content_type.clone(),
    };
    let mut publish = Publish::new(topic, options.qos, payload, Some(properties));
    publish.retain = options.retain;
    Ok(publish)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn default_options() -> PublishOptions {
        PublishOptionsBuilder::default().build().unwrap()
    }

    #[test]
    fn build_publish_minimal() {
        let publish = build_publish("test/topic", Bytes::from("payload"), &default_options())
            .unwrap();
        assert_eq!(publish.topic, "test/topic");
        assert_eq!(publish.payload, "payload");
        assert!(matches!(publish.qos, QoS::AtLeastOnce));
        assert!(!publish.retain);
    }

    #[test]
    fn build_publish_rejects_qos2() {
        let options = PublishOptionsBuilder::default()
            .qos(QoS::ExactlyOnce)
            .build()
            .unwrap();
        assert!(build_publish("test/topic", Bytes::new(), &options).is_err());
    }

    #[test]
    fn build_publish_rejects_wildcard_topic() {
        assert!(build_publish("test/#", Bytes::new(), &default_options()).is_err());
    }

    #[test_case(0, true; "payload format zero")]
    #[test_case(1, true; "payload format one")]
    #[test_case(2, false; "payload format two")]
    fn build_publish_payload_format_bounds(indicator: u8, valid: bool) {
        let options = PublishOptionsBuilder::default()
            .payload_format_indicator(Some(indicator))
            .build()
            .unwrap();
        assert_eq!(
            build_publish("test/topic", Bytes::new(), &options).is_ok(),
            valid
        );
    }

    #[test_case(Duration::from_secs(30), Some(30); "positive expiry carried")]
    #[test_case(Duration::ZERO, None; "zero expiry omitted")]
    fn build_publish_message_expiry(expiry: Duration, expected: Option<u32>) {
        let options = PublishOptionsBuilder::default()
            .message_expiry(Some(expiry))
            .build()
            .unwrap();
        let publish = build_publish("test/topic", Bytes::new(), &options).unwrap();
        assert_eq!(
            publish.properties.unwrap().message_expiry_interval,
            expected
        );
    }
}
