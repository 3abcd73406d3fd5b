// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Long-running connection management task: connect, authenticate, dispatch
//! incoming packets, reconnect under the retry policy, and surface fatal
//! termination.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::{AuthValues, ReauthDriver};
use crate::control_packet::{
    Auth, AuthProperties, AuthReasonCode, ConnAck, ConnectReturnCode, DisconnectReasonCode,
    Publish,
};
use crate::error::{ConnectionError, EngineErrorKind, StateError};
use crate::interface::{ConnectRequest, EngineFactory, Event, Incoming, MqttEngine, MqttEventLoop};
use crate::session::ack::AckToken;
use crate::session::connection::ConnectionTracker;
use crate::session::registry::{
    ConnectObserverFn, DisconnectObserverFn, HandlerRegistry, MessageHandlerFn,
};
use crate::session::retry_policy::RetryPolicy;
use crate::session::{ConnectedEvent, DisconnectedEvent, SessionError, SessionErrorKind};

/// Outcome of a single connection attempt that did not produce a connection.
enum AttemptError {
    /// The attempt failed; the retry policy decides whether to try again
    Retryable(SessionErrorKind),
    /// The attempt failed in a way that must terminate the client
    Fatal(SessionErrorKind),
    /// Shutdown was requested during the attempt
    Shutdown,
}

/// Outcome of an established connection.
enum ConnectedOutcome {
    /// The connection was lost for the given cause; reconnect under the
    /// retry policy
    Dropped(SessionErrorKind),
    /// The connection ended in a way that must terminate the client
    Fatal(SessionErrorKind),
    /// Shutdown was requested
    Shutdown,
}

/// Drives the connection lifecycle for a [`crate::session::SessionClient`].
pub(crate) struct ConnectionManager {
    pub(crate) factory: Arc<dyn EngineFactory>,
    pub(crate) tracker: Arc<ConnectionTracker>,
    pub(crate) retry_policy: Box<dyn RetryPolicy>,
    pub(crate) auth: Option<Arc<ReauthDriver>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) connect_observers: HandlerRegistry<ConnectObserverFn>,
    pub(crate) disconnect_observers: HandlerRegistry<DisconnectObserverFn>,
    pub(crate) message_handlers: HandlerRegistry<MessageHandlerFn>,
    /// Clean start setting for the generation 0 connect
    pub(crate) first_connection_clean_start: bool,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) password_file: Option<String>,
    pub(crate) user_properties: Vec<(String, String)>,
    pub(crate) connect_timeout: Duration,
}

impl ConnectionManager {
    /// Minimum time a connection must hold before a subsequent drop starts a
    /// fresh backoff sequence. Drops inside this window keep accumulating
    /// attempts, so a broker that accepts CONNECT and immediately disconnects
    /// still backs off and still exhausts a bounded retry budget.
    const STABLE_CONNECTION_UPTIME: Duration = Duration::from_secs(30);

    /// Run until shutdown (returning `Ok`) or a fatal error (returning `Err`).
    pub(crate) async fn run(self) -> Result<(), SessionError> {
        let mut prev_attempts: u32 = 0;
        loop {
            // Every path out of this match is a retryable failure; fatal and
            // shutdown outcomes return directly.
            let failure = match self.try_connect().await {
                Ok((engine, event_loop, connack)) => {
                    let connected_at = tokio::time::Instant::now();
                    match self.run_connected(engine, event_loop, &connack).await {
                        ConnectedOutcome::Dropped(kind) => {
                            if connected_at.elapsed() >= Self::STABLE_CONNECTION_UPTIME {
                                prev_attempts = 0;
                            }
                            kind
                        }
                        ConnectedOutcome::Fatal(kind) => return Err(kind.into()),
                        ConnectedOutcome::Shutdown => return Ok(()),
                    }
                }
                Err(AttemptError::Shutdown) => return Ok(()),
                Err(AttemptError::Fatal(kind)) => return Err(kind.into()),
                Err(AttemptError::Retryable(kind)) => {
                    log::error!("Connection attempt failed: {kind}");
                    kind
                }
            };

            // Defer decision to the retry policy
            let Some(delay) = self
                .retry_policy
                .next_reconnect_delay(prev_attempts, &failure)
            else {
                log::info!("Reconnect attempts halted by retry policy");
                return Err(SessionErrorKind::RetryFailure(Box::new(failure)).into());
            };
            log::info!("Attempting reconnect in {delay:?}");
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    log::info!("Reconnect attempts halted by shutdown");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
            prev_attempts = prev_attempts.saturating_add(1);
        }
    }

    /// Make a single connection attempt: construct a fresh engine, await the
    /// CONNACK within the connection timeout, and classify the result.
    async fn try_connect(
        &self,
    ) -> Result<(Arc<dyn MqttEngine>, Box<dyn MqttEventLoop>, ConnAck), AttemptError> {
        if self.shutdown.is_cancelled() {
            return Err(AttemptError::Shutdown);
        }
        let generation = self.tracker.current().generation;
        let clean_start = self.first_connection_clean_start && generation == 0;

        // Credentials are refreshed on every attempt
        let password = match &self.password_file {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(password) => Some(password),
                Err(e) => {
                    return Err(AttemptError::Fatal(SessionErrorKind::ConfigError(format!(
                        "cannot read password file: {e}"
                    ))));
                }
            },
            None => self.password.clone(),
        };

        // Initial enhanced auth values, if a provider is configured
        let (authentication_method, authentication_data) = match &self.auth {
            Some(driver) => match driver
                .provider
                .initiate_auth_exchange(false, driver.requester())
                .await
            {
                Ok(values) => (Some(values.method), Some(values.data)),
                Err(e) => {
                    return Err(AttemptError::Retryable(SessionErrorKind::AuthProvider(
                        e.to_string(),
                    )));
                }
            },
            None => (None, None),
        };

        let connect = ConnectRequest {
            clean_start,
            username: self.username.clone(),
            password,
            authentication_method,
            authentication_data,
            user_properties: self.user_properties.clone(),
        };
        log::debug!("Starting connection attempt (clean start: {clean_start})");
        let (engine, mut event_loop) = self.factory.build(&connect).map_err(|e| match e.kind() {
            EngineErrorKind::InvalidArguments(_) => {
                AttemptError::Fatal(SessionErrorKind::ConfigError(e.to_string()))
            }
            EngineErrorKind::Detached => AttemptError::Retryable(SessionErrorKind::Engine(e)),
        })?;

        // Await the CONNACK, serving AUTH continuation rounds while waiting
        let connack = {
            let timeout = tokio::time::sleep(self.connect_timeout);
            tokio::pin!(timeout);
            loop {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => {
                        let _ = engine
                            .disconnect(DisconnectReasonCode::NormalDisconnection, Some(0))
                            .await;
                        return Err(AttemptError::Shutdown);
                    }
                    () = &mut timeout => {
                        return Err(AttemptError::Retryable(SessionErrorKind::ConnectTimeout));
                    }
                    next = event_loop.poll() => match next {
                        Ok(Event::Incoming(Incoming::ConnAck(connack))) => break connack,
                        Ok(Event::Incoming(Incoming::Auth(auth))) => {
                            self.handle_auth(auth, &engine).await;
                        }
                        Ok(event) => log::debug!("Event while awaiting CONNACK: {event:?}"),
                        // Some engines surface a non-success CONNACK as a
                        // refusal error rather than an event
                        Err(ConnectionError::ConnectionRefused(code)) => {
                            let kind = SessionErrorKind::Connack(code);
                            return Err(if is_fatal_connack(code) {
                                AttemptError::Fatal(kind)
                            } else {
                                AttemptError::Retryable(kind)
                            });
                        }
                        Err(e) => {
                            return Err(AttemptError::Retryable(SessionErrorKind::Connection(e)));
                        }
                    }
                }
            }
        };
        log::debug!("Incoming CONNACK: {connack:?}");

        if !matches!(connack.code, ConnectReturnCode::Success) {
            let kind = SessionErrorKind::Connack(connack.code);
            return Err(if is_fatal_connack(connack.code) {
                AttemptError::Fatal(kind)
            } else {
                AttemptError::Retryable(kind)
            });
        }

        // The session must be present on the broker for every connection after
        // the first. Discard the broker's fresh session and end the client.
        if generation > 0 && !connack.session_present {
            log::error!("Session state not present on broker after reconnect. Ending session.");
            let _ = engine
                .disconnect(DisconnectReasonCode::NormalDisconnection, Some(0))
                .await;
            return Err(AttemptError::Fatal(SessionErrorKind::SessionLost));
        }

        // A successful CONNACK concludes the initial auth exchange
        if let Some(driver) = &self.auth {
            driver.provider.auth_success().await;
            driver.clear_in_flight();
        }

        Ok((engine, event_loop, connack))
    }

    /// Service an established connection until it drops, a fatal DISCONNECT
    /// arrives, or shutdown is requested.
    async fn run_connected(
        &self,
        engine: Arc<dyn MqttEngine>,
        mut event_loop: Box<dyn MqttEventLoop>,
        connack: &ConnAck,
    ) -> ConnectedOutcome {
        let generation = self.tracker.connect(engine.clone());
        log::info!("Connected (generation {generation})");

        let event = ConnectedEvent {
            reason_code: connack.code,
            session_present: connack.session_present,
        };
        for observer in self.connect_observers.snapshot() {
            observer(&event);
        }

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    log::info!("Shutdown requested; ending MQTT session");
                    let _ = engine
                        .disconnect(DisconnectReasonCode::NormalDisconnection, Some(0))
                        .await;
                    self.on_connection_lost(None);
                    return ConnectedOutcome::Shutdown;
                }
                next = event_loop.poll() => match next {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        log::debug!("Incoming PUB: {publish:?}");
                        self.dispatch_publish(publish);
                    }
                    Ok(Event::Incoming(Incoming::Auth(auth))) => {
                        log::debug!("Incoming AUTH: {auth:?}");
                        self.handle_auth(auth, &engine).await;
                    }
                    Ok(Event::Incoming(Incoming::Disconnect(disconnect))) => {
                        log::info!("Server DISCONNECT: {:?}", disconnect.reason_code);
                        self.on_connection_lost(Some(disconnect.reason_code));
                        if is_fatal_disconnect(disconnect.reason_code) {
                            return ConnectedOutcome::Fatal(SessionErrorKind::FatalDisconnect(
                                disconnect.reason_code,
                            ));
                        }
                        // Represent the drop the way the engine's own error
                        // path would, so the retry policy sees one shape
                        return ConnectedOutcome::Dropped(SessionErrorKind::Connection(
                            ConnectionError::MqttState(StateError::ServerDisconnect {
                                reason_code: disconnect.reason_code,
                                reason_string: None,
                            }),
                        ));
                    }
                    Ok(_event) => {
                        // Other incoming and outgoing events require no action here
                    }
                    // Some engines surface a server DISCONNECT as a state
                    // error rather than an event
                    Err(ConnectionError::MqttState(StateError::ServerDisconnect {
                        reason_code,
                        reason_string,
                    })) => {
                        log::info!("Server DISCONNECT: {reason_code:?}");
                        self.on_connection_lost(Some(reason_code));
                        if is_fatal_disconnect(reason_code) {
                            return ConnectedOutcome::Fatal(SessionErrorKind::FatalDisconnect(
                                reason_code,
                            ));
                        }
                        return ConnectedOutcome::Dropped(SessionErrorKind::Connection(
                            ConnectionError::MqttState(StateError::ServerDisconnect {
                                reason_code,
                                reason_string,
                            }),
                        ));
                    }
                    Err(e) => {
                        log::error!("Connection error: {e}");
                        self.on_connection_lost(None);
                        return ConnectedOutcome::Dropped(SessionErrorKind::Connection(e));
                    }
                }
            }
        }
    }

    /// Transition the tracker and notify disconnect observers.
    fn on_connection_lost(&self, reason_code: Option<DisconnectReasonCode>) {
        self.tracker.disconnect();
        if let Some(driver) = &self.auth {
            driver.clear_in_flight();
        }
        let event = DisconnectedEvent { reason_code };
        for observer in self.disconnect_observers.snapshot() {
            observer(&event);
        }
    }

    /// Route an incoming PUBLISH to every registered message handler, with an
    /// ack token bound to the generation it arrived on.
    fn dispatch_publish(&self, publish: Publish) {
        let generation = self.tracker.current().generation;
        let ack_token = AckToken::new(self.tracker.clone(), publish.clone(), generation);
        for handler in self.message_handlers.snapshot() {
            handler(publish.clone(), ack_token.clone());
        }
    }

    /// Route a server-originated AUTH packet through the auth provider.
    async fn handle_auth(&self, auth: Auth, engine: &Arc<dyn MqttEngine>) {
        let Some(driver) = &self.auth else {
            log::warn!("Received AUTH packet with no auth provider configured. Ignoring.");
            return;
        };
        match auth.code {
            AuthReasonCode::ContinueAuthentication => {
                let challenge = AuthValues {
                    method: auth
                        .properties
                        .as_ref()
                        .and_then(|p| p.method.clone())
                        .unwrap_or_default(),
                    data: auth
                        .properties
                        .as_ref()
                        .and_then(|p| p.data.clone())
                        .unwrap_or_default(),
                };
                let response = match driver.provider.continue_auth_exchange(challenge).await {
                    Ok(values) => AuthProperties {
                        method: Some(values.method),
                        data: Some(values.data),
                        reason: None,
                        user_properties: Vec::new(),
                    },
                    Err(e) => {
                        // Answer with empty values so the server terminates
                        // the connection
                        log::error!("Auth provider failed continuation: {e}");
                        AuthProperties {
                            method: None,
                            data: None,
                            reason: None,
                            user_properties: Vec::new(),
                        }
                    }
                };
                if let Err(e) = engine
                    .auth(AuthReasonCode::ContinueAuthentication, response)
                    .await
                {
                    log::error!("Failed to send AUTH continuation: {e}");
                }
            }
            AuthReasonCode::Success => {
                driver.provider.auth_success().await;
                driver.clear_in_flight();
            }
            AuthReasonCode::ReAuthenticate => {
                log::warn!("Unexpected ReAuthenticate AUTH packet from server. Ignoring.");
            }
        }
    }
}

/// CONNACK reason codes that terminate the client instead of re-entering the
/// retry loop.
fn is_fatal_connack(code: ConnectReturnCode) -> bool {
    matches!(
        code,
        ConnectReturnCode::MalformedPacket
            | ConnectReturnCode::ProtocolError
            | ConnectReturnCode::ImplementationSpecificError
            | ConnectReturnCode::UnsupportedProtocolVersion
            | ConnectReturnCode::ClientIdentifierNotValid
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::Banned
            | ConnectReturnCode::BadAuthenticationMethod
    )
}

/// DISCONNECT reason codes that terminate the client instead of re-entering
/// the retry loop.
fn is_fatal_disconnect(code: DisconnectReasonCode) -> bool {
    matches!(
        code,
        DisconnectReasonCode::MalformedPacket
            | DisconnectReasonCode::ProtocolError
            | DisconnectReasonCode::ImplementationSpecificError
            | DisconnectReasonCode::NotAuthorized
            | DisconnectReasonCode::SessionTakenOver
            | DisconnectReasonCode::TopicFilterInvalid
            | DisconnectReasonCode::TopicNameInvalid
            | DisconnectReasonCode::TopicAliasInvalid
            | DisconnectReasonCode::PacketTooLarge
            | DisconnectReasonCode::PayloadFormatInvalid
            | DisconnectReasonCode::RetainNotSupported
            | DisconnectReasonCode::QoSNotSupported
            | DisconnectReasonCode::SharedSubscriptionNotSupported
            | DisconnectReasonCode::SubscriptionIdentifiersNotSupported
            | DisconnectReasonCode::WildcardSubscriptionsNotSupported
    )
}
