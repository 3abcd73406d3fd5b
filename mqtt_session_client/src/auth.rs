// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Enhanced authentication (MQTT v5 AUTH exchange) provider contract.
//!
//! A provider spans connections for the whole client lifetime: it supplies the
//! initial CONNECT authentication values, answers server continuation
//! challenges, and may request reauthentication at any time through the
//! [`ReauthRequester`] it is handed on the first exchange.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::control_packet::{AuthProperties, AuthReasonCode};
use crate::session::connection::ConnectionTracker;

/// Used as the authentication method for the MQTT client when using SAT.
pub const SAT_AUTHENTICATION_METHOD: &str = "K8S-SAT";

/// Error type returned by [`AuthProvider`] implementations.
pub type AuthProviderError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Authentication method and data for one round of an AUTH exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthValues {
    /// Authentication method
    pub method: String,
    /// Authentication data
    pub data: Bytes,
}

/// Contract for user-supplied enhanced authentication.
///
/// `initiate_auth_exchange` is called with `reauth = false` before every
/// CONNECT and with `reauth = true` when reauthentication is requested.
/// Server-originated continuation challenges are routed through
/// `continue_auth_exchange`, and `auth_success` is called when the server
/// accepts the exchange.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Produce the authentication values opening an exchange.
    ///
    /// The `requester` handle is valid for the entire client lifetime and may
    /// be retained to request reauthentication later.
    ///
    /// # Errors
    /// Returns an [`AuthProviderError`] if values could not be produced; the
    /// current connection attempt fails and is retried.
    async fn initiate_auth_exchange(
        &self,
        reauth: bool,
        requester: ReauthRequester,
    ) -> Result<AuthValues, AuthProviderError>;

    /// Answer a server continuation challenge.
    ///
    /// # Errors
    /// Returns an [`AuthProviderError`] if the challenge could not be
    /// answered; the server is sent empty values so it terminates the
    /// connection.
    async fn continue_auth_exchange(
        &self,
        challenge: AuthValues,
    ) -> Result<AuthValues, AuthProviderError>;

    /// Called when the server reports the exchange succeeded.
    async fn auth_success(&self);
}

/// Handle for requesting reauthentication on the current connection.
///
/// Requests are ignored while the client is disconnected (the next connect
/// runs initial authentication anyway) and collapse to a single in-flight
/// exchange while connected.
#[derive(Clone)]
pub struct ReauthRequester {
    inner: Weak<ReauthDriver>,
}

impl ReauthRequester {
    /// Request a reauthentication exchange on the current connection.
    pub fn request_reauth(&self) {
        let Some(driver) = self.inner.upgrade() else {
            log::debug!("Reauth requested after client was dropped. Ignoring.");
            return;
        };
        tokio::spawn(async move { driver.run_reauth().await });
    }
}

/// Driver state for the enhanced auth exchange, shared between the connection
/// manager and any [`ReauthRequester`] handles held by the provider.
pub(crate) struct ReauthDriver {
    pub(crate) provider: Arc<dyn AuthProvider>,
    tracker: Arc<ConnectionTracker>,
    in_flight: AtomicBool,
}

impl ReauthDriver {
    pub(crate) fn new(provider: Arc<dyn AuthProvider>, tracker: Arc<ConnectionTracker>) -> Self {
        Self {
            provider,
            tracker,
            in_flight: AtomicBool::new(false),
        }
    }

    pub(crate) fn requester(self: &Arc<Self>) -> ReauthRequester {
        ReauthRequester {
            inner: Arc::downgrade(self),
        }
    }

    /// Mark the current exchange as finished, allowing a new one to start.
    pub(crate) fn clear_in_flight(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Run one reauthentication exchange, if the connection is up and no other
    /// exchange is in flight.
    async fn run_reauth(self: Arc<Self>) {
        let snapshot = self.tracker.current();
        let Some(engine) = snapshot.engine else {
            log::debug!("Reauth requested while disconnected. Ignoring.");
            return;
        };
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("Reauth requested while an auth exchange is in flight. Dropping.");
            return;
        }
        let values = match self
            .provider
            .initiate_auth_exchange(true, self.requester())
            .await
        {
            Ok(values) => values,
            Err(e) => {
                log::error!("Auth provider failed to initiate reauth: {e}");
                self.clear_in_flight();
                return;
            }
        };
        let properties = AuthProperties {
            method: Some(values.method),
            data: Some(values.data),
            reason: None,
            user_properties: Vec::new(),
        };
        if let Err(e) = engine
            .auth(AuthReasonCode::ReAuthenticate, properties)
            .await
        {
            log::error!("Failed to send reauth AUTH packet: {e}");
            self.clear_in_flight();
        }
        // On success, in_flight is cleared when the server concludes the
        // exchange (AUTH success) or the connection drops.
    }
}

/// Error type for constructing a [`SatTokenAuthProvider`].
#[derive(Debug, Error)]
pub enum SatAuthProviderError {
    /// I/O error occurred while reading the SAT token file.
    #[error("{0}")]
    IoError(#[from] std::io::Error),
    /// No SAT file found at the provided location.
    #[error("No SAT file found")]
    NoSatFile,
}

/// Enhanced auth provider backed by a Kubernetes service account token file.
///
/// The token file is re-read on every exchange, so token rotation is picked
/// up by requesting reauthentication after the file changes.
pub struct SatTokenAuthProvider {
    /// File path to the SAT token
    file_location: String,
}

impl SatTokenAuthProvider {
    /// Create a new SAT auth provider for the given token file.
    ///
    /// # Errors
    /// Returns a [`SatAuthProviderError`] if the token file does not exist.
    pub fn new(file_location: String) -> Result<Self, SatAuthProviderError> {
        if !std::path::Path::new(&file_location).is_file() {
            return Err(SatAuthProviderError::NoSatFile);
        }
        Ok(Self { file_location })
    }
}

#[async_trait]
impl AuthProvider for SatTokenAuthProvider {
    async fn initiate_auth_exchange(
        &self,
        reauth: bool,
        _requester: ReauthRequester,
    ) -> Result<AuthValues, AuthProviderError> {
        log::debug!("Reading SAT token for auth exchange (reauth: {reauth})");
        let sat_token = std::fs::read(&self.file_location)?;
        Ok(AuthValues {
            method: SAT_AUTHENTICATION_METHOD.to_string(),
            data: sat_token.into(),
        })
    }

    async fn continue_auth_exchange(
        &self,
        challenge: AuthValues,
    ) -> Result<AuthValues, AuthProviderError> {
        // SAT authentication is a single round trip.
        Err(format!(
            "unexpected continuation challenge for method {}",
            challenge.method
        )
        .into())
    }

    async fn auth_success(&self) {
        log::debug!("SAT authentication successful");
    }
}
