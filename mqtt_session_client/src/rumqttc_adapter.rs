// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter layer for the rumqttc crate

use std::{
    fs::{self, File},
    io::BufReader,
    sync::Arc,
};

use async_trait::async_trait;
use openssl::pkey::PKey;
use rumqttc::{
    tokio_rustls::rustls::{
        client::WebPkiServerVerifier, pki_types::PrivateKeyDer, ClientConfig, RootCertStore,
    },
    Transport,
};
use thiserror::Error;

use crate::connection_settings::MqttConnectionSettings;
use crate::control_packet::{
    AuthProperties, AuthReasonCode, DisconnectReasonCode, Filter, Publish, SubscribeProperties,
    UnsubscribeProperties,
};
use crate::error::{ConnectionError, EngineError, EngineErrorKind};
use crate::interface::{ConnectRequest, EngineFactory, Event, MqttEngine, MqttEventLoop};

/// Capacity of the rumqttc request channel. Queueing of outgoing publishes is
/// handled above the engine, so this only needs to absorb request bursts.
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Engine factory backed by rumqttc. Each build dials the broker configured in
/// the connection settings, over TCP or TLS.
pub(crate) struct RumqttcEngineFactory {
    connection_settings: MqttConnectionSettings,
}

impl RumqttcEngineFactory {
    /// Create a factory for the given settings, validating that they can be
    /// turned into engine options.
    pub(crate) fn new(
        connection_settings: MqttConnectionSettings,
    ) -> Result<Self, TransportConfigError> {
        // Trial conversion to surface configuration errors at construction
        // rather than on the first connection attempt.
        mqtt_options(&connection_settings, &ConnectRequest::default())?;
        Ok(Self {
            connection_settings,
        })
    }
}

impl EngineFactory for RumqttcEngineFactory {
    fn build(
        &self,
        connect: &ConnectRequest,
    ) -> Result<(Arc<dyn MqttEngine>, Box<dyn MqttEventLoop>), EngineError> {
        let options = mqtt_options(&self.connection_settings, connect)
            .map_err(|e| EngineError::new(EngineErrorKind::InvalidArguments(e.to_string())))?;
        let (client, event_loop) = rumqttc::v5::AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        Ok((
            Arc::new(RumqttcEngine { client }),
            Box::new(RumqttcEventLoop { event_loop }),
        ))
    }
}

struct RumqttcEngine {
    client: rumqttc::v5::AsyncClient,
}

#[async_trait]
impl MqttEngine for RumqttcEngine {
    async fn publish(&self, publish: Publish) -> Result<(), EngineError> {
        let topic = String::from_utf8(publish.topic.to_vec())
            .map_err(|e| EngineError::new(EngineErrorKind::InvalidArguments(e.to_string())))?;
        // NOTE: The returned notice future resolves on PUBACK. Acceptance by
        // the engine (delivery or session storage) is what completes a publish
        // here, so the notice is not awaited.
        match publish.properties {
            Some(properties) => {
                self.client
                    .publish_with_properties(
                        topic,
                        publish.qos,
                        publish.retain,
                        publish.payload,
                        properties,
                    )
                    .await
            }
            None => {
                self.client
                    .publish(topic, publish.qos, publish.retain, publish.payload)
                    .await
            }
        }
        .map(|_notice| ())
        .map_err(detached)
    }

    async fn subscribe(
        &self,
        filter: Filter,
        properties: Option<SubscribeProperties>,
    ) -> Result<(), EngineError> {
        let notice = match properties {
            Some(properties) => {
                self.client
                    .subscribe_many_with_properties([filter], properties)
                    .await
            }
            None => self.client.subscribe_many([filter]).await,
        }
        .map_err(detached)?;
        // Wait for the SUBACK.
        // NOTE: The notice also fails when the connection drops before the
        // SUBACK arrives. Report that as detachment so the call is retried on
        // the next connection instead of surfacing as a rejection.
        notice
            .wait_async()
            .await
            .map_err(|e| {
                log::debug!("subscribe notice failed: {e}");
                EngineError::new(EngineErrorKind::Detached)
            })?;
        Ok(())
    }

    async fn unsubscribe(
        &self,
        topic: String,
        properties: Option<UnsubscribeProperties>,
    ) -> Result<(), EngineError> {
        let notice = match properties {
            Some(properties) => {
                self.client
                    .unsubscribe_with_properties(topic, properties)
                    .await
            }
            None => self.client.unsubscribe(topic).await,
        }
        .map_err(detached)?;
        // Wait for the UNSUBACK, with the same detachment mapping as subscribe
        notice
            .wait_async()
            .await
            .map_err(|e| {
                log::debug!("unsubscribe notice failed: {e}");
                EngineError::new(EngineErrorKind::Detached)
            })?;
        Ok(())
    }

    async fn ack(&self, publish: &Publish) -> Result<(), EngineError> {
        self.client.ack(publish).await.map_err(detached)
    }

    async fn auth(
        &self,
        _reason: AuthReasonCode,
        properties: AuthProperties,
    ) -> Result<(), EngineError> {
        // rumqttc selects the AUTH reason code itself based on the connection
        // state, so the requested reason is informational here.
        self.client.reauth(Some(properties)).await.map_err(detached)
    }

    async fn disconnect(
        &self,
        _reason: DisconnectReasonCode,
        _session_expiry_interval: Option<u32>,
    ) -> Result<(), EngineError> {
        // TODO: rumqttc does not allow setting the reason code or the session
        // expiry interval on an outgoing DISCONNECT. Map them once it does.
        self.client.disconnect().await.map_err(detached)
    }
}

fn detached(e: rumqttc::v5::ClientError) -> EngineError {
    log::debug!("rumqttc request failed: {e}");
    EngineError::new(EngineErrorKind::Detached)
}

struct RumqttcEventLoop {
    event_loop: rumqttc::v5::EventLoop,
}

#[async_trait]
impl MqttEventLoop for RumqttcEventLoop {
    async fn poll(&mut self) -> Result<Event, ConnectionError> {
        self.event_loop.poll().await
    }
}

/// Error converting connection settings into rumqttc options.
#[derive(Error, Debug)]
#[error("{msg}")]
pub(crate) struct TransportConfigError {
    msg: String,
    #[source]
    source: Option<anyhow::Error>,
}

impl TransportConfigError {
    fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            source: None,
        }
    }

    fn with_source(msg: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            msg: msg.into(),
            source: Some(source),
        }
    }
}

/// Assemble rumqttc options from the fixed connection settings and the
/// per-attempt CONNECT parameters.
fn mqtt_options(
    settings: &MqttConnectionSettings,
    connect: &ConnectRequest,
) -> Result<rumqttc::v5::MqttOptions, TransportConfigError> {
    let mut mqtt_options = rumqttc::v5::MqttOptions::new(
        settings.client_id.clone(),
        settings.hostname.clone(),
        settings.tcp_port,
    );
    mqtt_options.set_keep_alive(settings.keep_alive);
    match u32::try_from(settings.session_expiry.as_secs()) {
        // rumqttc panics on session expiry under 5 seconds
        Ok(se) if se >= 5 => mqtt_options.set_session_expiry_interval(Some(se)),
        Ok(_) => {
            return Err(TransportConfigError::new(
                "session expiry must be at least 5 seconds",
            ));
        }
        Err(e) => {
            return Err(TransportConfigError::with_source(
                "session expiry cannot convert to u32",
                e.into(),
            ));
        }
    };
    mqtt_options.set_connection_timeout(settings.connection_timeout.as_secs());
    mqtt_options.set_clean_start(connect.clean_start);
    if let Some(username) = &connect.username {
        mqtt_options.set_credentials(username, connect.password.clone().unwrap_or_default());
    }
    if let Some(will) = &settings.will {
        mqtt_options.set_last_will(will.clone());
    }
    if let Some(method) = &connect.authentication_method {
        mqtt_options.set_authentication_method(Some(method.clone()));
        mqtt_options.set_authentication_data(connect.authentication_data.clone());
    }
    // TODO: map receive_max and the CONNECT user properties once the rumqttc
    // options surface exposes them.

    // Automatic acking is disabled; the application acks through AckToken
    mqtt_options.set_manual_acks(true);

    if settings.use_tls {
        let config = tls_config(settings).map_err(|e| {
            TransportConfigError::with_source(format!("tls config error: {e}"), e)
        })?;
        mqtt_options.set_transport(Transport::tls_with_config(
            rumqttc::TlsConfiguration::Rustls(Arc::new(config)),
        ));
    }

    Ok(mqtt_options)
}

/// Build the rustls client config from the TLS-related settings.
fn tls_config(settings: &MqttConnectionSettings) -> Result<ClientConfig, anyhow::Error> {
    // Server identity validation roots
    let mut root_cert_store = RootCertStore::empty();
    if let Some(ca_file) = &settings.ca_file {
        let fh = File::open(ca_file)?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(fh)).collect::<Result<Vec<_>, _>>()?;
        root_cert_store.add_parsable_certificates(certs);
    } else {
        for cert in rustls_native_certs::load_native_certs()? {
            root_cert_store.add(cert)?;
        }
    }

    let config_builder = if settings.ca_require_revocation_check {
        ClientConfig::builder()
            .with_webpki_verifier(WebPkiServerVerifier::builder(root_cert_store.into()).build()?)
    } else {
        ClientConfig::builder().with_root_certificates(root_cert_store)
    };

    // X509 client authentication
    let config = match (&settings.cert_file, &settings.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let fh = File::open(cert_file)?;
            let certs = rustls_pemfile::certs(&mut BufReader::new(fh))
                .collect::<Result<Vec<_>, _>>()?;
            if certs.is_empty() {
                anyhow::bail!("no valid client cert in cert file chain");
            }
            let key = match &settings.key_file_password {
                Some(key_file_password) => {
                    let pem = fs::read(key_file)?;
                    let pkey =
                        PKey::private_key_from_pem_passphrase(&pem, key_file_password.as_bytes())?;
                    PrivateKeyDer::try_from(pkey.private_key_to_der()?)
                        .map_err(|e| anyhow::anyhow!("{e}"))?
                }
                None => {
                    let fh = File::open(key_file)?;
                    rustls_pemfile::private_key(&mut BufReader::new(fh))?
                        .ok_or_else(|| anyhow::anyhow!("no valid client key in key file"))?
                }
            };
            config_builder.with_client_auth_cert(certs, key)?
        }
        _ => config_builder.with_no_client_auth(),
    };

    Ok(config)
}
