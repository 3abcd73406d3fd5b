// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Generic MQTT connection settings implementations

use std::env::{self, VarError};
use std::time::Duration;

use crate::control_packet::LastWill;

/// All the settings required to establish an MQTT connection.
#[derive(Builder, Clone, PartialEq)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct MqttConnectionSettings {
    /// Client identifier. A random identifier is generated at session client
    /// construction when left empty.
    #[builder(default = "String::new()")]
    pub(crate) client_id: String,
    /// FQDN of the host to connect to
    pub(crate) hostname: String,
    /// TCP port to connect to the host on
    #[builder(default = "8883")]
    pub(crate) tcp_port: u16,
    /// Max time between communications
    #[builder(default = "Duration::from_secs(60)")]
    pub(crate) keep_alive: Duration,
    /// Max number of in-flight Quality of Service 1 and 2 messages
    #[builder(default = "u16::MAX")] // See: MQTT 5.0 spec, 3.1.2.11.3
    pub(crate) receive_max: u16,
    /// Session Expiry Interval
    #[builder(default = "Duration::from_secs(3600)")]
    pub(crate) session_expiry: Duration,
    /// Timeout for a single connection attempt
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) connection_timeout: Duration,
    /// Clean start on the very first connection of the session.
    /// Reconnects within the session always use clean start = false.
    #[builder(default = "false")]
    pub(crate) first_connection_clean_start: bool,
    /// Username for MQTT
    #[builder(default = "None")]
    pub(crate) username: Option<String>,
    /// Password for MQTT
    #[builder(default = "None")]
    pub(crate) password: Option<String>,
    /// Path to a file containing the MQTT password, re-read on every connection attempt
    #[builder(default = "None")]
    pub(crate) password_file: Option<String>,
    /// TLS negotiation enabled
    #[builder(default = "true")]
    pub(crate) use_tls: bool,
    /// Path to a PEM file used to validate server identity
    #[builder(default = "None")]
    pub(crate) ca_file: Option<String>,
    /// Require certificate revocation checking when validating server identity
    #[builder(default = "false")]
    pub(crate) ca_require_revocation_check: bool,
    /// Path to PEM file used to establish X509 client authentication
    #[builder(default = "None")]
    pub(crate) cert_file: Option<String>,
    /// Path to a file containing a key used to establish X509 client authentication
    #[builder(default = "None")]
    pub(crate) key_file: Option<String>,
    /// Password used to decrypt the key
    #[builder(default = "None")]
    pub(crate) key_file_password: Option<String>,
    /// Will message and properties carried on the CONNECT packet
    #[builder(default = "None")]
    pub(crate) will: Option<LastWill>,
    /// User properties carried on the CONNECT packet
    #[builder(default = "Vec::new()")]
    pub(crate) user_properties: Vec<(String, String)>,
}

/// Recognized connection string keys, in canonical casing.
/// Environment variables use the `MQTT_<UPPER_SNAKE>` form of the same keys.
const RECOGNIZED_KEYS: [&str; 16] = [
    "HostName",
    "TcpPort",
    "UseTls",
    "ClientId",
    "UserName",
    "Password",
    "PasswordFile",
    "CertFile",
    "KeyFile",
    "KeyFilePassword",
    "CaFile",
    "CaRequireRevocationCheck",
    "KeepAlive",
    "SessionExpiry",
    "ReceiveMaximum",
    "ConnectionTimeout",
];

impl MqttConnectionSettingsBuilder {
    /// Initialize the [`MqttConnectionSettingsBuilder`] from a connection string.
    ///
    /// Keys are matched case-insensitively. `KeepAlive`, `SessionExpiry` and
    /// `ConnectionTimeout` values are ISO-8601 durations (e.g. `PT60S`).
    ///
    /// # Errors
    /// Returns a `String` describing the error if the connection string contains an
    /// unrecognized key, a value fails to parse, or `HostName`/`TcpPort` are missing.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, String> {
        let mut pairs = Vec::new();
        for segment in connection_string.split(';').filter(|s| !s.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or(format!("malformed connection string segment: {segment}"))?;
            let canonical = RECOGNIZED_KEYS
                .iter()
                .find(|k| k.eq_ignore_ascii_case(key.trim()))
                .ok_or(format!("unrecognized connection string key: {key}"))?;
            pairs.push((*canonical, value.to_string()));
        }
        Self::from_key_lookup(|key| {
            Ok(pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone()))
        })
    }

    /// Initialize the [`MqttConnectionSettingsBuilder`] from environment variables.
    ///
    /// Each recognized key is read from `MQTT_<UPPER_SNAKE>` of its name, e.g.
    /// `HostName` from `MQTT_HOST_NAME`. Parsing is identical to
    /// [`from_connection_string`](Self::from_connection_string): a connection string
    /// and its equivalent environment variables produce equal settings.
    ///
    /// # Errors
    /// Returns a `String` describing the error if a value fails to parse or
    /// `HostName`/`TcpPort` are missing.
    pub fn from_environment() -> Result<Self, String> {
        Self::from_key_lookup(|key| string_from_environment(&environment_key(key)))
    }

    /// Shared assembly for the connection string and environment constructors.
    fn from_key_lookup(
        lookup: impl Fn(&str) -> Result<Option<String>, String>,
    ) -> Result<Self, String> {
        let hostname = lookup("HostName")?;
        let tcp_port = lookup("TcpPort")?
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|e| format!("TcpPort: {e}"))?;
        let use_tls = parse_bool_value(lookup("UseTls")?, "UseTls")?;
        let client_id = lookup("ClientId")?;
        let username = Some(lookup("UserName")?);
        let password = Some(lookup("Password")?);
        let password_file = Some(lookup("PasswordFile")?);
        let cert_file = Some(lookup("CertFile")?);
        let key_file = Some(lookup("KeyFile")?);
        let key_file_password = Some(lookup("KeyFilePassword")?);
        let ca_file = Some(lookup("CaFile")?);
        let ca_require_revocation_check =
            parse_bool_value(lookup("CaRequireRevocationCheck")?, "CaRequireRevocationCheck")?;
        let keep_alive = parse_duration_value(lookup("KeepAlive")?, "KeepAlive")?;
        let session_expiry = parse_duration_value(lookup("SessionExpiry")?, "SessionExpiry")?;
        let receive_max = lookup("ReceiveMaximum")?
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|e| format!("ReceiveMaximum: {e}"))?;
        let connection_timeout =
            parse_duration_value(lookup("ConnectionTimeout")?, "ConnectionTimeout")?;

        if hostname.is_none() {
            return Err("HostName is required".to_string());
        }
        if tcp_port.is_none() {
            return Err("TcpPort is required".to_string());
        }

        Ok(Self {
            client_id,
            hostname,
            tcp_port,
            keep_alive,
            receive_max,
            session_expiry,
            connection_timeout,
            first_connection_clean_start: None,
            username,
            password,
            password_file,
            use_tls,
            ca_file,
            ca_require_revocation_check,
            cert_file,
            key_file,
            key_file_password,
            will: None,
            user_properties: None,
        })
    }

    /// Validate the MQTT Connection Settings.
    ///
    /// # Errors
    /// Returns a `String` describing the error if
    /// - `hostname` is empty
    /// - `keep_alive` exceeds the 16 bit range of the CONNECT packet field
    /// - `session_expiry` exceeds the 32 bit range of its CONNECT property
    /// - `receive_max` is zero
    /// - `password` and `password_file` are both Some
    /// - `key_file` and `cert_file` are not provided together
    fn validate(&self) -> Result<(), String> {
        if let Some(hostname) = &self.hostname {
            if hostname.is_empty() {
                return Err("Host name cannot be empty".to_string());
            }
        }
        if let Some(keep_alive) = &self.keep_alive {
            if keep_alive.as_secs() > u64::from(u16::MAX) {
                return Err("keep_alive must fit in the 16 bit CONNECT field".to_string());
            }
        }
        if let Some(session_expiry) = &self.session_expiry {
            if session_expiry.as_secs() > u64::from(u32::MAX) {
                return Err("session_expiry must fit in the 32 bit CONNECT property".to_string());
            }
        }
        if let Some(receive_max) = self.receive_max {
            if receive_max == 0 {
                return Err("receive_max must be at least 1".to_string());
            }
        }
        if let (Some(Some(_)), Some(Some(_))) = (&self.password, &self.password_file) {
            return Err(
                "password and password_file should not be used at the same time.".to_string(),
            );
        }
        if let Some(Some(key_file)) = &self.key_file {
            if let Some(Some(cert_file)) = &self.cert_file {
                if cert_file.is_empty() || key_file.is_empty() {
                    return Err("key_file and cert_file need to be provided together.".to_string());
                }
            } else {
                return Err("key_file and cert_file need to be provided together.".to_string());
            }
        } else if let Some(Some(_)) = &self.cert_file {
            return Err("key_file and cert_file need to be provided together.".to_string());
        }
        Ok(())
    }
}

/// Return the environment variable name for a canonical key,
/// e.g. `HostName` -> `MQTT_HOST_NAME`.
fn environment_key(key: &str) -> String {
    let mut result = String::from("MQTT");
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            result.push('_');
        }
        result.push(c.to_ascii_uppercase());
    }
    result
}

/// Helper function to get an environment variable as a string.
fn string_from_environment(key: &str) -> Result<Option<String>, String> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => {
            Err("Could not parse non-unicode environment variable".to_string())
        }
    }
}

/// Parse an optional boolean value, matched case-insensitively.
fn parse_bool_value(value: Option<String>, key: &str) -> Result<Option<bool>, String> {
    value
        .map(|v| v.to_lowercase().parse::<bool>())
        .transpose()
        .map_err(|e| format!("{key}: {e}"))
}

/// Parse an optional ISO-8601 duration value (e.g. `PT30S`).
fn parse_duration_value(value: Option<String>, key: &str) -> Result<Option<Duration>, String> {
    value
        .map(|v| {
            v.parse::<iso8601_duration::Duration>()
                .map_err(|_| format!("{key}: invalid ISO-8601 duration: {v}"))?
                .to_std()
                .ok_or(format!("{key}: duration is not a fixed length of time: {v}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_case::test_case;

    use super::*;

    #[test]
    fn minimum_configuration() {
        let connection_settings_builder_result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .build();
        assert!(connection_settings_builder_result.is_ok());
    }

    #[test]
    fn hostname() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname(String::new())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn password_combos() {
        // The password and password_file cannot be used at the same time
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .password("test_password".to_string())
            .password_file("test_password_file".to_string())
            .build();
        assert!(result.is_err());

        // But password alone works
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .password("test_password".to_string())
            .build();
        assert!(result.is_ok());

        // But password_file alone works
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .password_file("test_password_file".to_string())
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn cert_file_key_file_combos() {
        // The cert_file and key_file can be provided together
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .cert_file("test_cert_file".to_string())
            .key_file("test_key_file".to_string())
            .build();
        assert!(result.is_ok());

        // The cert_file cannot be used without key_file
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .cert_file("test_cert_file".to_string())
            .build();
        assert!(result.is_err());

        // The key_file cannot be used without cert_file
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .key_file("test_key_file".to_string())
            .build();
        assert!(result.is_err());

        // The cert_file must have a non-empty value
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .key_file("test_key_file".to_string())
            .cert_file(String::new())
            .build();
        assert!(result.is_err());
    }

    #[test_case(Duration::from_secs(u64::from(u16::MAX)), true; "keep alive at bound")]
    #[test_case(Duration::from_secs(u64::from(u16::MAX) + 1), false; "keep alive over bound")]
    fn keep_alive_bounds(keep_alive: Duration, valid: bool) {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .keep_alive(keep_alive)
            .build();
        assert_eq!(result.is_ok(), valid);
    }

    #[test_case(Duration::from_secs(u64::from(u32::MAX)), true; "session expiry at bound")]
    #[test_case(Duration::from_secs(u64::from(u32::MAX) + 1), false; "session expiry over bound")]
    fn session_expiry_bounds(session_expiry: Duration, valid: bool) {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .session_expiry(session_expiry)
            .build();
        assert_eq!(result.is_ok(), valid);
    }

    #[test_case(1_u16, true; "receive maximum lower bound")]
    #[test_case(0_u16, false; "receive maximum zero")]
    fn receive_max_bounds(receive_max: u16, valid: bool) {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .receive_max(receive_max)
            .build();
        assert_eq!(result.is_ok(), valid);
    }

    #[test]
    fn from_connection_string_full_configuration() {
        let builder = MqttConnectionSettingsBuilder::from_connection_string(
            "HostName=test.hostname.com;TcpPort=8883;UseTls=True;ClientId=test-client-id;\
             UserName=test-username;PasswordFile=/path/to/password/file;\
             CertFile=/path/to/cert/file;KeyFile=/path/to/key/file;KeyFilePassword=secret;\
             CaFile=/path/to/ca/file;CaRequireRevocationCheck=False;\
             KeepAlive=PT60S;SessionExpiry=PT1H;ReceiveMaximum=100;ConnectionTimeout=PT30S",
        )
        .unwrap();
        assert_eq!(builder.hostname, Some("test.hostname.com".to_string()));
        assert_eq!(builder.tcp_port, Some(8883));
        assert_eq!(builder.use_tls, Some(true));
        assert_eq!(builder.client_id, Some("test-client-id".to_string()));
        assert_eq!(builder.username, Some(Some("test-username".to_string())));
        assert_eq!(
            builder.password_file,
            Some(Some("/path/to/password/file".to_string()))
        );
        assert_eq!(
            builder.cert_file,
            Some(Some("/path/to/cert/file".to_string()))
        );
        assert_eq!(builder.key_file, Some(Some("/path/to/key/file".to_string())));
        assert_eq!(builder.key_file_password, Some(Some("secret".to_string())));
        assert_eq!(builder.ca_file, Some(Some("/path/to/ca/file".to_string())));
        assert_eq!(builder.ca_require_revocation_check, Some(false));
        assert_eq!(builder.keep_alive, Some(Duration::from_secs(60)));
        assert_eq!(builder.session_expiry, Some(Duration::from_secs(3600)));
        assert_eq!(builder.receive_max, Some(100));
        assert_eq!(builder.connection_timeout, Some(Duration::from_secs(30)));
        assert!(builder.build().is_ok());
    }

    #[test]
    fn from_connection_string_case_insensitive_keys() {
        let builder = MqttConnectionSettingsBuilder::from_connection_string(
            "HOSTNAME=test.hostname.com;tcpport=1883;usetls=false",
        )
        .unwrap();
        assert_eq!(builder.hostname, Some("test.hostname.com".to_string()));
        assert_eq!(builder.tcp_port, Some(1883));
        assert_eq!(builder.use_tls, Some(false));
    }

    #[test_case("TcpPort=1883"; "missing hostname")]
    #[test_case("HostName=test.hostname.com"; "missing tcp port")]
    #[test_case(""; "empty connection string")]
    fn from_connection_string_missing_required_values(connection_string: &str) {
        assert!(MqttConnectionSettingsBuilder::from_connection_string(connection_string).is_err());
    }

    #[test_case("HostName=host;TcpPort=1883;NotARealKey=value"; "unrecognized key")]
    #[test_case("HostName=host;TcpPort=not-numeric"; "tcp port not numeric")]
    #[test_case("HostName=host;TcpPort=1883;UseTls=not-boolean"; "use tls not boolean")]
    #[test_case("HostName=host;TcpPort=1883;KeepAlive=60"; "keep alive not iso8601")]
    #[test_case("HostName=host;TcpPort=1883;SessionExpiry=P1M"; "session expiry not fixed length")]
    #[test_case("HostName=host;TcpPort=1883;garbage"; "malformed segment")]
    fn from_connection_string_invalid_values(connection_string: &str) {
        assert!(MqttConnectionSettingsBuilder::from_connection_string(connection_string).is_err());
    }

    #[test]
    fn from_environment_full_configuration() {
        temp_env::with_vars(
            [
                ("MQTT_HOST_NAME", Some("test.hostname.com")),
                ("MQTT_TCP_PORT", Some("8883")),
                ("MQTT_USE_TLS", Some("true")),
                ("MQTT_CLIENT_ID", Some("test-client-id")),
                ("MQTT_USER_NAME", Some("test-username")),
                ("MQTT_PASSWORD_FILE", Some("/path/to/password/file")),
                ("MQTT_CERT_FILE", Some("/path/to/cert/file")),
                ("MQTT_KEY_FILE", Some("/path/to/key/file")),
                ("MQTT_KEY_FILE_PASSWORD", Some("secret")),
                ("MQTT_CA_FILE", Some("/path/to/ca/file")),
                ("MQTT_CA_REQUIRE_REVOCATION_CHECK", Some("false")),
                ("MQTT_KEEP_ALIVE", Some("PT60S")),
                ("MQTT_SESSION_EXPIRY", Some("PT1H")),
                ("MQTT_RECEIVE_MAXIMUM", Some("100")),
                ("MQTT_CONNECTION_TIMEOUT", Some("PT30S")),
            ],
            || {
                let builder = MqttConnectionSettingsBuilder::from_environment().unwrap();
                assert_eq!(builder.hostname, Some("test.hostname.com".to_string()));
                assert_eq!(builder.tcp_port, Some(8883));
                assert_eq!(builder.keep_alive, Some(Duration::from_secs(60)));
                assert_eq!(builder.session_expiry, Some(Duration::from_secs(3600)));
                assert!(builder.build().is_ok());
            },
        );
    }

    #[test_case(None, None; "all required values missing")]
    #[test_case(Some("test.hostname.com"), None; "tcp port missing")]
    #[test_case(None, Some("8883"); "hostname missing")]
    fn from_environment_missing_required_values(hostname: Option<&str>, tcp_port: Option<&str>) {
        temp_env::with_vars(
            [("MQTT_HOST_NAME", hostname), ("MQTT_TCP_PORT", tcp_port)],
            || {
                assert!(MqttConnectionSettingsBuilder::from_environment().is_err());
            },
        );
    }

    /// A connection string and its equivalent environment variables must
    /// produce equal settings.
    #[test]
    fn connection_string_environment_equivalence() {
        let from_connection_string = MqttConnectionSettingsBuilder::from_connection_string(
            "HostName=test.hostname.com;TcpPort=8883;UseTls=True;ClientId=test-client-id;\
             UserName=test-username;Password=hunter2;KeepAlive=PT90S;SessionExpiry=PT2H;\
             ReceiveMaximum=50;ConnectionTimeout=PT10S",
        )
        .unwrap()
        .build()
        .unwrap();

        let from_environment = temp_env::with_vars(
            [
                ("MQTT_HOST_NAME", Some("test.hostname.com")),
                ("MQTT_TCP_PORT", Some("8883")),
                ("MQTT_USE_TLS", Some("True")),
                ("MQTT_CLIENT_ID", Some("test-client-id")),
                ("MQTT_USER_NAME", Some("test-username")),
                ("MQTT_PASSWORD", Some("hunter2")),
                ("MQTT_KEEP_ALIVE", Some("PT90S")),
                ("MQTT_SESSION_EXPIRY", Some("PT2H")),
                ("MQTT_RECEIVE_MAXIMUM", Some("50")),
                ("MQTT_CONNECTION_TIMEOUT", Some("PT10S")),
            ],
            || {
                MqttConnectionSettingsBuilder::from_environment()
                    .unwrap()
                    .build()
                    .unwrap()
            },
        );

        assert!(from_connection_string == from_environment);
    }

    #[test]
    fn environment_key_form() {
        assert_eq!(environment_key("HostName"), "MQTT_HOST_NAME");
        assert_eq!(environment_key("TcpPort"), "MQTT_TCP_PORT");
        assert_eq!(
            environment_key("CaRequireRevocationCheck"),
            "MQTT_CA_REQUIRE_REVOCATION_CHECK"
        );
    }
}
