// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
use std::time::Duration;

use env_logger::Builder;

use mqtt_session_client::session::{SessionClient, SessionClientOptionsBuilder};
use mqtt_session_client::MqttConnectionSettingsBuilder;

const CLIENT_ID: &str = "connection_monitor_client";
const HOSTNAME: &str = "localhost";

const PORT: u16 = 1883;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .format_timestamp(None)
        .filter_module("rumqttc", log::LevelFilter::Warn)
        .init();

    // Build the options and settings for the client.
    let connection_settings = MqttConnectionSettingsBuilder::default()
        .client_id(CLIENT_ID)
        .hostname(HOSTNAME)
        .tcp_port(PORT)
        .use_tls(false)
        .build()?;
    let options = SessionClientOptionsBuilder::default()
        .connection_settings(connection_settings)
        .build()?;
    let client = SessionClient::new(options)?;

    // Observe every connection transition of the client.
    client.register_connect_observer(|event| {
        println!(
            "Connected (reason code: {:?}, session present: {})",
            event.reason_code, event.session_present
        );
    });
    client.register_disconnect_observer(|event| match event.reason_code {
        Some(reason_code) => println!("Disconnected by server: {reason_code:?}"),
        None => println!("Disconnected"),
    });
    client.register_fatal_error_observer(|error| {
        println!("Client terminated: {error}");
    });

    client.start()?;

    // Watch the connection for ten minutes, then exit.
    tokio::time::sleep(Duration::from_secs(600)).await;
    client.stop()?;
    Ok(())
}
