// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
use std::str;
use std::time::Duration;

use env_logger::Builder;

use mqtt_session_client::session::{
    PublishOptionsBuilder, SessionClient, SessionClientOptionsBuilder, SubscribeOptionsBuilder,
};
use mqtt_session_client::MqttConnectionSettingsBuilder;

const CLIENT_ID: &str = "session_example_client";
const HOSTNAME: &str = "localhost";

const PORT: u16 = 1883;
const TOPIC: &str = "hello/mqtt";

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

    // Create and start a new client.
    let client = SessionClient::new(options)?;

    // Print and acknowledge every incoming message.
    client.register_message_handler(|publish, ack_token| {
        println!(
            "Received: {}",
            str::from_utf8(&publish.payload).unwrap_or("<invalid utf8>")
        );
        tokio::spawn(async move {
            if let Err(e) = ack_token.ack().await {
                println!("Error acking message: {e}");
            }
        });
    });

    client.start()?;
    client
        .subscribe(TOPIC, SubscribeOptionsBuilder::default().build()?)
        .await?;

    // Send messages every second for a minute.
    for i in 1..=60 {
        let payload = format!("Hello #{i}");
        match client
            .publish(TOPIC, payload, PublishOptionsBuilder::default().build()?)
            .await
        {
            Ok(()) => println!("Sent message #{i}"),
            Err(e) => {
                println!("Error sending message: {e}");
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    client.stop()?;
    Ok(())
}
