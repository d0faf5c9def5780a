//! MQTT subscriber for raw geofence events
//!
//! Each publish on the configured topic carries one raw event JSON and is
//! handed to the dispatcher as-is. Malformed payloads are counted by the
//! dispatcher as drops; the loop never stops on bad input.

use crate::infra::config::Config;
use crate::services::dispatcher::{Dispatcher, IngestOutcome};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Ingest one MQTT payload
fn handle_publish(dispatcher: &Dispatcher, topic: &str, payload: &[u8]) -> IngestOutcome {
    let outcome = dispatcher.on_raw_payload(payload);
    debug!(topic = %topic, outcome = %outcome.as_str(), reason = %outcome.reason(), "mqtt_event");
    outcome
}

/// Connect, subscribe and feed every publish into the dispatcher until
/// shutdown. Broker errors are logged and retried after one second.
pub async fn start_mqtt_subscriber(
    config: &Config,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("geofence-dispatch-{}", config.site_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_topic(), QoS::AtLeastOnce).await?;

    info!(
        topic = %config.mqtt_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_subscribed"
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        // Delivery tasks are detached; the handle is not needed here
                        let _ = handle_publish(&dispatcher, &publish.topic, &publish.payload);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
