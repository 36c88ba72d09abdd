//! MQTT broker session.
//!
//! A single receive loop: every publication is handed to the [`Pipeline`]
//! and fully applied before the event loop is polled again. Connection
//! errors never end the session; the loop sleeps for the configured delay
//! and polls again, which makes rumqttc reconnect.

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;

use crate::config::BrokerConfig;
use crate::ingest::Pipeline;
use crate::logutil::escape_log;
use crate::metrics;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const MAX_PACKET_BYTES: usize = 256 * 1024;

pub struct MqttIngest {
    config: BrokerConfig,
    pipeline: Pipeline,
}

impl MqttIngest {
    pub fn new(config: BrokerConfig, pipeline: Pipeline) -> Self {
        Self { config, pipeline }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);
        if let Some(username) = &self.config.username {
            options.set_credentials(
                username.clone(),
                self.config.password.clone().unwrap_or_default(),
            );
        }
        options
    }

    /// Run until an audit-log write fails. Broker trouble is retried forever.
    pub async fn run(self) -> anyhow::Result<()> {
        let topics = self.config.subscriptions();
        let delay = Duration::from_secs(self.config.reconnect_delay_secs.max(1));
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);
        info!(
            "Connecting to MQTT broker {}:{} as '{}'",
            self.config.host, self.config.port, self.config.client_id
        );

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.pipeline
                        .handle_message(&publish.topic, &publish.payload)
                        .await?;
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Connected to MQTT broker ({:?})", ack.code);
                    // clean sessions forget subscriptions, so subscribe on every connect
                    for topic in &topics {
                        match client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                            Ok(()) => info!("Subscribing to {}", escape_log(topic)),
                            Err(e) => warn!("Failed to subscribe to {}: {}", escape_log(topic), e),
                        }
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!("Subscription {} acknowledged: {:?}", ack.pkid, ack.return_codes);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker sent disconnect");
                }
                Ok(_) => {}
                Err(e) => {
                    metrics::inc_reconnects();
                    error!(
                        "MQTT connection error: {}; reconnecting in {}s",
                        e,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
