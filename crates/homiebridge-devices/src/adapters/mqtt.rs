//! MQTT transport for Homie topics.
//!
//! Connects to the broker with rumqttc, subscribes to `<base>/#` after every
//! successful ConnAck (so reconnects resubscribe) and forwards publishes to
//! the projection worker.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use homiebridge_core::MqttSettings;

use crate::error::{BridgeError, BridgeResult};
use crate::worker::InboundMessage;

/// Capacity of the rumqttc request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

/// Map a configured QoS level to rumqttc.
pub fn qos_from_level(level: u8) -> BridgeResult<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::Configuration(format!(
            "Invalid QoS level: {}",
            other
        ))),
    }
}

/// Build client options from settings.
pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
    options.set_clean_session(settings.clean_session);

    if let Some(user) = &settings.username {
        let pass = settings.password.clone().unwrap_or_default();
        options.set_credentials(user, pass);
    }
    options
}

enum Step {
    Polled(Result<Event, rumqttc::ConnectionError>),
    Recheck,
    Stop,
}

/// MQTT transport feeding the projection worker.
pub struct MqttTransport {
    settings: MqttSettings,
    tx: mpsc::Sender<InboundMessage>,
    stop: watch::Receiver<bool>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl MqttTransport {
    pub fn new(
        settings: MqttSettings,
        tx: mpsc::Sender<InboundMessage>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            settings,
            tx,
            stop,
            status_tx,
        }
    }

    /// Watch connection state changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Poll the broker until stopped or the worker goes away.
    pub async fn run(mut self) -> BridgeResult<()> {
        let qos = qos_from_level(self.settings.qos)?;
        let filter = self.settings.subscription_filter();
        let (client, mut eventloop) =
            AsyncClient::new(mqtt_options(&self.settings), REQUEST_CHANNEL_CAPACITY);

        info!(
            "Connecting to MQTT broker {} as {}",
            self.settings.broker_addr(),
            self.settings.client_id
        );

        loop {
            if *self.stop.borrow() {
                break;
            }

            match Self::next_step(&mut self.stop, &mut eventloop).await {
                Step::Polled(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        warn!("MQTT broker refused connection: {:?}", ack.code);
                        continue;
                    }
                    self.set_status(ConnectionStatus::Connected);
                    info!("Connected to MQTT broker {}", self.settings.broker_addr());
                    if let Err(e) = client.subscribe(filter.as_str(), qos).await {
                        warn!("Failed to subscribe to {}: {}", filter, e);
                    } else {
                        info!("Subscribed to {}", filter);
                    }
                }
                Step::Polled(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    // Empty payloads are retained-message clears
                    if publish.payload.is_empty() {
                        debug!(topic = %publish.topic, "Skipping empty payload");
                        continue;
                    }
                    let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                    if self.tx.send(message).await.is_err() {
                        info!("Projection worker gone, stopping MQTT transport");
                        break;
                    }
                }
                Step::Polled(Ok(Event::Incoming(Packet::Disconnect))) => {
                    self.set_status(ConnectionStatus::Disconnected);
                    warn!("MQTT broker closed the connection");
                }
                Step::Polled(Ok(_)) => {}
                Step::Polled(Err(e)) => {
                    self.set_status(ConnectionStatus::Disconnected);
                    warn!("MQTT connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
                Step::Recheck => continue,
                Step::Stop => break,
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        if let Err(e) = client.try_disconnect() {
            debug!("MQTT disconnect request failed: {}", e);
        }
        info!("MQTT transport stopped");
        Ok(())
    }

    async fn next_step(stop: &mut watch::Receiver<bool>, eventloop: &mut EventLoop) -> Step {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() { Step::Stop } else { Step::Recheck }
            }
            event = eventloop.poll() => Step::Polled(event),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
