//! The MQTT client seam used by `HomieDevice`, and an implementation of it on top of rumqttc.

use crate::{HomieDevice, State};
use async_channel::{Receiver, Sender};
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming,
    LastWill, MqttOptions, Outgoing, QoS,
};
use std::future::{self, Future};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};

const REQUESTS_CAP: usize = 50;
const TICK_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait on shutdown for the final `$state` and the disconnect to be sent.
const QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Error from an MQTT client operation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{0}")]
    Client(#[from] ClientError),
    #[error("Broker unreachable")]
    Unreachable,
}

/// Error type for futures representing tasks spawned by this crate.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Task failed: {0}")]
    Join(#[from] JoinError),
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

/// An asynchronous MQTT client, as seen by a `HomieDevice`.
///
/// None of these methods may block. Connection results are reported back by whoever drives the
/// client, by calling `HomieDevice::on_connect`, `HomieDevice::on_disconnect` and
/// `HomieDevice::on_message`.
pub trait Transport {
    /// Start connecting to the broker.
    fn connect(&mut self);

    fn disconnect(&mut self);

    fn connected(&self) -> bool;

    fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &str,
    ) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError>;
}

/// Access to the transport for a single operation, counting the failures it runs into.
pub(crate) struct Session<'a> {
    transport: &'a mut dyn Transport,
    enabled: bool,
    failures: u64,
}

impl<'a> Session<'a> {
    pub fn new(transport: &'a mut dyn Transport, enabled: bool) -> Self {
        Self {
            transport,
            enabled,
            failures: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn check(&mut self, operation: &str, topic: &str, result: Result<(), TransportError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to {} {}: {}", operation, topic, e);
                self.failures += 1;
                false
            }
        }
    }

    pub fn publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let result = self.transport.publish(topic, qos, retain, payload);
        self.check("publish to", topic, result)
    }

    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> bool {
        if !self.enabled {
            return false;
        }
        let result = self.transport.subscribe(topic, qos);
        self.check("subscribe to", topic, result)
    }

    pub fn unsubscribe(&mut self, topic: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let result = self.transport.unsubscribe(topic);
        self.check("unsubscribe from", topic, result)
    }
}

/// A `Transport` backed by a rumqttc `AsyncClient`.
///
/// rumqttc connects whenever its event loop is polled, so the event loop is only polled after
/// `connect()` has been called, and stops being polled after the next connection error.
#[derive(Debug)]
pub struct MqttTransport {
    client: AsyncClient,
    connect_tx: Sender<()>,
    connected: bool,
}

/// The receiving half of an `MqttTransport`, to pass to `run`.
pub struct MqttEvents {
    event_loop: EventLoop,
    connect_rx: Receiver<()>,
}

impl MqttTransport {
    /// Create a new transport for the device with the given base topic, registering the Homie
    /// `lost` state as its last will.
    pub fn new(mut mqtt_options: MqttOptions, device_base: &str) -> (MqttTransport, MqttEvents) {
        let last_will = LastWill::new(
            format!("{}/$state", device_base),
            State::Lost.as_str(),
            QoS::AtLeastOnce,
            true,
        );
        mqtt_options.set_last_will(last_will);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUESTS_CAP);
        let (connect_tx, connect_rx) = async_channel::bounded(1);
        (
            MqttTransport {
                client,
                connect_tx,
                connected: false,
            },
            MqttEvents {
                event_loop,
                connect_rx,
            },
        )
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self) {
        if self.connect_tx.try_send(()).is_err() {
            log::trace!("Connection request already pending.");
        }
    }

    fn disconnect(&mut self) {
        // A disconnect request queued while not connected would end the next connection.
        if self.connected {
            if let Err(e) = self.client.try_disconnect() {
                log::warn!("Failed to disconnect: {}", e);
            }
        }
        self.connected = false;
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &str,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Unreachable);
        }
        self.client
            .try_publish(topic, qos, retain, payload.to_owned())?;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Unreachable);
        }
        self.client.try_subscribe(topic, qos)?;
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Unreachable);
        }
        self.client.try_unsubscribe(topic)?;
        Ok(())
    }
}

/// Drive `device` forever: tick it periodically and feed it events from the MQTT connection.
/// `on_tick` is called after every tick, to let the application update property values.
///
/// The device is only ever touched from the calling task. A separate task polls the rumqttc event
/// loop whenever the device has asked to connect.
pub async fn run(
    device: &mut HomieDevice<MqttTransport>,
    events: MqttEvents,
    on_tick: impl FnMut(&mut HomieDevice<MqttTransport>, Instant),
) -> Result<(), SpawnError> {
    run_until(device, events, on_tick, future::pending()).await
}

/// Like `run`, but once `shutdown` completes the device quits: it publishes its `disconnected`
/// state and disconnects cleanly, so that the broker doesn't publish its last will. Returns once
/// the disconnect has been sent.
pub async fn run_until(
    device: &mut HomieDevice<MqttTransport>,
    events: MqttEvents,
    mut on_tick: impl FnMut(&mut HomieDevice<MqttTransport>, Instant),
    shutdown: impl Future<Output = ()>,
) -> Result<(), SpawnError> {
    let MqttEvents {
        mut event_loop,
        connect_rx,
    } = events;
    let (event_tx, event_rx) = async_channel::unbounded();

    let mut mqtt_task: JoinHandle<Result<(), SpawnError>> = task::spawn(async move {
        loop {
            connect_rx
                .recv()
                .await
                .map_err(|_| SpawnError::Internal("Connect request channel sender closed."))?;
            loop {
                let notification = event_loop.poll().await;
                log::trace!("Notification = {:?}", notification);
                let ended = ends_connection(&notification);
                event_tx
                    .send(notification)
                    .await
                    .map_err(|_| SpawnError::Internal("Event channel receiver closed."))?;
                if ended {
                    break;
                }
            }
        }
    });

    let mut ticker = time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let now = Instant::now();
                device.tick(now);
                on_tick(device, now);
            }
            notification = event_rx.recv() => match notification {
                Ok(notification) => dispatch(device, notification, Instant::now()),
                Err(_) => return Err(SpawnError::Internal("Event channel sender closed.")),
            },
            result = &mut mqtt_task => {
                result??;
                return Err(SpawnError::Internal("MQTT task finished unexpectedly."));
            }
        }
    }

    let was_connected = device.transport().connected();
    device.quit();
    if was_connected {
        let sent = time::timeout(QUIT_TIMEOUT, async {
            while let Ok(notification) = event_rx.recv().await {
                if ends_connection(&notification) {
                    break;
                }
            }
        })
        .await;
        if sent.is_err() {
            log::warn!("Timed out waiting for disconnect to be sent.");
        }
    }
    mqtt_task.abort();
    Ok(())
}

/// Whether the event loop should stop being polled after this notification, until the device
/// next asks to connect.
fn ends_connection(notification: &Result<Event, ConnectionError>) -> bool {
    matches!(notification, Err(_) | Ok(Event::Outgoing(Outgoing::Disconnect)))
}

/// Pass a notification from the rumqttc event loop on to the device.
fn dispatch(
    device: &mut HomieDevice<MqttTransport>,
    notification: Result<Event, ConnectionError>,
    now: Instant,
) {
    match notification {
        Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
            if connack.code == ConnectReturnCode::Success {
                device.transport.connected = true;
                device.on_connect(connack.session_present, now);
            } else {
                log::warn!("Connection refused: {:?}", connack.code);
            }
        }
        Ok(Event::Incoming(Incoming::Publish(publish))) => {
            let total = publish.payload.len();
            device.on_message(&publish.topic, &publish.payload, 0, total);
        }
        Ok(_) => {}
        Err(e) => {
            device.transport.connected = false;
            device.on_disconnect(&e.to_string());
        }
    }
}
