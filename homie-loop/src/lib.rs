//! `homie-loop` is a library for exposing a device over MQTT following the
//! [Homie convention](https://homieiot.github.io/), driven by a periodic tick.
//!
//! A `HomieDevice` owns a tree of nodes and properties which is built once at start-up and then
//! initialized with `HomieDevice::init`. From then on the device is driven by calling
//! `HomieDevice::tick` frequently, and by passing it the connection events of its MQTT client. It
//! connects and reconnects with backoff, announces every node and property in a throttled walk
//! after each connection, and synchronises settable properties with their retained values on the
//! broker.
//!
//! With the `MqttTransport` and `run` from this crate, the device is driven by a tokio task:
//!
//! ```no_run
//! use homie_loop::{Datatype, DeviceConfig, HomieDevice, MqttTransport, run};
//! use rumqttc::MqttOptions;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::default();
//! let mqtt_options = MqttOptions::new(&config.device_id, "test.mosquitto.org", 1883);
//! let (transport, events) = MqttTransport::new(mqtt_options, &config.device_base());
//! let mut device = HomieDevice::new(config, transport);
//! let node = device.new_node("env", "Environment", "sensor")?;
//! let temperature = device.new_property(node, "temp", "Temperature", Datatype::Integer)?;
//! device.property_mut(temperature).set_format("-40:85").set_unit("°C");
//! device.init()?;
//! device.set_value(temperature, "23");
//! run(&mut device, events, |_, _| {}).await?;
//! # Ok(())
//! # }
//! ```

use crate::publishing::{Action, Cursor, Stage};
use crate::transport::Session;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use rumqttc::QoS;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::{self, Debug, Display, Formatter};
use std::str;
use std::time::{Duration, Instant};
use thiserror::Error;

mod config;
pub use crate::config::{DeviceConfig, device_id_from_name};
mod debug;
pub use crate::debug::{DebugSink, install_debug_sink};
#[cfg(test)]
mod mock;
mod publishing;
mod transport;
pub use crate::transport::{
    MqttEvents, MqttTransport, SpawnError, Transport, TransportError, run, run_until,
};
mod types;
pub use crate::types::{
    Datatype, Node, ParseDatatypeError, Property, PropertyCallback, PropertyFlags, ValueError,
    is_valid_id,
};
mod values;
pub use crate::values::{Color, ColorFormat, ColorHsv, ColorRgb, ParseColorError};

const HOMIE_VERSION: &str = "3.0.1";
const HOMIE_IMPLEMENTATION: &str = "homie-loop";
const STATS: &str = "uptime,signal";
const STATS_INTERVAL: Duration = Duration::from_secs(60);
const RAPID_STATS_INTERVAL: Duration = Duration::from_secs(10);
/// How long to wait after connecting before starting the initial publishing walk.
const SETTLE_DELAY: Duration = Duration::from_millis(500);
/// How long to wait for retained values after the initial publishing walk, before publishing our
/// own values instead.
const PUBLISH_DEFAULTS_DELAY: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
const RECONNECT_MAX_INTERVAL: Duration = Duration::from_secs(60);
const ERROR_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const ERROR_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// The [device lifecycle state](https://homieiot.github.io/specification/#device-lifecycle).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// The device is connected to the MQTT broker but is not yet ready to operate.
    Init,
    /// The device is connected and operational.
    Ready,
    /// The device has cleanly disconnected from the MQTT broker.
    Disconnected,
    /// The device was uncleanly disconnected from the MQTT broker. This could happen due to a
    /// network issue, power failure or some other unexpected failure.
    Lost,
}

impl State {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Lost => "lost",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mistake while building the node and property tree of a device.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeviceError {
    #[error("Device is already initialized")]
    AlreadyInitialized,
    #[error("Invalid ID {0:?}")]
    InvalidId(String),
    #[error("Node {0:?} already exists")]
    DuplicateNode(String),
    #[error("No node {0:?} on this device")]
    UnknownNode(NodeId),
    #[error("Property {property:?} already exists on node {node:?}")]
    DuplicateProperty { node: String, property: String },
    #[error("More than one property receives on topic {0:?}")]
    DuplicateTopic(String),
}

/// Handle to a node of a `HomieDevice`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NodeId(pub(crate) usize);

/// Handle to a property of a `HomieDevice`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PropertyId {
    pub(crate) node: usize,
    pub(crate) property: usize,
}

impl PropertyId {
    /// The node the property belongs to.
    pub fn node(&self) -> NodeId {
        NodeId(self.node)
    }
}

/// The state of the connection to the MQTT broker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug)]
enum Connection {
    /// Waiting to connect. The wait starts on the first tick after disconnecting.
    Disconnected {
        retry_after: Duration,
        since: Option<Instant>,
    },
    Connecting {
        since: Instant,
    },
    Connected {
        since: Instant,
    },
}

#[derive(Clone, Copy, Debug)]
enum Publishing {
    Idle,
    Walking { cursor: Cursor, next_at: Instant },
    Steady,
}

#[derive(Clone, Debug, Default)]
struct DeviceInfo {
    firmware: Option<(String, String)>,
    local_ip: Option<String>,
    mac: Option<String>,
}

#[derive(Clone, Debug, Default)]
struct Uptime {
    total: u64,
    link: u64,
    mqtt: u64,
    last: Option<Instant>,
}

fn exponential_backoff(initial: Duration, max: Duration) -> ExponentialBackoff {
    let mut backoff = ExponentialBackoff::default();
    backoff.current_interval = initial;
    backoff.initial_interval = initial;
    backoff.max_interval = max;
    backoff.multiplier = 2.0;
    backoff.randomization_factor = 0.0;
    backoff.max_elapsed_time = None;
    backoff
}

/// A Homie [device](https://homieiot.github.io/specification/#devices), its nodes and properties,
/// and its connection to the MQTT broker through a `Transport`.
pub struct HomieDevice<T: Transport> {
    config: DeviceConfig,
    transport: T,
    nodes: Vec<Node>,
    /// Inbound topic to the property which receives it.
    incoming: HashMap<String, PropertyId>,
    initialized: bool,
    info: DeviceInfo,
    connection: Connection,
    publishing: Publishing,
    reconnect_count: u64,
    last_connected: Option<Instant>,
    reconnect_backoff: ExponentialBackoff,
    error_count: u64,
    error_backoff: ExponentialBackoff,
    /// Tick-driven traffic is held back until this time after a failure.
    send_error_until: Option<Instant>,
    publish_defaults_at: Option<Instant>,
    last_stats: Option<Instant>,
    uptime: Uptime,
    link_up: bool,
    signal: Option<u8>,
}

impl<T: Transport + Debug> Debug for HomieDevice<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("HomieDevice")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .field("nodes", &self.nodes)
            .field("initialized", &self.initialized)
            .field("connection", &self.connection)
            .field("publishing", &self.publishing)
            .field("reconnect_count", &self.reconnect_count)
            .field("error_count", &self.error_count)
            .finish()
    }
}

impl<T: Transport> HomieDevice<T> {
    /// Create a new device with no nodes, which will communicate through the given transport.
    pub fn new(config: DeviceConfig, transport: T) -> Self {
        HomieDevice {
            config,
            transport,
            nodes: vec![],
            incoming: HashMap::new(),
            initialized: false,
            info: DeviceInfo::default(),
            connection: Connection::Disconnected {
                retry_after: Duration::ZERO,
                since: None,
            },
            publishing: Publishing::Idle,
            reconnect_count: 0,
            last_connected: None,
            reconnect_backoff: exponential_backoff(
                RECONNECT_INITIAL_INTERVAL,
                RECONNECT_MAX_INTERVAL,
            ),
            error_count: 0,
            error_backoff: exponential_backoff(ERROR_INITIAL_INTERVAL, ERROR_MAX_INTERVAL),
            send_error_until: None,
            publish_defaults_at: None,
            last_stats: None,
            uptime: Uptime::default(),
            link_up: true,
            signal: None,
        }
    }

    /// Add a new node to the device.
    pub fn new_node(&mut self, id: &str, name: &str, node_type: &str) -> Result<NodeId, DeviceError> {
        if self.initialized {
            return Err(DeviceError::AlreadyInitialized);
        }
        if !is_valid_id(id) {
            return Err(DeviceError::InvalidId(id.to_owned()));
        }
        if self.nodes.iter().any(|node| node.id() == id) {
            return Err(DeviceError::DuplicateNode(id.to_owned()));
        }
        self.nodes
            .push(Node::new(id, name, node_type, &self.config.device_base()));
        Ok(NodeId(self.nodes.len() - 1))
    }

    /// Add a new property to the given node. It can be configured with `property_mut` until the
    /// device is initialized.
    pub fn new_property(
        &mut self,
        node: NodeId,
        id: &str,
        name: &str,
        datatype: Datatype,
    ) -> Result<PropertyId, DeviceError> {
        if !is_valid_id(id) {
            return Err(DeviceError::InvalidId(id.to_owned()));
        }
        self.add_property(node, id, name, datatype)
    }

    /// Add a property which publishes and receives on the literal MQTT topic `topic`, outside the
    /// Homie topic layout.
    pub fn new_raw_property(
        &mut self,
        node: NodeId,
        topic: &str,
        name: &str,
        datatype: Datatype,
    ) -> Result<PropertyId, DeviceError> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(DeviceError::InvalidId(topic.to_owned()));
        }
        let id = self.add_property(node, topic, name, datatype)?;
        self.property_mut(id).set_raw_topic(topic);
        Ok(id)
    }

    fn add_property(
        &mut self,
        node: NodeId,
        id: &str,
        name: &str,
        datatype: Datatype,
    ) -> Result<PropertyId, DeviceError> {
        if self.initialized {
            return Err(DeviceError::AlreadyInitialized);
        }
        let owner = self
            .nodes
            .get_mut(node.0)
            .ok_or(DeviceError::UnknownNode(node))?;
        if owner.has_property(id) {
            return Err(DeviceError::DuplicateProperty {
                node: owner.id().to_owned(),
                property: id.to_owned(),
            });
        }
        let property = owner.new_property(node, id, name, datatype);
        Ok(PropertyId {
            node: node.0,
            property,
        })
    }

    /// Finish building the device. After this no nodes or properties can be added, and property
    /// settings are fixed.
    pub fn init(&mut self) -> Result<(), DeviceError> {
        if self.initialized {
            return Err(DeviceError::AlreadyInitialized);
        }
        if !is_valid_id(&self.config.device_id) {
            log::warn!("Invalid device ID {:?}.", self.config.device_id);
            return Err(DeviceError::InvalidId(self.config.device_id.clone()));
        }

        let mut incoming = HashMap::new();
        for (node_index, node) in self.nodes.iter().enumerate() {
            for (property_index, property) in node.properties().iter().enumerate() {
                let id = PropertyId {
                    node: node_index,
                    property: property_index,
                };
                let topics = if property.is_raw() {
                    vec![property.topic()]
                } else {
                    vec![property.topic(), property.set_topic()]
                };
                for topic in topics {
                    match incoming.entry(topic.to_owned()) {
                        Entry::Occupied(_) => {
                            log::warn!("Topic {} is used by more than one property.", topic);
                            return Err(DeviceError::DuplicateTopic(topic.to_owned()));
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(id);
                        }
                    }
                }
            }
        }
        self.incoming = incoming;

        for node in &mut self.nodes {
            node.init();
        }
        self.initialized = true;
        log::debug!(
            "Initialized {} with {} nodes.",
            self.config.device_base(),
            self.nodes.len()
        );
        Ok(())
    }

    /// Advance all time-based state: uptime, reconnection, the initial publishing walk, retained
    /// value defaults and stats. This should be called frequently, and must not be called
    /// concurrently with anything else on the device.
    pub fn tick(&mut self, now: Instant) {
        if !self.initialized {
            return;
        }
        self.count_uptime(now);
        if !self.config.enable_mqtt {
            return;
        }

        match self.connection {
            Connection::Disconnected { retry_after, since } => {
                let since = since.unwrap_or(now);
                self.connection = Connection::Disconnected {
                    retry_after,
                    since: Some(since),
                };
                if self.link_up && now.saturating_duration_since(since) >= retry_after {
                    self.connect(now);
                }
            }
            Connection::Connecting { since } => {
                if now.saturating_duration_since(since) >= CONNECT_TIMEOUT {
                    log::warn!("Timed out connecting to MQTT broker.");
                    self.transport.disconnect();
                    self.connection = Connection::Disconnected {
                        retry_after: self.next_reconnect_delay(),
                        since: Some(now),
                    };
                }
            }
            Connection::Connected { .. } => {
                if !self.transport.connected() {
                    self.on_disconnect("transport no longer connected");
                } else if self.send_error_until.is_none_or(|until| now >= until) {
                    self.step_publishing(now);
                }
            }
        }
    }

    fn connect(&mut self, now: Instant) {
        self.reconnect_count += 1;
        log::info!(
            "Connecting to MQTT broker (attempt {}).",
            self.reconnect_count
        );
        self.connection = Connection::Connecting { since: now };
        self.transport.connect();
    }

    fn next_reconnect_delay(&mut self) -> Duration {
        self.reconnect_backoff
            .next_backoff()
            .unwrap_or(RECONNECT_MAX_INTERVAL)
    }

    fn count_uptime(&mut self, now: Instant) {
        let last = *self.uptime.last.get_or_insert(now);
        let seconds = now.saturating_duration_since(last).as_secs();
        if seconds == 0 {
            return;
        }
        self.uptime.last = Some(last + Duration::from_secs(seconds));
        self.uptime.total += seconds;
        if self.link_up {
            self.uptime.link += seconds;
        }
        if matches!(self.connection, Connection::Connected { .. }) {
            self.uptime.mqtt += seconds;
        }
    }

    /// The transport finished connecting to the broker.
    pub fn on_connect(&mut self, session_present: bool, now: Instant) {
        log::info!(
            "Connected to MQTT broker (session present: {}).",
            session_present
        );
        self.connection = Connection::Connected { since: now };
        self.last_connected = Some(now);
        self.reconnect_backoff.reset();
        self.send_error_until = None;
        self.error_backoff.reset();
        self.publish_defaults_at = None;
        self.reset_handshakes();
        self.publishing = Publishing::Walking {
            cursor: Cursor::start(),
            next_at: now + SETTLE_DELAY,
        };
    }

    /// The transport lost its connection to the broker, or failed to connect.
    pub fn on_disconnect(&mut self, reason: &str) {
        match self.connection {
            Connection::Disconnected { .. } => {
                log::debug!("Disconnected while not connected: {}", reason);
                return;
            }
            Connection::Connecting { .. } => {
                log::info!("Failed to connect to MQTT broker: {}", reason);
            }
            Connection::Connected { .. } => {
                log::info!("Disconnected from MQTT broker: {}", reason);
            }
        }
        self.connection = Connection::Disconnected {
            retry_after: self.next_reconnect_delay(),
            since: None,
        };
        self.publishing = Publishing::Idle;
        self.publish_defaults_at = None;
        self.send_error_until = None;
        self.reset_handshakes();
    }

    /// A message was received from the broker. Only the first fragment of a message is handled;
    /// later fragments are ignored.
    pub fn on_message(&mut self, topic: &str, payload: &[u8], index: usize, total: usize) {
        if index != 0 {
            log::trace!("Ignoring fragment at {} of message on {}.", index, topic);
            return;
        }
        let Ok(payload) = str::from_utf8(payload) else {
            log::debug!("Ignoring non-UTF-8 payload on {}.", topic);
            return;
        };
        let Some(&id) = self.incoming.get(topic) else {
            log::trace!("No property for {}, dropping message.", topic);
            return;
        };
        log::trace!("Routing {} ({} bytes) to {:?}.", topic, total, id);
        self.with_session(|nodes, session| {
            nodes[id.node]
                .property_mut(id.property)
                .on_message(topic, payload, session);
        });
    }

    /// Publish `$state` = `disconnected` and disconnect from the broker. The device won't
    /// reconnect until MQTT is enabled again with `set_enable_mqtt`.
    pub fn quit(&mut self) {
        if self.transport.connected() {
            let topic = format!("{}/$state", self.config.device_base());
            self.publish_direct(&topic, QoS::AtLeastOnce, true, State::Disconnected.as_str());
        }
        log::info!("Disconnecting from MQTT broker.");
        self.transport.disconnect();
        self.config.enable_mqtt = false;
        self.connection = Connection::Disconnected {
            retry_after: Duration::ZERO,
            since: None,
        };
        self.publishing = Publishing::Idle;
        self.publish_defaults_at = None;
        self.reset_handshakes();
    }

    /// Set the value of a property, and publish it if connected. Returns whether the value was
    /// valid for the property.
    pub fn set_value(&mut self, id: PropertyId, value: &str) -> bool {
        self.with_session(|nodes, session| {
            let property = nodes[id.node].property_mut(id.property);
            if property.accept(value) {
                property.publish(session);
                true
            } else {
                false
            }
        })
    }

    pub fn set_bool(&mut self, id: PropertyId, value: bool) -> bool {
        self.set_value(id, if value { "true" } else { "false" })
    }

    /// Publish the current value of a property. Returns whether a publish was attempted.
    pub fn publish(&mut self, id: PropertyId) -> bool {
        self.with_session(|nodes, session| nodes[id.node].properties()[id.property].publish(session))
    }

    /// Publish an arbitrary message, if MQTT is enabled and connected. Returns whether a publish
    /// was attempted.
    pub fn publish_direct(&mut self, topic: &str, qos: QoS, retain: bool, payload: &str) -> bool {
        if !self.config.enable_mqtt {
            return false;
        }
        if !self.transport.connected() {
            log::debug!("Can't publish {:?} to {}: not connected.", payload, topic);
            return false;
        }
        self.with_session(|_, session| {
            session.publish(topic, qos, retain, payload);
        });
        true
    }

    /// Run `op` with access to the nodes and the transport, counting any transport failures.
    /// Returns the result of `op`.
    fn with_session<R>(&mut self, op: impl FnOnce(&mut [Node], &mut Session<'_>) -> R) -> R {
        self.try_with_session(op).0
    }

    /// Like `with_session`, but also returns whether there were no transport failures.
    fn try_with_session<R>(
        &mut self,
        op: impl FnOnce(&mut [Node], &mut Session<'_>) -> R,
    ) -> (R, bool) {
        let mut session = Session::new(&mut self.transport, self.config.enable_mqtt);
        let result = op(self.nodes.as_mut_slice(), &mut session);
        let failures = session.failures();
        self.error_count += failures;
        (result, failures == 0)
    }

    fn step_publishing(&mut self, now: Instant) {
        match self.publishing {
            Publishing::Idle => {}
            Publishing::Walking { cursor, next_at } => {
                if now >= next_at {
                    self.step_walk(cursor, now);
                }
            }
            Publishing::Steady => self.step_steady(now),
        }
    }

    /// Perform the next action of the initial publishing walk.
    fn step_walk(&mut self, mut cursor: Cursor, now: Instant) {
        loop {
            let action = self.actions(&cursor).into_iter().nth(cursor.step);
            match action {
                Some(action) => {
                    log::trace!("Initial publishing {:?}: {:?}", cursor, action);
                    if self.perform(&action) {
                        self.recovered();
                        cursor.step += 1;
                    } else {
                        self.record_error(now);
                    }
                    self.publishing = Publishing::Walking {
                        cursor,
                        next_at: now + self.config.initial_publishing_throttle,
                    };
                    return;
                }
                None => {
                    if cursor.advance(&self.nodes) {
                        log::info!(
                            "Initial publishing for {} done.",
                            self.config.device_base()
                        );
                        self.publishing = Publishing::Steady;
                        self.publish_defaults_at = Some(now + PUBLISH_DEFAULTS_DELAY);
                        self.last_stats = Some(now);
                        return;
                    }
                }
            }
        }
    }

    fn actions(&self, cursor: &Cursor) -> Vec<Action> {
        match cursor.stage {
            Stage::Device => self.device_actions(),
            Stage::Node => publishing::node_actions(&self.nodes[cursor.node]),
            Stage::Properties => publishing::property_actions(
                &self.nodes[cursor.node].properties()[cursor.property],
            ),
            Stage::Values => publishing::value_actions(&self.nodes, cursor),
            Stage::Ready => vec![Action::attribute(
                &self.config.device_base(),
                "$state",
                State::Ready.as_str(),
            )],
        }
    }

    fn device_actions(&self) -> Vec<Action> {
        let base = self.config.device_base();
        let mut attributes = vec![
            ("$state", State::Init.as_str().to_owned()),
            ("$homie", HOMIE_VERSION.to_owned()),
            ("$name", self.config.device_name.clone()),
        ];
        if let Some(local_ip) = &self.info.local_ip {
            attributes.push(("$localip", local_ip.clone()));
        }
        if let Some(mac) = &self.info.mac {
            attributes.push(("$mac", mac.clone()));
        }
        if let Some((name, version)) = &self.info.firmware {
            attributes.push(("$fw/name", name.clone()));
            attributes.push(("$fw/version", version.clone()));
        }
        let node_ids: Vec<&str> = self.nodes.iter().map(Node::id).collect();
        attributes.push(("$nodes", node_ids.join(",")));
        attributes.push(("$implementation", HOMIE_IMPLEMENTATION.to_owned()));
        attributes.push(("$stats", STATS.to_owned()));
        attributes.push((
            "$stats/interval",
            self.stats_interval().as_secs().to_string(),
        ));
        attributes
            .into_iter()
            .map(|(name, value)| Action::attribute(&base, name, value))
            .collect()
    }

    /// Perform a walk action, returning false if the transport failed.
    fn perform(&mut self, action: &Action) -> bool {
        let (_, ok) = self.try_with_session(|nodes, session| match action {
            Action::Publish { topic, payload } => {
                session.publish(topic, QoS::AtLeastOnce, true, payload);
            }
            Action::Subscribe(topic) => {
                session.subscribe(topic, QoS::AtLeastOnce);
            }
            Action::Value(id) => {
                nodes[id.node].properties()[id.property].publish(session);
            }
        });
        ok
    }

    fn step_steady(&mut self, now: Instant) {
        if self.publish_defaults_at.is_some_and(|at| now >= at) {
            self.publish_defaults_at = None;
            let (_, ok) = self.try_with_session(|nodes, session| {
                for node in nodes {
                    node.publish_defaults(session);
                }
            });
            if !ok {
                // Properties still awaiting their handshake are retried once the error backoff
                // has passed.
                self.publish_defaults_at = Some(now);
                self.record_error(now);
                return;
            }
            self.recovered();
        }

        let stats_due = self
            .last_stats
            .is_none_or(|last| now.saturating_duration_since(last) >= self.stats_interval());
        if stats_due {
            if self.publish_stats() {
                self.last_stats = Some(now);
                self.recovered();
            } else {
                self.record_error(now);
            }
        }
    }

    fn publish_stats(&mut self) -> bool {
        let base = self.config.device_base();
        let uptime = self.uptime.total.to_string();
        let signal = self.signal;
        let (_, ok) = self.try_with_session(|_, session| {
            session.publish(
                &format!("{}/$stats/uptime", base),
                QoS::AtLeastOnce,
                true,
                &uptime,
            );
            if let Some(signal) = signal {
                session.publish(
                    &format!("{}/$stats/signal", base),
                    QoS::AtLeastOnce,
                    true,
                    &signal.to_string(),
                );
            }
        });
        ok
    }

    fn stats_interval(&self) -> Duration {
        if self.config.rapid_stats {
            RAPID_STATS_INTERVAL
        } else {
            STATS_INTERVAL
        }
    }

    /// A tick-driven operation failed: hold back further tick-driven traffic for a while.
    fn record_error(&mut self, now: Instant) {
        let delay = self
            .error_backoff
            .next_backoff()
            .unwrap_or(ERROR_MAX_INTERVAL);
        log::warn!(
            "MQTT operation failed ({} errors so far), retrying in {:?}.",
            self.error_count,
            delay
        );
        self.send_error_until = Some(now + delay);
    }

    fn recovered(&mut self) {
        if self.send_error_until.take().is_some() {
            self.error_backoff.reset();
        }
    }

    fn reset_handshakes(&mut self) {
        for node in &mut self.nodes {
            node.reset_handshake();
        }
    }

    /// Enable or disable all MQTT traffic, without disconnecting.
    pub fn set_enable_mqtt(&mut self, enable: bool) {
        self.config.enable_mqtt = enable;
    }

    /// Tell the device whether the underlying network link is up. While it is down, no connection
    /// attempts are made.
    pub fn set_link_up(&mut self, link_up: bool) {
        self.link_up = link_up;
    }

    /// Set the signal strength to report in `$stats/signal`, as a percentage.
    pub fn set_signal_strength(&mut self, signal: u8) {
        self.signal = Some(signal.min(100));
    }

    /// Set the firmware name and version to be advertised for the Homie device.
    pub fn set_firmware(&mut self, firmware_name: &str, firmware_version: &str) {
        self.info.firmware = Some((firmware_name.to_owned(), firmware_version.to_owned()));
    }

    /// Set the local IP address and MAC address to be advertised for the Homie device.
    pub fn set_network_info(&mut self, local_ip: &str, mac: &str) {
        self.info.local_ip = Some(local_ip.to_owned());
        self.info.mac = Some(mac.to_owned());
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self.connection {
            Connection::Disconnected { .. } => ConnectionState::Disconnected,
            Connection::Connecting { .. } => ConnectionState::Connecting,
            Connection::Connected { .. } => ConnectionState::Connected,
        }
    }

    /// Whether the initial publishing walk for the current connection has finished.
    pub fn initial_publishing_done(&self) -> bool {
        matches!(self.publishing, Publishing::Steady)
    }

    /// How long the current connection to the broker has been up, if connected.
    pub fn connected_for(&self, now: Instant) -> Option<Duration> {
        match self.connection {
            Connection::Connected { since } => Some(now.saturating_duration_since(since)),
            _ => None,
        }
    }

    /// When the device last finished connecting to the broker.
    pub fn last_connected(&self) -> Option<Instant> {
        self.last_connected
    }

    /// The number of connection attempts made so far.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count
    }

    /// The number of failed MQTT operations so far.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Seconds since the device was initialized, counted by `tick`.
    pub fn uptime_seconds(&self) -> u64 {
        self.uptime.total
    }

    /// Seconds the network link has been up.
    pub fn uptime_seconds_link(&self) -> u64 {
        self.uptime.link
    }

    /// Seconds the device has been connected to the broker.
    pub fn uptime_seconds_mqtt(&self) -> u64 {
        self.uptime.mqtt
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// # Panics
    ///
    /// Panics if `id` is from a different device.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// # Panics
    ///
    /// Panics if `id` is from a different device.
    pub fn property(&self, id: PropertyId) -> &Property {
        &self.nodes[id.node].properties()[id.property]
    }

    /// Mutable access to a property, to configure it before `init` or to add callbacks.
    ///
    /// # Panics
    ///
    /// Panics if `id` is from a different device.
    pub fn property_mut(&mut self, id: PropertyId) -> &mut Property {
        self.nodes[id.node].property_mut(id.property)
    }

    /// Look up a property by node ID and property ID. Raw properties are found by their topic.
    pub fn find_property(&self, node_id: &str, property_id: &str) -> Option<PropertyId> {
        let node = self.nodes.iter().position(|node| node.id() == node_id)?;
        let property = self.nodes[node]
            .properties()
            .iter()
            .position(|property| property.id() == property_id)?;
        Some(PropertyId { node, property })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, RecordingTransport};

    const THROTTLE: Duration = Duration::from_millis(200);

    fn make_test_device() -> HomieDevice<RecordingTransport> {
        let config = DeviceConfig {
            device_id: "dev".to_owned(),
            device_name: "Device".to_owned(),
            ..DeviceConfig::default()
        };
        HomieDevice::new(config, RecordingTransport::default())
    }

    /// Connect the device and run the initial publishing walk to completion, returning the time
    /// at which it finished.
    fn connect_and_publish(device: &mut HomieDevice<RecordingTransport>, start: Instant) -> Instant {
        device.tick(start);
        device.transport_mut().connected = true;
        device.on_connect(false, start);
        finish_walk(device, start)
    }

    fn finish_walk(device: &mut HomieDevice<RecordingTransport>, start: Instant) -> Instant {
        let mut now = start;
        for _ in 0..1000 {
            if device.initial_publishing_done() {
                return now;
            }
            now += THROTTLE;
            device.tick(now);
        }
        panic!("Initial publishing didn't finish.");
    }

    #[test]
    fn nodes_and_properties_are_validated() {
        let mut device = make_test_device();
        assert_eq!(
            device.new_node("Bad", "Bad", "x"),
            Err(DeviceError::InvalidId("Bad".to_owned()))
        );
        let node = device.new_node("env", "Environment", "sensor").unwrap();
        assert_eq!(
            device.new_node("env", "Again", "sensor"),
            Err(DeviceError::DuplicateNode("env".to_owned()))
        );
        device
            .new_property(node, "temp", "Temperature", Datatype::Float)
            .unwrap();
        assert_eq!(
            device.new_property(node, "temp", "Temperature", Datatype::Float),
            Err(DeviceError::DuplicateProperty {
                node: "env".to_owned(),
                property: "temp".to_owned()
            })
        );
        assert_eq!(
            device.new_raw_property(node, "home/#", "Wildcard", Datatype::String),
            Err(DeviceError::InvalidId("home/#".to_owned()))
        );
    }

    #[test]
    fn property_on_other_devices_node_is_rejected() {
        let mut other = make_test_device();
        other.new_node("a", "A", "x").unwrap();
        let foreign = other.new_node("b", "B", "x").unwrap();

        let mut device = make_test_device();
        device.new_node("env", "Environment", "sensor").unwrap();
        assert_eq!(
            device.new_property(foreign, "temp", "Temperature", Datatype::Float),
            Err(DeviceError::UnknownNode(foreign))
        );
        assert_eq!(
            device.new_raw_property(foreign, "home/temp", "Temperature", Datatype::Float),
            Err(DeviceError::UnknownNode(foreign))
        );
    }

    #[test]
    fn tree_is_frozen_after_init() {
        let mut device = make_test_device();
        let node = device.new_node("env", "Environment", "sensor").unwrap();
        device.init().unwrap();
        assert_eq!(device.init(), Err(DeviceError::AlreadyInitialized));
        assert_eq!(
            device.new_node("other", "Other", "sensor"),
            Err(DeviceError::AlreadyInitialized)
        );
        assert_eq!(
            device.new_property(node, "temp", "Temperature", Datatype::Float),
            Err(DeviceError::AlreadyInitialized)
        );
    }

    #[test]
    fn invalid_device_id_fails_init() {
        let config = DeviceConfig {
            device_id: "My Device".to_owned(),
            ..DeviceConfig::default()
        };
        let mut device = HomieDevice::new(config, RecordingTransport::default());
        assert_eq!(
            device.init(),
            Err(DeviceError::InvalidId("My Device".to_owned()))
        );
    }

    #[test]
    fn raw_topic_clash_fails_init() {
        let mut device = make_test_device();
        let node = device.new_node("env", "Environment", "sensor").unwrap();
        device
            .new_property(node, "temp", "Temperature", Datatype::Float)
            .unwrap();
        device
            .new_raw_property(node, "homie/dev/env/temp", "Clash", Datatype::String)
            .unwrap();
        assert_eq!(
            device.init(),
            Err(DeviceError::DuplicateTopic("homie/dev/env/temp".to_owned()))
        );
    }

    #[test]
    fn nothing_happens_before_init() {
        let mut device = make_test_device();
        device.tick(Instant::now());
        assert!(device.transport().calls.is_empty());
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn first_connect_is_immediate() {
        let mut device = make_test_device();
        device.init().unwrap();
        device.tick(Instant::now());
        assert_eq!(device.transport().calls, vec![Call::Connect]);
        assert_eq!(device.connection_state(), ConnectionState::Connecting);
        assert_eq!(device.reconnect_count(), 1);
    }

    #[test]
    fn walk_publishes_device_attributes_in_order() {
        let mut device = make_test_device();
        device.new_node("env", "Environment", "sensor").unwrap();
        device.set_firmware("fw", "1.2");
        device.set_network_info("192.168.1.2", "00:11:22:33:44:55");
        device.init().unwrap();
        connect_and_publish(&mut device, Instant::now());

        let calls = &device.transport().calls;
        let expected = vec![
            Call::Connect,
            Call::retained("homie/dev/$state", "init"),
            Call::retained("homie/dev/$homie", "3.0.1"),
            Call::retained("homie/dev/$name", "Device"),
            Call::retained("homie/dev/$localip", "192.168.1.2"),
            Call::retained("homie/dev/$mac", "00:11:22:33:44:55"),
            Call::retained("homie/dev/$fw/name", "fw"),
            Call::retained("homie/dev/$fw/version", "1.2"),
            Call::retained("homie/dev/$nodes", "env"),
            Call::retained("homie/dev/$implementation", "homie-loop"),
            Call::retained("homie/dev/$stats", "uptime,signal"),
            Call::retained("homie/dev/$stats/interval", "60"),
            Call::retained("homie/dev/env/$name", "Environment"),
            Call::retained("homie/dev/env/$type", "sensor"),
            Call::retained("homie/dev/env/$properties", ""),
            Call::retained("homie/dev/$state", "ready"),
        ];
        assert_eq!(calls, &expected);
    }

    #[test]
    fn walk_waits_for_settle_delay_and_throttle() {
        let mut device = make_test_device();
        device.init().unwrap();
        let start = Instant::now();
        device.tick(start);
        device.transport_mut().connected = true;
        device.on_connect(false, start);

        device.tick(start + Duration::from_millis(499));
        assert_eq!(device.transport().calls.len(), 1);
        device.tick(start + SETTLE_DELAY);
        assert_eq!(device.transport().calls.len(), 2);
        device.tick(start + SETTLE_DELAY + Duration::from_millis(100));
        assert_eq!(device.transport().calls.len(), 2);
        device.tick(start + SETTLE_DELAY + THROTTLE);
        assert_eq!(device.transport().calls.len(), 3);
    }

    #[test]
    fn rapid_stats_interval() {
        let config = DeviceConfig {
            device_id: "dev".to_owned(),
            rapid_stats: true,
            ..DeviceConfig::default()
        };
        let mut device = HomieDevice::new(config, RecordingTransport::default());
        device.init().unwrap();
        connect_and_publish(&mut device, Instant::now());
        assert_eq!(
            device.transport().published_to("homie/dev/$stats/interval"),
            vec!["10"]
        );
    }

    #[test]
    fn stats_are_published_periodically() {
        let mut device = make_test_device();
        device.set_signal_strength(150);
        device.init().unwrap();
        let start = Instant::now();
        let done = connect_and_publish(&mut device, start);

        device.tick(done + STATS_INTERVAL - Duration::from_millis(1));
        assert!(device.transport().published_to("homie/dev/$stats/uptime").is_empty());

        device.tick(done + STATS_INTERVAL);
        let uptime = device.uptime_seconds().to_string();
        assert_eq!(
            device.transport().published_to("homie/dev/$stats/uptime"),
            vec![uptime.as_str()]
        );
        assert_eq!(
            device.transport().published_to("homie/dev/$stats/signal"),
            vec!["100"]
        );
    }

    #[test]
    fn settable_property_handshake_and_defaults() {
        let mut device = make_test_device();
        let node = device.new_node("light", "Light", "light").unwrap();
        let power = device
            .new_property(node, "power", "Power", Datatype::Boolean)
            .unwrap();
        device.property_mut(power).set_settable(true);
        device.init().unwrap();
        device.set_value(power, "true");
        let done = connect_and_publish(&mut device, Instant::now());

        let calls = &device.transport().calls;
        assert!(calls.contains(&Call::Subscribe("homie/dev/light/power/set".to_owned())));
        assert!(calls.contains(&Call::Subscribe("homie/dev/light/power".to_owned())));
        // Still waiting for the retained value, so not published by the walk.
        assert!(device.transport().published_to("homie/dev/light/power").is_empty());

        device.tick(done + PUBLISH_DEFAULTS_DELAY);
        assert!(device.property(power).received_retained());
        assert_eq!(
            device.transport().published_to("homie/dev/light/power"),
            vec!["true"]
        );
    }

    #[test]
    fn retained_value_arrives_during_walk() {
        let mut device = make_test_device();
        let node = device.new_node("light", "Light", "light").unwrap();
        let level = device
            .new_property(node, "level", "Level", Datatype::Integer)
            .unwrap();
        device.property_mut(level).set_settable(true).set_format("0:100");
        device.init().unwrap();
        let start = Instant::now();
        device.tick(start);
        device.transport_mut().connected = true;
        device.on_connect(false, start);

        device.on_message("homie/dev/light/level", b"40", 0, 2);

        assert_eq!(device.property(level).value(), "40");
        assert!(device.property(level).received_retained());
        finish_walk(&mut device, start);
        assert_eq!(
            device.transport().published_to("homie/dev/light/level"),
            vec!["40"]
        );
        assert!(
            device
                .transport()
                .calls
                .contains(&Call::Unsubscribe("homie/dev/light/level".to_owned()))
        );
    }

    #[test]
    fn disconnect_resets_handshake_and_walk() {
        let mut device = make_test_device();
        let node = device.new_node("light", "Light", "light").unwrap();
        let level = device
            .new_property(node, "level", "Level", Datatype::Integer)
            .unwrap();
        device.property_mut(level).set_settable(true);
        device.init().unwrap();
        let start = Instant::now();
        let done = connect_and_publish(&mut device, start);
        device.tick(done + PUBLISH_DEFAULTS_DELAY);
        assert!(device.property(level).received_retained());

        device.on_disconnect("connection reset");
        assert!(!device.property(level).received_retained());
        assert!(!device.initial_publishing_done());

        device.transport_mut().calls.clear();
        let later = done + Duration::from_secs(10);
        device.tick(later);
        let retry = later + Duration::from_millis(1001);
        device.tick(retry);
        device.on_connect(false, retry);
        device.tick(retry + SETTLE_DELAY);
        assert_eq!(
            device.transport().calls,
            vec![Call::Connect, Call::retained("homie/dev/$state", "init")]
        );
    }

    #[test]
    fn value_stage_publishes_values() {
        let mut device = make_test_device();
        let node = device.new_node("env", "Environment", "sensor").unwrap();
        let temp = device
            .new_property(node, "temp", "Temperature", Datatype::Float)
            .unwrap();
        device.init().unwrap();
        device.set_value(temp, "21.5");
        connect_and_publish(&mut device, Instant::now());
        assert_eq!(
            device.transport().published_to("homie/dev/env/temp"),
            vec!["21.5"]
        );
    }

    #[test]
    fn later_fragments_are_ignored() {
        let mut device = make_test_device();
        let node = device.new_node("light", "Light", "light").unwrap();
        let power = device
            .new_property(node, "power", "Power", Datatype::Boolean)
            .unwrap();
        device.property_mut(power).set_settable(true);
        device.init().unwrap();

        device.on_message("homie/dev/light/power/set", b"true", 1, 4);
        assert_eq!(device.property(power).value(), "");
        device.on_message("homie/dev/light/power/set", &[0xff, 0xfe], 0, 2);
        assert_eq!(device.property(power).value(), "");
        device.on_message("homie/dev/light/other/set", b"true", 0, 4);
        assert_eq!(device.property(power).value(), "");
        device.on_message("homie/dev/light/power/set", b"true", 0, 4);
        assert_eq!(device.property(power).value(), "true");
    }

    #[test]
    fn reconnect_backs_off() {
        let mut device = make_test_device();
        device.init().unwrap();
        let start = Instant::now();
        device.tick(start);
        device.on_disconnect("refused");
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);

        device.tick(start);
        device.tick(start + Duration::from_millis(900));
        assert_eq!(device.reconnect_count(), 1);
        device.tick(start + Duration::from_millis(1001));
        assert_eq!(device.reconnect_count(), 2);

        let second = start + Duration::from_millis(1001);
        device.on_disconnect("refused");
        device.tick(second);
        device.tick(second + Duration::from_millis(1900));
        assert_eq!(device.reconnect_count(), 2);
        device.tick(second + Duration::from_millis(2001));
        assert_eq!(device.reconnect_count(), 3);
    }

    #[test]
    fn reconnect_backoff_is_capped() {
        let mut device = make_test_device();
        device.init().unwrap();
        let mut now = Instant::now();
        device.tick(now);

        let mut gaps = vec![];
        for _ in 0..10 {
            device.on_disconnect("refused");
            device.tick(now);
            let failed_at = now;
            let attempts = device.reconnect_count();
            while device.reconnect_count() == attempts {
                now += Duration::from_millis(100);
                device.tick(now);
            }
            gaps.push((now - failed_at).as_secs());
        }
        assert_eq!(gaps, vec![1, 2, 4, 8, 16, 32, 60, 60, 60, 60]);
    }

    #[test]
    fn failed_default_publish_is_retried() {
        let mut device = make_test_device();
        let node = device.new_node("light", "Light", "light").unwrap();
        let power = device
            .new_property(node, "power", "Power", Datatype::Boolean)
            .unwrap();
        device.property_mut(power).set_settable(true);
        device.init().unwrap();
        device.set_value(power, "true");
        let done = connect_and_publish(&mut device, Instant::now());

        let defaults_at = done + PUBLISH_DEFAULTS_DELAY;
        device.transport_mut().fail_publishes = true;
        device.tick(defaults_at);
        assert_eq!(device.error_count(), 1);
        assert!(!device.property(power).received_retained());
        assert!(
            !device
                .transport()
                .calls
                .contains(&Call::Unsubscribe("homie/dev/light/power".to_owned()))
        );

        device.transport_mut().fail_publishes = false;
        device.tick(defaults_at + ERROR_INITIAL_INTERVAL + Duration::from_millis(1));
        assert!(device.property(power).received_retained());
        assert_eq!(
            device.transport().published_to("homie/dev/light/power"),
            vec!["true"]
        );
        assert!(
            device
                .transport()
                .calls
                .contains(&Call::Unsubscribe("homie/dev/light/power".to_owned()))
        );
    }

    #[test]
    fn failed_stats_publish_is_retried_after_backoff() {
        let mut device = make_test_device();
        device.init().unwrap();
        let done = connect_and_publish(&mut device, Instant::now());
        device.tick(done);
        let uptime_published = device
            .transport()
            .published_to("homie/dev/$stats/uptime")
            .len();

        let due = done + STATS_INTERVAL;
        device.transport_mut().fail_publishes = true;
        device.tick(due);
        device.transport_mut().fail_publishes = false;
        device.tick(due + ERROR_INITIAL_INTERVAL + Duration::from_millis(1));
        assert_eq!(
            device
                .transport()
                .published_to("homie/dev/$stats/uptime")
                .len(),
            uptime_published + 1
        );
    }

    #[test]
    fn connect_times_out() {
        let mut device = make_test_device();
        device.init().unwrap();
        let start = Instant::now();
        device.tick(start);
        device.tick(start + CONNECT_TIMEOUT);
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);
        assert_eq!(device.transport().calls, vec![Call::Connect, Call::Disconnect]);
    }

    #[test]
    fn no_reconnect_while_link_down() {
        let mut device = make_test_device();
        device.init().unwrap();
        device.set_link_up(false);
        let start = Instant::now();
        device.tick(start);
        device.tick(start + Duration::from_secs(10));
        assert_eq!(device.reconnect_count(), 0);
        device.set_link_up(true);
        device.tick(start + Duration::from_secs(11));
        assert_eq!(device.reconnect_count(), 1);
    }

    #[test]
    fn transport_dropping_connection_is_noticed() {
        let mut device = make_test_device();
        device.init().unwrap();
        let done = connect_and_publish(&mut device, Instant::now());
        device.transport_mut().connected = false;
        device.tick(done);
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);
        assert!(!device.initial_publishing_done());
    }

    #[test]
    fn failed_walk_step_is_retried_after_backoff() {
        let mut device = make_test_device();
        device.init().unwrap();
        let start = Instant::now();
        device.tick(start);
        device.transport_mut().connected = true;
        device.on_connect(false, start);
        device.transport_mut().fail_publishes = true;

        let first = start + SETTLE_DELAY;
        device.tick(first);
        assert_eq!(device.error_count(), 1);

        device.transport_mut().fail_publishes = false;
        device.tick(first + THROTTLE);
        // Still backing off.
        assert_eq!(device.transport().calls, vec![Call::Connect]);
        device.tick(first + ERROR_INITIAL_INTERVAL + Duration::from_millis(1));
        assert_eq!(
            device.transport().calls,
            vec![Call::Connect, Call::retained("homie/dev/$state", "init")]
        );
    }

    #[test]
    fn quit_publishes_disconnected_and_stops() {
        let mut device = make_test_device();
        device.init().unwrap();
        let done = connect_and_publish(&mut device, Instant::now());
        device.quit();
        assert_eq!(
            device.transport().published_to("homie/dev/$state"),
            vec!["init", "ready", "disconnected"]
        );
        assert_eq!(device.transport().calls.last(), Some(&Call::Disconnect));

        device.tick(done + Duration::from_secs(120));
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);
        assert_eq!(device.reconnect_count(), 1);
    }

    #[test]
    fn disabled_mqtt_sends_nothing() {
        let mut device = make_test_device();
        let node = device.new_node("env", "Environment", "sensor").unwrap();
        let temp = device
            .new_property(node, "temp", "Temperature", Datatype::Integer)
            .unwrap();
        device.init().unwrap();
        device.set_enable_mqtt(false);
        device.transport_mut().connected = true;
        assert!(device.set_value(temp, "3"));
        assert!(!device.publish(temp));
        assert!(!device.publish_direct("x", QoS::AtMostOnce, false, "y"));
        device.tick(Instant::now());
        assert!(device.transport().calls.is_empty());
    }

    #[test]
    fn uptime_counters() {
        let mut device = make_test_device();
        device.init().unwrap();
        let start = Instant::now();
        device.tick(start);
        device.set_link_up(false);
        device.tick(start + Duration::from_millis(2500));
        assert_eq!(device.uptime_seconds(), 2);
        assert_eq!(device.uptime_seconds_link(), 0);
        device.set_link_up(true);
        device.transport_mut().connected = true;
        device.on_connect(false, start);
        device.tick(start + Duration::from_millis(4100));
        assert_eq!(device.uptime_seconds(), 4);
        assert_eq!(device.uptime_seconds_link(), 2);
        assert_eq!(device.uptime_seconds_mqtt(), 2);
    }

    #[test]
    fn find_property_by_ids() {
        let mut device = make_test_device();
        let node = device.new_node("env", "Environment", "sensor").unwrap();
        let temp = device
            .new_property(node, "temp", "Temperature", Datatype::Float)
            .unwrap();
        let raw = device
            .new_raw_property(node, "home/lamp1/power", "Lamp", Datatype::String)
            .unwrap();
        assert_eq!(device.find_property("env", "temp"), Some(temp));
        assert_eq!(device.find_property("env", "home/lamp1/power"), Some(raw));
        assert_eq!(device.find_property("env", "humidity"), None);
        assert_eq!(temp.node(), node);
        assert_eq!(device.node(node).id(), "env");
    }
}
