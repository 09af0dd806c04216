use crate::NodeId;
use crate::transport::Session;
use crate::values::{Color, ParseColorError};
use bitflags::bitflags;
use rumqttc::QoS;
use serde_derive::Deserialize;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// The data type for a Homie property.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    /// A [64-bit signed integer](https://homieiot.github.io/specification/#integer).
    Integer,
    /// A [64-bit floating-point number](https://homieiot.github.io/specification/#float).
    Float,
    /// A [boolean value](https://homieiot.github.io/specification/#boolean).
    Boolean,
    /// A [UTF-8 encoded string](https://homieiot.github.io/specification/#string).
    String,
    /// An [enum value](https://homieiot.github.io/specification/#enum) from a set of possible
    /// values specified by the property format.
    Enum,
    /// An RGB or HSV [color](https://homieiot.github.io/specification/#color), depending on the
    /// property format.
    Color,
}

impl Datatype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Color => "color",
        }
    }

    /// The value published in place of an empty value, for datatypes which don't allow one.
    ///
    /// Enums have no fixed default; their first allowed value is used instead.
    pub fn default_value(&self) -> &'static str {
        match self {
            Self::Integer => "0",
            Self::Float => "0.0",
            Self::Boolean => "false",
            Self::String | Self::Enum => "",
            Self::Color => "100,100,100",
        }
    }

    /// Whether an empty string is a valid published value of this datatype.
    pub fn allows_empty(&self) -> bool {
        matches!(self, Self::String)
    }
}

impl Display for Datatype {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("Invalid datatype '{0}'")]
pub struct ParseDatatypeError(String);

impl FromStr for Datatype {
    type Err = ParseDatatypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "boolean" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            "enum" => Ok(Self::Enum),
            "color" => Ok(Self::Color),
            _ => Err(ParseDatatypeError(s.to_owned())),
        }
    }
}

bitflags! {
    /// Behaviour flags of a property. All but `RECEIVED_RETAINED` are fixed once the device is
    /// initialized.
    pub struct PropertyFlags: u8 {
        /// The property accepts writes on its `/set` topic.
        const SETTABLE = 0x01;
        /// Values are published with the broker retain flag.
        const RETAINED = 0x02;
        /// The property is treated as already in sync with the broker, without waiting for its
        /// retained value.
        const FAKE_RETAINED = 0x04;
        /// An empty value may be published for datatypes which allow one.
        const PUBLISH_EMPTY = 0x08;
        const INITIALIZED = 0x10;
        /// The retained value handshake for the current connection has completed.
        const RECEIVED_RETAINED = 0x20;
        /// The property uses its ID verbatim as its only topic, outside the Homie topic layout.
        const RAW = 0x40;
    }
}

/// Why a candidate value was rejected by a property.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValueError {
    #[error("{value} is out of range {min}:{max}")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },
    #[error("{0:?} is not \"true\" or \"false\"")]
    NotBoolean(String),
    #[error("{value:?} is not one of {allowed}")]
    NotInEnum { value: String, allowed: String },
}

/// Callback invoked with a property after it accepted a value from the MQTT broker.
pub type PropertyCallback = Box<dyn FnMut(&Property) + Send>;

/// A [property](https://homieiot.github.io/specification/#properties) of a Homie node.
///
/// Properties are created with `HomieDevice::new_property` and configured through
/// `HomieDevice::property_mut` before the device is initialized.
pub struct Property {
    id: String,
    name: String,
    datatype: Datatype,
    unit: Option<String>,
    format: Option<String>,
    value: String,
    flags: PropertyFlags,
    node: NodeId,
    topic: String,
    set_topic: String,
    callbacks: Option<Vec<PropertyCallback>>,
}

impl Debug for Property {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("datatype", &self.datatype)
            .field("unit", &self.unit)
            .field("format", &self.format)
            .field("value", &self.value)
            .field("flags", &self.flags)
            .field("topic", &self.topic)
            .field(
                "callbacks",
                &self.callbacks.as_ref().map(|callbacks| callbacks.len()),
            )
            .finish()
    }
}

impl Property {
    pub(crate) fn new(
        id: &str,
        name: &str,
        datatype: Datatype,
        node: NodeId,
        node_topic: &str,
    ) -> Property {
        let topic = format!("{}/{}", node_topic, id);
        Property {
            id: id.to_owned(),
            name: name.to_owned(),
            datatype,
            unit: None,
            format: None,
            value: String::new(),
            flags: PropertyFlags::RETAINED | PropertyFlags::PUBLISH_EMPTY,
            node,
            set_topic: format!("{}/set", topic),
            topic,
            callbacks: None,
        }
    }

    /// The subtopic ID of the property, or the full topic of a raw property.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The human-readable name of the property.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// The current value, in canonical textual form. Empty until a value has been set.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    /// The node this property belongs to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The topic values are published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The topic writes are received on. For raw properties this is the same as `topic()`.
    pub fn set_topic(&self) -> &str {
        &self.set_topic
    }

    pub fn is_settable(&self) -> bool {
        self.flags.contains(PropertyFlags::SETTABLE)
    }

    pub fn is_retained(&self) -> bool {
        self.flags.contains(PropertyFlags::RETAINED)
    }

    pub fn is_fake_retained(&self) -> bool {
        self.flags.contains(PropertyFlags::FAKE_RETAINED)
    }

    pub fn publishes_empty(&self) -> bool {
        self.flags.contains(PropertyFlags::PUBLISH_EMPTY)
    }

    pub fn is_initialized(&self) -> bool {
        self.flags.contains(PropertyFlags::INITIALIZED)
    }

    pub fn received_retained(&self) -> bool {
        self.flags.contains(PropertyFlags::RECEIVED_RETAINED)
    }

    pub fn is_raw(&self) -> bool {
        self.flags.contains(PropertyFlags::RAW)
    }

    /// Whether the property waits for the broker to replay its retained value after connecting.
    pub fn needs_handshake(&self) -> bool {
        !self.is_raw() && self.is_settable() && self.is_retained() && !self.is_fake_retained()
    }

    pub(crate) fn awaiting_handshake(&self) -> bool {
        self.needs_handshake() && !self.received_retained()
    }

    /// Parse the current value as a colour, if the property format matches the colour type.
    pub fn color<C: Color + FromStr<Err = ParseColorError>>(&self) -> Option<C> {
        if self.datatype != Datatype::Color || self.format() != Some(C::format().as_str()) {
            return None;
        }
        self.value.parse().ok()
    }

    fn configurable(&self) -> bool {
        if self.is_initialized() {
            log::warn!(
                "Ignoring change to {} after the device was initialized.",
                self.id
            );
            false
        } else {
            true
        }
    }

    fn set_flag(&mut self, flag: PropertyFlags, enable: bool) -> &mut Self {
        if self.configurable() {
            self.flags.set(flag, enable);
        }
        self
    }

    pub fn set_settable(&mut self, settable: bool) -> &mut Self {
        self.set_flag(PropertyFlags::SETTABLE, settable)
    }

    pub fn set_retained(&mut self, retained: bool) -> &mut Self {
        self.set_flag(PropertyFlags::RETAINED, retained)
    }

    pub fn set_fake_retained(&mut self, fake_retained: bool) -> &mut Self {
        self.set_flag(PropertyFlags::FAKE_RETAINED, fake_retained)
    }

    pub fn set_publish_empty(&mut self, publish_empty: bool) -> &mut Self {
        self.set_flag(PropertyFlags::PUBLISH_EMPTY, publish_empty)
    }

    /// Set the unit of the property. An empty unit removes it.
    pub fn set_unit(&mut self, unit: &str) -> &mut Self {
        if self.configurable() {
            self.unit = if unit.is_empty() {
                None
            } else {
                Some(unit.to_owned())
            };
        }
        self
    }

    /// Set the format constraint: `min:max` for integers and floats, a comma-separated list of
    /// allowed values for enums, `rgb` or `hsv` for colours.
    pub fn set_format(&mut self, format: &str) -> &mut Self {
        if self.configurable() {
            self.format = if format.is_empty() {
                None
            } else {
                Some(format.to_owned())
            };
        }
        self
    }

    /// Turn this into a raw property, which publishes and receives on `topic` verbatim. Raw
    /// properties are settable, never retained, and take no part in the retained value handshake.
    pub fn set_raw_topic(&mut self, topic: &str) -> &mut Self {
        if self.configurable() {
            self.flags.insert(PropertyFlags::RAW | PropertyFlags::SETTABLE);
            self.flags.remove(PropertyFlags::RETAINED);
            self.id = topic.to_owned();
            self.topic = topic.to_owned();
            self.set_topic = topic.to_owned();
        }
        self
    }

    /// Register a callback to be called whenever a value from the broker is accepted.
    pub fn add_callback(&mut self, callback: impl FnMut(&Property) + Send + 'static) -> &mut Self {
        self.callbacks
            .get_or_insert_with(Vec::new)
            .push(Box::new(callback));
        self
    }

    /// Validate `candidate` against the datatype and format of the property, returning its
    /// canonical form if it is acceptable.
    pub fn coerce(&self, candidate: &str) -> Result<String, ValueError> {
        match self.datatype {
            Datatype::Integer => {
                let value = parse_int_prefix(candidate);
                if let Some((min, max)) = self.range(parse_int_prefix) {
                    if !(min..=max).contains(&value) {
                        return Err(ValueError::OutOfRange {
                            value: value.to_string(),
                            min: min.to_string(),
                            max: max.to_string(),
                        });
                    }
                }
                Ok(value.to_string())
            }
            Datatype::Float => {
                let value = parse_float_prefix(candidate);
                if let Some((min, max)) = self.range(parse_float_prefix) {
                    if !(min..=max).contains(&value) {
                        return Err(ValueError::OutOfRange {
                            value: format_float(value),
                            min: format_float(min),
                            max: format_float(max),
                        });
                    }
                }
                Ok(format_float(value))
            }
            Datatype::Boolean => match candidate {
                "true" | "false" => Ok(candidate.to_owned()),
                _ => Err(ValueError::NotBoolean(candidate.to_owned())),
            },
            Datatype::Enum => {
                let allowed = self.format().unwrap_or_default();
                if allowed.split(',').any(|option| option == candidate) {
                    Ok(candidate.to_owned())
                } else {
                    Err(ValueError::NotInEnum {
                        value: candidate.to_owned(),
                        allowed: allowed.to_owned(),
                    })
                }
            }
            Datatype::String | Datatype::Color => Ok(candidate.to_owned()),
        }
    }

    /// The `min:max` bounds from the format, if it has any.
    fn range<T>(&self, parse: impl Fn(&str) -> T) -> Option<(T, T)> {
        let format = self.format()?;
        match format.find(':') {
            Some(colon) if colon > 0 => Some((parse(&format[..colon]), parse(&format[colon + 1..]))),
            _ => None,
        }
    }

    /// Store `candidate` if it is valid, returning whether it was accepted.
    pub(crate) fn accept(&mut self, candidate: &str) -> bool {
        match self.coerce(candidate) {
            Ok(value) => {
                self.value = value;
                true
            }
            Err(e) => {
                log::debug!("{} ignoring invalid payload: {}", self.name, e);
                false
            }
        }
    }

    /// The payload to publish for the current value, or `None` if nothing should be published.
    fn payload(&self) -> Option<&str> {
        if !self.value.is_empty() {
            Some(&self.value)
        } else if self.datatype.allows_empty() {
            self.publishes_empty().then_some("")
        } else if self.datatype == Datatype::Enum {
            Some(self.format().unwrap_or_default().split(',').next().unwrap_or_default())
        } else {
            log::trace!("Empty value for {}, substituting default.", self.id);
            Some(self.datatype.default_value())
        }
    }

    /// Publish the current value, returning whether a publish was attempted.
    pub(crate) fn publish(&self, session: &mut Session) -> bool {
        if !self.is_initialized() || !session.enabled() {
            return false;
        }
        let Some(payload) = self.payload() else {
            return false;
        };
        if !session.connected() {
            log::debug!("{} can't publish {:?}: not connected.", self.name, payload);
            return false;
        }
        if self.is_raw() {
            session.publish(&self.topic, QoS::AtMostOnce, false, payload);
        } else {
            session.publish(&self.topic, QoS::AtLeastOnce, self.is_retained(), payload);
        }
        true
    }

    /// Handle a message from the broker on one of this property's topics.
    pub(crate) fn on_message(&mut self, topic: &str, payload: &str, session: &mut Session) {
        let previous = self.value.clone();
        let accepted = self.accept(payload);
        if accepted {
            self.fire_callbacks();
        }

        if self.is_retained() && !self.is_raw() && topic == self.topic {
            log::trace!(
                "{} received initial value for {}. Unsubscribing.",
                self.name,
                self.topic
            );
            session.unsubscribe(&self.topic);
            self.flags.insert(PropertyFlags::RECEIVED_RETAINED);
        } else if accepted && (!self.is_raw() || self.value != previous) {
            // Writes must be echoed back to the base topic. Raw properties receive their own
            // publishes, so only changes are echoed.
            self.publish(session);
        }
    }

    /// Give up waiting for a retained value from the broker, and publish our own value instead.
    pub(crate) fn publish_default(&mut self, session: &mut Session) {
        if !self.awaiting_handshake() {
            return;
        }
        if !self.value.is_empty() {
            log::trace!(
                "{} didn't receive an initial value for {}, publishing default.",
                self.name,
                self.topic
            );
            let failures = session.failures();
            if !self.publish(session) || session.failures() > failures {
                return;
            }
        }
        self.flags.insert(PropertyFlags::RECEIVED_RETAINED);
        session.unsubscribe(&self.topic);
    }

    pub(crate) fn init(&mut self) {
        self.flags.insert(PropertyFlags::INITIALIZED);
    }

    pub(crate) fn reset_handshake(&mut self) {
        self.flags.remove(PropertyFlags::RECEIVED_RETAINED);
    }

    fn fire_callbacks(&mut self) {
        if let Some(mut callbacks) = self.callbacks.take() {
            for callback in &mut callbacks {
                callback(self);
            }
            self.callbacks = Some(callbacks);
        }
    }
}

/// A [node](https://homieiot.github.io/specification/#nodes) of a Homie device.
#[derive(Debug)]
pub struct Node {
    id: String,
    name: String,
    node_type: String,
    topic: String,
    properties: Vec<Property>,
}

impl Node {
    pub(crate) fn new(id: &str, name: &str, node_type: &str, device_base: &str) -> Node {
        Node {
            id: id.to_owned(),
            name: name.to_owned(),
            node_type: node_type.to_owned(),
            topic: format!("{}/{}", device_base, id),
            properties: vec![],
        }
    }

    /// The subtopic ID of the node.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The human-readable name of the node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type of the node. This is an arbitrary string.
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The properties of the node, in the order they were added.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn has_property(&self, property_id: &str) -> bool {
        self.properties.iter().any(|p| p.id == property_id)
    }

    /// Comma-separated IDs of the properties which follow the Homie topic layout.
    pub(crate) fn property_ids(&self) -> String {
        self.properties
            .iter()
            .filter(|p| !p.is_raw())
            .map(|p| p.id.as_str())
            .collect::<Vec<&str>>()
            .join(",")
    }

    pub(crate) fn new_property(
        &mut self,
        node: NodeId,
        id: &str,
        name: &str,
        datatype: Datatype,
    ) -> usize {
        self.properties
            .push(Property::new(id, name, datatype, node, &self.topic));
        self.properties.len() - 1
    }

    pub(crate) fn property_mut(&mut self, index: usize) -> &mut Property {
        &mut self.properties[index]
    }

    pub(crate) fn init(&mut self) {
        for property in &mut self.properties {
            property.init();
        }
    }

    pub(crate) fn publish_defaults(&mut self, session: &mut Session) {
        for property in &mut self.properties {
            property.publish_default(session);
        }
    }

    pub(crate) fn reset_handshake(&mut self) {
        for property in &mut self.properties {
            property.reset_handshake();
        }
    }
}

/// Whether `id` is a valid Homie [topic ID](https://homieiot.github.io/specification/#topic-ids).
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('-')
        && id
            .bytes()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'-')
}

/// Parse the longest integer prefix of `s`, like C's `atoi`. Returns 0 if there is none.
pub(crate) fn parse_int_prefix(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |value, c| {
            value.saturating_mul(10).saturating_add(i64::from(c - b'0'))
        });
    if negative { -value } else { value }
}

/// Parse the longest floating-point prefix of `s`, like C's `atof`. Returns 0 if there is none, or
/// if it isn't finite.
pub(crate) fn parse_float_prefix(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let integer_digits = count_digits(&bytes[end..]);
    end += integer_digits;
    let mut fraction_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        fraction_digits = count_digits(&bytes[end + 1..]);
        end += 1 + fraction_digits;
    }
    if integer_digits + fraction_digits == 0 {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent_end = end + 1;
        if matches!(bytes.get(exponent_end), Some(b'+' | b'-')) {
            exponent_end += 1;
        }
        let exponent_digits = count_digits(&bytes[exponent_end..]);
        if exponent_digits > 0 {
            end = exponent_end + exponent_digits;
        }
    }
    s[..end]
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|c| c.is_ascii_digit()).count()
}

/// Format a float with at least one fractional digit.
pub(crate) fn format_float(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}
