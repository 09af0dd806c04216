use crate::transport::{Transport, TransportError};
use rumqttc::QoS;

/// A call made on a `RecordingTransport`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Connect,
    Disconnect,
    Publish {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: String,
    },
    Subscribe(String),
    Unsubscribe(String),
}

impl Call {
    pub fn publish(topic: &str, qos: QoS, retain: bool, payload: &str) -> Call {
        Call::Publish {
            topic: topic.to_owned(),
            qos,
            retain,
            payload: payload.to_owned(),
        }
    }

    /// A retained QoS 1 publish, as used for Homie attributes and values.
    pub fn retained(topic: &str, payload: &str) -> Call {
        Call::publish(topic, QoS::AtLeastOnce, true, payload)
    }
}

/// A `Transport` which records every call made on it. Connection state is controlled by the test.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub connected: bool,
    pub fail_publishes: bool,
    pub calls: Vec<Call>,
}

impl RecordingTransport {
    pub fn connected() -> Self {
        RecordingTransport {
            connected: true,
            ..Default::default()
        }
    }

    pub fn last_payload(&self) -> Option<&str> {
        self.calls.iter().rev().find_map(|call| match call {
            Call::Publish { payload, .. } => Some(payload.as_str()),
            _ => None,
        })
    }

    /// The payloads published to `topic`, in order.
    pub fn published_to(&self, topic: &str) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Publish {
                    topic: t, payload, ..
                } if t == topic => Some(payload.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn connect(&mut self) {
        self.calls.push(Call::Connect);
    }

    fn disconnect(&mut self) {
        self.calls.push(Call::Disconnect);
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
        if self.fail_publishes {
            return Err(TransportError::Unreachable);
        }
        self.calls.push(Call::publish(topic, qos, retain, payload));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        self.calls.push(Call::Subscribe(topic.to_owned()));
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.calls.push(Call::Unsubscribe(topic.to_owned()));
        Ok(())
    }
}
