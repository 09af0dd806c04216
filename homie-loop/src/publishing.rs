//! The initial publishing walk, which announces every node and property after connecting.
//!
//! The walk is a sequence of stages. Each position of the cursor expands to a short list of
//! actions, and the cursor's `step` says how many of them have been done, so a walk can be resumed
//! after any single action.

use crate::PropertyId;
use crate::types::{Node, Property};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Stage {
    /// Device attributes.
    Device,
    /// Attributes of the node at the cursor.
    Node,
    /// Attributes and subscriptions of the property at the cursor.
    Properties,
    /// The current value of the property at the cursor.
    Values,
    /// `$state` = `ready`.
    Ready,
}

/// Position of the initial publishing walk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Cursor {
    pub stage: Stage,
    pub node: usize,
    pub property: usize,
    /// Index of the next action to perform at this position.
    pub step: usize,
}

impl Cursor {
    pub fn start() -> Cursor {
        Cursor {
            stage: Stage::Device,
            node: 0,
            property: 0,
            step: 0,
        }
    }

    /// Move on to the next position, returning true if the walk is complete.
    pub fn advance(&mut self, nodes: &[Node]) -> bool {
        self.step = 0;
        match self.stage {
            Stage::Device => {
                self.node = 0;
                self.property = 0;
                self.stage = if nodes.is_empty() {
                    Stage::Values
                } else {
                    Stage::Node
                };
            }
            Stage::Node => {
                self.property = 0;
                if nodes[self.node].properties().is_empty() {
                    self.next_node(nodes);
                } else {
                    self.stage = Stage::Properties;
                }
            }
            Stage::Properties => {
                self.property += 1;
                if self.property >= nodes[self.node].properties().len() {
                    self.next_node(nodes);
                }
            }
            Stage::Values => {
                self.property += 1;
                while self.node < nodes.len()
                    && self.property >= nodes[self.node].properties().len()
                {
                    self.node += 1;
                    self.property = 0;
                }
                if self.node >= nodes.len() {
                    self.node = 0;
                    self.property = 0;
                    self.stage = Stage::Ready;
                }
            }
            Stage::Ready => return true,
        }
        false
    }

    fn next_node(&mut self, nodes: &[Node]) {
        self.node += 1;
        self.property = 0;
        if self.node < nodes.len() {
            self.stage = Stage::Node;
        } else {
            self.node = 0;
            self.stage = Stage::Values;
        }
    }
}

/// A single step of the walk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Action {
    /// Publish a retained attribute.
    Publish { topic: String, payload: String },
    Subscribe(String),
    /// Publish the current value of a property.
    Value(PropertyId),
}

impl Action {
    pub fn attribute(base: &str, name: &str, value: impl Into<String>) -> Action {
        Action::Publish {
            topic: format!("{}/{}", base, name),
            payload: value.into(),
        }
    }
}

pub(crate) fn node_actions(node: &Node) -> Vec<Action> {
    vec![
        Action::attribute(node.topic(), "$name", node.name()),
        Action::attribute(node.topic(), "$type", node.node_type()),
        Action::attribute(node.topic(), "$properties", node.property_ids()),
    ]
}

pub(crate) fn property_actions(property: &Property) -> Vec<Action> {
    if property.is_raw() {
        return vec![Action::Subscribe(property.topic().to_owned())];
    }
    let topic = property.topic();
    let mut actions = vec![
        Action::attribute(topic, "$name", property.name()),
        Action::attribute(topic, "$settable", property.is_settable().to_string()),
        Action::attribute(topic, "$retained", property.is_retained().to_string()),
        Action::attribute(topic, "$datatype", property.datatype().as_str()),
    ];
    if let Some(unit) = property.unit() {
        actions.push(Action::attribute(topic, "$unit", unit));
    }
    if let Some(format) = property.format() {
        actions.push(Action::attribute(topic, "$format", format));
    }
    if property.is_settable() {
        actions.push(Action::Subscribe(property.set_topic().to_owned()));
    }
    if property.needs_handshake() {
        actions.push(Action::Subscribe(topic.to_owned()));
    }
    actions
}

/// The value to publish at `cursor` during the values stage, if any. Raw properties and properties
/// still waiting for their retained value are skipped.
pub(crate) fn value_actions(nodes: &[Node], cursor: &Cursor) -> Vec<Action> {
    let Some(property) = nodes
        .get(cursor.node)
        .and_then(|node| node.properties().get(cursor.property))
    else {
        return vec![];
    };
    if property.is_raw() || property.awaiting_handshake() {
        vec![]
    } else {
        vec![Action::Value(PropertyId {
            node: cursor.node,
            property: cursor.property,
        })]
    }
}
