/*!
Hardware node catalog.

The backend publishes the parameters it can control as a list of typed nodes.
Nodes sharing one `(topic, command)` form a group and are always written
together, so changing one field never clobbers its siblings. When the backend
does not answer a catalog query, a minimal fallback catalog is derived from
the capability flags seen so far.
*/

use crate::client::CameraClient;
use crate::transport::Transport;
use serde_json::{Number, Value};
use shared::message::{Command, Payload};
use shared::node::{HardwareNode, NodeKind};
use shared::protocol::{EXPOSURE_COMMAND, TOPIC_CAM};
use shared::{CameraError, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cached node definitions and last known values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeCatalog {
    nodes: Vec<HardwareNode>,
    from_backend: bool,
}

impl NodeCatalog {
    /// Catalog as published by the backend
    pub fn from_backend(nodes: Vec<HardwareNode>) -> Self {
        Self { nodes, from_backend: true }
    }

    /// Minimal catalog: exposure always, gain and cooling only when the camera
    /// is known to have them
    pub fn fallback(has_gain: bool, has_cooling: bool, exposure_ms: f64) -> Self {
        let mut nodes = vec![HardwareNode::new("exposure_ms", EXPOSURE_COMMAND, NodeKind::Float)
            .with_value(Value::from(exposure_ms))
            .with_unit("ms")];

        if has_gain {
            nodes.push(HardwareNode::new("gain", "gain", NodeKind::Float));
        }
        if has_cooling {
            nodes.push(
                HardwareNode::new("cooling_setpoint_c", "cooling", NodeKind::Float)
                    .with_field("setpoint")
                    .with_unit("C"),
            );
            nodes.push(HardwareNode::new("cooling_enabled", "cooling", NodeKind::Bool).with_field("enabled"));
        }

        Self { nodes, from_backend: false }
    }

    pub fn nodes(&self) -> &[HardwareNode] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<&HardwareNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut HardwareNode> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    /// Every node written through `topic`/`command`
    pub fn group(&self, topic: &str, command: &str) -> Vec<&HardwareNode> {
        self.nodes
            .iter()
            .filter(|n| n.topic == topic && n.command == command)
            .collect()
    }

    pub fn has_gain(&self) -> bool {
        self.nodes.iter().any(|n| n.command.contains("gain") || n.name.contains("gain"))
    }

    pub fn has_cooling(&self) -> bool {
        self.nodes.iter().any(|n| n.command.contains("cool") || n.name.contains("cool"))
    }

    /// Synthesized locally rather than published by the backend
    pub fn is_fallback(&self) -> bool {
        !self.from_backend
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn number(value: f64, node: &HardwareNode) -> Result<Value> {
    if let Some(min) = node.min {
        if value < min {
            return Err(CameraError::invalid_argument(format!("{} = {} is below {}", node.name, value, min)));
        }
    }
    if let Some(max) = node.max {
        if value > max {
            return Err(CameraError::invalid_argument(format!("{} = {} is above {}", node.name, value, max)));
        }
    }
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| CameraError::invalid_argument(format!("{} = {} is not a finite number", node.name, value)))
}

/// Convert a caller value into what the node's kind puts on the wire
fn coerce(node: &HardwareNode, value: Value) -> Result<Value> {
    let mismatch = |value: &Value| {
        CameraError::invalid_argument(format!("{:?} node '{}' cannot take {}", node.kind, node.name, value))
    };

    match node.kind {
        NodeKind::Action => Ok(Value::Bool(true)),
        NodeKind::Float => {
            let v = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| mismatch(&value))?;
            number(v, node)
        }
        NodeKind::Int => {
            let v = match &value {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| mismatch(&value))?;
            number(v as f64, node)?;
            Ok(Value::from(v))
        }
        NodeKind::Bool => match &value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Number(n) if n.as_i64() == Some(0) || n.as_i64() == Some(1) => Ok(Value::Bool(n.as_i64() == Some(1))),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
        NodeKind::Enum => {
            let Value::String(s) = &value else {
                return Err(mismatch(&value));
            };
            if !node.options.is_empty() && !node.options.contains(s) {
                return Err(CameraError::invalid_argument(format!(
                    "'{}' is not one of {:?} for node '{}'",
                    s, node.options, node.name
                )));
            }
            Ok(value)
        }
    }
}

impl<T: Transport> CameraClient<T> {
    /// Ask the backend for its catalog; falls back to the built-in catalog when
    /// nothing arrives within `timeout`
    pub fn refresh_catalog(&mut self, timeout: Option<Duration>) -> Result<&NodeCatalog> {
        let timeout = timeout.unwrap_or(self.options.catalog_timeout);
        let generation = self.state.catalog_generation;

        self.send(&Command::QueryHardwareNodes)?;
        let arrived = self.wait_for_state(timeout, |state| state.catalog_generation > generation)?;

        let catalog = match self.state.catalog.take() {
            Some(catalog) if arrived => {
                info!("🧩 Hardware node catalog with {} nodes", catalog.len());
                catalog
            }
            _ => {
                warn!("⚠️ No hardware node catalog within {:?}, using fallback", timeout);
                NodeCatalog::fallback(self.state.has_gain, self.state.has_cooling, self.state.current_exposure_ms)
            }
        };
        let catalog: &NodeCatalog = self.state.catalog.insert(catalog);
        Ok(catalog)
    }

    /// Cached catalog, queried on first use
    pub fn node_catalog(&mut self) -> Result<&NodeCatalog> {
        if self.state.catalog.is_none() {
            self.refresh_catalog(None)?;
        }
        self.state
            .catalog
            .as_ref()
            .ok_or_else(|| CameraError::operation("hardware node catalog unavailable"))
    }

    /// Cached definition and value of one node
    pub fn node(&self, name: &str) -> Option<&HardwareNode> {
        self.state.catalog.as_ref()?.get(name)
    }

    pub fn nodes(&self) -> &[HardwareNode] {
        self.state.catalog.as_ref().map(NodeCatalog::nodes).unwrap_or_default()
    }

    /// Write one node. Grouped nodes carry their siblings' cached values along.
    pub fn set_node(&mut self, name: &str, value: Value) -> Result<()> {
        let catalog = self.node_catalog()?;
        let node = catalog
            .get(name)
            .ok_or_else(|| CameraError::operation(format!("unknown hardware node '{}'", name)))?;
        if !node.writable {
            return Err(CameraError::operation(format!("hardware node '{}' is read-only", name)));
        }

        let value = coerce(node, value)?;
        let mut payload = Payload::new();
        for sibling in catalog.group(&node.topic, &node.command) {
            if sibling.name != node.name {
                if let Some(current) = &sibling.value {
                    payload.insert(sibling.payload_key().to_string(), current.clone());
                }
            }
        }
        payload.insert(node.payload_key().to_string(), value.clone());

        let command = Command::NodeWrite {
            topic: node.topic.clone(),
            command: node.command.clone(),
            payload,
        };
        let is_exposure = node.topic == TOPIC_CAM && node.command == EXPOSURE_COMMAND;
        debug!("Writing node '{}' via {}/{}", name, command.topic(), command.name());

        self.send(&command)?;

        if let Some(node) = self.state.catalog.as_mut().and_then(|c| c.get_mut(name)) {
            node.value = Some(value.clone());
        }
        if is_exposure {
            if let Some(ms) = value.as_f64() {
                self.state.target_exposure_ms = ms;
            }
        }
        info!("🎛️ Node '{}' set to {}", name, value);
        Ok(())
    }
}
