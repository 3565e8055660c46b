/*!
Hardware node and camera identity descriptions.

A hardware node is a named, typed parameter the backend declares as
controllable. Several nodes may share one physical command; those are the
"grouped" nodes whose values must be written together.
*/

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::TOPIC_CAM;

fn default_topic() -> String {
    TOPIC_CAM.to_string()
}

fn default_writable() -> bool {
    true
}

/// Value type of a hardware node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Float,
    Int,
    Bool,
    Enum,
    /// Fire-and-forget trigger, always written as `true`
    Action,
}

/// Backend-declared controllable parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareNode {
    pub name: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    pub command: String,
    /// Payload key within the command, defaults to the command name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub kind: NodeKind,
    #[serde(default = "default_writable")]
    pub writable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HardwareNode {
    /// Create a writable node on the `cam` topic
    pub fn new(name: impl Into<String>, command: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            topic: default_topic(),
            command: command.into(),
            field: None,
            kind,
            writable: true,
            value: None,
            min: None,
            max: None,
            options: Vec::new(),
            unit: None,
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Key this node's value occupies in the command payload
    pub fn payload_key(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.command)
    }
}

/// Identity the backend reports for the attached camera
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraIdentity {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub vendor: String,
    /// Free-text sensor/camera type token
    #[serde(default)]
    pub camera_type: String,
    #[serde(default)]
    pub has_gain: bool,
    #[serde(default)]
    pub has_cooling: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CameraIdentity {
    /// Fields that decide who the camera is; capability flags and extras excluded
    pub fn same_device(&self, other: &CameraIdentity) -> bool {
        self.model == other.model
            && self.serial == other.serial
            && self.vendor == other.vendor
            && self.camera_type == other.camera_type
    }

    /// Case-insensitive substring match of `marker` against camera type and model
    pub fn matches_marker(&self, marker: &str) -> bool {
        if marker.is_empty() {
            return false;
        }
        match RegexBuilder::new(&regex::escape(marker)).case_insensitive(true).build() {
            Ok(re) => re.is_match(&self.camera_type) || re.is_match(&self.model),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_defaults() {
        let node: HardwareNode = serde_json::from_value(json!({
            "name": "gain_low",
            "command": "gain",
            "field": "low",
            "kind": "float",
            "value": 1.5,
            "vendor_hint": "x"
        }))
        .unwrap();

        assert_eq!(node.topic, "cam");
        assert!(node.writable);
        assert_eq!(node.payload_key(), "low");
        assert_eq!(node.extra["vendor_hint"], "x");

        let node = HardwareNode::new("exposure_ms", "exp-00", NodeKind::Float);
        assert_eq!(node.payload_key(), "exp-00");
    }

    #[test]
    fn test_identity_comparison_ignores_capabilities() {
        let a = CameraIdentity { model: "M".into(), serial: "1".into(), ..Default::default() };
        let mut b = a.clone();
        b.has_gain = true;
        assert!(a.same_device(&b));

        b.serial = "2".into();
        assert!(!a.same_device(&b));
    }

    #[test]
    fn test_marker_match() {
        let id = CameraIdentity { model: "MC-1".into(), camera_type: "GSense2020BSI".into(), ..Default::default() };
        assert!(id.matches_marker("gsense"));
        assert!(!id.matches_marker("imx"));
        assert!(!id.matches_marker(""));

        let by_model = CameraIdentity { model: "gsense400 rig".into(), ..Default::default() };
        assert!(by_model.matches_marker("GSENSE"));
        assert!(!CameraIdentity::default().matches_marker("gsense"));
    }
}
