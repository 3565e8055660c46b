/*!
Command vocabulary and telemetry parsing.

Outbound traffic is expressed as a closed [`Command`] enum so every variant
carries exactly the payload keys the backend requires. Inbound command-channel
traffic is parsed at the boundary into [`Telemetry`]; anything the client does
not understand is kept opaquely as [`Telemetry::Other`].
*/

use crate::error::{CameraError, Result};
use crate::node::{CameraIdentity, HardwareNode};
use crate::protocol::{EXPOSURE_COMMAND, TOPIC_CAM, TOPIC_FILE, TOPIC_WIDGET};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Key/value payload of a command message
pub type Payload = Map<String, Value>;

/// Raw `(topic, name, payload)` triple as carried on the command channel
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub topic: String,
    pub name: String,
    pub payload: Payload,
}

impl CommandMessage {
    pub fn new(topic: impl Into<String>, name: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            name: name.into(),
            payload,
        }
    }

    /// Encode as the three wire parts `[topic, name, json payload]`
    pub fn to_parts(&self) -> Result<Vec<Vec<u8>>> {
        let payload = serde_json::to_vec(&self.payload)?;
        Ok(vec![
            self.topic.as_bytes().to_vec(),
            self.name.as_bytes().to_vec(),
            payload,
        ])
    }

    /// Decode from wire parts produced by [`CommandMessage::to_parts`]
    pub fn from_parts(parts: &[Vec<u8>]) -> Result<Self> {
        if parts.len() < 3 {
            return Err(CameraError::decode(format!(
                "command message has {} parts, expected 3",
                parts.len()
            )));
        }

        let topic = String::from_utf8_lossy(&parts[0]).into_owned();
        let name = String::from_utf8_lossy(&parts[1]).into_owned();
        let payload = match serde_json::from_slice::<Value>(&parts[2])? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            // Bare values are keyed by the command name
            other => {
                let mut map = Map::new();
                map.insert(name.clone(), other);
                map
            }
        };

        Ok(Self { topic, name, payload })
    }

    /// Check whether this message carries the given topic and name
    pub fn is(&self, topic: &str, name: &str) -> bool {
        self.topic == topic && self.name == name
    }
}

/// Which backend consumer an exposure setpoint is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureConsumer {
    /// Hardware driver
    Camera,
    /// Display widget
    Widget,
}

/// Recording file naming mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNaming {
    Timestamp,
    Custom(String),
}

/// Recording folder naming mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderNaming {
    Timestamp,
    Custom(String),
    NoNewFolder,
}

/// Condition the file saving process uses to end a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Stop after a fixed number of frames
    FrameCount(u32),
    /// Record until an explicit `record=false`
    Manual,
}

impl StopCondition {
    /// Wire string for the condition
    pub fn as_str(&self) -> &'static str {
        match self {
            StopCondition::FrameCount(_) => "Frame Count",
            StopCondition::Manual => "Manual Stop",
        }
    }
}

/// Outbound command understood by the camera backend
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Exposure setpoint in milliseconds
    Exposure { consumer: ExposureConsumer, ms: f64 },
    /// Ask the backend to publish its hardware node catalog
    QueryHardwareNodes,
    /// Generic hardware node write addressed by command name
    NodeWrite {
        topic: String,
        command: String,
        payload: Payload,
    },
    SaveDir(String),
    FileName(FileNaming),
    FolderName(FolderNaming),
    FramesPerFile(u32),
    StopCondition(StopCondition),
    Record(bool),
}

impl Command {
    /// Topic tag this command is published under
    pub fn topic(&self) -> &str {
        match self {
            Command::Exposure { consumer: ExposureConsumer::Camera, .. } => TOPIC_CAM,
            Command::Exposure { consumer: ExposureConsumer::Widget, .. } => TOPIC_WIDGET,
            Command::QueryHardwareNodes => TOPIC_CAM,
            Command::NodeWrite { topic, .. } => topic,
            Command::SaveDir(_)
            | Command::FileName(_)
            | Command::FolderName(_)
            | Command::FramesPerFile(_)
            | Command::StopCondition(_)
            | Command::Record(_) => TOPIC_FILE,
        }
    }

    /// Operation name within the topic
    pub fn name(&self) -> &str {
        match self {
            Command::Exposure { .. } => EXPOSURE_COMMAND,
            Command::QueryHardwareNodes => "query-hardware-nodes",
            Command::NodeWrite { command, .. } => command,
            Command::SaveDir(_) => "save_dir",
            Command::FileName(_) => "file_name",
            Command::FolderName(_) => "folder_name",
            Command::FramesPerFile(_) => "frames_per_file",
            Command::StopCondition(_) => "stop_condition",
            Command::Record(_) => "record",
        }
    }

    /// Payload mapping with every required key present
    pub fn payload(&self) -> Payload {
        let value = match self {
            Command::Exposure { ms, .. } => json!({ EXPOSURE_COMMAND: ms }),
            Command::QueryHardwareNodes => json!({}),
            Command::NodeWrite { payload, .. } => return payload.clone(),
            Command::SaveDir(dir) => json!({ "save_dir": dir }),
            Command::FileName(FileNaming::Timestamp) => json!({ "mode": "Timestamp" }),
            Command::FileName(FileNaming::Custom(name)) => json!({ "mode": "Custom", "name": name }),
            Command::FolderName(FolderNaming::Timestamp) => json!({ "mode": "Timestamp" }),
            Command::FolderName(FolderNaming::Custom(name)) => json!({ "mode": "Custom", "name": name }),
            Command::FolderName(FolderNaming::NoNewFolder) => json!({ "mode": "Do Not Create New Folder" }),
            Command::FramesPerFile(frames) => json!({ "frames_per_file": frames }),
            Command::StopCondition(cond @ StopCondition::FrameCount(frames)) => {
                json!({ "stop_condition": cond.as_str(), "n_frames": frames })
            }
            Command::StopCondition(cond @ StopCondition::Manual) => json!({ "stop_condition": cond.as_str() }),
            Command::Record(record) => json!({ "record": record }),
        };

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Build the wire triple
    pub fn to_message(&self) -> CommandMessage {
        CommandMessage::new(self.topic(), self.name(), self.payload())
    }
}

#[derive(Deserialize)]
struct RecordingStatusPayload {
    recording: bool,
}

#[derive(Deserialize)]
struct CatalogPayload {
    nodes: Vec<HardwareNode>,
}

/// Parsed inbound command-channel message
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    /// `file`/`recording_status`
    RecordingStatus { recording: bool },
    /// `cam`/`camera_info`
    CameraInfo(CameraIdentity),
    /// `cam`/`hardware_nodes`
    HardwareNodes(Vec<HardwareNode>),
    /// Anything else, preserved but not interpreted
    Other(CommandMessage),
}

impl Telemetry {
    /// Classify a received message; malformed known messages degrade to `Other`
    pub fn from_message(msg: CommandMessage) -> Self {
        let parsed = match (msg.topic.as_str(), msg.name.as_str()) {
            (TOPIC_FILE, "recording_status") => {
                serde_json::from_value::<RecordingStatusPayload>(Value::Object(msg.payload.clone()))
                    .map(|p| Telemetry::RecordingStatus { recording: p.recording })
            }
            (TOPIC_CAM, "camera_info") => {
                serde_json::from_value::<CameraIdentity>(Value::Object(msg.payload.clone()))
                    .map(Telemetry::CameraInfo)
            }
            (TOPIC_CAM, "hardware_nodes") => {
                serde_json::from_value::<CatalogPayload>(Value::Object(msg.payload.clone()))
                    .map(|p| Telemetry::HardwareNodes(p.nodes))
            }
            _ => return Telemetry::Other(msg),
        };

        match parsed {
            Ok(telemetry) => telemetry,
            Err(e) => {
                debug!("Ignoring malformed {}/{} payload: {}", msg.topic, msg.name, e);
                Telemetry::Other(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposure_commands_mirror_payload() {
        let cam = Command::Exposure { consumer: ExposureConsumer::Camera, ms: 12.5 }.to_message();
        let widget = Command::Exposure { consumer: ExposureConsumer::Widget, ms: 12.5 }.to_message();

        assert_eq!(cam.topic, "cam");
        assert_eq!(widget.topic, "widget");
        assert_eq!(cam.name, "exp-00");
        assert_eq!(cam.payload, widget.payload);
        assert_eq!(cam.payload["exp-00"], json!(12.5));
    }

    #[test]
    fn test_file_commands() {
        let msg = Command::FolderName(FolderNaming::NoNewFolder).to_message();
        assert_eq!(msg.topic, "file");
        assert_eq!(msg.payload["mode"], "Do Not Create New Folder");

        let msg = Command::FileName(FileNaming::Custom("dark".into())).to_message();
        assert_eq!(msg.payload["mode"], "Custom");
        assert_eq!(msg.payload["name"], "dark");

        let msg = Command::StopCondition(StopCondition::FrameCount(10)).to_message();
        assert_eq!(msg.payload["stop_condition"], "Frame Count");
        assert_eq!(msg.payload["n_frames"], 10);

        let msg = Command::Record(false).to_message();
        assert_eq!(msg.payload["record"], false);
    }

    #[test]
    fn test_wire_parts() {
        let msg = Command::FramesPerFile(100).to_message();
        let parts = msg.to_parts().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(CommandMessage::from_parts(&parts).unwrap(), msg);

        assert!(CommandMessage::from_parts(&parts[..2]).is_err());
    }

    #[test]
    fn test_telemetry_parsing() {
        let msg = CommandMessage::new("file", "recording_status", json!({"recording": true}).as_object().unwrap().clone());
        assert_eq!(Telemetry::from_message(msg), Telemetry::RecordingStatus { recording: true });

        // Missing required key is preserved, not interpreted
        let msg = CommandMessage::new("file", "recording_status", Map::new());
        assert!(matches!(Telemetry::from_message(msg), Telemetry::Other(_)));

        let payload = json!({"model": "GS400", "serial": "A17", "camera_type": "GSENSE400", "firmware": "1.2"});
        let msg = CommandMessage::new("cam", "camera_info", payload.as_object().unwrap().clone());
        match Telemetry::from_message(msg) {
            Telemetry::CameraInfo(id) => {
                assert_eq!(id.model, "GS400");
                assert_eq!(id.extra["firmware"], "1.2");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
