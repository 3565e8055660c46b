/*!
# Shared Types and Utilities

This crate contains the wire-level types shared by the MantisCam control
components: command messages, frame metadata, decoded pixel arrays and the
common error type.

## Core Types

- [`Command`] - Typed outbound command with its fixed topic and name
- [`CommandMessage`] - Raw `(topic, name, payload)` triple as seen on the wire
- [`Telemetry`] - Parsed inbound command-channel message
- [`FrameMetadata`] - Metadata mapping attached to every frame message
- [`FrameData`] - Owned, decoded pixel array

## Modules

- [`message`] - Command vocabulary and telemetry parsing
- [`node`] - Hardware node and camera identity descriptions
- [`frame`] - Frame metadata, dtypes and pixel statistics
- [`codec`] - Inline frame payload decoders
- [`shm`] - Shared-memory frame references
- [`error`] - Common error types
*/

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod node;
pub mod shm;

// Re-export commonly used types
pub use codec::{ArrayEnvelope, InlineDecoder};
pub use error::{CameraError, Result};
pub use frame::{Dtype, FrameData, FrameMetadata, FrameStatistics};
pub use message::{Command, CommandMessage, FileNaming, FolderNaming, Payload, StopCondition, Telemetry};
pub use node::{CameraIdentity, HardwareNode, NodeKind};
pub use shm::ShmRef;

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Command topic consumed by the camera hardware driver
    pub const TOPIC_CAM: &str = "cam";

    /// Command topic consumed by the backend's display widgets
    pub const TOPIC_WIDGET: &str = "widget";

    /// Command topic consumed by the file saving process
    pub const TOPIC_FILE: &str = "file";

    /// Exposure setpoint command name (payload key is the same)
    pub const EXPOSURE_COMMAND: &str = "exp-00";

    /// `frame_name` value of the unprocessed sensor plane
    pub const RAW_FRAME_NAME: &str = "Raw";

    /// Metadata key holding a shared-memory reference instead of an inline body
    pub const SHM_METADATA_KEY: &str = "shm";

    /// Default local backend ports (command pub, command sub, frame sub)
    pub const DEFAULT_CMD_PUB_PORT: u16 = 60000;
    pub const DEFAULT_CMD_SUB_PORT: u16 = 60001;
    pub const DEFAULT_FRAME_SUB_PORT: u16 = 60011;
}
