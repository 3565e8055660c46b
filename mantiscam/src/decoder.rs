//! Turns received frame messages into owned pixel arrays.

use crate::transport::FrameBody;
use shared::codec::{decode_inline, default_decoders, InlineDecoder};
use shared::frame::{FrameData, FrameMetadata};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Frame decoder for both delivery paths. Shared-memory references win over
/// inline bodies; any failure yields `None` and never an error.
pub struct FrameDecoder {
    shm_root: PathBuf,
    inline: Vec<Box<dyn InlineDecoder>>,
}

impl FrameDecoder {
    pub fn new(shm_root: impl Into<PathBuf>) -> Self {
        Self {
            shm_root: shm_root.into(),
            inline: default_decoders(),
        }
    }

    /// Replace the ordered list of inline formats
    pub fn with_decoders(mut self, decoders: Vec<Box<dyn InlineDecoder>>) -> Self {
        self.inline = decoders;
        self
    }

    pub fn shm_root(&self) -> &Path {
        &self.shm_root
    }

    pub fn decode(&self, metadata: &FrameMetadata, body: &FrameBody) -> Option<FrameData> {
        let frame_name = metadata.frame_name().unwrap_or("?");
        match body {
            FrameBody::Shared(reference) => match reference.copy_frame(&self.shm_root) {
                Ok(Some(frame)) => Some(frame),
                Ok(None) => {
                    debug!("Shared frame '{}' ({}) already released", frame_name, reference.name);
                    None
                }
                Err(e) => {
                    warn!("⚠️ Bad shared-memory reference on frame '{}': {}", frame_name, e);
                    None
                }
            },
            FrameBody::Inline(bytes) if bytes.is_empty() => {
                debug!("Frame '{}' carried no body", frame_name);
                None
            }
            FrameBody::Inline(bytes) => decode_inline(&self.inline, bytes),
        }
    }
}
