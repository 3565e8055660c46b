/*!
Outbound command dispatch.

Every command the client publishes goes through [`CameraClient::send`], so its
retry contract is the single point governing outbound reliability: three
attempts, transport recovery between them, and health reports for each
failure and recovery.
*/

use crate::client::CameraClient;
use crate::transport::Transport;
use shared::message::{Command, CommandMessage, FileNaming, FolderNaming};
use shared::{CameraError, Result};
use std::thread;
use tracing::{error, info, trace, warn};

/// Attempts made before a command is declared undeliverable
pub const SEND_ATTEMPTS: u32 = 3;

impl<T: Transport> CameraClient<T> {
    /// Publish a typed command
    pub fn send(&mut self, command: &Command) -> Result<()> {
        self.send_message(&command.to_message())
    }

    /// Publish a raw `(topic, name, payload)` triple with bounded retries
    pub fn send_message(&mut self, message: &CommandMessage) -> Result<()> {
        trace!("Sending t:n:m={}:{}:{:?}", message.topic, message.name, message.payload);

        let mut last_error = None;
        for attempt in 1..=SEND_ATTEMPTS {
            match self.transport.send(message) {
                Ok(()) => {
                    if attempt > 1 {
                        info!("✅ {}/{} delivered on attempt {}", message.topic, message.name, attempt);
                    }
                    if !self.options.command_delay.is_zero() {
                        thread::sleep(self.options.command_delay);
                    }
                    return Ok(());
                }
                Err(e) => {
                    let detail = format!(
                        "send {}/{} failed (attempt {}/{}): {}",
                        message.topic, message.name, attempt, SEND_ATTEMPTS, e
                    );
                    warn!("⚠️ {}", detail);
                    let identity = self.monitor_identity();
                    self.health.warning(&identity, &detail, false);
                    last_error = Some(e);

                    if attempt < SEND_ATTEMPTS {
                        thread::sleep(self.options.send_retry_delay);
                        match self.transport.recover_full() {
                            Ok(()) => {
                                self.health.connected(&identity, "command channel recovered", true);
                            }
                            Err(e) => warn!("⚠️ Command channel recovery failed: {}", e),
                        }
                    }
                }
            }
        }

        let message_text = format!(
            "could not deliver {}/{} after {} attempts",
            message.topic, message.name, SEND_ATTEMPTS
        );
        error!("❌ {}", message_text);
        let identity = self.monitor_identity();
        self.health.disconnected(&identity, &message_text);

        Err(match last_error {
            Some(e) => CameraError::operation_caused_by(message_text, e),
            None => CameraError::operation(message_text),
        })
    }

    /// Directory the backend's file saving process writes into
    pub fn set_save_dir(&mut self, dir: &str) -> Result<()> {
        self.send(&Command::SaveDir(dir.to_string()))?;
        info!("📁 Camera save directory set to {}", dir);
        Ok(())
    }

    pub fn set_file_name(&mut self, naming: FileNaming) -> Result<()> {
        match &naming {
            FileNaming::Timestamp => info!("📝 Camera recording filename set to timestamp-only mode"),
            FileNaming::Custom(name) => info!("📝 Camera recording filename set to {}", name),
        }
        self.send(&Command::FileName(naming))
    }

    pub fn set_folder_name(&mut self, naming: FolderNaming) -> Result<()> {
        match &naming {
            FolderNaming::Timestamp => info!("📁 Camera recording folder set to timestamp-only mode"),
            FolderNaming::Custom(name) => info!("📁 Camera recording folder set to {}", name),
            FolderNaming::NoNewFolder => info!("📁 Recordings go straight into the save directory"),
        }
        self.send(&Command::FolderName(naming))
    }

    pub fn set_frames_per_file(&mut self, frames: u32) -> Result<()> {
        self.send(&Command::FramesPerFile(frames))
    }
}
