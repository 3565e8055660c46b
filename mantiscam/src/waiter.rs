/*!
Deadline-driven polling of the command and frame endpoints.

Every wait in the client is built from [`CameraClient::pump_once`]: one poll of
at most one step, a bounded drain of the command channel into the cached state,
then at most one frame message handed back to the caller. State waits check
their condition after every applied message, so a transient value (a short
recording reported on and off in one burst) is never drained past.
*/

use crate::client::{CameraClient, ClientState, LinkOutcome};
use crate::transport::{FrameMessage, Transport};
use shared::frame::{FrameData, FrameMetadata};
use shared::{CameraError, Result};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Upper bound of command messages applied per poll
const MAX_COMMANDS_PER_PUMP: usize = 64;

impl<T: Transport> CameraClient<T> {
    /// Step size bounded by what is left until `deadline`
    fn step_until(&self, deadline: Instant) -> Duration {
        deadline.saturating_duration_since(Instant::now()).min(self.options.poll_step)
    }

    /// Escalate a transport failure; only a recovered link lets the caller go on
    fn escalate(&mut self, detail: String) -> Result<()> {
        match self.handle_link_issue(&detail) {
            LinkOutcome::Recovered => Ok(()),
            LinkOutcome::Unreachable | LinkOutcome::RecoveryFailed => Err(CameraError::link(detail)),
        }
    }

    /// Apply up to `max` queued command-channel messages, stopping early once
    /// `stop` holds for the cached state. Returns how many were applied.
    pub fn drain_commands(&mut self, max: usize, mut stop: impl FnMut(&ClientState) -> bool) -> Result<usize> {
        let mut applied = 0;
        while applied < max {
            match self.transport.recv_command()? {
                Some(message) => {
                    self.apply_telemetry(message);
                    applied += 1;
                    if stop(&self.state) {
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(applied)
    }

    /// Poll once for at most `step`. Telemetry is applied to the cached state;
    /// a ready frame message is returned undecoded.
    pub fn pump_once(&mut self, step: Duration) -> Result<Option<FrameMessage>> {
        self.pump_until(step, |_| false)
    }

    fn pump_until(&mut self, step: Duration, stop: impl FnMut(&ClientState) -> bool) -> Result<Option<FrameMessage>> {
        let ready = match self.transport.poll(step) {
            Ok(ready) => ready,
            Err(e) => {
                self.escalate(format!("poll failed: {}", e))?;
                return Ok(None);
            }
        };

        if ready.command {
            if let Err(e) = self.drain_commands(MAX_COMMANDS_PER_PUMP, stop) {
                self.escalate(format!("command receive failed: {}", e))?;
                return Ok(None);
            }
        }

        if !ready.frame {
            return Ok(None);
        }

        let message = match self.transport.recv_frame() {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.escalate(format!("frame receive failed: {}", e))?;
                return Ok(None);
            }
        };

        if message.metadata.is_raw() {
            if let Some(exposure) = message.metadata.exposure_setpoint_ms() {
                self.state.last_received_exp_ms = Some(exposure);
            }
        } else if let Some(name) = message.metadata.frame_name() {
            if !self.state.observed_frame_names.contains(name) {
                debug!("New processed frame name '{}'", name);
                self.state.observed_frame_names.insert(name.to_string());
            }
        }

        Ok(Some(message))
    }

    /// Drop every queued frame by recreating the frame endpoint
    pub fn discard_frame_backlog(&mut self) -> Result<()> {
        if let Err(e) = self.transport.reset_frame_socket() {
            self.escalate(format!("frame socket reset failed: {}", e))?;
        }
        Ok(())
    }

    /// Pump until `done` holds for the cached state or `timeout` passes.
    /// Frames received meanwhile are discarded.
    pub fn wait_for_state(&mut self, timeout: Duration, mut done: impl FnMut(&ClientState) -> bool) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.state) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            let step = self.step_until(deadline);
            self.pump_until(step, &mut done)?;
        }
    }

    /// First decodable frame passing the filters: `require_raw` selects the raw
    /// (`Some(true)`) or processed (`Some(false)`) plane, `frame_name` a single
    /// processed channel.
    pub fn wait_for_frame(
        &mut self,
        require_raw: Option<bool>,
        frame_name: Option<&str>,
        timeout: Duration,
    ) -> Result<(FrameData, FrameMetadata)> {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            let step = self.step_until(deadline);
            let Some(message) = self.pump_once(step)? else {
                continue;
            };

            let metadata = message.metadata;
            let is_raw = metadata.is_raw();
            if require_raw.is_some_and(|raw| raw != is_raw) {
                continue;
            }
            if frame_name.is_some_and(|wanted| metadata.frame_name() != Some(wanted)) {
                continue;
            }

            let Some(frame) = self.decoder.decode(&metadata, &message.body) else {
                trace!("Frame '{}' not decodable yet", metadata.frame_name().unwrap_or("?"));
                continue;
            };

            if is_raw {
                self.state.last_raw_metadata = Some(metadata.clone());
            } else if let Some(name) = metadata.frame_name() {
                self.state
                    .last_processed_metadata
                    .insert(name.to_string(), metadata.clone());
            }
            return Ok((frame, metadata));
        }

        let detail = match frame_name {
            Some(name) => format!("no '{}' frame within {:?}", name, timeout),
            None => format!("no frame within {:?}", timeout),
        };
        self.handle_link_issue(&detail);
        Err(CameraError::timeout(detail))
    }

    /// Distinct processed frame names, sorted. Stops early once no new name has
    /// appeared for `settle`.
    pub fn isp_frame_names(&mut self, timeout: Duration, settle: Duration, reset_socket: bool) -> Result<Vec<String>> {
        if reset_socket {
            self.discard_frame_backlog()?;
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let mut names = BTreeSet::new();
        let mut last_new: Option<Instant> = None;

        while Instant::now() < deadline {
            if last_new.is_some_and(|t| t.elapsed() >= settle) {
                break;
            }

            let step = self.step_until(deadline);
            let Some(message) = self.pump_once(step)? else {
                continue;
            };
            if message.metadata.is_raw() {
                continue;
            }
            if let Some(name) = message.metadata.frame_name() {
                if names.insert(name.to_string()) {
                    last_new = Some(Instant::now());
                }
            }
        }

        let names: Vec<String> = names.into_iter().collect();
        info!("🔎 Discovered {} processed frame names in {:?}: {:?}", names.len(), started.elapsed(), names);
        Ok(names)
    }
}
