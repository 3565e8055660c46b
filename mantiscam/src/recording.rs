/*!
Recording lifecycle.

```text
n_frames:    Idle -> Starting -> Recording -> Idle
until_stop:  Idle -> Starting -> Recording -> Stopping -> Idle
```

The backend's `file`/`recording_status` telemetry is the only source of truth
for whether a recording runs; phases only track what this client asked for.
*/

use crate::client::CameraClient;
use crate::transport::Transport;
use shared::message::{Command, StopCondition};
use shared::{CameraError, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Frames per file of an until-stop recording when the caller gives none
pub const DEFAULT_FRAMES_PER_FILE: u32 = 1000;

/// Client-side recording phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingPhase {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
}

/// How a recording ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    /// Fixed frame budget, ended by the backend
    NFrames,
    /// Runs until [`CameraClient::stop_recording`]
    UntilStop,
}

impl FromStr for RecordingMode {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "n_frames" => Ok(RecordingMode::NFrames),
            "until_stop" => Ok(RecordingMode::UntilStop),
            other => Err(CameraError::invalid_argument(format!(
                "unsupported recording mode '{}' (expected n_frames or until_stop)",
                other
            ))),
        }
    }
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordingMode::NFrames => "n_frames",
            RecordingMode::UntilStop => "until_stop",
        })
    }
}

/// Upper bound for an n-frames recording to finish
pub fn completion_timeout(target_exposure_ms: f64, frame_budget: u32) -> Duration {
    let seconds = (target_exposure_ms * frame_budget as f64 / 500.0 + 20.0).max(20.0);
    Duration::from_secs_f64(seconds)
}

impl<T: Transport> CameraClient<T> {
    pub fn recording_phase(&self) -> RecordingPhase {
        self.state.recording_phase
    }

    /// Wait until the backend reports `recording`
    pub fn wait_recording_state(&mut self, recording: bool, timeout: Duration) -> Result<bool> {
        self.wait_for_state(timeout, |state| state.is_recording == recording)
    }

    /// Link issue, then either a timeout error or `Ok(false)`
    fn recording_timeout(&mut self, detail: String, strict: bool) -> Result<bool> {
        self.handle_link_issue(&detail);
        if strict {
            Err(CameraError::timeout(detail))
        } else {
            warn!("⚠️ {}", detail);
            Ok(false)
        }
    }

    /// Start a recording. `mode` is `n_frames` or `until_stop`; with
    /// `wait_until_done` an n-frames recording blocks until the backend
    /// reports it finished.
    pub fn start_recording(
        &mut self,
        mode: &str,
        n_frames: u32,
        frames_per_file: Option<u32>,
        wait_until_done: bool,
        strict: bool,
    ) -> Result<bool> {
        let mode: RecordingMode = mode.parse()?;
        let (budget, stop_condition) = match mode {
            RecordingMode::NFrames if n_frames == 0 => {
                return Err(CameraError::invalid_argument("n_frames recording needs at least one frame"));
            }
            RecordingMode::NFrames => (n_frames, StopCondition::FrameCount(n_frames)),
            RecordingMode::UntilStop => (0, StopCondition::Manual),
        };
        let frames_per_file = frames_per_file
            .unwrap_or(match mode {
                RecordingMode::NFrames => n_frames,
                RecordingMode::UntilStop => DEFAULT_FRAMES_PER_FILE,
            })
            .max(1);

        if self.state.is_recording {
            warn!("⚠️ Backend already reports an active recording");
        }

        info!("🎬 Starting {} recording ({} frames, {} per file)", mode, budget, frames_per_file);
        self.state.recording_phase = RecordingPhase::Starting;

        let sent = self
            .set_frames_per_file(frames_per_file)
            .and_then(|_| self.send(&Command::StopCondition(stop_condition)))
            .and_then(|_| self.send(&Command::Record(true)));
        if let Err(e) = sent {
            self.state.recording_phase = RecordingPhase::Idle;
            return Err(e);
        }

        let start_timeout = self.options.record_start_timeout;
        if !self.wait_recording_state(true, start_timeout)? {
            self.state.recording_phase = RecordingPhase::Idle;
            return self.recording_timeout(format!("recording did not start within {:?}", start_timeout), strict);
        }
        self.state.recording_phase = RecordingPhase::Recording;
        info!("🔴 Recording started");

        if !(wait_until_done && mode == RecordingMode::NFrames) {
            return Ok(true);
        }

        let done_timeout = completion_timeout(self.state.target_exposure_ms, budget);
        if !self.wait_recording_state(false, done_timeout)? {
            return self.recording_timeout(
                format!("recording of {} frames did not finish within {:?}", budget, done_timeout),
                strict,
            );
        }
        self.state.recording_phase = RecordingPhase::Idle;
        info!("✅ Recording of {} frames finished", budget);
        Ok(true)
    }

    /// Send `record=false` and wait for the backend to confirm
    pub fn stop_recording(&mut self, timeout: Duration, strict: bool) -> Result<bool> {
        if self.state.recording_phase == RecordingPhase::Recording {
            self.state.recording_phase = RecordingPhase::Stopping;
        }

        self.send(&Command::Record(false))?;
        if !self.wait_recording_state(false, timeout)? {
            return self.recording_timeout(format!("recording did not stop within {:?}", timeout), strict);
        }

        self.state.recording_phase = RecordingPhase::Idle;
        info!("⏹️ Recording stopped");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{command, connect_client, test_options, MockBackend, MockTransport, RecordingSink};
    use serde_json::json;
    use shared::message::CommandMessage;
    use std::time::Instant;

    /// Backend that reports recording on `record=true`; with `finish` it also
    /// reports the end of the recording right after
    fn recorder(finish: bool) -> MockTransport {
        MockTransport::new().on_send(move |message: &CommandMessage, backend: &mut MockBackend| {
            if !message.is("file", "record") {
                return;
            }
            let on = message.payload["record"].as_bool().unwrap_or(false);
            backend
                .commands
                .push_back(command("file", "recording_status", json!({ "recording": on })));
            if on && finish {
                backend
                    .commands
                    .push_back(command("file", "recording_status", json!({ "recording": false })));
            }
        })
    }

    #[test]
    fn test_completion_timeout() {
        assert_eq!(completion_timeout(50.0, 10), Duration::from_secs(21));
        assert_eq!(completion_timeout(0.0, 1), Duration::from_secs(20));
        assert_eq!(completion_timeout(-5000.0, 10), Duration::from_secs(20));
        assert_eq!(completion_timeout(100.0, 1000), Duration::from_secs(220));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("n_frames".parse::<RecordingMode>().unwrap(), RecordingMode::NFrames);
        assert_eq!(RecordingMode::UntilStop.to_string(), "until_stop");
        assert!("forever".parse::<RecordingMode>().is_err());
    }

    #[test]
    fn test_unknown_mode_is_rejected_before_sending() {
        let mock = MockTransport::new();
        let backend = mock.backend();
        let sink = RecordingSink::default();
        let mut client = connect_client(mock, &sink, test_options());

        let err = client.start_recording("forever", 10, None, true, true).unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument(_)));
        let err = client.start_recording("n_frames", 0, None, true, true).unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument(_)));
        assert_eq!(backend.lock().unwrap().send_attempts, 0);
        assert_eq!(client.recording_phase(), RecordingPhase::Idle);
    }

    #[test]
    fn test_start_timeout_is_bounded_by_start_window() {
        let mock = MockTransport::new();
        let sink = RecordingSink::default();
        let mut client = connect_client(mock, &sink, test_options());

        let started = Instant::now();
        let err = client.start_recording("n_frames", 10, None, true, true).unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6));
        assert_eq!(client.recording_phase(), RecordingPhase::Idle);
    }

    #[test]
    fn test_n_frames_recording_runs_to_completion() {
        let mock = recorder(true);
        let backend = mock.backend();
        let sink = RecordingSink::default();
        let mut client = connect_client(mock, &sink, test_options());

        assert!(client.start_recording("n_frames", 10, None, true, true).unwrap());
        assert_eq!(client.recording_phase(), RecordingPhase::Idle);
        assert!(!client.is_recording());

        let backend = backend.lock().unwrap();
        let names: Vec<_> = backend.sent.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["frames_per_file", "stop_condition", "record"]);
        assert_eq!(backend.sent[0].payload["frames_per_file"], 10);
        assert_eq!(backend.sent[1].payload["stop_condition"], "Frame Count");
        assert_eq!(backend.sent[1].payload["n_frames"], 10);
        assert_eq!(backend.sent[2].payload["record"], true);
    }

    #[test]
    fn test_short_recording_reported_in_one_burst_still_starts() {
        // Backend reports start and end before the client polls again
        let mock = recorder(true);
        let backend = mock.backend();
        let sink = RecordingSink::default();
        let mut client = connect_client(mock, &sink, test_options());

        let started = Instant::now();
        assert!(client.start_recording("n_frames", 10, None, false, true).unwrap());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.recording_phase(), RecordingPhase::Recording);
        assert_eq!(backend.lock().unwrap().recoveries, 0);

        assert!(client.wait_recording_state(false, Duration::from_millis(200)).unwrap());
    }

    #[test]
    fn test_until_stop_recording_and_stop() {
        let mock = recorder(false);
        let backend = mock.backend();
        let sink = RecordingSink::default();
        let mut client = connect_client(mock, &sink, test_options());

        assert!(client.start_recording("until_stop", 0, Some(500), true, true).unwrap());
        assert_eq!(client.recording_phase(), RecordingPhase::Recording);
        assert!(client.is_recording());

        assert!(client.stop_recording(Duration::from_secs(1), true).unwrap());
        assert_eq!(client.recording_phase(), RecordingPhase::Idle);

        let backend = backend.lock().unwrap();
        assert_eq!(backend.sent[0].payload["frames_per_file"], 500);
        assert_eq!(backend.sent[1].payload["stop_condition"], "Manual Stop");
        assert!(backend.sent[1].payload.get("n_frames").is_none());
        assert_eq!(backend.sent_named("record").len(), 2);
    }

    #[test]
    fn test_lenient_stop_timeout() {
        let mock = MockTransport::new();
        let sink = RecordingSink::default();
        let mut client = connect_client(mock, &sink, test_options());
        client.apply_telemetry(command("file", "recording_status", json!({"recording": true})));

        assert!(!client.stop_recording(Duration::from_millis(80), false).unwrap());
        assert!(client.is_recording());
    }
}
