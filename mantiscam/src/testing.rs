//! Scripted in-memory backend for unit tests.

use crate::client::{CameraClient, ClientOptions};
use crate::health::{HealthBridge, HealthSink, HealthState, DEFAULT_THROTTLE};
use crate::transport::{FrameBody, FrameMessage, Readiness, Transport};
use bytes::Bytes;
use serde_json::{json, Value};
use shared::codec::encode_binary;
use shared::frame::{FrameData, FrameMetadata};
use shared::message::CommandMessage;
use shared::{CameraError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Observable state of the fake backend
#[derive(Debug)]
pub(crate) struct MockBackend {
    pub sent: Vec<CommandMessage>,
    pub send_attempts: usize,
    /// The next N sends fail
    pub failing_sends: usize,
    pub commands: VecDeque<CommandMessage>,
    pub frames: VecDeque<FrameMessage>,
    pub reachable: bool,
    pub fail_connect: bool,
    pub fail_recovery: bool,
    pub connected: bool,
    pub recoveries: usize,
    pub frame_resets: usize,
    pub closes: usize,
    pub polls: usize,
    /// Last exposure the backend received on `cam`
    pub exposure_ms: Option<f64>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            send_attempts: 0,
            failing_sends: 0,
            commands: VecDeque::new(),
            frames: VecDeque::new(),
            reachable: true,
            fail_connect: false,
            fail_recovery: false,
            connected: false,
            recoveries: 0,
            frame_resets: 0,
            closes: 0,
            polls: 0,
            exposure_ms: None,
        }
    }
}

impl MockBackend {
    pub fn sent_named(&self, name: &str) -> Vec<CommandMessage> {
        self.sent.iter().filter(|m| m.name == name).cloned().collect()
    }

    /// Exposure setpoints published on the `cam` topic, in order
    pub fn cam_exposures(&self) -> Vec<f64> {
        self.sent
            .iter()
            .filter(|m| m.is("cam", "exp-00"))
            .filter_map(|m| m.payload["exp-00"].as_f64())
            .collect()
    }
}

type SendHook = Box<dyn FnMut(&CommandMessage, &mut MockBackend)>;
type FrameSource = Box<dyn FnMut(&MockBackend) -> Vec<FrameMessage>>;

/// In-memory [`Transport`]. Like a subscriber socket, every queued command
/// message is readable after a single poll.
pub(crate) struct MockTransport {
    backend: Arc<Mutex<MockBackend>>,
    on_send: Option<SendHook>,
    frame_source: Option<FrameSource>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(Mutex::new(MockBackend::default())),
            on_send: None,
            frame_source: None,
        }
    }

    pub fn backend(&self) -> Arc<Mutex<MockBackend>> {
        Arc::clone(&self.backend)
    }

    /// React to every successfully published command
    pub fn on_send(mut self, hook: impl FnMut(&CommandMessage, &mut MockBackend) + 'static) -> Self {
        self.on_send = Some(Box::new(hook));
        self
    }

    /// Refill the frame queue whenever it runs dry during a poll
    pub fn frame_source(mut self, source: impl FnMut(&MockBackend) -> Vec<FrameMessage> + 'static) -> Self {
        self.frame_source = Some(Box::new(source));
        self
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Result<()> {
        let mut backend = self.backend.lock().unwrap();
        if backend.fail_connect {
            return Err(CameraError::connection_failed("injected connect failure"));
        }
        backend.connected = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut backend = self.backend.lock().unwrap();
        backend.connected = false;
        backend.closes += 1;
    }

    fn is_connected(&self) -> bool {
        self.backend.lock().unwrap().connected
    }

    fn recover_full(&mut self) -> Result<()> {
        let mut backend = self.backend.lock().unwrap();
        backend.recoveries += 1;
        if backend.fail_recovery {
            backend.connected = false;
            return Err(CameraError::connection_failed("injected recovery failure"));
        }
        backend.connected = true;
        Ok(())
    }

    fn reset_frame_socket(&mut self) -> Result<()> {
        let mut backend = self.backend.lock().unwrap();
        backend.frame_resets += 1;
        backend.frames.clear();
        Ok(())
    }

    fn send(&mut self, message: &CommandMessage) -> Result<()> {
        let mut backend = self.backend.lock().unwrap();
        backend.send_attempts += 1;
        if backend.failing_sends > 0 {
            backend.failing_sends -= 1;
            return Err(CameraError::link("injected send failure"));
        }

        backend.sent.push(message.clone());
        if message.is("cam", "exp-00") {
            backend.exposure_ms = message.payload["exp-00"].as_f64();
        }
        if let Some(hook) = self.on_send.as_mut() {
            hook(message, &mut *backend);
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Readiness> {
        let ready = {
            let mut backend = self.backend.lock().unwrap();
            if !backend.connected {
                return Err(CameraError::link("mock transport not connected"));
            }
            backend.polls += 1;
            if backend.frames.is_empty() {
                if let Some(source) = self.frame_source.as_mut() {
                    let frames = source(&*backend);
                    backend.frames.extend(frames);
                }
            }
            Readiness {
                command: !backend.commands.is_empty(),
                frame: !backend.frames.is_empty(),
            }
        };

        if !ready.any() {
            thread::sleep(timeout);
        }
        Ok(ready)
    }

    fn recv_command(&mut self) -> Result<Option<CommandMessage>> {
        Ok(self.backend.lock().unwrap().commands.pop_front())
    }

    fn recv_frame(&mut self) -> Result<Option<FrameMessage>> {
        Ok(self.backend.lock().unwrap().frames.pop_front())
    }

    fn backend_reachable(&self) -> bool {
        self.backend.lock().unwrap().reachable
    }
}

/// Health sink that remembers every delivered event
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    events: Arc<Mutex<Vec<(HealthState, String)>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(HealthState, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<HealthState> {
        self.events().into_iter().map(|(state, _)| state).collect()
    }

    fn push(&self, state: HealthState, detail: &str) {
        self.events.lock().unwrap().push((state, detail.to_string()));
    }
}

impl HealthSink for RecordingSink {
    fn connected(&self, _model: &str, _device_type: &str, _serial: &str, detail: &str) {
        self.push(HealthState::Connected, detail);
    }

    fn warning(&self, _model: &str, _device_type: &str, _serial: &str, detail: &str) {
        self.push(HealthState::Warning, detail);
    }

    fn disconnected(&self, _model: &str, _device_type: &str, _serial: &str, detail: &str) {
        self.push(HealthState::Disconnected, detail);
    }
}

/// Options with the pacing delays removed and nothing sent on connect
pub(crate) fn test_options() -> ClientOptions {
    ClientOptions {
        send_defaults_on_connect: false,
        command_delay: Duration::ZERO,
        send_retry_delay: Duration::from_millis(1),
        exposure_timeout: Duration::from_millis(500),
        frame_timeout: Duration::from_millis(500),
        catalog_timeout: Duration::from_millis(200),
        ..ClientOptions::default()
    }
}

pub(crate) fn connect_client(
    mock: MockTransport,
    sink: &RecordingSink,
    options: ClientOptions,
) -> CameraClient<MockTransport> {
    let bridge = HealthBridge::new(sink.clone(), DEFAULT_THROTTLE);
    CameraClient::connect(mock, bridge, options).unwrap()
}

pub(crate) fn command(topic: &str, name: &str, payload: Value) -> CommandMessage {
    let payload = payload.as_object().cloned().unwrap_or_default();
    CommandMessage::new(topic, name, payload)
}

fn frame(metadata: Value, pixels: &FrameData) -> FrameMessage {
    FrameMessage {
        topic: "vid".to_string(),
        metadata: FrameMetadata::new(metadata.as_object().cloned().unwrap_or_default()),
        body: FrameBody::Inline(Bytes::from(encode_binary(pixels).unwrap())),
    }
}

/// Raw frame echoing `exposure_ms`
pub(crate) fn raw_frame(exposure_ms: f64) -> FrameMessage {
    let pixels = FrameData::from_u16(vec![2, 2], &[100; 4]).unwrap();
    frame(json!({"frame_name": "Raw", "frame_meta": {"int-set": exposure_ms}}), &pixels)
}

/// Processed frame carrying a precomputed mean
pub(crate) fn processed_frame(name: &str, mean: f64) -> FrameMessage {
    let pixels = FrameData::from_u16(vec![2, 2], &[0; 4]).unwrap();
    frame(json!({"frame_name": name, "statistics": {"mean": mean}}), &pixels)
}

/// Processed frame without statistics; the mean comes from the pixels
pub(crate) fn processed_pixels(name: &str, pixels: &FrameData, extra: Value) -> FrameMessage {
    let mut metadata = json!({"frame_name": name});
    if let (Some(target), Some(source)) = (metadata.as_object_mut(), extra.as_object()) {
        target.extend(source.clone());
    }
    frame(metadata, pixels)
}
