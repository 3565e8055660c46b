/*!
Camera control client.

[`CameraClient`] owns the transport, the health bridge handle and every piece
of cached camera state from connect until close. The individual operations
live next to their concerns (`dispatcher`, `waiter`, `exposure`, `recording`,
`nodes`); this module holds the shared state, telemetry bookkeeping and the
single link-issue handler they all escalate to.
*/

use crate::decoder::FrameDecoder;
use crate::health::{HealthBridge, MonitorIdentity};
use crate::nodes::NodeCatalog;
use crate::recording::RecordingPhase;
use crate::transport::Transport;
use shared::frame::FrameMetadata;
use shared::message::{Command, CommandMessage, ExposureConsumer, FileNaming, Telemetry};
use shared::node::CameraIdentity;
use shared::shm::DEFAULT_SHM_ROOT;
use shared::Result;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Sensor family marker of cameras that do not echo exposure in frame metadata
pub const DEFAULT_SAFEGUARD_MARKER: &str = "gsense";

/// Runtime options of a client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Serial used for health reports until the backend reports one
    pub device_sn: String,
    pub shm_root: PathBuf,
    pub initial_exposure_ms: f64,
    /// Send the initial exposure and timestamp file naming on connect
    pub send_defaults_on_connect: bool,
    pub safeguard_marker: String,
    /// Overrides identity-based safeguard detection when set
    pub force_safeguard: Option<bool>,
    pub poll_step: Duration,
    /// Pause after every published command
    pub command_delay: Duration,
    pub send_retry_delay: Duration,
    pub exposure_timeout: Duration,
    pub frame_timeout: Duration,
    pub record_start_timeout: Duration,
    pub catalog_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            device_sn: String::new(),
            shm_root: PathBuf::from(DEFAULT_SHM_ROOT),
            initial_exposure_ms: 50.0,
            send_defaults_on_connect: true,
            safeguard_marker: DEFAULT_SAFEGUARD_MARKER.to_string(),
            force_safeguard: None,
            poll_step: Duration::from_millis(25),
            command_delay: Duration::from_millis(10),
            send_retry_delay: Duration::from_millis(50),
            exposure_timeout: Duration::from_secs(10),
            frame_timeout: Duration::from_secs(5),
            record_start_timeout: Duration::from_secs(5),
            catalog_timeout: Duration::from_secs(2),
        }
    }
}

/// Cached camera state, owned by one client
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    /// Last requested setpoint
    pub target_exposure_ms: f64,
    /// Last confirmed setpoint
    pub current_exposure_ms: f64,
    /// Last `int-set` echoed on the raw channel
    pub last_received_exp_ms: Option<f64>,
    pub is_recording: bool,
    pub recording_phase: RecordingPhase,
    pub identity: Option<CameraIdentity>,
    pub has_gain: bool,
    pub has_cooling: bool,
    pub catalog: Option<NodeCatalog>,
    /// Bumped whenever the backend publishes a catalog
    pub catalog_generation: u64,
    pub last_raw_metadata: Option<FrameMetadata>,
    pub last_processed_metadata: HashMap<String, FrameMetadata>,
    pub observed_frame_names: BTreeSet<String>,
    pub(crate) monitor_identity: Option<MonitorIdentity>,
}

/// Result of the link-issue handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Backend reachable and transport rebuilt
    Recovered,
    /// Backend ports refuse connections, no recovery attempted
    Unreachable,
    /// Backend reachable but the transport could not be rebuilt
    RecoveryFailed,
}

/// Control client for one camera backend
pub struct CameraClient<T: Transport> {
    pub(crate) transport: T,
    pub(crate) health: HealthBridge,
    pub(crate) options: ClientOptions,
    pub(crate) decoder: FrameDecoder,
    pub(crate) state: ClientState,
    closed: bool,
}

impl<T: Transport> CameraClient<T> {
    /// Connect the transport and take ownership of it until [`CameraClient::close`]
    /// or drop
    pub fn connect(transport: T, health: HealthBridge, options: ClientOptions) -> Result<Self> {
        let decoder = FrameDecoder::new(options.shm_root.clone());
        let state = ClientState {
            target_exposure_ms: options.initial_exposure_ms,
            current_exposure_ms: options.initial_exposure_ms,
            ..ClientState::default()
        };

        let mut client = Self {
            transport,
            health,
            options,
            decoder,
            state,
            closed: false,
        };

        info!("🔌 Connecting to camera backend...");
        if let Err(e) = client.transport.connect() {
            let identity = client.monitor_identity();
            client.health.disconnected(&identity, &format!("connect failed: {}", e));
            return Err(e);
        }

        let identity = client.monitor_identity();
        client.health.connected(&identity, "connected", true);

        if client.options.send_defaults_on_connect {
            let exposure = client.options.initial_exposure_ms;
            client.send(&Command::Exposure { consumer: ExposureConsumer::Camera, ms: exposure })?;
            client.send(&Command::Exposure { consumer: ExposureConsumer::Widget, ms: exposure })?;
            client.set_file_name(FileNaming::Timestamp)?;
        }

        info!("✅ Camera backend connected");
        Ok(client)
    }

    /// Release every socket. Idempotent; also run on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.close();
        info!("🛑 Camera client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn health(&self) -> &HealthBridge {
        &self.health
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn current_exposure_ms(&self) -> f64 {
        self.state.current_exposure_ms
    }

    pub fn is_recording(&self) -> bool {
        self.state.is_recording
    }

    pub fn camera_identity(&self) -> Option<&CameraIdentity> {
        self.state.identity.as_ref()
    }

    /// Registry identity, derived lazily and cached until the camera identity changes
    pub fn monitor_identity(&mut self) -> MonitorIdentity {
        if let Some(cached) = &self.state.monitor_identity {
            return cached.clone();
        }

        let identity = self.state.identity.clone().unwrap_or_default();
        let model = if identity.model.is_empty() { "MantisCam".to_string() } else { identity.model };
        let device_type = if identity.camera_type.is_empty() {
            "Camera".to_string()
        } else {
            format!("Camera ({})", identity.camera_type)
        };
        let serial_number = if !identity.serial.is_empty() {
            identity.serial
        } else if !self.options.device_sn.is_empty() {
            self.options.device_sn.clone()
        } else {
            "unknown".to_string()
        };

        let monitor = MonitorIdentity { model, device_type, serial_number };
        self.state.monitor_identity = Some(monitor.clone());
        monitor
    }

    /// Apply one command-channel message to the cached state
    pub(crate) fn apply_telemetry(&mut self, message: CommandMessage) {
        match Telemetry::from_message(message) {
            Telemetry::RecordingStatus { recording } => {
                if recording != self.state.is_recording {
                    info!("🎬 Backend recording status: {}", if recording { "recording" } else { "idle" });
                }
                self.state.is_recording = recording;
                if !recording
                    && matches!(self.state.recording_phase, RecordingPhase::Recording | RecordingPhase::Stopping)
                {
                    self.state.recording_phase = RecordingPhase::Idle;
                }
            }
            Telemetry::CameraInfo(identity) => {
                let changed = self
                    .state
                    .identity
                    .as_ref()
                    .map_or(true, |known| !known.same_device(&identity));
                self.state.has_gain |= identity.has_gain;
                self.state.has_cooling |= identity.has_cooling;
                self.state.identity = Some(identity);

                if changed {
                    self.state.monitor_identity = None;
                    let monitor = self.monitor_identity();
                    info!(
                        "📷 Camera identity: {} {} [{}]",
                        monitor.device_type, monitor.model, monitor.serial_number
                    );
                    self.health.connected(&monitor, "camera identity updated", true);
                }
            }
            Telemetry::HardwareNodes(nodes) => {
                debug!("Received hardware node catalog with {} nodes", nodes.len());
                let catalog = NodeCatalog::from_backend(nodes);
                self.state.has_gain |= catalog.has_gain();
                self.state.has_cooling |= catalog.has_cooling();
                self.state.catalog = Some(catalog);
                self.state.catalog_generation += 1;
            }
            Telemetry::Other(message) => {
                trace!("Ignoring {}/{} message", message.topic, message.name);
            }
        }
    }

    /// Drop telemetry that may be stale after the transport was rebuilt
    fn reset_transient_state(&mut self) {
        self.state.last_received_exp_ms = None;
        self.state.last_raw_metadata = None;
        self.state.last_processed_metadata.clear();
    }

    /// Warn, probe the backend, then recover or declare it disconnected
    pub(crate) fn handle_link_issue(&mut self, detail: &str) -> LinkOutcome {
        let identity = self.monitor_identity();
        warn!("⚠️ Link issue: {}", detail);
        self.health.warning(&identity, detail, false);

        if !self.transport.backend_reachable() {
            error!("❌ Camera backend unreachable");
            self.health.disconnected(&identity, &format!("backend unreachable: {}", detail));
            return LinkOutcome::Unreachable;
        }

        match self.transport.recover_full() {
            Ok(()) => {
                self.reset_transient_state();
                info!("🔄 Transport recovered");
                self.health.connected(&identity, "link recovered", true);
                LinkOutcome::Recovered
            }
            Err(e) => {
                error!("❌ Transport recovery failed: {}", e);
                self.health.disconnected(&identity, &format!("recovery failed: {}", e));
                LinkOutcome::RecoveryFailed
            }
        }
    }
}

impl<T: Transport> Drop for CameraClient<T> {
    fn drop(&mut self) {
        self.close();
    }
}
