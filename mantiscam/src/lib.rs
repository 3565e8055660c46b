/*!
# MantisCam Control Client

Client for a separately running MantisCam camera backend. It publishes
commands over a ZeroMQ command channel, follows the backend's telemetry and
frame streams, and builds exposure control, auto-exposure and recording on
top of them while the backend may stall, drop messages or vanish.

## Modules

- [`transport`] - ZeroMQ endpoints, poller and reachability probe behind the [`Transport`] trait
- [`decoder`] - Shared-memory and inline frame decoding
- [`client`] - [`CameraClient`], its cached state and the link-issue handler
- [`dispatcher`] - Command publication with bounded retries
- [`waiter`] - Deadline-driven frame and telemetry waits
- [`exposure`] - Verified exposure setpoints and auto-exposure
- [`recording`] - Recording state machine
- [`nodes`] - Hardware node catalog
- [`health`] - Throttled health reports to the device registry
- [`config`] - TOML application configuration

## Example

```no_run
use mantiscam::{CameraClient, ClientOptions, Endpoints, HealthBridge, TracingHealthSink, ZmqTransport};

# fn main() -> shared::Result<()> {
let transport = ZmqTransport::new(Endpoints::default());
let health = HealthBridge::new(TracingHealthSink, mantiscam::health::DEFAULT_THROTTLE);
let mut camera = CameraClient::connect(transport, health, ClientOptions::default())?;

camera.set_exposure(20.0, true, None)?;
camera.start_recording("n_frames", 100, None, true, true)?;
# Ok(())
# }
```
*/

pub mod client;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod exposure;
pub mod health;
pub mod nodes;
pub mod recording;
pub mod transport;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{CameraClient, ClientOptions, ClientState, LinkOutcome};
pub use config::AppConfig;
pub use decoder::FrameDecoder;
pub use exposure::AutoExposureParams;
pub use health::{HealthBridge, HealthEvent, HealthSink, HealthState, MonitorIdentity, TracingHealthSink};
pub use nodes::NodeCatalog;
pub use recording::{RecordingMode, RecordingPhase};
pub use transport::{Endpoints, FrameBody, FrameMessage, Readiness, Transport, ZmqTransport};
