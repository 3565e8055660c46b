/*!
Exposure control.

Setpoints go to both exposure consumers (hardware driver and display widget)
and are confirmed from the `int-set` echo on the raw frame channel. Sensors of
the safeguard family do not echo reliably; for them a timing guard replaces
verification.

Auto-exposure is a proportional controller on a frame-mean metric:

```text
next = current_exp * (target - black) / (mean - black)
```

with a fixed back-off near saturation and clamping to the caller's bounds.
*/

use crate::client::CameraClient;
use crate::transport::Transport;
use shared::frame::{FrameData, FrameMetadata};
use shared::message::{Command, ExposureConsumer};
use shared::protocol::RAW_FRAME_NAME;
use shared::{CameraError, Result};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Dark floor of safeguard-family sensors, in counts
pub const SAFEGUARD_BLACK_LEVEL: f64 = 1100.0;

/// Means above this are treated as saturated
pub const SATURATION_LEVEL: f64 = 63000.0;

/// Exposure multiplier applied to a saturated frame
pub const SATURATION_BACKOFF: f64 = 0.2;

/// Smallest offset used as a divisor
const MIN_OFFSET: f64 = 1.0;

/// Echo tolerance for a setpoint, in ms
pub fn exposure_tolerance_ms(target_ms: f64) -> f64 {
    (target_ms * 0.01).max(0.1)
}

/// Settling time granted to sensors that do not echo their setpoint
pub fn safeguard_guard_delay(target_ms: f64) -> Duration {
    let seconds = ((target_ms / 1000.0).max(0.02) * 2.0 + 0.25).min(3.0);
    Duration::from_secs_f64(seconds)
}

/// One controller step. `black_level` is subtracted from both means first.
pub fn next_exposure(current_exp_ms: f64, current_mean: f64, target_mean: f64, black_level: f64) -> f64 {
    if current_mean > SATURATION_LEVEL {
        return current_exp_ms * SATURATION_BACKOFF;
    }
    let target_off = (target_mean - black_level).max(MIN_OFFSET);
    let current_off = (current_mean - black_level).max(MIN_OFFSET);
    current_exp_ms * target_off / current_off
}

/// Brightness metric of a frame: a named sub-channel, the brightest channel,
/// or the plain mean. Precomputed `statistics` win over pixel data.
pub fn frame_metric(
    frame: &FrameData,
    metadata: &FrameMetadata,
    sub_frame_type: Option<&str>,
    use_max_channel: bool,
) -> Option<f64> {
    let stats = metadata.statistics();

    if let Some(channel) = sub_frame_type {
        if let Some(mean) = stats.as_ref().and_then(|s| s.channel(channel)) {
            return Some(mean);
        }
        let index = metadata.channel_names().iter().position(|n| n == channel)?;
        return frame.channel_means().get(index).copied();
    }

    if use_max_channel {
        if let Some(max) = stats.as_ref().and_then(|s| s.max_channel()) {
            return Some(max);
        }
        let channels = frame.channel_means();
        if !channels.is_empty() {
            return channels.into_iter().reduce(f64::max);
        }
    }

    stats.and_then(|s| s.mean).or_else(|| frame.mean())
}

/// Parameters of [`CameraClient::run_auto_exposure`]
#[derive(Debug, Clone, PartialEq)]
pub struct AutoExposureParams {
    pub frame_name: String,
    pub target_mean: f64,
    pub min_exp_ms: f64,
    pub max_exp_ms: f64,
    pub max_iter: u32,
    pub hysteresis: f64,
    /// Channel of a multi-channel processed frame to meter on
    pub sub_frame_type: Option<String>,
    pub use_max_channel: bool,
    pub frame_timeout: Duration,
}

impl Default for AutoExposureParams {
    fn default() -> Self {
        Self {
            frame_name: RAW_FRAME_NAME.to_string(),
            target_mean: 30000.0,
            min_exp_ms: 0.1,
            max_exp_ms: 1000.0,
            max_iter: 10,
            hysteresis: 500.0,
            sub_frame_type: None,
            use_max_channel: false,
            frame_timeout: Duration::from_secs(5),
        }
    }
}

impl AutoExposureParams {
    pub fn new(frame_name: impl Into<String>, target_mean: f64) -> Self {
        Self {
            frame_name: frame_name.into(),
            target_mean,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.min_exp_ms > 0.0) || self.min_exp_ms > self.max_exp_ms {
            return Err(CameraError::invalid_argument(format!(
                "exposure bounds [{}, {}] ms are not a valid range",
                self.min_exp_ms, self.max_exp_ms
            )));
        }
        if self.max_iter == 0 {
            return Err(CameraError::invalid_argument("max_iter must be at least 1"));
        }
        if self.hysteresis < 0.0 {
            return Err(CameraError::invalid_argument("hysteresis must not be negative"));
        }
        Ok(())
    }
}

impl<T: Transport> CameraClient<T> {
    /// Sensor family that needs the timing safeguard instead of echo verification
    pub fn is_safeguard_camera(&self) -> bool {
        if let Some(forced) = self.options.force_safeguard {
            return forced;
        }
        self.state
            .identity
            .as_ref()
            .is_some_and(|identity| identity.matches_marker(&self.options.safeguard_marker))
    }

    fn send_exposure(&mut self, target_ms: f64) -> Result<()> {
        self.send(&Command::Exposure { consumer: ExposureConsumer::Camera, ms: target_ms })?;
        self.send(&Command::Exposure { consumer: ExposureConsumer::Widget, ms: target_ms })
    }

    /// Set the exposure and confirm it took effect. `timeout` bounds each of the
    /// two verify rounds and defaults to the configured exposure timeout.
    ///
    /// Returns `Ok(false)` only when `strict` is off and verification failed; the
    /// attempted target then still becomes the current exposure.
    pub fn set_exposure(&mut self, target_ms: f64, strict: bool, timeout: Option<Duration>) -> Result<bool> {
        if !target_ms.is_finite() || target_ms <= 0.0 {
            return Err(CameraError::invalid_argument(format!("exposure {} ms", target_ms)));
        }
        let timeout = timeout.unwrap_or(self.options.exposure_timeout);
        self.state.target_exposure_ms = target_ms;

        if self.is_safeguard_camera() {
            self.send_exposure(target_ms)?;
            let guard = safeguard_guard_delay(target_ms);
            debug!("Safeguard camera, waiting {:?} instead of verifying", guard);
            thread::sleep(guard);
            self.state.current_exposure_ms = target_ms;
            info!("📸 Exposure set to {} ms (timing safeguard)", target_ms);
            return Ok(true);
        }

        let tolerance = exposure_tolerance_ms(target_ms);
        for round in 1..=2 {
            self.send_exposure(target_ms)?;
            let confirmed = self.wait_for_state(timeout, |state| {
                state
                    .last_received_exp_ms
                    .is_some_and(|echo| (echo - target_ms).abs() <= tolerance)
            })?;
            if confirmed {
                self.state.current_exposure_ms = target_ms;
                info!("📸 Exposure set to {} ms", target_ms);
                return Ok(true);
            }
            warn!(
                "⚠️ Exposure {} ms not echoed within {:?} (round {}/2, last echo {:?})",
                target_ms, timeout, round, self.state.last_received_exp_ms
            );
        }

        let detail = format!("exposure {} ms not confirmed by raw frames", target_ms);
        self.handle_link_issue(&detail);
        if strict {
            return Err(CameraError::timeout(detail));
        }
        self.state.current_exposure_ms = target_ms;
        Ok(false)
    }

    /// Closed-loop auto-exposure. Returns the exposure reached, converged or not.
    pub fn run_auto_exposure(&mut self, params: &AutoExposureParams) -> Result<f64> {
        params.validate()?;

        let black_level = if self.is_safeguard_camera() { SAFEGUARD_BLACK_LEVEL } else { 0.0 };
        let require_raw = Some(params.frame_name == RAW_FRAME_NAME);
        let frame_name = (params.frame_name != RAW_FRAME_NAME).then_some(params.frame_name.as_str());

        info!(
            "🔆 Auto-exposure on '{}' towards mean {} (±{}) in [{}, {}] ms",
            params.frame_name, params.target_mean, params.hysteresis, params.min_exp_ms, params.max_exp_ms
        );

        for iteration in 1..=params.max_iter {
            // Processed planes carry no exposure echo; only meter on frames
            // captured after the last setpoint
            if iteration > 1 {
                self.discard_frame_backlog()?;
            }
            let (frame, metadata) = self.wait_for_frame(require_raw, frame_name, params.frame_timeout)?;
            let current_mean = frame_metric(
                &frame,
                &metadata,
                params.sub_frame_type.as_deref(),
                params.use_max_channel,
            )
            .ok_or_else(|| {
                CameraError::invalid_argument(format!(
                    "frame '{}' has no channel '{}'",
                    params.frame_name,
                    params.sub_frame_type.as_deref().unwrap_or_default()
                ))
            })?;

            let current_exp = self.state.current_exposure_ms;
            if (current_mean - params.target_mean).abs() <= params.hysteresis {
                info!("✅ Auto-exposure converged at {} ms (mean {:.1}, iteration {})", current_exp, current_mean, iteration);
                return Ok(current_exp);
            }

            let next = next_exposure(current_exp, current_mean, params.target_mean, black_level)
                .clamp(params.min_exp_ms, params.max_exp_ms);
            debug!(
                "Auto-exposure iteration {}: mean {:.1} at {} ms -> {} ms",
                iteration, current_mean, current_exp, next
            );

            self.set_exposure(next, false, None)?;

            if next == params.min_exp_ms || next == params.max_exp_ms {
                info!("🛑 Auto-exposure stopped at bound {} ms", next);
                return Ok(self.state.current_exposure_ms);
            }
        }

        warn!(
            "⚠️ Auto-exposure did not converge in {} iterations, keeping {} ms",
            params.max_iter, self.state.current_exposure_ms
        );
        Ok(self.state.current_exposure_ms)
    }
}
