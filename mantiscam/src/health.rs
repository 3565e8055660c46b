/*!
Health bridge towards the external device registry.

Connection-state transitions are published as CONNECTED, WARNING or
DISCONNECTED events. CONNECTED and WARNING are deduplicated per
(state, identity, detail) within a throttle window; forced events always go
out. Delivery happens on a dedicated thread so a slow or failing registry
callback can never stall or break protocol logic.
*/

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Sender};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default deduplication window for CONNECTED/WARNING events
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(2500);

/// Connection state reported to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    Connected,
    Warning,
    Disconnected,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Connected => "CONNECTED",
            HealthState::Warning => "WARNING",
            HealthState::Disconnected => "DISCONNECTED",
        };
        f.write_str(s)
    }
}

/// `(model, device_type, serial_number)` the registry keys devices by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorIdentity {
    pub model: String,
    pub device_type: String,
    pub serial_number: String,
}

/// Registry callbacks. Implementations run on the bridge's delivery thread.
pub trait HealthSink: Send + 'static {
    fn connected(&self, model: &str, device_type: &str, serial: &str, detail: &str);
    fn warning(&self, model: &str, device_type: &str, serial: &str, detail: &str);
    fn disconnected(&self, model: &str, device_type: &str, serial: &str, detail: &str);
}

/// Sink that only writes the transitions to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHealthSink;

impl HealthSink for TracingHealthSink {
    fn connected(&self, model: &str, device_type: &str, serial: &str, detail: &str) {
        info!("🟢 {} {} [{}] CONNECTED: {}", device_type, model, serial, detail);
    }

    fn warning(&self, model: &str, device_type: &str, serial: &str, detail: &str) {
        warn!("🟡 {} {} [{}] WARNING: {}", device_type, model, serial, detail);
    }

    fn disconnected(&self, model: &str, device_type: &str, serial: &str, detail: &str) {
        error!("🔴 {} {} [{}] DISCONNECTED: {}", device_type, model, serial, detail);
    }
}

/// One published transition
#[derive(Debug, Clone, PartialEq)]
pub struct HealthEvent {
    pub state: HealthState,
    pub identity: MonitorIdentity,
    pub detail: String,
    pub at: DateTime<Utc>,
}

enum BridgeMessage {
    Event(HealthEvent),
    Flush(Sender<()>),
}

fn deliver(sink: &dyn HealthSink, event: &HealthEvent) {
    let id = &event.identity;
    match event.state {
        HealthState::Connected => sink.connected(&id.model, &id.device_type, &id.serial_number, &event.detail),
        HealthState::Warning => sink.warning(&id.model, &id.device_type, &id.serial_number, &event.detail),
        HealthState::Disconnected => {
            sink.disconnected(&id.model, &id.device_type, &id.serial_number, &event.detail)
        }
    }
}

type ThrottleKey = (HealthState, MonitorIdentity, String);

/// Throttled, fire-and-forget publisher of health transitions
pub struct HealthBridge {
    tx: Option<Sender<BridgeMessage>>,
    worker: Option<thread::JoinHandle<()>>,
    throttle: Duration,
    last_sent: HashMap<ThrottleKey, Instant>,
    last_event: Option<HealthEvent>,
}

impl HealthBridge {
    /// Start a delivery thread feeding `sink`
    pub fn new(sink: impl HealthSink, throttle: Duration) -> Self {
        let (tx, rx) = unbounded::<BridgeMessage>();

        let spawned = thread::Builder::new()
            .name("health-bridge".to_string())
            .spawn(move || {
                for message in rx {
                    match message {
                        BridgeMessage::Event(event) => {
                            let outcome = catch_unwind(AssertUnwindSafe(|| deliver(&sink, &event)));
                            if outcome.is_err() {
                                error!("❌ Health sink panicked while handling {} event", event.state);
                            }
                        }
                        BridgeMessage::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                debug!("Health bridge delivery thread stopped");
            });

        match spawned {
            Ok(worker) => Self {
                tx: Some(tx),
                worker: Some(worker),
                throttle,
                last_sent: HashMap::new(),
                last_event: None,
            },
            Err(e) => {
                error!("❌ Failed to start health bridge thread, events will only be logged: {}", e);
                Self::disabled()
            }
        }
    }

    /// Bridge that records transitions locally but delivers nowhere
    pub fn disabled() -> Self {
        Self {
            tx: None,
            worker: None,
            throttle: DEFAULT_THROTTLE,
            last_sent: HashMap::new(),
            last_event: None,
        }
    }

    /// Publish a transition. Returns whether it was dispatched (not throttled).
    pub fn publish(&mut self, state: HealthState, identity: &MonitorIdentity, detail: &str, force: bool) -> bool {
        let now = Instant::now();
        let key = (state, identity.clone(), detail.to_string());

        let throttled = state != HealthState::Disconnected;
        if throttled && !force {
            if let Some(last) = self.last_sent.get(&key) {
                if now.duration_since(*last) < self.throttle {
                    return false;
                }
            }
        }
        self.last_sent.retain(|_, sent| now.duration_since(*sent) < self.throttle);
        self.last_sent.insert(key, now);

        let event = HealthEvent {
            state,
            identity: identity.clone(),
            detail: detail.to_string(),
            at: Utc::now(),
        };
        self.last_event = Some(event.clone());

        if let Some(tx) = &self.tx {
            if tx.send(BridgeMessage::Event(event)).is_err() {
                warn!("⚠️ Health bridge delivery thread is gone, dropping {} event", state);
            }
        }
        true
    }

    pub fn connected(&mut self, identity: &MonitorIdentity, detail: &str, force: bool) -> bool {
        self.publish(HealthState::Connected, identity, detail, force)
    }

    pub fn warning(&mut self, identity: &MonitorIdentity, detail: &str, force: bool) -> bool {
        self.publish(HealthState::Warning, identity, detail, force)
    }

    pub fn disconnected(&mut self, identity: &MonitorIdentity, detail: &str) -> bool {
        self.publish(HealthState::Disconnected, identity, detail, true)
    }

    /// Most recent transition that passed the throttle
    pub fn last_event(&self) -> Option<&HealthEvent> {
        self.last_event.as_ref()
    }

    /// Wait until every event published so far has been handed to the sink
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(tx) = &self.tx else {
            return true;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(BridgeMessage::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for HealthBridge {
    fn drop(&mut self) {
        // Closing the channel ends the delivery loop after pending events
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
