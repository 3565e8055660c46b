/*!
Command and frame transport.

The backend exposes three local endpoints: a command subscriber we publish
into, a command publisher we subscribe to, and a frame publisher. Each
endpoint is owned independently so a failing socket never takes the other two
down, and every recovery path rebuilds sockets from a closed state.
*/

use bytes::Bytes;
use shared::frame::FrameMetadata;
use shared::message::CommandMessage;
use shared::protocol::{DEFAULT_CMD_PUB_PORT, DEFAULT_CMD_SUB_PORT, DEFAULT_FRAME_SUB_PORT};
use shared::shm::ShmRef;
use shared::{CameraError, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout of the TCP reachability probe
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Which registered endpoints have something to read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub command: bool,
    pub frame: bool,
}

impl Readiness {
    pub fn any(&self) -> bool {
        self.command || self.frame
    }
}

/// Pixel payload of a frame message
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    /// Serialized array carried in the message
    Inline(Bytes),
    /// Plane held in a named shared-memory segment
    Shared(ShmRef),
}

/// Frame message as received, before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub topic: String,
    pub metadata: FrameMetadata,
    pub body: FrameBody,
}

impl FrameMessage {
    /// Parse wire parts `[topic, json metadata, body]`; a `shm` metadata entry
    /// takes precedence over any body part
    pub fn from_parts(mut parts: Vec<Vec<u8>>) -> Result<Self> {
        if parts.len() < 2 {
            return Err(CameraError::decode(format!(
                "frame message has {} parts, expected at least 2",
                parts.len()
            )));
        }

        let body_part = if parts.len() > 2 { parts.swap_remove(2) } else { Vec::new() };
        let topic = String::from_utf8_lossy(&parts[0]).into_owned();
        let metadata = FrameMetadata::from_slice(&parts[1])?;

        let body = match metadata.shm_ref() {
            Some(reference) => FrameBody::Shared(reference?),
            None => FrameBody::Inline(Bytes::from(body_part)),
        };

        Ok(Self { topic, metadata, body })
    }
}

/// Transport seam between the client and the backend
pub trait Transport {
    /// Create every endpoint; on failure nothing is left half-open
    fn connect(&mut self) -> Result<()>;

    /// Close every endpoint. Safe to call repeatedly.
    fn close(&mut self);

    fn is_connected(&self) -> bool;

    /// Close everything and reconnect from scratch
    fn recover_full(&mut self) -> Result<()> {
        self.close();
        self.connect()
    }

    /// Recreate only the frame endpoint, dropping any queued frames
    fn reset_frame_socket(&mut self) -> Result<()>;

    fn send(&mut self, message: &CommandMessage) -> Result<()>;

    /// Readiness of the command and frame endpoints within `timeout`;
    /// a zero timeout never blocks
    fn poll(&mut self, timeout: Duration) -> Result<Readiness>;

    /// Next queued command-channel message, without blocking
    fn recv_command(&mut self) -> Result<Option<CommandMessage>>;

    /// Next queued frame message, without blocking
    fn recv_frame(&mut self) -> Result<Option<FrameMessage>>;

    /// Whether the backend's command ports accept TCP connections at all
    fn backend_reachable(&self) -> bool;
}

/// Backend endpoint addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub host: String,
    pub cmd_pub_port: u16,
    pub cmd_sub_port: u16,
    pub frame_sub_port: u16,
}

impl Endpoints {
    pub fn local(cmd_pub_port: u16, cmd_sub_port: u16, frame_sub_port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            cmd_pub_port,
            cmd_sub_port,
            frame_sub_port,
        }
    }

    pub fn url(&self, port: u16) -> String {
        format!("tcp://{}:{}", self.host, port)
    }

    pub fn command_ports(&self) -> [u16; 2] {
        [self.cmd_pub_port, self.cmd_sub_port]
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::local(DEFAULT_CMD_PUB_PORT, DEFAULT_CMD_SUB_PORT, DEFAULT_FRAME_SUB_PORT)
    }
}

/// Plain TCP connect attempt against `host:port`
pub fn probe_port(host: &str, port: u16, timeout: Duration) -> bool {
    let addr: SocketAddr = match (host, port).to_socket_addrs().ok().and_then(|mut a| a.next()) {
        Some(addr) => addr,
        None => return false,
    };

    let socket = match Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)) {
        Ok(socket) => socket,
        Err(e) => {
            debug!("Probe socket creation failed: {}", e);
            return false;
        }
    };

    socket.connect_timeout(&SockAddr::from(addr), timeout).is_ok()
}

/// Malformed publications are skipped, they say nothing about the link
fn parse_command(parts: &[Vec<u8>]) -> Option<CommandMessage> {
    match CommandMessage::from_parts(parts) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!("Skipping malformed command message ({} parts): {}", parts.len(), e);
            None
        }
    }
}

fn parse_frame(parts: Vec<Vec<u8>>) -> Option<FrameMessage> {
    let count = parts.len();
    match FrameMessage::from_parts(parts) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!("Skipping malformed frame message ({} parts): {}", count, e);
            None
        }
    }
}

fn zmq_error(context: &str, e: zmq::Error) -> CameraError {
    CameraError::link(format!("{}: {}", context, e))
}

/// ZeroMQ implementation of [`Transport`]
pub struct ZmqTransport {
    endpoints: Endpoints,
    context: zmq::Context,
    cmd_pub: Option<zmq::Socket>,
    cmd_sub: Option<zmq::Socket>,
    frame_sub: Option<zmq::Socket>,
    recv_hwm: i32,
    probe_timeout: Duration,
}

impl ZmqTransport {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            context: zmq::Context::new(),
            cmd_pub: None,
            cmd_sub: None,
            frame_sub: None,
            recv_hwm: 1000,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_recv_hwm(mut self, hwm: i32) -> Self {
        self.recv_hwm = hwm;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn open_publisher(&self) -> Result<zmq::Socket> {
        let url = self.endpoints.url(self.endpoints.cmd_pub_port);
        let socket = self.context.socket(zmq::PUB).map_err(|e| zmq_error("create PUB", e))?;
        socket.set_linger(0).map_err(|e| zmq_error("set linger", e))?;
        socket.connect(&url).map_err(|e| zmq_error(&format!("connect {}", url), e))?;
        Ok(socket)
    }

    fn open_subscriber(&self, port: u16) -> Result<zmq::Socket> {
        let url = self.endpoints.url(port);
        let socket = self.context.socket(zmq::SUB).map_err(|e| zmq_error("create SUB", e))?;
        socket.set_linger(0).map_err(|e| zmq_error("set linger", e))?;
        socket.set_rcvhwm(self.recv_hwm).map_err(|e| zmq_error("set rcvhwm", e))?;
        socket.set_subscribe(b"").map_err(|e| zmq_error("subscribe", e))?;
        socket.connect(&url).map_err(|e| zmq_error(&format!("connect {}", url), e))?;
        Ok(socket)
    }

    fn recv_parts(socket: Option<&zmq::Socket>, what: &str) -> Result<Option<Vec<Vec<u8>>>> {
        let socket = socket.ok_or_else(|| CameraError::link(format!("{} socket not connected", what)))?;
        match socket.recv_multipart(zmq::DONTWAIT) {
            Ok(parts) => Ok(Some(parts)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(zmq_error(&format!("receive {}", what), e)),
        }
    }
}

impl Transport for ZmqTransport {
    fn connect(&mut self) -> Result<()> {
        let built = (|| -> Result<_> {
            let cmd_pub = self.open_publisher()?;
            let cmd_sub = self.open_subscriber(self.endpoints.cmd_sub_port)?;
            let frame_sub = self.open_subscriber(self.endpoints.frame_sub_port)?;
            Ok((cmd_pub, cmd_sub, frame_sub))
        })();

        match built {
            Ok((cmd_pub, cmd_sub, frame_sub)) => {
                self.cmd_pub = Some(cmd_pub);
                self.cmd_sub = Some(cmd_sub);
                self.frame_sub = Some(frame_sub);
                info!(
                    "📡 Command PUB [{}] SUB [{}], frame SUB [{}]",
                    self.endpoints.url(self.endpoints.cmd_pub_port),
                    self.endpoints.url(self.endpoints.cmd_sub_port),
                    self.endpoints.url(self.endpoints.frame_sub_port)
                );
                Ok(())
            }
            Err(e) => {
                // Partially created sockets were dropped with the closure
                self.close();
                Err(CameraError::connection_failed(e.to_string()))
            }
        }
    }

    fn close(&mut self) {
        if self.is_connected() {
            debug!("Closing ZMQ endpoints");
        }
        self.cmd_pub = None;
        self.cmd_sub = None;
        self.frame_sub = None;
    }

    fn is_connected(&self) -> bool {
        self.cmd_pub.is_some() && self.cmd_sub.is_some() && self.frame_sub.is_some()
    }

    fn reset_frame_socket(&mut self) -> Result<()> {
        self.frame_sub = None;
        let socket = self.open_subscriber(self.endpoints.frame_sub_port)?;
        self.frame_sub = Some(socket);
        debug!("🔄 Frame socket recreated");
        Ok(())
    }

    fn send(&mut self, message: &CommandMessage) -> Result<()> {
        let socket = self
            .cmd_pub
            .as_ref()
            .ok_or_else(|| CameraError::link("command socket not connected"))?;
        let parts = message.to_parts()?;
        socket
            .send_multipart(parts, 0)
            .map_err(|e| zmq_error(&format!("send {}/{}", message.topic, message.name), e))
    }

    fn poll(&mut self, timeout: Duration) -> Result<Readiness> {
        let mut items = Vec::with_capacity(2);
        let mut is_command = Vec::with_capacity(2);
        if let Some(socket) = self.cmd_sub.as_ref() {
            items.push(socket.as_poll_item(zmq::POLLIN));
            is_command.push(true);
        }
        if let Some(socket) = self.frame_sub.as_ref() {
            items.push(socket.as_poll_item(zmq::POLLIN));
            is_command.push(false);
        }
        if items.is_empty() {
            return Err(CameraError::link("no endpoints registered with the poller"));
        }

        zmq::poll(&mut items, timeout.as_millis() as i64).map_err(|e| zmq_error("poll", e))?;

        let mut ready = Readiness::default();
        for (item, command) in items.iter().zip(is_command) {
            if item.is_readable() {
                if command {
                    ready.command = true;
                } else {
                    ready.frame = true;
                }
            }
        }
        Ok(ready)
    }

    fn recv_command(&mut self) -> Result<Option<CommandMessage>> {
        while let Some(parts) = Self::recv_parts(self.cmd_sub.as_ref(), "command")? {
            if let Some(message) = parse_command(&parts) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    fn recv_frame(&mut self) -> Result<Option<FrameMessage>> {
        while let Some(parts) = Self::recv_parts(self.frame_sub.as_ref(), "frame")? {
            if let Some(message) = parse_frame(parts) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    fn backend_reachable(&self) -> bool {
        self.endpoints.command_ports().iter().all(|&port| {
            let reachable = probe_port(&self.endpoints.host, port, self.probe_timeout);
            if !reachable {
                warn!("🔌 Backend port {}:{} not reachable", self.endpoints.host, port);
            }
            reachable
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;

    #[test]
    fn test_frame_message_inline_body() {
        let meta = serde_json::to_vec(&json!({"frame_name": "Raw"})).unwrap();
        let msg = FrameMessage::from_parts(vec![b"raw".to_vec(), meta, vec![1, 2, 3]]).unwrap();
        assert_eq!(msg.topic, "raw");
        assert!(msg.metadata.is_raw());
        assert_eq!(msg.body, FrameBody::Inline(Bytes::from_static(&[1, 2, 3])));
    }

    #[test]
    fn test_frame_message_shared_body() {
        let meta = serde_json::to_vec(&json!({
            "frame_name": "Gain",
            "shm": {"name": "psm_a", "shape": [2, 2], "dtype": "uint16"}
        }))
        .unwrap();
        let msg = FrameMessage::from_parts(vec![b"isp".to_vec(), meta]).unwrap();
        match msg.body {
            FrameBody::Shared(r) => assert_eq!(r.name, "psm_a"),
            other => panic!("unexpected body {:?}", other),
        }

        assert!(FrameMessage::from_parts(vec![b"isp".to_vec()]).is_err());
    }

    #[test]
    fn test_malformed_messages_are_skipped() {
        assert!(parse_command(&[b"file".to_vec()]).is_none());
        assert!(parse_command(&[b"file".to_vec(), b"record".to_vec(), b"{not json".to_vec()]).is_none());
        let valid = parse_command(&[b"file".to_vec(), b"record".to_vec(), b"{\"record\": true}".to_vec()]);
        assert_eq!(valid.map(|m| m.name), Some("record".to_string()));

        assert!(parse_frame(vec![b"isp".to_vec(), b"[1, 2]".to_vec()]).is_none());
        let bad_shm = serde_json::to_vec(&json!({"frame_name": "Gain", "shm": "psm_a"})).unwrap();
        assert!(parse_frame(vec![b"isp".to_vec(), bad_shm]).is_none());
        let meta = serde_json::to_vec(&json!({"frame_name": "Raw"})).unwrap();
        assert!(parse_frame(vec![b"raw".to_vec(), meta, vec![1]]).is_some());
    }

    #[test]
    fn test_malformed_publication_does_not_break_the_stream() {
        let context = zmq::Context::new();
        let backend = context.socket(zmq::PUB).unwrap();
        backend.set_linger(0).unwrap();
        backend.bind("tcp://127.0.0.1:39121").unwrap();

        let mut transport = ZmqTransport::new(Endpoints::local(39120, 39121, 39131));
        transport.connect().unwrap();

        // Subscriptions propagate asynchronously; republish until one arrives
        let valid: Vec<Vec<u8>> = vec![b"file".to_vec(), b"recording_status".to_vec(), b"{\"recording\": true}".to_vec()];
        let mut received = None;
        for _ in 0..100 {
            backend.send_multipart([b"file".to_vec(), b"garbage".to_vec()], 0).unwrap();
            backend.send_multipart(valid.clone(), 0).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            if let Some(message) = transport.recv_command().unwrap() {
                received = Some(message);
                break;
            }
        }

        assert_eq!(received.map(|m| m.name), Some("recording_status".to_string()));
        transport.close();
    }

    #[test]
    fn test_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe_port("127.0.0.1", port, PROBE_TIMEOUT));

        drop(listener);
        assert!(!probe_port("127.0.0.1", port, PROBE_TIMEOUT));
    }

    #[test]
    fn test_reset_frame_socket_keeps_command_sockets() {
        // ZMQ connects lazily, so no backend is needed
        let mut transport = ZmqTransport::new(Endpoints::local(39100, 39101, 39111));
        transport.connect().unwrap();
        assert!(transport.is_connected());

        transport.reset_frame_socket().unwrap();
        assert!(transport.is_connected());
        assert!(transport.poll(Duration::ZERO).is_ok());
        assert_eq!(transport.recv_frame().unwrap(), None);

        transport.close();
        transport.close();
        assert!(!transport.is_connected());
        assert!(transport.poll(Duration::ZERO).is_err());
    }
}
