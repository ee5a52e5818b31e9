//! Wire transport for the CDP connection.
//!
//! The core only depends on [`CdpTransport`]; the WebSocket implementation below
//! is the default way to reach a real runtime. The endpoint discovery helpers
//! implement the bounded readiness polling: a browser started with
//! `--remote-debugging-port` needs a moment before the port accepts connections
//! and `/json/list` returns a target.

use serde::Deserialize;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const READINESS_ATTEMPTS: u32 = 10;
const READINESS_DELAY: Duration = Duration::from_millis(500);
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("debuggee endpoint is not ready: {0}")]
    EndpointNotReady(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// A bidirectional text-message channel to the debuggee.
///
/// `poll_message` must not block longer than a short poll interval: the I/O
/// thread alternates between draining inbound messages and flushing queued
/// outbound ones over the same connection.
pub trait CdpTransport: Send {
    /// Try to read the next text message, `Ok(None)` if nothing arrived yet.
    fn poll_message(&mut self) -> Result<Option<String>, TransportError>;

    /// Send one text message.
    fn send(&mut self, text: &str) -> Result<(), TransportError>;
}

pub struct WebSocketTransport {
    socket: tungstenite::WebSocket<tungstenite::stream::MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Connect to a `ws://` debugger URL (as listed by `/json/list`).
    pub fn connect(ws_url: &str) -> Result<Self, TransportError> {
        let (socket, _) = tungstenite::connect(ws_url)
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        if let tungstenite::stream::MaybeTlsStream::Plain(stream) = socket.get_ref() {
            stream.set_read_timeout(Some(POLL_TIMEOUT))?;
        }

        Ok(Self { socket })
    }
}

impl CdpTransport for WebSocketTransport {
    fn poll_message(&mut self) -> Result<Option<String>, TransportError> {
        match self.socket.read() {
            Ok(tungstenite::Message::Text(text)) => Ok(Some(text.to_string())),
            // binary, ping and pong frames carry no protocol traffic
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Err(TransportError::Closed)
            }
            Err(e) => Err(TransportError::WebSocket(e.to_string())),
        }
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.socket
            .send(tungstenite::Message::text(text))
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    TransportError::Closed
                }
                other => TransportError::WebSocket(other.to_string()),
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDescription {
    #[serde(rename = "type", default)]
    target_type: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    web_socket_debugger_url: Option<String>,
}

/// Wait until the CDP endpoint accepts TCP connections, then until
/// `/json/list` reports at least one debuggable target, and return the
/// WebSocket URL of the preferred one (a page target if any).
pub fn discover_ws_url(host: &str, port: u16) -> Result<String, TransportError> {
    let addr = format!("{host}:{port}");

    let mut connected = false;
    for _ in 0..READINESS_ATTEMPTS {
        if TcpStream::connect(&addr).is_ok() {
            connected = true;
            break;
        }
        std::thread::sleep(READINESS_DELAY);
    }
    if !connected {
        return Err(TransportError::EndpointNotReady(format!(
            "{addr} refused connection"
        )));
    }

    for _ in 0..READINESS_ATTEMPTS {
        match list_targets(host, port) {
            Ok(targets) if !targets.is_empty() => {
                let preferred = targets
                    .iter()
                    .find(|t| t.target_type == "page")
                    .or_else(|| targets.first());
                if let Some(url) = preferred.and_then(|t| t.web_socket_debugger_url.clone()) {
                    return Ok(url);
                }
            }
            Ok(_) => {}
            Err(e) => log::debug!(target: "debugger", "target list: {e}"),
        }
        std::thread::sleep(READINESS_DELAY);
    }

    Err(TransportError::EndpointNotReady(format!(
        "{addr} listed no debuggable targets"
    )))
}

fn list_targets(host: &str, port: u16) -> Result<Vec<TargetDescription>, TransportError> {
    let mut stream = TcpStream::connect((host, port))?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;

    write!(
        stream,
        "GET /json/list HTTP/1.1\r\nHost: {host}:{port}\r\nConnection: close\r\n\r\n"
    )?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    let response = String::from_utf8_lossy(&raw);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or_default();

    serde_json::from_str(body)
        .map_err(|e| TransportError::EndpointNotReady(format!("bad /json/list payload: {e}")))
}
