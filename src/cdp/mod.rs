//! Chrome DevTools Protocol client.
//!
//! One I/O thread owns the transport. Commands are serialized on the caller
//! thread, pushed through a channel and answered through a per-call response
//! channel, so a command is a plain blocking call from the session's point of
//! view. Everything that is not a command response is queued as an event and
//! drained by the front-end main loop.

pub mod session;
pub mod transport;
pub mod types;

pub use session::SessionCdp;
pub use transport::{discover_ws_url, CdpTransport, TransportError, WebSocketTransport};

use crate::debugger::error::Error;
use serde_json::json;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use types::CdpEvent;

type PendingCalls = Arc<Mutex<HashMap<u64, Sender<Result<serde_json::Value, Error>>>>>;

pub struct CdpClient {
    out_tx: Sender<String>,
    pending: PendingCalls,
    next_id: Cell<u64>,
}

impl CdpClient {
    /// Spawn the I/O thread over a transport. Returns the client half and the
    /// queue of incoming events; the queue closes when the connection dies.
    pub fn start(transport: Box<dyn CdpTransport>) -> (Self, Receiver<CdpEvent>) {
        let (out_tx, out_rx) = channel::<String>();
        let (event_tx, events_rx) = channel::<CdpEvent>();
        let pending: PendingCalls = Arc::default();

        let io_pending = Arc::clone(&pending);
        std::thread::spawn(move || io_loop(transport, out_rx, event_tx, io_pending));

        let client = Self {
            out_tx,
            pending,
            next_id: Cell::new(1),
        };
        (client, events_rx)
    }

    /// Issue a command and block until its response arrives.
    ///
    /// # Arguments
    ///
    /// * `session_id`: target session the command is addressed to, empty for the root session
    /// * `method`: qualified method name, e.g. "Debugger.setBreakpoint"
    /// * `params`: method parameters
    pub fn call(
        &self,
        session_id: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let mut message = json!({ "id": id, "method": method, "params": params });
        if !session_id.is_empty() {
            message["sessionId"] = json!(session_id);
        }

        let (tx, rx) = channel();
        self.pending.lock().unwrap().insert(id, tx);

        log::trace!(target: "debugger", "-> {message}");
        self.out_tx
            .send(message.to_string())
            .map_err(|_| Error::Transport(TransportError::Closed))?;

        rx.recv()
            .map_err(|_| Error::Transport(TransportError::Closed))?
    }
}

fn io_loop(
    mut transport: Box<dyn CdpTransport>,
    out_rx: Receiver<String>,
    event_tx: Sender<CdpEvent>,
    pending: PendingCalls,
) {
    loop {
        let mut idle = true;

        match transport.poll_message() {
            Ok(Some(text)) => {
                idle = false;
                route_message(&text, &event_tx, &pending);
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!(target: "debugger", "cdp connection lost: {e:#}");
                break;
            }
        }

        loop {
            match out_rx.try_recv() {
                Ok(out) => {
                    idle = false;
                    if let Err(e) = transport.send(&out) {
                        log::warn!(target: "debugger", "cdp send failed: {e:#}");
                        fail_pending(&pending);
                        return;
                    }
                }
                Err(std::sync::mpsc::TryRecvError::Empty) => break,
                // the client is gone, nobody is listening anymore
                Err(std::sync::mpsc::TryRecvError::Disconnected) => return,
            }
        }

        if idle {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fail_pending(&pending);
    // dropping event_tx closes the event queue and lets front-ends observe termination
}

fn route_message(text: &str, event_tx: &Sender<CdpEvent>, pending: &PendingCalls) {
    let message: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            log::warn!(target: "debugger", "undecodable cdp message: {e}");
            return;
        }
    };

    if let Some(id) = message.get("id").and_then(|id| id.as_u64()) {
        let Some(reply_tx) = pending.lock().unwrap().remove(&id) else {
            log::debug!(target: "debugger", "response for unknown call {id}");
            return;
        };

        let result = if let Some(error) = message.get("error") {
            let text = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            Err(Error::CommandFailed {
                method: String::new(),
                message: text.to_string(),
            })
        } else {
            Ok(message.get("result").cloned().unwrap_or(json!({})))
        };
        _ = reply_tx.send(result);
        return;
    }

    let Some(method) = message.get("method").and_then(|m| m.as_str()) else {
        log::debug!(target: "debugger", "cdp message without id or method");
        return;
    };

    let event = CdpEvent {
        session_id: message
            .get("sessionId")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string(),
        method: method.to_string(),
        params: message.get("params").cloned().unwrap_or(json!({})),
    };
    _ = event_tx.send(event);
}

fn fail_pending(pending: &PendingCalls) {
    let mut pending = pending.lock().unwrap();
    for (_, tx) in pending.drain() {
        _ = tx.send(Err(Error::Transport(TransportError::Closed)));
    }
}
