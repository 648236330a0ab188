//! Test utilities: a scripted in-memory modem
//!
//! [`MockTransport`] stands in for a serial port. Everything the session
//! writes is recorded, and replies are scripted by command prefix through
//! the paired [`MockController`]. Unscripted `AT` commands answer `OK`.
//!
//! # Example
//!
//! ```rust,ignore
//! let (transport, modem) = MockTransport::new();
//! modem.reply("AT+CSQ", "\r\n+CSQ: 21,99\r\n\r\nOK\r\n");
//! modem.inject("\r\n+CMTI: \"SM\",3\r\n");
//! ```
//!
//! With the `serial` feature, [`available_ports`] lists serial devices that
//! look like modems, for hardware tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use smsgate_pdu::{Concatenation, SmsSubmit, SmsTimestamp};
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::error::{ModemError, Result};
use crate::transport::ModemTransport;

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    chunks: Vec<Bytes>,
    once: bool,
}

#[derive(Debug, Default)]
struct MockState {
    writes: Vec<String>,
    rules: Vec<Rule>,
    auto_ok: bool,
    fail_writes: bool,
}

impl MockState {
    /// Chunks answering `text`; the most recent matching rule wins
    fn answer(&mut self, text: &str) -> Vec<Bytes> {
        let found = self
            .rules
            .iter()
            .rposition(|rule| text.starts_with(&rule.prefix));
        match found {
            Some(at) => {
                let chunks = self.rules[at].chunks.clone();
                if self.rules[at].once {
                    self.rules.remove(at);
                }
                chunks
            }
            None if self.auto_ok && text.starts_with("AT") => {
                vec![Bytes::from_static(b"\r\nOK\r\n")]
            }
            None => Vec::new(),
        }
    }
}

/// In-memory transport with scripted replies
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    incoming_tx: mpsc::UnboundedSender<Option<Bytes>>,
    incoming_rx: mpsc::UnboundedReceiver<Option<Bytes>>,
    written: watch::Sender<usize>,
    closed: bool,
}

/// Script and inspect a [`MockTransport`] from the test
#[derive(Clone)]
pub struct MockController {
    state: Arc<Mutex<MockState>>,
    incoming_tx: mpsc::UnboundedSender<Option<Bytes>>,
    written: watch::Receiver<usize>,
}

impl MockTransport {
    /// Create a transport and its controller; `AT` commands answer `OK`
    /// unless scripted otherwise
    pub fn new() -> (Self, MockController) {
        let state = Arc::new(Mutex::new(MockState {
            auto_ok: true,
            ..MockState::default()
        }));
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (written, written_rx) = watch::channel(0);
        let controller = MockController {
            state: state.clone(),
            incoming_tx: incoming_tx.clone(),
            written: written_rx,
        };
        let transport = Self {
            state,
            incoming_tx,
            incoming_rx,
            written,
            closed: false,
        };
        (transport, controller)
    }
}

#[async_trait]
impl ModemTransport for MockTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(data).to_string();
        let (chunks, count) = {
            let mut state = self.state.lock();
            if state.fail_writes {
                return Err(ModemError::WriteError("mock write failure".to_string()));
            }
            state.writes.push(text.clone());
            (state.answer(&text), state.writes.len())
        };
        trace!(write = %text.escape_debug(), replies = chunks.len(), "mock write");
        for chunk in chunks {
            let _ = self.incoming_tx.send(Some(chunk));
        }
        self.written.send_replace(count);
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Bytes>> {
        if self.closed {
            return Ok(None);
        }
        match self.incoming_rx.recv().await {
            Some(Some(chunk)) => Ok(Some(chunk)),
            Some(None) | None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

impl MockController {
    /// Answer writes starting with `prefix` with `reply`
    ///
    /// An empty reply makes the modem stay silent for that command.
    pub fn reply(&self, prefix: &str, reply: &str) {
        self.reply_chunks(prefix, &[reply]);
    }

    /// Answer with several chunks, each delivered as a separate read
    pub fn reply_chunks(&self, prefix: &str, chunks: &[&str]) {
        self.push_rule(prefix, chunks, false);
    }

    /// Like [`reply`](Self::reply) but only for the next matching write
    pub fn reply_once(&self, prefix: &str, reply: &str) {
        self.push_rule(prefix, &[reply], true);
    }

    fn push_rule(&self, prefix: &str, chunks: &[&str], once: bool) {
        let chunks = chunks
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| Bytes::copy_from_slice(c.as_bytes()))
            .collect();
        self.state.lock().rules.push(Rule {
            prefix: prefix.to_string(),
            chunks,
            once,
        });
    }

    /// Stop answering unscripted commands with `OK`
    pub fn disable_auto_ok(&self) {
        self.state.lock().auto_ok = false;
    }

    /// Make every following write fail
    pub fn fail_writes(&self) {
        self.state.lock().fail_writes = true;
    }

    /// Deliver unsolicited bytes
    pub fn inject(&self, data: &str) {
        let _ = self
            .incoming_tx
            .send(Some(Bytes::copy_from_slice(data.as_bytes())));
    }

    /// Close the stream
    pub fn close(&self) {
        let _ = self.incoming_tx.send(None);
    }

    /// Everything written so far, raw
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    /// Written commands with terminators stripped
    pub fn commands(&self) -> Vec<String> {
        self.writes()
            .iter()
            .map(|w| w.trim_end_matches(['\r', '\n', '\x1a']).to_string())
            .collect()
    }

    /// Index of the first written command starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.starts_with(prefix))
    }

    /// Wait until a command starting with `prefix` has been written
    pub async fn wait_for_write(&mut self, prefix: &str) -> Option<String> {
        loop {
            self.written.borrow_and_update();
            if let Some(found) = self.commands().into_iter().find(|c| c.starts_with(prefix)) {
                return Some(found);
            }
            if self.written.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl std::fmt::Debug for MockController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockController")
            .field("writes", &state.writes.len())
            .field("rules", &state.rules.len())
            .finish()
    }
}

/// A fixed timestamp for test PDUs (2024-03-15 10:30:00 +07:00)
pub fn test_timestamp() -> SmsTimestamp {
    SmsTimestamp {
        year: 24,
        month: 3,
        day: 15,
        hour: 10,
        minute: 30,
        second: 0,
        tz_quarters: 28,
    }
}

/// Build an SMS-DELIVER hex PDU from `sender`
///
/// The user data is produced by the submit encoder and re-framed with a
/// deliver header, so any text the codec can send can be delivered.
pub fn deliver_pdu(
    sender: &str,
    text: &str,
    concatenation: Option<Concatenation>,
    timestamp: SmsTimestamp,
) -> Result<String> {
    let mut submit = SmsSubmit::new(sender, text);
    submit.concatenation = concatenation;
    let encoded = submit.encode()?;
    let octets = hex::decode(&encoded.hex)
        .map_err(|e| smsgate_pdu::CodecError::InvalidHex(e.to_string()))?;

    // 00 | first | MR | DA len | DA type | DA digits | PID | DCS | VP | UDL+UD
    let tpdu = &octets[1..];
    let address_len = 2 + (tpdu[2] as usize).div_ceil(2);
    let address = &tpdu[2..2 + address_len];
    let pid = tpdu[2 + address_len];
    let dcs = tpdu[3 + address_len];
    let user_data = &tpdu[5 + address_len..];

    let mut deliver = vec![0x00, 0x04 | (tpdu[0] & 0x40)];
    deliver.extend_from_slice(address);
    deliver.push(pid);
    deliver.push(dcs);
    deliver.extend_from_slice(&timestamp.encode());
    deliver.extend_from_slice(user_data);
    Ok(hex::encode_upper(deliver))
}

/// Serial ports that look like USB modems
#[cfg(feature = "serial")]
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .filter(|p| matches!(p.port_type, serialport::SerialPortType::UsbPort(_)))
            .map(|p| p.port_name)
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "cannot enumerate serial ports");
            Vec::new()
        }
    }
}
