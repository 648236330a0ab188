//! ModemSession - per-modem actor
//!
//! The session owns the transport and runs every AT transaction itself, so
//! exactly one command is in flight at any time. It composes the driver,
//! the response matcher and processor, the operation queue and work chains:
//!
//! - Handle calls become [`Operation`]s on a FIFO queue gated on the
//!   session being idle
//! - Each operation runs one or more transactions ([`ModemSession::tx`])
//! - Unsolicited output is processed into [`Prop`]s that update the status,
//!   queue reads and fill the inbox
//! - The inbox is dispatched into message and status report events,
//!   reassembling concatenated messages
//!
//! # Example
//!
//! ```rust,ignore
//! use smsgate_modem::{DriverRegistry, ModemConfig, ModemSession};
//!
//! let registry = Arc::new(DriverRegistry::with_generic());
//! let (session, handle, mut events) = ModemSession::new(transport, registry, ModemConfig::default())?;
//! tokio::spawn(session.run());
//!
//! handle.send_message("+6281234567", "hello").await?;
//! while let Ok(event) = events.recv().await { /* ... */ }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use smsgate_pdu::{
    decode, message_hash, normalize_number, sms_split, validate_destination, CodecError,
    CodingScheme, Concatenation, Decoded, EncodedPdu, MessageType, PduMessage, SmsSubmit,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::ModemConfig;
use crate::driver::{DriverProfile, DriverRegistry, GENERIC_DRIVER};
use crate::error::{ModemError, Result};
use crate::event::{
    Direction, InboundMessage, Locator, LogLine, ModemEvent, SentPdu, SessionStatus, SignalInfo,
    StatusFlags, StorageInfo,
};
use crate::handle::{settle, ModemHandle, Operation, SendReport, SessionCommand};
use crate::matcher::{clean_lines, MatchKind, ResponseMatcher, Template};
use crate::processor::{decode_ussd, Prop, ResponseProcessor};
use crate::queue::CommandQueue;
use crate::reference::{open_store, ReferenceStore};
use crate::transport::ModemTransport;
use crate::work::WorkChain;

/// Capacity of the handle command channel
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_SIZE: usize = 256;

/// Storage assumed when the modem never reported one
const DEFAULT_STORAGE: &str = "SM";

/// Identification queries, in order
const IDENTIFY_COMMANDS: &[&str] = &[
    "CMD_MANUFACTURER",
    "CMD_MODEL",
    "CMD_VERSION",
    "CMD_SERIAL",
    "CMD_IMSI",
];

/// Buffered parts of incomplete groups kept before the oldest group is
/// flushed as it stands
const MAX_PENDING_PARTS: usize = 64;

/// Unsolicited notification enables, in order
const FEATURE_COMMANDS: &[&str] = &["CMD_ENABLE_CLIP", "CMD_ENABLE_CNMI", "CMD_ENABLE_CUSD"];

/// One AT transaction
#[derive(Debug, Clone)]
pub struct TxRequest {
    /// Command text, without terminator
    pub command: String,
    /// Append the driver's terminator
    pub terminate: bool,
    /// Patterns that settle the transaction before `OK`
    pub expected: Vec<Template>,
    /// Override of the session's command timeout
    pub timeout: Option<Duration>,
}

impl TxRequest {
    /// A terminated command settled by `OK` or an error
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            terminate: true,
            expected: Vec::new(),
            timeout: None,
        }
    }

    /// Also settle on `template`
    pub fn expect(mut self, template: Template) -> Self {
        self.expected.push(template);
        self
    }

    /// Write the command as is, without terminator
    pub fn raw(mut self) -> Self {
        self.terminate = false;
        self
    }

    /// Override the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A settled transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResponse {
    /// What settled it
    pub kind: MatchKind,
    /// Lines before the final result, echo removed
    pub body: Vec<String>,
    /// Props the response carried
    pub props: Vec<Prop>,
}

impl TxResponse {
    /// First body line, with an information prefix (`+CGMI: `) and quotes
    /// stripped
    pub fn text(&self) -> Option<String> {
        let line = self.body.first()?;
        let value = match line.split_once(':') {
            Some((prefix, rest)) if prefix.starts_with('+') => rest,
            _ => line.as_str(),
        };
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    Busy,
    Sending,
    Processing,
}

/// A decoded PDU waiting for dispatch
#[derive(Debug, Clone)]
struct InboxEntry {
    locator: Option<Locator>,
    decoded: Decoded,
}

impl InboxEntry {
    fn message(&self) -> Option<&PduMessage> {
        match &self.decoded {
            Decoded::Message(m) => Some(m),
            Decoded::StatusReport(_) => None,
        }
    }
}

/// Inbox indices of one concatenation group
#[derive(Debug, Default)]
struct Group {
    /// First entry per part index
    members: Vec<usize>,
    /// Repeated or out-of-range part indices
    duplicates: Vec<usize>,
    complete: bool,
}

/// Per-modem session actor
pub struct ModemSession<T: ModemTransport> {
    name: String,
    transport: T,
    config: ModemConfig,
    registry: Arc<DriverRegistry>,
    driver: Arc<DriverProfile>,
    matcher: ResponseMatcher,
    processor: ResponseProcessor,
    queue: CommandQueue<Operation>,
    status: Arc<RwLock<SessionStatus>>,
    events: broadcast::Sender<ModemEvent>,
    command_rx: mpsc::Receiver<SessionCommand>,
    references: Box<dyn ReferenceStore>,
    /// Decoded PDUs not yet dispatched
    inbox: Vec<InboxEntry>,
    /// Slot being read by `+CMGR`
    current_read: Option<Locator>,
    /// Reference of the last `+CMGS`
    last_sent: Option<u8>,
    /// PDUs committed by the running send
    sent: Vec<SentPdu>,
    /// Last USSD reply (status, text)
    last_ussd: Option<(u8, String)>,
    signal_monitor: bool,
    memory_monitor: bool,
    /// Memory-full remediation in progress
    emptying: bool,
    running: bool,
}

impl<T: ModemTransport + 'static> ModemSession<T> {
    /// Create a session over an open transport
    ///
    /// Returns the session (to be driven by [`run`](Self::run)), a handle and
    /// an event receiver.
    pub fn new(
        transport: T,
        registry: Arc<DriverRegistry>,
        config: ModemConfig,
    ) -> Result<(Self, ModemHandle, broadcast::Receiver<ModemEvent>)> {
        let driver = match &config.driver {
            Some(name) => registry
                .get(name)
                .ok_or_else(|| ModemError::UnknownDriver(name.clone()))?,
            None => registry
                .get(GENERIC_DRIVER)
                .unwrap_or_else(|| Arc::new(DriverProfile::generic())),
        };
        let references = open_store(config.reference_file.as_deref())?;

        let status = Arc::new(RwLock::new(SessionStatus {
            name: config.name.clone(),
            driver: driver.name.clone(),
            ..SessionStatus::default()
        }));
        let gate = status.clone();
        let queue = CommandQueue::with_ready(move || gate.read().flags.is_idle());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (events, events_rx) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let handle = ModemHandle::new(command_tx, status.clone(), events.clone());

        let session = Self {
            name: config.name.clone(),
            matcher: ResponseMatcher::from_driver(&driver),
            transport,
            config,
            registry,
            driver,
            processor: ResponseProcessor::new(),
            queue,
            status,
            events,
            command_rx,
            references,
            inbox: Vec::new(),
            current_read: None,
            last_sent: None,
            sent: Vec::new(),
            last_ussd: None,
            signal_monitor: false,
            memory_monitor: false,
            emptying: false,
            running: false,
        };
        Ok((session, handle, events_rx))
    }

    /// Active driver
    pub fn driver(&self) -> &DriverProfile {
        &self.driver
    }

    /// Run the session until shutdown or until the transport closes
    ///
    /// Initialization is queued first. The loop then serves transport
    /// output, handle commands and the monitor tick, draining the queue
    /// after each event.
    pub async fn run(mut self) -> Result<()> {
        info!(modem = %self.name, transport = self.transport.name(), "Starting modem session");
        self.running = true;
        self.queue.push(Operation::Init(None));
        self.drain().await;

        let period = self.config.monitor_interval;
        let mut monitor = tokio::time::interval_at(Instant::now() + period, period);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut outcome = Ok(());
        while self.running {
            tokio::select! {
                chunk = self.transport.read() => match chunk {
                    Ok(Some(chunk)) => self.receive_chunk(&chunk),
                    Ok(None) => {
                        info!(modem = %self.name, "Transport closed");
                        self.running = false;
                    }
                    Err(e) => {
                        error!(modem = %self.name, error = %e, "Transport read failed");
                        self.running = false;
                        outcome = Err(e);
                    }
                },

                Some(command) = self.command_rx.recv() => match command {
                    SessionCommand::Enqueue(op) => {
                        trace!(modem = %self.name, operation = ?op, "queued");
                        self.queue.push(op);
                    }
                    SessionCommand::Shutdown => {
                        info!(modem = %self.name, "Session shutdown requested");
                        self.running = false;
                    }
                },

                _ = monitor.tick() => self.poll_monitors(),
            }

            if self.running {
                self.drain().await;
            }
        }

        let pending = self.queue.drain_all();
        if !pending.is_empty() {
            debug!(modem = %self.name, count = pending.len(), "rejecting queued operations");
        }
        for op in pending {
            op.reject(ModemError::Disconnected);
        }
        self.update_status(|s| s.queue_depth = 0);
        info!(modem = %self.name, "Modem session stopped");
        outcome
    }

    // ===== Queue =====

    /// Run queued operations while the session is idle
    ///
    /// Every operation settles before the next one starts, whatever its
    /// outcome. Pending memory-full remediation runs once the queue is empty.
    async fn drain(&mut self) {
        loop {
            self.update_status(|s| s.queue_depth = self.queue.len());
            if let Some(op) = self.queue.next() {
                self.execute(op).await;
                continue;
            }
            if self.queue.is_empty() && self.schedule_memory_remediation() {
                continue;
            }
            break;
        }
        self.update_status(|s| s.queue_depth = self.queue.len());
    }

    async fn execute(&mut self, op: Operation) {
        let label = op.label();
        debug!(modem = %self.name, operation = ?op, "executing");
        match op {
            Operation::Init(reply) => {
                let result = self.initialize().await;
                if let Err(e) = &result {
                    warn!(modem = %self.name, error = %e, "Initialization failed");
                }
                settle(label, reply, result);
            }
            Operation::Send {
                number,
                text,
                reply,
            } => {
                let result = self.send_message(number, text).await;
                settle(label, reply, result);
            }
            Operation::Dial { number, reply } => {
                let result = self.dial(number).await;
                settle(label, reply, result);
            }
            Operation::Hangup(reply) => {
                let result = self.tx_cmd("CMD_HANGUP", &[]).await.map(|_| ());
                settle(label, reply, result);
            }
            Operation::Answer(reply) => {
                let result = self.tx_cmd("CMD_ANSWER", &[]).await.map(|_| ());
                settle(label, reply, result);
            }
            Operation::Ussd { code, reply } => {
                let result = self.ussd(code).await;
                settle(label, reply, result);
            }
            Operation::List(reply) => {
                let result = self.list_messages().await;
                settle(label, reply, result);
            }
            Operation::Read { locator, reply } => {
                let result = self.read_message(locator).await;
                settle(label, reply, result);
            }
            Operation::Delete { locator, reply } => {
                let result = self.delete_message(&locator).await;
                settle(label, reply, result);
            }
            Operation::Signal(reply) => {
                let result = self
                    .tx_cmd("CMD_QUERY_SIGNAL", &[])
                    .await
                    .map(|_| self.status.read().signal);
                settle(label, reply, result);
            }
            Operation::Storage(reply) => {
                let result = self
                    .tx_cmd("CMD_QUERY_STORAGE", &[])
                    .await
                    .map(|_| self.status.read().storage.clone());
                settle(label, reply, result);
            }
            Operation::Raw { command, reply } => {
                let result = self.tx(TxRequest::new(command)).await.map(|r| r.body);
                settle(label, reply, result);
            }
            Operation::EmptyStorage { storage, total } => {
                self.empty_storage(storage, total).await;
            }
        }
    }

    fn poll_monitors(&mut self) {
        if !self.status.read().initialized {
            return;
        }
        if self.signal_monitor && !self.queue.contains(|op| matches!(op, Operation::Signal(_))) {
            self.queue.push(Operation::Signal(None));
        }
        if self.memory_monitor && !self.queue.contains(|op| matches!(op, Operation::Storage(_))) {
            self.queue.push(Operation::Storage(None));
        }
    }

    // ===== Transactions =====

    /// Run one AT transaction
    ///
    /// Buffered output that arrived before the write is processed as
    /// unsolicited first, so a late reply to an earlier command is not taken
    /// for this one's. The timeout is re-armed by every chunk. Lines after
    /// the settling match are processed as unsolicited output.
    pub async fn tx(&mut self, request: TxRequest) -> Result<TxResponse> {
        self.flush_stale()?;

        let timeout = request.timeout.unwrap_or(self.config.command_timeout);
        self.set_flag(Flag::Busy, true);
        if let Err(e) = self.write_command(&request.command, request.terminate).await {
            self.set_flag(Flag::Busy, false);
            return Err(e);
        }

        let mut lines: Vec<String> = Vec::new();
        let settled = loop {
            let chunk = match tokio::time::timeout(timeout, self.transport.read()).await {
                Err(_) => {
                    break Err(ModemError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                    })
                }
                Ok(Err(e)) => break Err(e),
                Ok(Ok(None)) => break Err(ModemError::Disconnected),
                Ok(Ok(Some(chunk))) => chunk,
            };
            let fresh = clean_lines(&chunk);
            self.log_lines(Direction::Rx, &fresh);
            lines.extend(fresh);
            if let Some(matched) = self.matcher.classify(&lines, &request.expected) {
                break Ok(matched);
            }
        };
        self.set_flag(Flag::Busy, false);

        let matched = match settled {
            Ok(matched) => matched,
            Err(e) => {
                warn!(modem = %self.name, command = %request.command, error = %e, "transaction failed");
                if !lines.is_empty() {
                    self.handle_unsolicited(lines);
                }
                return Err(e);
            }
        };

        let (start, end) = (matched.capture.start, matched.capture.end);
        let (responses, extras) = matched.split(lines);
        let outcome = self.processor.process(&self.driver, &responses);
        let props = outcome.props.clone();
        self.apply_props(outcome.props);
        if !extras.is_empty() {
            trace!(modem = %self.name, extras = extras.len(), "re-feeding extra lines");
            self.handle_unsolicited(extras);
        }

        if let MatchKind::Error(kind) = matched.kind {
            let diagnostic = responses[start..=end].concat();
            return Err(ModemError::Modem {
                kind,
                code: matched.code(),
                diagnostic,
            });
        }

        let command = request.command.trim();
        let body = responses[..start]
            .iter()
            .filter(|line| line.as_str() != command)
            .cloned()
            .collect();
        Ok(TxResponse {
            kind: matched.kind,
            body,
            props,
        })
    }

    /// Resolve a driver command and run it
    pub async fn tx_cmd(&mut self, id: &str, vars: &[(&'static str, String)]) -> Result<TxResponse> {
        let command = self.driver.cmd(id, vars)?;
        self.tx(TxRequest::new(command)).await
    }

    /// Run driver commands best-effort, collecting each result
    pub async fn txqueue(&mut self, ids: &[&str]) -> HashMap<String, Result<TxResponse>> {
        let mut results = HashMap::with_capacity(ids.len());
        for id in ids {
            let result = if self.driver.has(id) {
                self.tx_cmd(id, &[]).await
            } else {
                Err(ModemError::UnknownCommand(id.to_string()))
            };
            if let Err(e) = &result {
                debug!(modem = %self.name, command = id, error = %e, "best-effort command failed");
            }
            results.insert(id.to_string(), result);
        }
        results
    }

    async fn write_command(&mut self, command: &str, terminate: bool) -> Result<()> {
        let mut data = command.to_string();
        if terminate {
            data.push_str(
                &self
                    .driver
                    .param("PARAM_TERMINATOR")
                    .unwrap_or_else(|| "\r".to_string()),
            );
        }
        self.log_lines(Direction::Tx, &[command.trim_end().to_string()]);
        self.transport.write(data.as_bytes()).await
    }

    /// Process whatever the transport already buffered
    fn flush_stale(&mut self) -> Result<()> {
        loop {
            match self.transport.read().now_or_never() {
                Some(Ok(Some(chunk))) => {
                    debug!(modem = %self.name, bytes = chunk.len(), "processing stale input");
                    self.receive_chunk(&chunk);
                }
                Some(Ok(None)) => return Err(ModemError::Disconnected),
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }

    fn log_lines(&self, direction: Direction, lines: &[String]) {
        for line in lines {
            trace!(modem = %self.name, ?direction, line = %line, "at");
            let _ = self.events.send(ModemEvent::Log(LogLine {
                modem: self.name.clone(),
                direction,
                line: line.clone(),
            }));
        }
    }

    // ===== Unsolicited output =====

    fn receive_chunk(&mut self, chunk: &[u8]) {
        let lines = clean_lines(chunk);
        if lines.is_empty() {
            return;
        }
        self.log_lines(Direction::Rx, &lines);
        self.handle_unsolicited(lines);
    }

    /// Process lines outside a transaction; unclaimed non-final lines are
    /// kept for resync
    fn handle_unsolicited(&mut self, lines: Vec<String>) {
        let (frame, outcome) = self.processor.process_unsolicited(&self.driver, lines);
        let retained: Vec<String> = outcome
            .unprocessed(&frame)
            .into_iter()
            .filter(|line| !self.matcher.is_final(line))
            .collect();
        if !retained.is_empty() {
            debug!(modem = %self.name, lines = ?retained, "unprocessed output retained");
            self.processor.retain(retained);
        }
        self.apply_props(outcome.props);
    }

    /// React to props: update status, queue reads, fill and dispatch the
    /// inbox
    fn apply_props(&mut self, props: Vec<Prop>) {
        if props.is_empty() {
            return;
        }
        let mut received = false;
        let mut ringing = false;
        let mut caller = None;

        for prop in &props {
            match prop {
                Prop::StoredMessage { storage, index } | Prop::StoredReport { storage, index } => {
                    let locator = Locator::new(storage.clone(), *index);
                    debug!(modem = %self.name, %locator, "stored notification");
                    self.queue.push(Operation::Read {
                        locator,
                        reply: None,
                    });
                }
                Prop::Pdu { index, status, pdu } => {
                    let locator = match (index, status) {
                        (Some(index), _) => Some(Locator::new(self.storage_name(), *index)),
                        (None, Some(_)) => self.current_read.clone(),
                        (None, None) => None,
                    };
                    received |= self.accept_pdu(pdu, locator);
                }
                Prop::Signal { rssi, ber } => self.update_status(|s| {
                    s.signal = Some(SignalInfo {
                        rssi: *rssi,
                        ber: *ber,
                    })
                }),
                Prop::Ring => ringing = true,
                Prop::Caller { number } => caller = Some(number.clone()),
                Prop::Ussd {
                    status,
                    message,
                    dcs,
                } => {
                    let charset = self.status.read().charset.clone();
                    let text = decode_ussd(message, *dcs, charset.as_deref());
                    debug!(modem = %self.name, status, text = %text, "ussd reply");
                    self.last_ussd = Some((*status, text));
                }
                Prop::MemoryFull { storage } => {
                    warn!(modem = %self.name, storage = ?storage, "storage full");
                    self.update_status(|s| {
                        s.memory_full = true;
                        if let Some(name) = storage {
                            s.storage.name = Some(name.clone());
                        }
                    });
                }
                Prop::Storage { name, used, total } => {
                    let full = *total > 0 && used >= total;
                    self.update_status(|s| {
                        if let Some(name) = name {
                            s.storage.name = Some(name.clone());
                        }
                        s.storage.used = *used;
                        s.storage.total = *total;
                        s.memory_full |= full;
                    });
                }
                Prop::Smsc { number } => self.update_status(|s| s.smsc = Some(number.clone())),
                Prop::Network { operator } => {
                    self.update_status(|s| s.network = Some(operator.clone()))
                }
                Prop::Charset { charset } => {
                    self.update_status(|s| s.charset = Some(charset.clone()))
                }
                Prop::SmsMode { pdu } => self.update_status(|s| s.pdu_mode = Some(*pdu)),
                Prop::Sent { reference } => self.last_sent = Some(*reference),
                Prop::ModemError {
                    kind,
                    code,
                    diagnostic,
                } => {
                    warn!(modem = %self.name, %kind, code = ?code, diagnostic = %diagnostic, "modem error");
                }
            }
        }

        if ringing {
            info!(modem = %self.name, caller = ?caller, "incoming call");
            self.emit(ModemEvent::Ring { caller });
        }
        self.emit(ModemEvent::Props { props });
        if received {
            self.dispatch();
        }
    }

    /// Decode a PDU into the inbox; false if it was dropped
    fn accept_pdu(&mut self, pdu: &str, locator: Option<Locator>) -> bool {
        if locator.is_some() && self.inbox.iter().any(|e| e.locator == locator) {
            trace!(modem = %self.name, locator = ?locator, "already buffered");
            return false;
        }
        let decoded = match decode(pdu) {
            Ok(Decoded::Message(mut message)) => {
                if message.message_type == MessageType::Submit {
                    debug!(modem = %self.name, locator = ?locator, "ignoring stored outgoing message");
                    return false;
                }
                message.rehash(self.config.country_code.as_deref());
                Decoded::Message(message)
            }
            Ok(report) => report,
            Err(e) => {
                warn!(modem = %self.name, locator = ?locator, error = %e, "undecodable PDU");
                return false;
            }
        };
        self.inbox.push(InboxEntry { locator, decoded });
        true
    }

    // ===== Dispatch =====

    /// Emit everything in the inbox that is complete
    ///
    /// Status reports and single messages go out as they are. Parts of a
    /// concatenated message wait until every index of the group (same
    /// reference, total and sender) is buffered, then go out merged in index
    /// order under one hash, taking repeated copies of their parts along.
    /// Past [`MAX_PENDING_PARTS`] the oldest incomplete group is flushed.
    fn dispatch(&mut self) {
        self.set_flag(Flag::Processing, true);
        let mut at = 0;
        while at < self.inbox.len() {
            let concatenation = self.inbox[at].message().and_then(|m| m.concatenation);
            match concatenation {
                None => {
                    let entry = self.inbox.remove(at);
                    self.emit_entry(entry);
                }
                Some(concat) => {
                    let group = self.collect_group(at, concat);
                    if !group.complete {
                        at += 1;
                        continue;
                    }
                    let (parts, duplicates) = self.take_group(group);
                    self.emit_merged(parts, duplicates);
                }
            }
        }

        while self.inbox.len() > MAX_PENDING_PARTS {
            match self.inbox[0].message().and_then(|m| m.concatenation) {
                Some(concat) => {
                    let group = self.collect_group(0, concat);
                    warn!(
                        modem = %self.name,
                        reference = concat.reference,
                        buffered = group.members.len(),
                        total = concat.total,
                        "flushing incomplete message"
                    );
                    let (parts, duplicates) = self.take_group(group);
                    self.emit_merged(parts, duplicates);
                }
                None => {
                    let entry = self.inbox.remove(0);
                    self.emit_entry(entry);
                }
            }
        }
        self.set_flag(Flag::Processing, false);
    }

    /// Entries from `first` on that share its group
    fn collect_group(&self, first: usize, concat: Concatenation) -> Group {
        let mut group = Group::default();
        let Some(address) = self.inbox[first].message().map(|m| m.address.clone()) else {
            return group;
        };
        let mut seen = vec![false; concat.total as usize];
        for (i, entry) in self.inbox.iter().enumerate().skip(first) {
            let Some(message) = entry.message() else {
                continue;
            };
            let Some(other) = message.concatenation else {
                continue;
            };
            if other.reference != concat.reference
                || other.total != concat.total
                || message.address != address
            {
                continue;
            }
            match (other.index as usize).checked_sub(1) {
                Some(slot) if slot < seen.len() && !seen[slot] => {
                    seen[slot] = true;
                    group.members.push(i);
                }
                _ => group.duplicates.push(i),
            }
        }
        group.complete = seen.iter().all(|s| *s);
        group
    }

    /// Remove a group from the inbox as (parts, duplicates)
    fn take_group(&mut self, group: Group) -> (Vec<InboxEntry>, Vec<InboxEntry>) {
        let mut indices: Vec<(usize, bool)> = group
            .members
            .into_iter()
            .map(|i| (i, false))
            .chain(group.duplicates.into_iter().map(|i| (i, true)))
            .collect();
        indices.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let (mut parts, mut duplicates) = (Vec::new(), Vec::new());
        for (index, duplicate) in indices {
            let entry = self.inbox.remove(index);
            if duplicate {
                duplicates.push(entry);
            } else {
                parts.push(entry);
            }
        }
        (parts, duplicates)
    }

    fn emit_entry(&mut self, entry: InboxEntry) {
        match entry.decoded {
            Decoded::StatusReport(report) => {
                debug!(modem = %self.name, reference = report.reference, status = report.status, "status report");
                if let Some(locator) = entry.locator {
                    self.queue_delete(locator);
                }
                self.emit(ModemEvent::StatusReport(report));
            }
            Decoded::Message(message) => {
                let locations: Vec<Locator> = entry.locator.into_iter().collect();
                let inbound = InboundMessage {
                    hash: message.hash.clone(),
                    address: message.address.clone(),
                    smsc: message.smsc.clone(),
                    timestamp: message.timestamp,
                    scheme: message.scheme,
                    flash: message.flash,
                    text: message.text.clone(),
                    parts: vec![message],
                    locations,
                };
                self.finish_message(inbound);
            }
        }
    }

    /// Emit parts as one message; duplicates only contribute their slots
    fn emit_merged(&mut self, entries: Vec<InboxEntry>, duplicates: Vec<InboxEntry>) {
        if !duplicates.is_empty() {
            debug!(modem = %self.name, count = duplicates.len(), "dropping repeated parts");
        }
        let repeated: Vec<Locator> = duplicates.into_iter().filter_map(|e| e.locator).collect();
        let mut parts: Vec<(PduMessage, Option<Locator>)> = entries
            .into_iter()
            .filter_map(|entry| match entry.decoded {
                Decoded::Message(message) => Some((message, entry.locator)),
                Decoded::StatusReport(_) => None,
            })
            .collect();
        parts.sort_by_key(|(m, _)| m.concatenation.map(|c| c.index).unwrap_or_default());

        let (messages, locations): (Vec<PduMessage>, Vec<Option<Locator>>) =
            parts.into_iter().unzip();
        let Some(first) = messages.first() else {
            return;
        };
        let (address, smsc) = (first.address.clone(), first.smsc.clone());
        let (timestamp, scheme, flash) = (first.timestamp, first.scheme, first.flash);
        let text: String = messages.iter().map(|m| m.text.as_str()).collect();
        let hash = message_hash(
            timestamp.as_ref(),
            &normalize_number(&address, self.config.country_code.as_deref()),
            &text,
        );
        let inbound = InboundMessage {
            hash,
            address,
            smsc,
            timestamp,
            scheme,
            flash,
            text,
            parts: messages,
            locations: locations.into_iter().flatten().chain(repeated).collect(),
        };
        self.finish_message(inbound);
    }

    fn finish_message(&mut self, message: InboundMessage) {
        info!(
            modem = %self.name,
            from = %message.address,
            parts = message.parts.len(),
            hash = %message.hash,
            "message received"
        );
        let delete = self.config.delete_message_on_read
            || message.parts.iter().any(|p| p.status_report);
        if delete {
            for locator in &message.locations {
                self.queue_delete(locator.clone());
            }
        }
        self.emit(ModemEvent::Message(message));
    }

    fn queue_delete(&mut self, locator: Locator) {
        self.queue.push(Operation::Delete {
            locator,
            reply: None,
        });
    }

    // ===== Storage =====

    fn storage_name(&self) -> String {
        self.status
            .read()
            .storage
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_STORAGE.to_string())
    }

    async fn select_storage(&mut self, storage: &str) -> Result<()> {
        if self.status.read().storage.name.as_deref() == Some(storage) {
            return Ok(());
        }
        self.tx_cmd("CMD_SELECT_STORAGE", &[("STORAGE", storage.to_string())])
            .await?;
        self.update_status(|s| s.storage.name = Some(storage.to_string()));
        Ok(())
    }

    async fn list_messages(&mut self) -> Result<usize> {
        let response = self.tx_cmd("CMD_LIST_MESSAGES", &[]).await?;
        let listed = response
            .props
            .iter()
            .filter(|p| matches!(p, Prop::Pdu { .. }))
            .count();
        debug!(modem = %self.name, listed, "storage listed");
        Ok(listed)
    }

    async fn read_message(&mut self, locator: Locator) -> Result<()> {
        self.select_storage(&locator.storage).await?;
        self.current_read = Some(locator.clone());
        let result = self
            .tx_cmd("CMD_READ_MESSAGE", &[("INDEX", locator.index.to_string())])
            .await;
        self.current_read = None;
        result.map(|_| ())
    }

    async fn delete_message(&mut self, locator: &Locator) -> Result<()> {
        self.select_storage(&locator.storage).await?;
        self.tx_cmd("CMD_DELETE_MESSAGE", &[("INDEX", locator.index.to_string())])
            .await?;
        debug!(modem = %self.name, %locator, "deleted");
        Ok(())
    }

    /// Queue remediation for a full storage; true if something was queued
    fn schedule_memory_remediation(&mut self) -> bool {
        let (full, storage, total) = {
            let status = self.status.read();
            (
                status.memory_full,
                status.storage.name.clone(),
                status.storage.total,
            )
        };
        if !full || self.emptying {
            return false;
        }
        if !self.config.empty_when_full {
            warn!(modem = %self.name, storage = ?storage, "storage full, emptying disabled");
            self.update_status(|s| s.memory_full = false);
            return false;
        }
        self.emptying = true;
        self.queue.push(Operation::EmptyStorage {
            storage: storage.unwrap_or_else(|| DEFAULT_STORAGE.to_string()),
            total,
        });
        true
    }

    async fn empty_storage(&mut self, storage: String, total: u32) {
        info!(modem = %self.name, storage = %storage, total, "emptying full storage");
        let mut total = total;
        if total == 0 {
            if let Err(e) = self.tx_cmd("CMD_QUERY_STORAGE", &[]).await {
                warn!(modem = %self.name, error = %e, "storage query failed");
            }
            total = self.status.read().storage.total;
        }
        let mut deleted = 0;
        for index in 1..=total {
            if self.delete_message(&Locator::new(storage.clone(), index)).await.is_ok() {
                deleted += 1;
            }
        }
        info!(modem = %self.name, storage = %storage, deleted, "storage emptied");
        self.update_status(|s| {
            s.memory_full = false;
            s.storage.used = 0;
        });
        self.emptying = false;
    }

    // ===== Initialization =====

    /// Bring the modem up
    ///
    /// Best-effort init commands and identification, then charset, SMS
    /// mode, storage, SMSC and network in order; the first failure of those
    /// aborts. Monitors are attached last and the storage is listed.
    async fn initialize(&mut self) -> Result<()> {
        info!(modem = %self.name, driver = %self.driver.name, "Initializing modem");
        let chain = WorkChain::new()
            .then("init commands", |s: &mut Self| {
                Box::pin(async move {
                    let ids = s.config.init_commands.clone();
                    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                    s.txqueue(&ids).await;
                    Ok(())
                })
            })
            .then("identify", |s: &mut Self| Box::pin(s.identify()))
            .then("features", |s: &mut Self| Box::pin(s.enable_features()))
            .then_unless(
                "charset",
                |s: &Self| !s.driver.has("CMD_QUERY_CHARSET"),
                |s: &mut Self| Box::pin(s.query("CMD_QUERY_CHARSET")),
            )
            .then_unless(
                "sms mode",
                |s: &Self| !s.driver.has("CMD_QUERY_SMS_MODE"),
                |s: &mut Self| Box::pin(s.query("CMD_QUERY_SMS_MODE")),
            )
            .then("storage", |s: &mut Self| Box::pin(s.apply_default_storage()))
            .then_unless(
                "smsc",
                |s: &Self| !s.driver.has("CMD_QUERY_SMSC"),
                |s: &mut Self| Box::pin(s.query("CMD_QUERY_SMSC")),
            )
            .then_unless(
                "network",
                |s: &Self| !s.driver.has("CMD_QUERY_NETWORK"),
                |s: &mut Self| Box::pin(s.query("CMD_QUERY_NETWORK")),
            )
            .then("monitors", |s: &mut Self| {
                Box::pin(async move {
                    s.attach_monitors();
                    Ok(())
                })
            });

        let steps = chain.run(self).await?;
        self.update_status(|s| s.initialized = true);
        info!(modem = %self.name, driver = %self.driver.name, steps, "Modem initialized");
        self.queue.push(Operation::List(None));
        Ok(())
    }

    async fn query(&mut self, id: &'static str) -> Result<()> {
        self.tx_cmd(id, &[]).await.map(|_| ())
    }

    async fn identify(&mut self) -> Result<()> {
        let mut results = self.txqueue(IDENTIFY_COMMANDS).await;
        let mut text = |id: &str| {
            results
                .remove(id)
                .and_then(|r| r.ok())
                .and_then(|r| r.text())
        };
        let manufacturer = text("CMD_MANUFACTURER");
        let model = text("CMD_MODEL");
        let version = text("CMD_VERSION");
        let serial = text("CMD_SERIAL");
        let imsi = text("CMD_IMSI");
        info!(
            modem = %self.name,
            manufacturer = ?manufacturer,
            model = ?model,
            "modem identified"
        );

        let fingerprint = [manufacturer.as_deref(), model.as_deref()]
            .iter()
            .flatten()
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        self.update_status(|s| {
            s.device.manufacturer = manufacturer;
            s.device.model = model;
            s.device.version = version;
            s.device.serial = serial;
            s.device.imsi = imsi;
        });

        if self.config.driver.is_none() && !fingerprint.is_empty() {
            if let Some(profile) = self.registry.match_name(&fingerprint) {
                if profile.name != self.driver.name {
                    info!(modem = %self.name, driver = %profile.name, "driver selected");
                    self.set_driver(profile);
                }
            }
        }
        Ok(())
    }

    async fn enable_features(&mut self) -> Result<()> {
        let results = self.txqueue(FEATURE_COMMANDS).await;
        let ok = |id: &str| results.get(id).is_some_and(|r| r.is_ok());
        let (call, sms, ussd) = (
            ok("CMD_ENABLE_CLIP"),
            ok("CMD_ENABLE_CNMI"),
            ok("CMD_ENABLE_CUSD"),
        );
        self.update_status(|s| {
            s.device.call = call;
            s.device.sms = sms;
            s.device.ussd = ussd;
        });
        Ok(())
    }

    async fn apply_default_storage(&mut self) -> Result<()> {
        match self.config.default_storage.clone() {
            Some(storage) => {
                self.tx_cmd("CMD_SET_STORAGE", &[("STORAGE", storage.clone())])
                    .await?;
                self.update_status(|s| s.storage.name = Some(storage));
                Ok(())
            }
            None if self.driver.has("CMD_QUERY_STORAGE") => self.query("CMD_QUERY_STORAGE").await,
            None => Ok(()),
        }
    }

    fn attach_monitors(&mut self) {
        self.signal_monitor = !self.driver.has("RESPONSE_RSSI");
        self.memory_monitor = !self.driver.has("RESPONSE_MEMORY_FULL");
        debug!(
            modem = %self.name,
            signal_poll = self.signal_monitor,
            storage_poll = self.memory_monitor,
            "monitors attached"
        );
    }

    fn set_driver(&mut self, driver: Arc<DriverProfile>) {
        self.matcher = ResponseMatcher::from_driver(&driver);
        self.update_status(|s| s.driver = driver.name.clone());
        self.driver = driver;
    }

    // ===== Calls and USSD =====

    async fn dial(&mut self, number: String) -> Result<()> {
        self.tx_cmd("CMD_DIAL", &[("NUMBER", number.clone())]).await?;
        info!(modem = %self.name, number = %number, "dialed");
        self.emit(ModemEvent::Dial { number });
        Ok(())
    }

    /// Run a USSD code and wait for the `+CUSD` reply
    async fn ussd(&mut self, code: String) -> Result<Option<String>> {
        self.last_ussd = None;
        self.tx_cmd("CMD_USSD", &[("CODE", code.clone())]).await?;

        let deadline = Instant::now() + self.config.command_timeout;
        while self.last_ussd.is_none() {
            match tokio::time::timeout_at(deadline, self.transport.read()).await {
                Err(_) => break,
                Ok(Ok(Some(chunk))) => self.receive_chunk(&chunk),
                Ok(Ok(None)) => return Err(ModemError::Disconnected),
                Ok(Err(e)) => return Err(e),
            }
        }

        let (status, reply) = match self.last_ussd.take() {
            Some((status, text)) => (Some(status), Some(text)),
            None => {
                debug!(modem = %self.name, code = %code, "no USSD reply before timeout");
                (None, None)
            }
        };
        self.emit(ModemEvent::UssdDial {
            code,
            reply: reply.clone(),
            status,
        });
        Ok(reply)
    }

    // ===== Sending =====

    /// Split, encode and commit a message part by part
    ///
    /// Every part is encoded before anything is written. A failing part
    /// aborts the rest of the send.
    async fn send_message(&mut self, number: String, text: String) -> Result<SendReport> {
        validate_destination(&number)?;
        let scheme = CodingScheme::detect(&text);
        let parts = sms_split(&text, scheme)?;
        let total = parts.len();
        let total_u8 = u8::try_from(total).map_err(|_| {
            CodecError::InvalidHeader(format!("{} parts exceed the concatenation limit", total))
        })?;
        let reference = if total > 1 {
            Some(self.references.next()?)
        } else {
            None
        };

        let mut pdus: Vec<EncodedPdu> = Vec::with_capacity(total);
        for (i, part) in parts.into_iter().enumerate() {
            let mut submit = SmsSubmit::new(number.clone(), part);
            submit.scheme = scheme;
            submit.concatenation = reference.map(|reference| Concatenation {
                reference: u16::from(reference),
                total: total_u8,
                index: i as u8 + 1,
            });
            submit.validity_minutes = self.config.validity_minutes;
            submit.request_status = self.config.request_message_status;
            submit.request_reply = self.config.request_message_reply;
            submit.flash = self.config.send_message_as_flash;
            pdus.push(submit.encode()?);
        }

        let hash = message_hash(
            None,
            &normalize_number(&number, self.config.country_code.as_deref()),
            &text,
        );
        info!(modem = %self.name, to = %number, parts = total, scheme = ?scheme, "sending message");

        let mut chain = WorkChain::new().then("pdu mode", |s: &mut Self| {
            Box::pin(s.query("CMD_SET_PDU_MODE"))
        });
        for (i, pdu) in pdus.into_iter().enumerate() {
            let destination = number.clone();
            let hash = hash.clone();
            chain = chain.then(format!("part {}/{}", i + 1, total), move |s: &mut Self| {
                Box::pin(async move { s.send_part(destination, pdu, i + 1, total, hash).await })
            });
        }

        self.sent.clear();
        self.set_flag(Flag::Sending, true);
        let result = chain.run(self).await;
        self.set_flag(Flag::Sending, false);
        let parts = std::mem::take(&mut self.sent);
        result?;

        Ok(SendReport { hash, parts })
    }

    /// Commit one PDU
    ///
    /// With `PARAM_WAIT_PROMPT` set the payload is written once the prompt
    /// arrives; otherwise it follows the length header directly.
    async fn send_part(
        &mut self,
        destination: String,
        pdu: EncodedPdu,
        part: usize,
        total: usize,
        hash: String,
    ) -> Result<()> {
        let header = self
            .driver
            .cmd("CMD_SEND_PDU_LENGTH", &[("LEN", pdu.tp_length.to_string())])?;
        let payload = self.driver.cmd("CMD_SEND_PDU", &[("PDU", pdu.hex.clone())])?;
        self.last_sent = None;

        if self.driver.flag("PARAM_WAIT_PROMPT") {
            let prompt = Template::from_driver(&self.driver, "RESPONSE_PROMPT")
                .unwrap_or_else(|| Template::new("RESPONSE_PROMPT", ">"));
            self.tx(TxRequest::new(header).expect(prompt)).await?;
        } else {
            self.flush_stale()?;
            self.set_flag(Flag::Busy, true);
            let written = self.write_command(&header, true).await;
            self.set_flag(Flag::Busy, false);
            written?;
        }
        self.tx(TxRequest::new(payload).raw().timeout(self.config.send_timeout))
            .await?;

        let sent = SentPdu {
            destination,
            pdu: pdu.hex,
            part,
            total,
            reference: self.last_sent,
            hash,
        };
        debug!(modem = %self.name, part, total, reference = ?sent.reference, "part committed");
        self.sent.push(sent.clone());
        self.emit(ModemEvent::Pdu(sent));
        Ok(())
    }

    // ===== Status =====

    fn update_status(&self, f: impl FnOnce(&mut SessionStatus)) {
        f(&mut self.status.write());
    }

    fn set_flag(&self, flag: Flag, on: bool) {
        let changed = {
            let mut status = self.status.write();
            let slot = match flag {
                Flag::Busy => &mut status.flags.busy,
                Flag::Sending => &mut status.flags.sending,
                Flag::Processing => &mut status.flags.processing,
            };
            let changed = *slot != on;
            *slot = on;
            changed.then_some(status.flags)
        };
        if let Some(flags) = changed {
            self.emit_state(flags);
        }
    }

    fn emit_state(&self, flags: StatusFlags) {
        trace!(modem = %self.name, ?flags, "state");
        self.emit(ModemEvent::State {
            idle: flags.is_idle(),
            flags,
        });
    }

    fn emit(&self, event: ModemEvent) {
        let _ = self.events.send(event);
    }
}

impl<T: ModemTransport> std::fmt::Debug for ModemSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemSession")
            .field("name", &self.name)
            .field("driver", &self.driver.name)
            .field("queue", &self.queue)
            .field("inbox", &self.inbox.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModemConfigBuilder;
    use crate::test_utils::{deliver_pdu, test_timestamp, MockController, MockTransport};
    use smsgate_pdu::tp_length;

    type Parts = (
        ModemSession<MockTransport>,
        ModemHandle,
        broadcast::Receiver<ModemEvent>,
        MockController,
    );

    fn session() -> Parts {
        session_with(ModemConfigBuilder::new())
    }

    fn session_with(config: ModemConfigBuilder) -> Parts {
        let (transport, modem) = MockTransport::new();
        let config = config
            .name("test")
            .command_timeout(Duration::from_millis(200))
            .build();
        let (session, handle, events) =
            ModemSession::new(transport, Arc::new(DriverRegistry::with_generic()), config)
                .unwrap();
        (session, handle, events, modem)
    }

    fn drain_events(events: &mut broadcast::Receiver<ModemEvent>) -> Vec<ModemEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn messages(events: &mut broadcast::Receiver<ModemEvent>) -> Vec<InboundMessage> {
        drain_events(events)
            .into_iter()
            .filter_map(|e| match e {
                ModemEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn queued_deletes(session: &ModemSession<MockTransport>) -> Vec<u32> {
        let mut indices = Vec::new();
        for index in 0..100 {
            let queued = session.queue.contains(
                |op| matches!(op, Operation::Delete { locator, .. } if locator.index == index),
            );
            if queued {
                indices.push(index);
            }
        }
        indices
    }

    fn part(reference: u16, total: u8, index: u8, text: &str) -> String {
        let concat = Concatenation {
            reference,
            total,
            index,
        };
        deliver_pdu("+6281234567", text, Some(concat), test_timestamp()).unwrap()
    }

    fn cmgl(index: u32, pdu: &str) -> String {
        format!(
            "\r\n+CMGL: {},0,,{}\r\n{}\r\n",
            index,
            tp_length(pdu).unwrap(),
            pdu
        )
    }

    #[test]
    fn test_tx_response_text() {
        let response = TxResponse {
            kind: MatchKind::Ok,
            body: vec!["+CGMI: \"huawei\"".to_string()],
            props: Vec::new(),
        };
        assert_eq!(response.text().as_deref(), Some("huawei"));

        let plain = TxResponse {
            body: vec!["SIMCOM_Ltd".to_string()],
            ..response
        };
        assert_eq!(plain.text().as_deref(), Some("SIMCOM_Ltd"));
    }

    #[tokio::test]
    async fn test_tx_ok_with_body() {
        let (mut session, _handle, _events, modem) = session();
        modem.reply("AT+CSQ", "\r\n+CSQ: 17,99\r\n\r\nOK\r\n");

        let response = session.tx(TxRequest::new("AT+CSQ")).await.unwrap();
        assert_eq!(response.kind, MatchKind::Ok);
        assert_eq!(response.body, vec!["+CSQ: 17,99".to_string()]);
        assert_eq!(session.status.read().signal.map(|s| s.rssi), Some(17));
        assert_eq!(modem.writes(), vec!["AT+CSQ\r".to_string()]);
        assert!(session.status.read().flags.is_idle());
    }

    #[tokio::test]
    async fn test_tx_cme_error() {
        let (mut session, _handle, _events, modem) = session();
        modem.reply("AT+CPIN", "\r\n+CME ERROR: 100\r\n");

        let err = session.tx(TxRequest::new("AT+CPIN?")).await.unwrap_err();
        match err {
            ModemError::Modem { kind, code, .. } => {
                assert_eq!(kind, crate::error::ModemErrorKind::Cme);
                assert_eq!(code, Some(100));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_tx_reassembles_split_reply() {
        let (mut session, _handle, _events, modem) = session();
        modem.reply_chunks("AT+CSCA?", &["\r\n+CS", "CA: \"+62811\",145\r\n", "\r\nOK\r\n"]);

        session.tx(TxRequest::new("AT+CSCA?")).await.unwrap();
        assert_eq!(session.status.read().smsc.as_deref(), Some("+62811"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tx_timeout() {
        let (mut session, _handle, _events, modem) = session();
        modem.reply("AT+CUSD", "");

        let err = session.tx(TxRequest::new("AT+CUSD=1")).await.unwrap_err();
        assert!(matches!(err, ModemError::Timeout { duration_ms: 200 }));
        assert!(session.status.read().flags.is_idle());
    }

    #[tokio::test]
    async fn test_tx_extras_are_unsolicited() {
        let (mut session, _handle, _events, modem) = session();
        modem.reply("ATE0", "\r\nOK\r\n\r\n+CMTI: \"SM\",7\r\n");

        session.tx(TxRequest::new("ATE0")).await.unwrap();
        assert!(session
            .queue
            .contains(|op| matches!(op, Operation::Read { locator, .. } if locator.index == 7)));
    }

    #[tokio::test]
    async fn test_stale_input_processed_before_write() {
        let (mut session, _handle, _events, modem) = session();
        modem.inject("\r\nOK\r\n\r\n+CSQ: 9,0\r\n");
        modem.reply("AT+CGMI", "\r\nERROR\r\n");

        // The stale OK must not settle this transaction
        let err = session.tx(TxRequest::new("AT+CGMI")).await.unwrap_err();
        assert!(err.is_modem_error());
        assert_eq!(session.status.read().signal.map(|s| s.rssi), Some(9));
    }

    #[tokio::test]
    async fn test_txqueue_continues_past_failures() {
        let (mut session, _handle, _events, modem) = session();
        modem.reply("AT+CGMM", "\r\nERROR\r\n");

        let results = session
            .txqueue(&["CMD_MANUFACTURER", "CMD_MODEL", "CMD_VERSION", "CMD_BOGUS"])
            .await;
        assert!(results["CMD_MANUFACTURER"].is_ok());
        assert!(results["CMD_MODEL"].is_err());
        assert!(results["CMD_VERSION"].is_ok());
        assert!(matches!(
            results["CMD_BOGUS"],
            Err(ModemError::UnknownCommand(_))
        ));
        assert_eq!(modem.commands(), vec!["AT+CGMI", "AT+CGMM", "AT+CGMR"]);
    }

    #[tokio::test]
    async fn test_reassembly_out_of_order() {
        let (mut session, _handle, mut events, _modem) = session();
        let texts = ["one ", "two ", "three"];
        let mut listing = String::new();
        for index in [2u8, 1, 3] {
            let concat = Concatenation {
                reference: 42,
                total: 3,
                index,
            };
            let pdu = deliver_pdu(
                "+6281234567",
                texts[index as usize - 1],
                Some(concat),
                test_timestamp(),
            )
            .unwrap();
            listing.push_str(&cmgl(u32::from(index) + 10, &pdu));
        }

        session.receive_chunk(listing.as_bytes());
        assert!(session.inbox.is_empty());

        let messages: Vec<InboundMessage> = drain_events(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                ModemEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "one two three");
        assert_eq!(messages[0].parts.len(), 3);
        assert_eq!(
            messages[0].locations.iter().map(|l| l.index).collect::<Vec<_>>(),
            vec![11, 12, 13]
        );
    }

    #[tokio::test]
    async fn test_status_report_never_joins_group() {
        let (mut session, _handle, mut events, _modem) = session();
        let report = "00062A0A912618325476115071015064821150710151648200";
        let listing = [
            cmgl(12, &part(42, 3, 2, "two ")),
            cmgl(20, report),
            cmgl(11, &part(42, 3, 1, "one ")),
            cmgl(13, &part(42, 3, 3, "three")),
        ]
        .concat();

        session.receive_chunk(listing.as_bytes());
        assert!(session.inbox.is_empty());

        let events = drain_events(&mut events);
        let reports = events
            .iter()
            .filter(|e| matches!(e, ModemEvent::StatusReport(_)))
            .count();
        assert_eq!(reports, 1);
        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ModemEvent::Message(m) => Some(m.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["one two three"]);
    }

    #[tokio::test]
    async fn test_repeated_part_leaves_nothing_behind() {
        let (mut session, _handle, mut events, _modem) =
            session_with(ModemConfigBuilder::new().delete_message_on_read(true));
        let listing = [
            cmgl(1, &part(7, 2, 1, "hello ")),
            cmgl(2, &part(7, 2, 1, "hello ")),
            cmgl(3, &part(7, 2, 2, "world")),
        ]
        .concat();

        session.receive_chunk(listing.as_bytes());
        assert!(session.inbox.is_empty());

        let messages = messages(&mut events);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello world");
        assert_eq!(messages[0].parts.len(), 2);
        assert_eq!(queued_deletes(&session), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stale_groups_are_flushed() {
        let (mut session, _handle, mut events, _modem) = session();
        let listing: String = (0..=MAX_PENDING_PARTS as u16)
            .map(|reference| cmgl(u32::from(reference) + 1, &part(reference, 2, 1, "lost ")))
            .collect();

        session.receive_chunk(listing.as_bytes());
        assert_eq!(session.inbox.len(), MAX_PENDING_PARTS);

        let flushed = messages(&mut events);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].text, "lost ");
        assert_eq!(flushed[0].locations[0].index, 1);
    }

    #[tokio::test]
    async fn test_incomplete_group_waits() {
        let (mut session, _handle, mut events, _modem) = session();
        let concat = Concatenation {
            reference: 5,
            total: 2,
            index: 1,
        };
        let part = deliver_pdu("+628111", "half", Some(concat), test_timestamp()).unwrap();
        let single = deliver_pdu("+628222", "whole", None, test_timestamp()).unwrap();
        session.receive_chunk(format!("{}{}", cmgl(1, &part), cmgl(2, &single)).as_bytes());

        let texts: Vec<String> = drain_events(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                ModemEvent::Message(m) => Some(m.text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["whole".to_string()]);
        assert_eq!(session.inbox.len(), 1);
    }

    #[tokio::test]
    async fn test_status_report_emitted_and_deleted() {
        let (mut session, _handle, mut events, _modem) = session();
        let report = "00062A0A912618325476115071015064821150710151648200";
        session.receive_chunk(cmgl(4, report).as_bytes());

        let reports: Vec<_> = drain_events(&mut events)
            .into_iter()
            .filter(|e| matches!(e, ModemEvent::StatusReport(_)))
            .collect();
        assert_eq!(reports.len(), 1);
        assert!(session
            .queue
            .contains(|op| matches!(op, Operation::Delete { locator, .. } if locator.index == 4)));
    }

    #[tokio::test]
    async fn test_ring_with_caller() {
        let (mut session, _handle, mut events, _modem) = session();
        session.receive_chunk(b"\r\nRING\r\n\r\n+CLIP: \"+628123\",145,,,,0\r\n");

        let rings: Vec<Option<String>> = drain_events(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                ModemEvent::Ring { caller } => Some(caller),
                _ => None,
            })
            .collect();
        assert_eq!(rings, vec![Some("+628123".to_string())]);
    }

    #[tokio::test]
    async fn test_storage_full_from_cpms() {
        let (mut session, _handle, _events, _modem) = session();
        session.receive_chunk(b"\r\n+CPMS: \"SM\",30,30,\"SM\",30,30,\"SM\",30,30\r\n");
        let status = session.status.read().clone();
        assert!(status.memory_full);
        assert_eq!(status.storage.name.as_deref(), Some("SM"));
        assert_eq!(status.storage.total, 30);
    }
}
