//! Handle for controlling a running session
//!
//! Every call becomes one [`Operation`] on the session's FIFO queue and
//! resolves when that operation settles. Operations on one session never
//! overlap; a failure only rejects its own call.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{ModemError, Result};
use crate::event::{Locator, ModemEvent, SentPdu, SessionStatus, SignalInfo, StorageInfo};

/// Reply channel of a queued operation; `None` for internal operations
pub type Reply<T> = Option<oneshot::Sender<Result<T>>>;

/// Settle a reply, logging failures nobody waits for
pub(crate) fn settle<T>(label: &str, reply: Reply<T>, result: Result<T>) {
    match reply {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => {
            if let Err(e) = result {
                tracing::debug!(operation = label, error = %e, "internal operation failed");
            }
        }
    }
}

/// Outcome of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Hash of destination and full text
    pub hash: String,
    /// Committed PDUs in part order
    pub parts: Vec<SentPdu>,
}

/// A unit of queued work
pub enum Operation {
    /// Initialization pipeline
    Init(Reply<()>),
    /// Send an SMS
    Send {
        /// Destination number
        number: String,
        /// Message text
        text: String,
        /// Reply
        reply: Reply<SendReport>,
    },
    /// Place a voice call
    Dial {
        /// Number to dial
        number: String,
        /// Reply
        reply: Reply<()>,
    },
    /// Hang up
    Hangup(Reply<()>),
    /// Answer an incoming call
    Answer(Reply<()>),
    /// USSD request; resolves with the decoded reply, if one arrived
    Ussd {
        /// USSD code
        code: String,
        /// Reply
        reply: Reply<Option<String>>,
    },
    /// List stored messages; resolves with the number of PDUs listed
    List(Reply<usize>),
    /// Read one stored message
    Read {
        /// Slot
        locator: Locator,
        /// Reply
        reply: Reply<()>,
    },
    /// Delete one stored message
    Delete {
        /// Slot
        locator: Locator,
        /// Reply
        reply: Reply<()>,
    },
    /// Query signal quality
    Signal(Reply<Option<SignalInfo>>),
    /// Query storage usage
    Storage(Reply<StorageInfo>),
    /// Pass-through command; resolves with the body lines
    Raw {
        /// Literal command, terminator added
        command: String,
        /// Reply
        reply: Reply<Vec<String>>,
    },
    /// Delete slots 1..=total of a full storage
    EmptyStorage {
        /// Storage name
        storage: String,
        /// Slot count
        total: u32,
    },
}

impl Operation {
    /// Short name for logs
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Init(_) => "init",
            Operation::Send { .. } => "send",
            Operation::Dial { .. } => "dial",
            Operation::Hangup(_) => "hangup",
            Operation::Answer(_) => "answer",
            Operation::Ussd { .. } => "ussd",
            Operation::List(_) => "list",
            Operation::Read { .. } => "read",
            Operation::Delete { .. } => "delete",
            Operation::Signal(_) => "signal",
            Operation::Storage(_) => "storage",
            Operation::Raw { .. } => "raw",
            Operation::EmptyStorage { .. } => "empty-storage",
        }
    }

    /// Reject the operation without running it
    pub fn reject(self, error: ModemError) {
        let label = self.label();
        match self {
            Operation::Init(reply) | Operation::Hangup(reply) | Operation::Answer(reply) => {
                settle(label, reply, Err(error))
            }
            Operation::Dial { reply, .. }
            | Operation::Read { reply, .. }
            | Operation::Delete { reply, .. } => settle(label, reply, Err(error)),
            Operation::Send { reply, .. } => settle(label, reply, Err(error)),
            Operation::Ussd { reply, .. } => settle(label, reply, Err(error)),
            Operation::List(reply) => settle(label, reply, Err(error)),
            Operation::Signal(reply) => settle(label, reply, Err(error)),
            Operation::Storage(reply) => settle(label, reply, Err(error)),
            Operation::Raw { reply, .. } => settle(label, reply, Err(error)),
            Operation::EmptyStorage { .. } => {}
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Send { number, text, .. } => f
                .debug_struct("Send")
                .field("number", number)
                .field("chars", &text.chars().count())
                .finish(),
            Operation::Read { locator, .. } | Operation::Delete { locator, .. } => {
                write!(f, "{}({})", self.label(), locator)
            }
            other => f.write_str(other.label()),
        }
    }
}

/// Commands for the session actor
#[derive(Debug)]
pub enum SessionCommand {
    /// Queue an operation
    Enqueue(Operation),
    /// Stop the session
    Shutdown,
}

/// Cloneable handle to a running [`ModemSession`](crate::session::ModemSession)
#[derive(Clone)]
pub struct ModemHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    status: Arc<RwLock<SessionStatus>>,
    events: broadcast::Sender<ModemEvent>,
}

impl ModemHandle {
    pub(crate) fn new(
        command_tx: mpsc::Sender<SessionCommand>,
        status: Arc<RwLock<SessionStatus>>,
        events: broadcast::Sender<ModemEvent>,
    ) -> Self {
        Self {
            command_tx,
            status,
            events,
        }
    }

    async fn request<R>(&self, build: impl FnOnce(Reply<R>) -> Operation) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::Enqueue(build(Some(tx))))
            .await
            .map_err(|_| ModemError::ChannelClosed)?;
        rx.await.map_err(|_| ModemError::ChannelClosed)?
    }

    /// Send an SMS, split and concatenated as needed
    pub async fn send_message(
        &self,
        number: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<SendReport> {
        let (number, text) = (number.into(), text.into());
        self.request(|reply| Operation::Send {
            number,
            text,
            reply,
        })
        .await
    }

    /// Place a voice call
    pub async fn dial(&self, number: impl Into<String>) -> Result<()> {
        let number = number.into();
        self.request(|reply| Operation::Dial { number, reply }).await
    }

    /// Hang up
    pub async fn hangup(&self) -> Result<()> {
        self.request(Operation::Hangup).await
    }

    /// Answer
    pub async fn answer(&self) -> Result<()> {
        self.request(Operation::Answer).await
    }

    /// Run a USSD code; resolves with the reply text if the network answered
    /// before the command timeout
    pub async fn ussd(&self, code: impl Into<String>) -> Result<Option<String>> {
        let code = code.into();
        self.request(|reply| Operation::Ussd { code, reply }).await
    }

    /// List stored messages; new ones are emitted as events
    pub async fn list_messages(&self) -> Result<usize> {
        self.request(Operation::List).await
    }

    /// Read one stored message
    pub async fn read_message(&self, storage: impl Into<String>, index: u32) -> Result<()> {
        let locator = Locator::new(storage, index);
        self.request(|reply| Operation::Read { locator, reply }).await
    }

    /// Delete one stored message
    pub async fn delete_message(&self, storage: impl Into<String>, index: u32) -> Result<()> {
        let locator = Locator::new(storage, index);
        self.request(|reply| Operation::Delete { locator, reply })
            .await
    }

    /// Query signal quality
    pub async fn query_signal(&self) -> Result<Option<SignalInfo>> {
        self.request(Operation::Signal).await
    }

    /// Query storage usage
    pub async fn query_storage(&self) -> Result<StorageInfo> {
        self.request(Operation::Storage).await
    }

    /// Send a literal command and return its body lines
    pub async fn raw(&self, command: impl Into<String>) -> Result<Vec<String>> {
        let command = command.into();
        self.request(|reply| Operation::Raw { command, reply })
            .await
    }

    /// Current status snapshot
    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.events.subscribe()
    }

    /// Stop the session; queued operations are rejected
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(SessionCommand::Shutdown)
            .await
            .map_err(|_| ModemError::ChannelClosed)
    }
}

impl std::fmt::Debug for ModemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemHandle")
            .field("modem", &self.status.read().name)
            .finish()
    }
}
