//! Command/response/event multiplexer.
//!
//! [`RpcTransport`] exposes a synchronous `send(command) -> response`
//! contract on top of the full-duplex [`LinkLayer`]. Every payload on the
//! wire starts with a one-byte [`PacketKind`] tag; responses wake the
//! blocked sender, events are queued and drained by one dedicated worker
//! thread so the link's read path never blocks on application code.
//!
//! The decoded event type is generic: the domain decoder is supplied at
//! construction and runs on the worker thread, and a decode failure drops
//! that event without disturbing the stream.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::constants::DEFAULT_RESPONSE_TIMEOUT;
use crate::core::{
    DataHandler, EventDecoder, EventHandler, LogHandler, LogSeverity, PacketStats, StatusHandler,
};
use crate::link::{LinkError, LinkLayer, LinkState};

/// Serialization packet kinds; the first byte of every payload carried
/// over the link once it is Active. Values match the peer firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Host-to-peer command.
    Command = 0,
    /// Peer-to-host reply to the outstanding command.
    Response = 1,
    /// Unsolicited peer-to-host event.
    Event = 2,
    /// Host-to-peer soft reset request (no response expected).
    Reset = 3,
}

impl PacketKind {
    /// Parse a kind tag byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Command),
            1 => Some(Self::Response),
            2 => Some(Self::Event),
            3 => Some(Self::Reset),
            _ => None,
        }
    }

    /// Wire value of this kind tag.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "command",
            Self::Response => "response",
            Self::Event => "event",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the transport multiplexer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying link failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// No response arrived within the response timeout.
    #[error("no response received for command")]
    ResponseTimeout,

    /// `open` was called twice.
    #[error("transport is already open")]
    AlreadyOpen,

    /// Operation requires an open transport.
    #[error("transport is not open")]
    NotOpen,

    /// The event worker thread could not be started.
    #[error("failed to start event worker: {0}")]
    WorkerSpawn(std::io::Error),

    /// `close` was called from the event worker itself. The worker is
    /// detached instead of joined (joining would deadlock) and the
    /// underlying link is left open: a resource leak, reported rather
    /// than silently accepted.
    #[error("close called from the event worker thread; worker detached")]
    WorkerSelfClose,
}

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long `send` waits for the matching response.
    pub response_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Set the response timeout.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// The single-slot buffer a blocked sender waits on.
#[derive(Default)]
struct ResponseSlot {
    /// A command is outstanding and expects a response.
    waiting: bool,
    /// The response payload, kind tag stripped.
    payload: Option<Vec<u8>>,
}

/// Event queue state, disjoint from the response slot so event throughput
/// never couples to command latency.
#[derive(Default)]
struct EventQueue {
    queue: VecDeque<Vec<u8>>,
    stop: bool,
}

struct TransportShared {
    response: Mutex<ResponseSlot>,
    response_ready: Condvar,
    events: Mutex<EventQueue>,
    events_available: Condvar,
    log: Mutex<Option<LogHandler>>,
}

impl TransportShared {
    fn log(&self, severity: LogSeverity, message: &str) {
        match severity {
            LogSeverity::Warning => warn!(target: "sdrpc::transport", "{message}"),
            _ => debug!(target: "sdrpc::transport", "{message}"),
        }
        let callback = self.log.lock().clone();
        if let Some(callback) = callback {
            callback(severity, message);
        }
    }

    /// Classify one inbound payload from the link's delivery callback.
    /// Runs on the channel's reader thread.
    fn classify(&self, bytes: &[u8]) {
        let Some((&kind, payload)) = bytes.split_first() else {
            self.log(LogSeverity::Warning, "dropping empty serialization packet");
            return;
        };

        match PacketKind::from_byte(kind) {
            Some(PacketKind::Response) => {
                let mut slot = self.response.lock();
                if slot.waiting {
                    slot.payload = Some(payload.to_vec());
                    drop(slot);
                    self.response_ready.notify_one();
                } else {
                    drop(slot);
                    self.log(
                        LogSeverity::Warning,
                        "discarding response with no command outstanding",
                    );
                }
            }
            Some(PacketKind::Event) => {
                let mut events = self.events.lock();
                events.queue.push_back(payload.to_vec());
                drop(events);
                self.events_available.notify_one();
            }
            Some(kind) => {
                self.log(
                    LogSeverity::Warning,
                    &format!("discarding unexpected {kind} packet"),
                );
            }
            None => {
                self.log(
                    LogSeverity::Warning,
                    &format!("discarding packet with unknown kind tag {kind:#04x}"),
                );
            }
        }
    }
}

/// The dedicated event worker: pops events in FIFO order, decodes them and
/// invokes the application callback, one at a time. Decode failures are
/// logged and dropped; the stream continues.
fn event_worker<E>(
    shared: &Arc<TransportShared>,
    decoder: EventDecoder<E>,
    mut handler: EventHandler<E>,
) {
    loop {
        let next = {
            let mut events = shared.events.lock();
            loop {
                if let Some(item) = events.queue.pop_front() {
                    break item;
                }
                if events.stop {
                    return;
                }
                shared.events_available.wait(&mut events);
            }
        };

        match decoder(&next) {
            Ok(event) => handler(event),
            Err(error) => {
                shared.log(
                    LogSeverity::Error,
                    &format!("failed to decode event: {error}"),
                );
            }
        }
    }
}

struct WorkerControl {
    is_open: bool,
    worker: Option<JoinHandle<()>>,
}

/// Synchronous command/response multiplexer over a [`LinkLayer`].
///
/// Generic over the decoded event type `E`; the decoder is a caller
/// supplied function invoked on the event worker thread.
pub struct RpcTransport<E: Send + 'static> {
    shared: Arc<TransportShared>,
    link: LinkLayer,
    config: TransportConfig,
    decoder: EventDecoder<E>,
    control: Mutex<WorkerControl>,
    /// Serializes commands: one in flight per transport instance.
    send_guard: Mutex<()>,
}

impl<E: Send + 'static> RpcTransport<E> {
    /// Create a transport over `link`. No I/O happens until `open`.
    pub fn new(link: LinkLayer, config: TransportConfig, decoder: EventDecoder<E>) -> Self {
        Self {
            shared: Arc::new(TransportShared {
                response: Mutex::new(ResponseSlot::default()),
                response_ready: Condvar::new(),
                events: Mutex::new(EventQueue::default()),
                events_available: Condvar::new(),
                log: Mutex::new(None),
            }),
            link,
            config,
            decoder,
            control: Mutex::new(WorkerControl {
                is_open: false,
                worker: None,
            }),
            send_guard: Mutex::new(()),
        }
    }

    /// Open the underlying link (running its handshake) and start the
    /// event worker.
    pub fn open(
        &self,
        on_status: StatusHandler,
        on_event: EventHandler<E>,
        on_log: LogHandler,
    ) -> Result<(), TransportError> {
        let mut control = self.control.lock();
        if control.is_open {
            return Err(TransportError::AlreadyOpen);
        }

        *self.shared.log.lock() = Some(Arc::clone(&on_log));

        let classify_shared = Arc::clone(&self.shared);
        let on_data: DataHandler = Box::new(move |bytes| classify_shared.classify(bytes));
        if let Err(link_error) = self.link.open(on_data, on_status, on_log) {
            // The channel may have opened even though the handshake failed;
            // close it so no reader thread outlives the failed open.
            let _ = self.link.close();
            return Err(link_error.into());
        }

        let worker_shared = Arc::clone(&self.shared);
        let decoder = self.decoder;
        let worker = thread::Builder::new()
            .name("sdrpc-events".into())
            .spawn(move || event_worker(&worker_shared, decoder, on_event))
            .map_err(|spawn_error| {
                let _ = self.link.close();
                TransportError::WorkerSpawn(spawn_error)
            })?;

        control.worker = Some(worker);
        control.is_open = true;
        Ok(())
    }

    /// Send a command and block for its response (kind tag stripped).
    ///
    /// Only one command is in flight at a time; concurrent callers queue on
    /// the send lock. The link layer's retry budget has already been spent
    /// when a [`TransportError::ResponseTimeout`] is reported.
    pub fn send(&self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let _sender = self.send_guard.lock();
        if !self.control.lock().is_open {
            return Err(TransportError::NotOpen);
        }

        {
            let mut slot = self.shared.response.lock();
            slot.waiting = true;
            slot.payload = None;
        }

        let mut packet = Vec::with_capacity(command.len() + 1);
        packet.push(PacketKind::Command.as_byte());
        packet.extend_from_slice(command);

        if let Err(link_error) = self.link.send(&packet) {
            let mut slot = self.shared.response.lock();
            slot.waiting = false;
            slot.payload = None;
            return Err(link_error.into());
        }

        let mut slot = self.shared.response.lock();
        self.shared.response_ready.wait_while_for(
            &mut slot,
            |slot| slot.payload.is_none(),
            self.config.response_timeout,
        );
        slot.waiting = false;

        match slot.payload.take() {
            Some(payload) => Ok(payload),
            None => {
                drop(slot);
                self.shared
                    .log(LogSeverity::Warning, "no response received for command");
                Err(TransportError::ResponseTimeout)
            }
        }
    }

    /// Send a payload for which no response is expected (fire-and-forget).
    pub fn send_no_response(
        &self,
        kind: PacketKind,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let _sender = self.send_guard.lock();
        if !self.control.lock().is_open {
            return Err(TransportError::NotOpen);
        }

        let mut packet = Vec::with_capacity(payload.len() + 1);
        packet.push(kind.as_byte());
        packet.extend_from_slice(payload);
        self.link.send(&packet)?;
        Ok(())
    }

    /// Stop the event worker and close the underlying link.
    ///
    /// Safe to call concurrently with in-flight sends. When invoked from
    /// the event callback itself the worker cannot be joined; it is
    /// detached and [`TransportError::WorkerSelfClose`] is returned.
    pub fn close(&self) -> Result<(), TransportError> {
        let mut control = self.control.lock();
        if !control.is_open {
            return Err(TransportError::NotOpen);
        }
        control.is_open = false;

        {
            let mut events = self.shared.events.lock();
            events.stop = true;
        }
        self.shared.events_available.notify_all();

        if let Some(worker) = control.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return Err(TransportError::WorkerSelfClose);
            }
            let _ = worker.join();
        }

        self.link.close()?;
        Ok(())
    }

    /// Current state of the underlying link.
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Packet counters of the underlying link.
    pub fn link_stats(&self) -> PacketStats {
        self.link.stats()
    }
}
