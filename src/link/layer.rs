//! The reliable link layer.
//!
//! [`LinkLayer`] turns a [`ByteChannel`] into an at-least-once, ordered
//! packet channel with a single outstanding reliable packet per direction.
//! A dedicated thread drives the lifecycle state machine
//! (reset → SYNC → CONFIG → active, see [`LinkState`]); the channel's
//! reader thread feeds [`process_frame`](Shared::process_frame); callers of
//! [`send`](LinkLayer::send) block until their packet is acknowledged or
//! the retry budget runs out.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::core::constants::{
    DEFAULT_OPEN_TIMEOUT, DEFAULT_RESET_HOLD, DEFAULT_RETRANSMISSION_INTERVAL,
    DEFAULT_RETRY_LIMIT,
};
use crate::core::status::PacketCounters;
use crate::core::{
    ByteChannel, ChannelError, DataHandler, LogHandler, LogSeverity, PacketStats, StatusEvent,
    StatusHandler,
};
use crate::framing::{FrameAssembler, slip};

use super::packet::{self, LinkCapabilities, Packet, PacketError, PacketType};
use super::state::{ExitFlags, LinkState};

/// Errors surfaced by the link layer.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Operation requires a different link state.
    #[error("link is in state `{0}`")]
    InvalidState(LinkState),

    /// `open` was called twice.
    #[error("link is already open")]
    AlreadyOpen,

    /// Operation requires an open link.
    #[error("link is not open")]
    NotOpen,

    /// A reliable packet was never acknowledged within the retry budget.
    #[error("peer did not acknowledge the packet")]
    NoResponse,

    /// The handshake did not reach the Active state in time.
    #[error("link did not become active within {0:?}")]
    OpenTimeout(Duration),

    /// The payload cannot be represented on the wire.
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// The byte-stream endpoint failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// An internal thread could not be started.
    #[error("failed to start link thread: {0}")]
    Thread(std::io::Error),
}

/// Link layer tuning knobs.
///
/// All timing values are caller-configurable; the defaults live in
/// [`core::constants`](crate::core::constants).
#[derive(Debug, Clone)]
pub struct LinkLayerConfig {
    /// Interval between retransmissions of an unacknowledged packet, and
    /// between handshake packet repeats.
    pub retransmission_interval: Duration,
    /// Number of times a reliable or handshake packet is sent before the
    /// attempt is abandoned.
    pub retry_limit: u32,
    /// How long `open` waits for the link to reach the Active state.
    pub open_timeout: Duration,
    /// Quiet period after resetting the peer, giving it time to reboot.
    pub reset_hold: Duration,
}

impl Default for LinkLayerConfig {
    fn default() -> Self {
        Self {
            retransmission_interval: DEFAULT_RETRANSMISSION_INTERVAL,
            retry_limit: DEFAULT_RETRY_LIMIT,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            reset_hold: DEFAULT_RESET_HOLD,
        }
    }
}

impl LinkLayerConfig {
    /// Set the retransmission interval.
    pub fn retransmission_interval(mut self, interval: Duration) -> Self {
        self.retransmission_interval = interval;
        self
    }

    /// Set the retry limit.
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Set the open timeout.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the post-reset quiet period.
    pub fn reset_hold(mut self, hold: Duration) -> Self {
        self.reset_hold = hold;
        self
    }
}

/// Mutable state machine data, guarded by [`Shared::machine`].
#[derive(Debug)]
struct Machine {
    state: LinkState,
    flags: ExitFlags,
    /// Sequence number for the next outgoing reliable packet.
    seq: u8,
    /// Next sequence number expected from the peer (and the number sent in
    /// our acknowledgements).
    ack: u8,
    /// Peer parameters captured from the CONFIG response.
    capabilities: Option<LinkCapabilities>,
}

/// Registered callbacks toward the layer above.
#[derive(Default)]
struct Callbacks {
    data: Mutex<Option<DataHandler>>,
    status: Mutex<Option<StatusHandler>>,
    log: Mutex<Option<LogHandler>>,
}

/// Control packets the link layer originates.
#[derive(Debug, Clone, Copy)]
enum ControlFrame {
    Reset,
    Ack { ack: u8 },
    Sync,
    SyncResponse,
    Config,
    ConfigResponse,
}

/// State shared between the public API, the state machine thread and the
/// channel's reader thread.
struct Shared {
    config: LinkLayerConfig,
    machine: Mutex<Machine>,
    /// Signalled whenever a state machine input (flag) changes.
    machine_changed: Condvar,
    /// Signalled when an acknowledgement advances the sequence number.
    ack_advanced: Condvar,
    /// Signalled when the machine publishes a new current state.
    state_entered: Condvar,
    /// The byte-stream endpoint. Taken out (set to `None`) during close so
    /// the endpoint can join its reader thread without anyone holding this
    /// lock — the reader may itself be writing an acknowledgement.
    channel: Mutex<Option<Box<dyn ByteChannel>>>,
    callbacks: Callbacks,
    counters: PacketCounters,
}

impl Shared {
    fn log(&self, severity: LogSeverity, message: &str) {
        match severity {
            LogSeverity::Trace => trace!(target: "sdrpc::link", "{message}"),
            LogSeverity::Debug => debug!(target: "sdrpc::link", "{message}"),
            LogSeverity::Info => info!(target: "sdrpc::link", "{message}"),
            LogSeverity::Warning => warn!(target: "sdrpc::link", "{message}"),
            LogSeverity::Error | LogSeverity::Fatal => error!(target: "sdrpc::link", "{message}"),
        }
        let callback = self.callbacks.log.lock().clone();
        if let Some(callback) = callback {
            callback(severity, message);
        }
    }

    fn status(&self, event: StatusEvent, message: &str) {
        debug!(target: "sdrpc::link", %event, "{message}");
        let callback = self.callbacks.status.lock().clone();
        if let Some(callback) = callback {
            callback(event, message);
        }
    }

    fn flag_io_error(&self) {
        {
            let mut m = self.machine.lock();
            m.flags.io_error = true;
        }
        self.machine_changed.notify_all();
        self.ack_advanced.notify_all();
    }

    /// Write one SLIP frame to the byte stream.
    fn send_frame(&self, frame: &[u8]) -> Result<(), ChannelError> {
        self.channel
            .lock()
            .as_mut()
            .ok_or(ChannelError::NotOpen)?
            .send(frame)
    }

    /// Encode, frame and write a control packet. Write failures are logged;
    /// the retransmission machinery recovers or escalates.
    fn send_control(&self, control: ControlFrame) {
        let (packet_type, ack, payload): (PacketType, u8, &[u8]) = match control {
            ControlFrame::Reset => (PacketType::Reset, 0, &[]),
            ControlFrame::Ack { ack } => (PacketType::Ack, ack, &[]),
            ControlFrame::Sync => (PacketType::LinkControl, 0, &packet::SYNC),
            ControlFrame::SyncResponse => (PacketType::LinkControl, 0, &packet::SYNC_RESPONSE),
            ControlFrame::Config => (PacketType::LinkControl, 0, &packet::CONFIG),
            ControlFrame::ConfigResponse => {
                (PacketType::LinkControl, 0, &packet::CONFIG_RESPONSE)
            }
        };

        let encoded = match packet::encode(payload, 0, ack, false, false, packet_type) {
            Ok(encoded) => encoded,
            Err(error) => {
                self.log(
                    LogSeverity::Error,
                    &format!("failed to encode {packet_type} packet: {error}"),
                );
                return;
            }
        };

        let count = self.counters.count_outgoing();
        self.log(
            LogSeverity::Debug,
            &format!("{count:>5} -> {packet_type} ack:{ack} [{}]", hex_string(payload)),
        );

        let frame = slip::encode(&encoded);
        if let Err(error) = self.send_frame(&frame) {
            self.log(
                LogSeverity::Error,
                &format!("failed to write {packet_type} packet: {error}"),
            );
        }
    }

    /// Hand one accepted payload to the layer above.
    fn deliver(&self, payload: &[u8]) {
        if let Some(callback) = self.callbacks.data.lock().as_mut() {
            callback(payload);
        }
    }

    /// Process one assembled frame from the reader thread.
    fn process_frame(&self, raw: &[u8]) {
        let slip_payload = match slip::decode(raw) {
            Ok(payload) => payload,
            Err(framing_error) => {
                let errors = self.counters.count_error();
                self.log(
                    LogSeverity::Error,
                    &format!(
                        "framing error: {framing_error}, error count: {errors}, raw: [{}]",
                        hex_string(raw)
                    ),
                );
                return;
            }
        };

        let packet = match packet::decode(&slip_payload) {
            Ok(packet) => packet,
            Err(packet_error) => {
                let errors = self.counters.count_error();
                self.log(
                    LogSeverity::Error,
                    &format!(
                        "packet error: {packet_error}, error count: {errors}, raw: [{}]",
                        hex_string(&slip_payload)
                    ),
                );
                return;
            }
        };

        let count = self.counters.count_incoming();
        self.log(
            LogSeverity::Debug,
            &format!(
                "{count:>5} <- {} reliable:{} seq:{} ack:{} [{}]",
                packet.packet_type,
                if packet.reliable { "yes" } else { "no" },
                packet.seq,
                packet.ack,
                hex_string(&packet.payload)
            ),
        );

        let mut m = self.machine.lock();

        if m.state == LinkState::Reset {
            // Quiet period right after resetting the peer; drop everything.
            drop(m);
            self.machine_changed.notify_all();
            return;
        }

        match packet.packet_type {
            PacketType::LinkControl => self.handle_link_control(&mut m, &packet),
            PacketType::VendorSpecific => {
                if self.handle_data(&mut m, &packet) {
                    // `handle_data` released the lock to deliver upward.
                    self.machine_changed.notify_all();
                    return;
                }
            }
            PacketType::Ack => self.handle_ack(&mut m, &packet),
            PacketType::Reset => {
                self.log(LogSeverity::Warning, "ignoring reset packet from peer");
            }
        }

        drop(m);
        self.machine_changed.notify_all();
    }

    fn handle_link_control(&self, m: &mut Machine, packet: &Packet) {
        let payload = &packet.payload;
        match m.state {
            LinkState::Uninitialized => {
                if packet::is_sync_response(payload) {
                    m.flags.sync_response_received = true;
                } else if packet::is_sync(payload) {
                    self.send_control(ControlFrame::SyncResponse);
                }
            }
            LinkState::Initialized => {
                if packet::is_config_response(payload) {
                    m.flags.config_response_received = true;
                    if let Some(&field) = payload.get(2) {
                        m.capabilities = Some(LinkCapabilities::from_config_field(field));
                    }
                } else if packet::is_config(payload) {
                    self.send_control(ControlFrame::ConfigResponse);
                } else if packet::is_sync(payload) {
                    self.send_control(ControlFrame::SyncResponse);
                }
            }
            LinkState::Active => {
                if packet::is_sync(payload) {
                    // The peer restarted and wants a fresh handshake.
                    m.flags.peer_sync_received = true;
                } else if packet::is_config(payload) {
                    self.send_control(ControlFrame::ConfigResponse);
                }
            }
            state => {
                self.log(
                    LogSeverity::Debug,
                    &format!("ignoring link-control packet in state `{state}`"),
                );
            }
        }
    }

    /// Handle an inbound DATA packet. Returns `true` when the machine lock
    /// was consumed to deliver a payload upward.
    fn handle_data(&self, m: &mut parking_lot::MutexGuard<'_, Machine>, packet: &Packet) -> bool {
        if m.state != LinkState::Active || !packet.reliable {
            return false;
        }

        if packet.seq == m.ack {
            m.ack = packet::next_seq(m.ack);
            self.send_control(ControlFrame::Ack { ack: m.ack });
            let payload = packet.payload.clone();
            parking_lot::MutexGuard::unlocked(m, || {
                self.deliver(&payload);
            });
            true
        } else if packet.seq == packet::prev_seq(m.ack) {
            // Retransmission of the packet we already accepted (its ACK was
            // lost). Acknowledge again, deliver nothing.
            self.send_control(ControlFrame::Ack { ack: m.ack });
            false
        } else {
            self.log(
                LogSeverity::Warning,
                &format!(
                    "data packet out of sequence: got {}, expected {}",
                    packet.seq, m.ack
                ),
            );
            self.status(StatusEvent::UnexpectedPacket, "data packet out of sequence");
            m.flags.desync = true;
            false
        }
    }

    fn handle_ack(&self, m: &mut Machine, packet: &Packet) {
        if packet.ack == packet::next_seq(m.seq) {
            // Our outstanding packet was received; free the sender.
            m.seq = packet::next_seq(m.seq);
            self.ack_advanced.notify_all();
        } else if packet.ack == m.seq {
            // Duplicate acknowledgement of an earlier packet; nothing pending.
        } else if m.state == LinkState::Active {
            self.log(
                LogSeverity::Warning,
                &format!(
                    "acknowledgement out of sequence: got {}, local seq {}",
                    packet.ack, m.seq
                ),
            );
            m.flags.desync = true;
        } else {
            self.log(
                LogSeverity::Warning,
                &format!(
                    "ignoring acknowledgement received in state `{}`",
                    m.state
                ),
            );
        }
    }
}

/// Open/close bookkeeping, guarded separately from the machine data.
struct OpenControl {
    is_open: bool,
    machine_thread: Option<JoinHandle<()>>,
}

/// Reliable, order-preserving packet channel over a [`ByteChannel`].
pub struct LinkLayer {
    shared: Arc<Shared>,
    control: Mutex<OpenControl>,
    /// Serializes callers of [`send`](Self::send): one reliable packet in
    /// flight at a time.
    send_guard: Mutex<()>,
}

impl LinkLayer {
    /// Create a link layer over `channel`. No I/O happens until `open`.
    pub fn new(channel: Box<dyn ByteChannel>, config: LinkLayerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                machine: Mutex::new(Machine {
                    state: LinkState::Start,
                    flags: ExitFlags::default(),
                    seq: 0,
                    ack: 0,
                    capabilities: None,
                }),
                machine_changed: Condvar::new(),
                ack_advanced: Condvar::new(),
                state_entered: Condvar::new(),
                channel: Mutex::new(Some(channel)),
                callbacks: Callbacks::default(),
                counters: PacketCounters::default(),
            }),
            control: Mutex::new(OpenControl {
                is_open: false,
                machine_thread: None,
            }),
            send_guard: Mutex::new(()),
        }
    }

    /// Open the channel and establish the link.
    ///
    /// Blocks until the SYNC/CONFIG handshake completes or the configured
    /// open timeout expires. `on_data` receives every accepted reliable
    /// payload, on the channel's reader thread.
    pub fn open(
        &self,
        on_data: DataHandler,
        on_status: StatusHandler,
        on_log: LogHandler,
    ) -> Result<(), LinkError> {
        let mut control = self.control.lock();
        if control.is_open {
            return Err(LinkError::AlreadyOpen);
        }
        {
            let m = self.shared.machine.lock();
            if m.state != LinkState::Start {
                return Err(LinkError::InvalidState(m.state));
            }
        }

        *self.shared.callbacks.data.lock() = Some(on_data);
        *self.shared.callbacks.status.lock() = Some(on_status);
        *self.shared.callbacks.log.lock() = Some(on_log);

        let machine_shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("sdrpc-link".into())
            .spawn(move || machine_loop(&machine_shared))
            .map_err(LinkError::Thread)?;
        control.machine_thread = Some(handle);

        // Reader-side wiring: assemble frames, then run receive processing
        // on the channel's reader thread.
        let data_shared = Arc::clone(&self.shared);
        let mut assembler = FrameAssembler::new();
        let mut frames: Vec<Vec<u8>> = Vec::new();
        let channel_data: DataHandler = Box::new(move |bytes| {
            assembler.push(bytes, |frame| frames.push(frame.to_vec()));
            for frame in frames.drain(..) {
                data_shared.process_frame(&frame);
            }
        });

        let status_shared = Arc::clone(&self.shared);
        let channel_status: StatusHandler = Arc::new(move |event, message| {
            if event == StatusEvent::IoResourcesUnavailable {
                status_shared.flag_io_error();
            }
            status_shared.status(event, message);
        });

        let log_shared = Arc::clone(&self.shared);
        let channel_log: LogHandler =
            Arc::new(move |severity, message| log_shared.log(severity, message));

        let opened = match self.shared.channel.lock().as_mut() {
            Some(channel) => channel.open(channel_data, channel_status, channel_log),
            None => Err(ChannelError::NotOpen),
        };

        match opened {
            Ok(()) => {
                let mut m = self.shared.machine.lock();
                m.flags.opened = true;
                drop(m);
                self.shared.machine_changed.notify_all();
            }
            Err(channel_error) => {
                // Tear the state machine back down before reporting.
                {
                    let mut m = self.shared.machine.lock();
                    m.flags.close = true;
                }
                self.shared.machine_changed.notify_all();
                if let Some(handle) = control.machine_thread.take() {
                    let _ = handle.join();
                }
                return Err(LinkError::Channel(channel_error));
            }
        }

        control.is_open = true;

        // Wait for the handshake to finish, bailing out as soon as the
        // machine lands in a terminal state.
        let reached = {
            let mut m = self.shared.machine.lock();
            self.shared.state_entered.wait_while_for(
                &mut m,
                |m| m.state != LinkState::Active && !m.state.is_terminal(),
                self.shared.config.open_timeout,
            );
            m.state
        };

        match reached {
            LinkState::Active => Ok(()),
            LinkState::NoResponse => Err(LinkError::NoResponse),
            state @ (LinkState::Failed | LinkState::Closed) => Err(LinkError::InvalidState(state)),
            _ => Err(LinkError::OpenTimeout(self.shared.config.open_timeout)),
        }
    }

    /// Close the link: stop the state machine and the channel.
    pub fn close(&self) -> Result<(), LinkError> {
        let mut control = self.control.lock();
        if !control.is_open {
            return Err(LinkError::NotOpen);
        }
        control.is_open = false;

        {
            let mut m = self.shared.machine.lock();
            m.flags.close = true;
        }
        self.shared.machine_changed.notify_all();
        self.shared.ack_advanced.notify_all();

        if let Some(handle) = control.machine_thread.take() {
            let _ = handle.join();
        }

        // Take the endpoint out of its slot before closing it: its close
        // joins the reader thread, and the reader must be able to observe
        // an empty slot instead of blocking on the channel lock.
        let channel = self.shared.channel.lock().take();
        if let Some(mut channel) = channel {
            channel.close()?;
        }
        Ok(())
    }

    /// Send one reliable payload, blocking until it is acknowledged.
    ///
    /// Retransmits the identical frame every retransmission interval, up to
    /// the retry limit. On exhaustion the call fails with
    /// [`LinkError::NoResponse`] and the link renegotiates its handshake so
    /// the next send can start from a clean state.
    pub fn send(&self, payload: &[u8]) -> Result<(), LinkError> {
        let _sender = self.send_guard.lock();

        let mut m = self.shared.machine.lock();
        if m.state != LinkState::Active {
            return Err(LinkError::InvalidState(m.state));
        }

        let encoded =
            packet::encode(payload, m.seq, m.ack, true, true, PacketType::VendorSpecific)?;
        let frame = slip::encode(&encoded);
        let seq_before = m.seq;

        let mut attempts = 0;
        while attempts < self.shared.config.retry_limit {
            drop(m);

            let count = self.shared.counters.count_outgoing();
            self.shared.log(
                LogSeverity::Debug,
                &format!(
                    "{count:>5} -> DATA seq:{seq_before} ({} bytes, attempt {})",
                    payload.len(),
                    attempts + 1
                ),
            );
            self.shared.send_frame(&frame)?;
            attempts += 1;

            m = self.shared.machine.lock();
            self.shared.ack_advanced.wait_while_for(
                &mut m,
                |m| m.seq == seq_before && m.state == LinkState::Active && !m.flags.close,
                self.shared.config.retransmission_interval,
            );

            if m.seq != seq_before {
                return Ok(());
            }
            if m.flags.close {
                return Err(LinkError::NotOpen);
            }
            if m.state != LinkState::Active {
                return Err(LinkError::InvalidState(m.state));
            }
            // Interval elapsed with no acknowledgement: send the identical
            // frame again.
        }

        // Retry budget exhausted. Flag a desynchronization so the state
        // machine renegotiates the link for subsequent sends.
        m.flags.desync = true;
        drop(m);
        self.shared.machine_changed.notify_all();
        self.shared.status(
            StatusEvent::MaxRetriesReached,
            &format!(
                "no acknowledgement after {} attempts",
                self.shared.config.retry_limit
            ),
        );
        Err(LinkError::NoResponse)
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.shared.machine.lock().state
    }

    /// Block until the link reaches `target`, or `timeout` expires.
    /// Returns `true` if the state was reached.
    pub fn wait_for_state(&self, target: LinkState, timeout: Duration) -> bool {
        let mut m = self.shared.machine.lock();
        self.shared
            .state_entered
            .wait_while_for(&mut m, |m| m.state != target, timeout);
        m.state == target
    }

    /// Peer parameters captured from the CONFIG exchange, once Active.
    pub fn capabilities(&self) -> Option<LinkCapabilities> {
        self.shared.machine.lock().capabilities
    }

    /// Packet counter snapshot.
    pub fn stats(&self) -> PacketStats {
        self.shared.counters.snapshot()
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// =============================================================================
// STATE MACHINE THREAD
// =============================================================================

fn machine_loop(shared: &Arc<Shared>) {
    loop {
        let current = shared.machine.lock().state;
        if current.is_terminal() {
            break;
        }

        let next = match current {
            LinkState::Start => run_start(shared),
            LinkState::Reset => run_reset(shared),
            LinkState::Uninitialized => run_handshake(shared, HandshakePhase::Sync),
            LinkState::Initialized => run_handshake(shared, HandshakePhase::Config),
            LinkState::Active => run_active(shared),
            terminal => terminal,
        };

        {
            let mut m = shared.machine.lock();
            // Lifecycle flags are sticky across transitions: a close or I/O
            // failure raised mid-transition must not be wiped.
            let close = m.flags.close;
            let io_error = m.flags.io_error;
            m.flags.clear();
            m.flags.close = close;
            m.flags.io_error = io_error;
            m.state = next;
        }
        shared.log(
            LogSeverity::Debug,
            &format!("link state change: {current} -> {next}"),
        );
        shared.state_entered.notify_all();
        shared.ack_advanced.notify_all();
    }
}

fn run_start(shared: &Shared) -> LinkState {
    let mut m = shared.machine.lock();
    shared
        .machine_changed
        .wait_while(&mut m, |m| !m.flags.fulfilled(LinkState::Start));

    if m.flags.io_error {
        LinkState::Failed
    } else if m.flags.close {
        LinkState::Closed
    } else {
        LinkState::Reset
    }
}

fn run_reset(shared: &Shared) -> LinkState {
    shared.send_control(ControlFrame::Reset);
    shared.status(StatusEvent::ResetPerformed, "target reset performed");

    let mut m = shared.machine.lock();
    shared.machine_changed.wait_while_for(
        &mut m,
        |m| !m.flags.fulfilled(LinkState::Reset),
        shared.config.reset_hold,
    );

    if m.flags.io_error {
        LinkState::Failed
    } else if m.flags.close {
        LinkState::Closed
    } else {
        LinkState::Uninitialized
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakePhase {
    Sync,
    Config,
}

fn run_handshake(shared: &Shared, phase: HandshakePhase) -> LinkState {
    let state = match phase {
        HandshakePhase::Sync => LinkState::Uninitialized,
        HandshakePhase::Config => LinkState::Initialized,
    };

    let mut retries = shared.config.retry_limit;
    let mut m = shared.machine.lock();

    while !m.flags.fulfilled(state) && retries > 0 {
        parking_lot::MutexGuard::unlocked(&mut m, || {
            shared.send_control(match phase {
                HandshakePhase::Sync => ControlFrame::Sync,
                HandshakePhase::Config => ControlFrame::Config,
            });
        });
        match phase {
            HandshakePhase::Sync => m.flags.sync_sent = true,
            HandshakePhase::Config => m.flags.config_sent = true,
        }

        shared.machine_changed.wait_while_for(
            &mut m,
            |m| !m.flags.fulfilled(state),
            shared.config.retransmission_interval,
        );
        retries -= 1;
    }

    if m.flags.io_error {
        return LinkState::Failed;
    }
    if m.flags.close {
        return LinkState::Closed;
    }

    let answered = match phase {
        HandshakePhase::Sync => m.flags.sync_sent && m.flags.sync_response_received,
        HandshakePhase::Config => m.flags.config_sent && m.flags.config_response_received,
    };
    if answered {
        return match phase {
            HandshakePhase::Sync => LinkState::Initialized,
            HandshakePhase::Config => LinkState::Active,
        };
    }

    if retries == 0 {
        drop(m);
        shared.status(
            StatusEvent::MaxRetriesReached,
            &format!(
                "no response from device after {} attempts",
                shared.config.retry_limit
            ),
        );
        return LinkState::NoResponse;
    }

    LinkState::Failed
}

fn run_active(shared: &Shared) -> LinkState {
    {
        let mut m = shared.machine.lock();
        m.seq = 0;
        m.ack = 0;
    }
    shared.status(StatusEvent::ConnectionActive, "connection active");

    let mut m = shared.machine.lock();
    shared
        .machine_changed
        .wait_while(&mut m, |m| !m.flags.fulfilled(LinkState::Active));

    if m.flags.io_error {
        LinkState::Failed
    } else if m.flags.close {
        LinkState::Closed
    } else {
        // Peer-initiated SYNC or a sequence desynchronization: renegotiate.
        LinkState::Reset
    }
}
