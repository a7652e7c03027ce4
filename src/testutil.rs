//! In-memory scripted peer for exercising the stack without hardware.
//!
//! [`MockChannel`] implements [`ByteChannel`] and plays the role of the
//! remote device: it answers handshake packets, acknowledges reliable DATA
//! (optionally dropping the first N copies to simulate loss) and can be
//! driven from tests to emit DATA, ACK or arbitrary bytes toward the host.
//! Inbound traffic is delivered on a dedicated thread, like a real reader.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::core::{ByteChannel, ChannelError, DataHandler, LogHandler, StatusEvent, StatusHandler};
use crate::framing::slip;
use crate::link::packet::{self, PacketType};

/// One entry of the observed wire exchange, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WireOp {
    /// A reliable DATA payload the peer accepted from the host.
    HostData(Vec<u8>),
    /// A reliable DATA payload the peer sent to the host.
    PeerData(Vec<u8>),
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// Scripted behavior of the fake device.
pub(crate) struct PeerScript {
    /// Answer SYNC with SYNC_RESPONSE and CONFIG with CONFIG_RESPONSE.
    pub respond_handshake: bool,
    /// Swallow this many reliable DATA packets before reacting.
    pub drop_data: u32,
    /// Acknowledge reliable DATA packets.
    pub ack_data: bool,
    /// For each accepted DATA payload, payloads to send back as reliable
    /// DATA packets.
    pub on_data: Option<Responder>,
}

impl Default for PeerScript {
    fn default() -> Self {
        Self {
            respond_handshake: true,
            drop_data: 0,
            ack_data: true,
            on_data: None,
        }
    }
}

struct PeerState {
    script: PeerScript,
    /// Peer's next outgoing sequence number.
    seq: u8,
    /// Next sequence number the peer expects from the host.
    ack: u8,
    /// Every frame the host wrote, verbatim.
    writes: Vec<Vec<u8>>,
    /// Host DATA frames only (including retransmissions), verbatim.
    data_frames: Vec<Vec<u8>>,
    /// Accepted payload exchange, in order.
    oplog: Vec<WireOp>,
    /// Acknowledgement numbers received from the host.
    acks_from_host: Vec<u8>,
    /// Link RESET packets observed.
    resets: u32,
    inbound: Option<mpsc::Sender<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
    status: Option<StatusHandler>,
    open: bool,
}

/// The [`ByteChannel`] half handed to the link layer.
pub(crate) struct MockChannel {
    state: Arc<Mutex<PeerState>>,
}

/// The test-side half used to script and observe the peer.
#[derive(Clone)]
pub(crate) struct MockHandle {
    state: Arc<Mutex<PeerState>>,
}

impl MockChannel {
    pub fn new(script: PeerScript) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(PeerState {
            script,
            seq: 0,
            ack: 0,
            writes: Vec::new(),
            data_frames: Vec::new(),
            oplog: Vec::new(),
            acks_from_host: Vec::new(),
            resets: 0,
            inbound: None,
            reader: None,
            status: None,
            open: false,
        }));
        let handle = MockHandle {
            state: Arc::clone(&state),
        };
        (Self { state }, handle)
    }

    /// Default cooperative peer.
    pub fn responsive() -> (Self, MockHandle) {
        Self::new(PeerScript::default())
    }
}

fn inject(state: &mut PeerState, frame: Vec<u8>) {
    if let Some(tx) = &state.inbound {
        let _ = tx.send(frame);
    }
}

fn peer_send_control(state: &mut PeerState, payload: &[u8]) {
    let encoded = packet::encode(payload, 0, 0, false, false, PacketType::LinkControl)
        .expect("control packet encodes");
    inject(state, slip::encode(&encoded));
}

fn send_ack(state: &mut PeerState) {
    let ack = state.ack;
    let encoded =
        packet::encode(&[], 0, ack, false, false, PacketType::Ack).expect("ack packet encodes");
    inject(state, slip::encode(&encoded));
}

fn peer_send_data(state: &mut PeerState, payload: &[u8]) {
    let encoded = packet::encode(
        payload,
        state.seq,
        state.ack,
        true,
        true,
        PacketType::VendorSpecific,
    )
    .expect("data packet encodes");
    state.seq = packet::next_seq(state.seq);
    state.oplog.push(WireOp::PeerData(payload.to_vec()));
    inject(state, slip::encode(&encoded));
}

/// React to one frame written by the host.
fn react(state: &mut PeerState, frame: &[u8]) {
    let Ok(payload) = slip::decode(frame) else {
        return;
    };
    let Ok(pkt) = packet::decode(&payload) else {
        return;
    };

    match pkt.packet_type {
        PacketType::Reset => {
            state.resets += 1;
            state.seq = 0;
            state.ack = 0;
        }
        PacketType::LinkControl => {
            if !state.script.respond_handshake {
                return;
            }
            if packet::is_sync(&pkt.payload) {
                peer_send_control(state, &packet::SYNC_RESPONSE);
            } else if packet::is_config(&pkt.payload) {
                peer_send_control(state, &packet::CONFIG_RESPONSE);
            }
        }
        PacketType::Ack => {
            state.acks_from_host.push(pkt.ack);
        }
        PacketType::VendorSpecific => {
            if !pkt.reliable {
                return;
            }
            state.data_frames.push(frame.to_vec());
            if state.script.drop_data > 0 {
                state.script.drop_data -= 1;
                return;
            }
            if !state.script.ack_data {
                return;
            }
            if pkt.seq == state.ack {
                state.ack = packet::next_seq(state.ack);
                send_ack(state);
                state.oplog.push(WireOp::HostData(pkt.payload.clone()));
                let replies = state
                    .script
                    .on_data
                    .as_mut()
                    .map(|responder| responder(&pkt.payload))
                    .unwrap_or_default();
                for reply in replies {
                    peer_send_data(state, &reply);
                }
            } else if pkt.seq == packet::prev_seq(state.ack) {
                // Host retransmission; our previous ACK was lost.
                send_ack(state);
            }
        }
    }
}

impl ByteChannel for MockChannel {
    fn open(
        &mut self,
        mut on_data: DataHandler,
        on_status: StatusHandler,
        _on_log: LogHandler,
    ) -> Result<(), ChannelError> {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let reader = thread::Builder::new()
            .name("mock-reader".into())
            .spawn(move || {
                for frame in rx {
                    on_data(&frame);
                }
            })
            .map_err(ChannelError::Io)?;

        let mut state = self.state.lock();
        state.inbound = Some(tx);
        state.reader = Some(reader);
        state.status = Some(on_status);
        state.open = true;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ChannelError::NotOpen);
        }
        state.writes.push(bytes.to_vec());
        react(&mut state, bytes);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        let (reader, tx) = {
            let mut state = self.state.lock();
            state.open = false;
            (state.reader.take(), state.inbound.take())
        };
        // The reader loop ends once the sender is gone; join outside the
        // lock since the reader may be mid-callback, and that callback
        // path writes acknowledgements back through `send`.
        drop(tx);
        if let Some(reader) = reader {
            let _ = reader.join();
        }
        Ok(())
    }
}

impl MockHandle {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    pub fn data_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().data_frames.clone()
    }

    pub fn oplog(&self) -> Vec<WireOp> {
        self.state.lock().oplog.clone()
    }

    pub fn acks_from_host(&self) -> Vec<u8> {
        self.state.lock().acks_from_host.clone()
    }

    pub fn resets(&self) -> u32 {
        self.state.lock().resets
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Send a reliable DATA payload from the peer to the host.
    pub fn peer_send_data(&self, payload: &[u8]) {
        let mut state = self.state.lock();
        peer_send_data(&mut state, payload);
    }

    /// Re-send a DATA payload with an explicit sequence number (duplicate
    /// and out-of-order scenarios). Does not advance the peer sequence.
    pub fn peer_send_data_with_seq(&self, payload: &[u8], seq: u8) {
        let mut state = self.state.lock();
        let ack = state.ack;
        let encoded = packet::encode(payload, seq, ack, true, true, PacketType::VendorSpecific)
            .expect("data packet encodes");
        let frame = slip::encode(&encoded);
        inject(&mut state, frame);
    }

    /// Send a SYNC packet from the peer (simulates a peer reboot).
    pub fn peer_send_sync(&self) {
        let mut state = self.state.lock();
        let encoded = packet::encode(&packet::SYNC, 0, 0, false, false, PacketType::LinkControl)
            .expect("sync packet encodes");
        let frame = slip::encode(&encoded);
        inject(&mut state, frame);
    }

    /// Send a bare ACK with the given acknowledgement number.
    pub fn peer_send_ack(&self, ack: u8) {
        let mut state = self.state.lock();
        let encoded =
            packet::encode(&[], 0, ack, false, false, PacketType::Ack).expect("ack packet encodes");
        let frame = slip::encode(&encoded);
        inject(&mut state, frame);
    }

    /// Deliver arbitrary bytes to the host as-is.
    pub fn inject_raw(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        inject(&mut state, bytes.to_vec());
    }

    /// Report an I/O failure through the status callback, as a real
    /// endpoint would when its device disappears.
    pub fn report_io_error(&self) {
        let status = self.state.lock().status.clone();
        if let Some(status) = status {
            status(StatusEvent::IoResourcesUnavailable, "simulated i/o failure");
        }
    }

    /// Change whether the peer acknowledges DATA from now on.
    pub fn set_ack_data(&self, ack: bool) {
        self.state.lock().script.ack_data = ack;
    }

    /// Drop the next `n` reliable DATA packets from the host.
    pub fn set_drop_data(&self, n: u32) {
        self.state.lock().script.drop_data = n;
    }
}

/// Poll `predicate` until it holds or `timeout` expires.
pub(crate) fn wait_until(
    timeout: std::time::Duration,
    mut predicate: impl FnMut() -> bool,
) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(std::time::Duration::from_millis(5));
    }
    predicate()
}
