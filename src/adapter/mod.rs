//! The public facade: one [`Adapter`] per physical connection.
//!
//! Composes a byte channel, the reliable link layer and the transport
//! multiplexer, owns their lifetime, and translates layer errors into the
//! crate-level [`Error`]. Domain payloads stay opaque: `send` takes
//! encoded command bytes and returns encoded response bytes; events are
//! decoded by the function supplied at construction.

use parking_lot::Mutex;

use crate::core::{
    ByteChannel, Error, EventDecoder, EventHandler, LogHandler, PacketStats, StatusHandler,
};
use crate::link::{LinkLayer, LinkLayerConfig, LinkState};
use crate::transport::{PacketKind, RpcTransport, TransportConfig};

/// A host-side connection to one remote peer.
///
/// All methods take `&self`; the adapter can be shared across threads.
/// Commands are serialized internally (one in flight at a time), events
/// arrive on a dedicated worker thread through the callback given to
/// [`open`](Self::open).
pub struct Adapter<E: Send + 'static> {
    transport: RpcTransport<E>,
    is_open: Mutex<bool>,
}

impl<E: Send + 'static> Adapter<E> {
    /// Build the full stack over `channel`. No I/O happens until `open`.
    pub fn new(
        channel: Box<dyn ByteChannel>,
        link_config: LinkLayerConfig,
        transport_config: TransportConfig,
        decoder: EventDecoder<E>,
    ) -> Self {
        let link = LinkLayer::new(channel, link_config);
        Self {
            transport: RpcTransport::new(link, transport_config, decoder),
            is_open: Mutex::new(false),
        }
    }

    /// Open the connection: open the channel, run the link handshake and
    /// start event delivery.
    ///
    /// `on_status` and `on_log` may be invoked from any internal thread;
    /// `on_event` only ever runs on the event worker thread.
    pub fn open(
        &self,
        on_status: StatusHandler,
        on_event: EventHandler<E>,
        on_log: LogHandler,
    ) -> Result<(), Error> {
        let mut is_open = self.is_open.lock();
        if *is_open {
            return Err(Error::AlreadyOpen);
        }
        self.transport.open(on_status, on_event, on_log)?;
        *is_open = true;
        Ok(())
    }

    /// Close the connection and stop all internal threads.
    pub fn close(&self) -> Result<(), Error> {
        let mut is_open = self.is_open.lock();
        if !*is_open {
            return Err(Error::NotOpen);
        }
        *is_open = false;
        self.transport.close()?;
        Ok(())
    }

    /// Send one encoded command and return the raw response bytes.
    pub fn send(&self, command: &[u8]) -> Result<Vec<u8>, Error> {
        if !*self.is_open.lock() {
            return Err(Error::NotOpen);
        }
        Ok(self.transport.send(command)?)
    }

    /// Ask the peer to reboot. Fire-and-forget: no response is awaited.
    pub fn reset_peer(&self) -> Result<(), Error> {
        if !*self.is_open.lock() {
            return Err(Error::NotOpen);
        }
        self.transport.send_no_response(PacketKind::Reset, &[])?;
        Ok(())
    }

    /// Current state of the underlying link.
    pub fn link_state(&self) -> LinkState {
        self.transport.link_state()
    }

    /// Packet counters of the underlying link.
    pub fn packet_stats(&self) -> PacketStats {
        self.transport.link_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::core::{DecodeError, StatusEvent};
    use crate::testutil::{MockChannel, MockHandle, PeerScript, WireOp, wait_until};

    /// Events in these tests are a (code, payload) pair.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestEvent {
        code: u8,
        body: Vec<u8>,
    }

    fn decode_event(bytes: &[u8]) -> Result<TestEvent, DecodeError> {
        let (&code, body) = bytes.split_first().ok_or(DecodeError::UnexpectedEof)?;
        Ok(TestEvent {
            code,
            body: body.to_vec(),
        })
    }

    fn echo_script() -> PeerScript {
        PeerScript {
            on_data: Some(Box::new(|data: &[u8]| {
                if data.first() == Some(&PacketKind::Command.as_byte()) {
                    let mut response = vec![PacketKind::Response.as_byte()];
                    response.extend_from_slice(&data[1..]);
                    vec![response]
                } else {
                    Vec::new()
                }
            })),
            ..PeerScript::default()
        }
    }

    struct Harness {
        adapter: Adapter<TestEvent>,
        peer: MockHandle,
        events: Arc<parking_lot::Mutex<Vec<TestEvent>>>,
    }

    fn harness() -> Harness {
        let (channel, peer) = MockChannel::new(echo_script());
        let link_config = LinkLayerConfig::default()
            .retransmission_interval(Duration::from_millis(40))
            .retry_limit(3)
            .open_timeout(Duration::from_millis(1000))
            .reset_hold(Duration::from_millis(10));
        let transport_config =
            TransportConfig::default().response_timeout(Duration::from_millis(200));
        Harness {
            adapter: Adapter::new(
                Box::new(channel),
                link_config,
                transport_config,
                decode_event,
            ),
            peer,
            events: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    fn open(harness: &Harness) -> Result<(), Error> {
        let events = Arc::clone(&harness.events);
        harness.adapter.open(
            Arc::new(|_event: StatusEvent, _message: &str| {}),
            Box::new(move |event: TestEvent| events.lock().push(event)),
            Arc::new(|_severity, _message| {}),
        )
    }

    #[test]
    fn test_open_send_close() {
        let h = harness();
        open(&h).unwrap();
        assert_eq!(h.adapter.link_state(), LinkState::Active);

        let response = h.adapter.send(&[0x60, 0x00]).unwrap();
        assert_eq!(response, vec![0x60, 0x00]);

        h.adapter.close().unwrap();
        assert_eq!(h.adapter.link_state(), LinkState::Closed);
    }

    #[test]
    fn test_double_open_rejected() {
        let h = harness();
        open(&h).unwrap();
        assert!(matches!(open(&h), Err(Error::AlreadyOpen)));
        h.adapter.close().unwrap();
    }

    #[test]
    fn test_operations_require_open() {
        let h = harness();
        assert!(matches!(h.adapter.send(&[1]), Err(Error::NotOpen)));
        assert!(matches!(h.adapter.reset_peer(), Err(Error::NotOpen)));
        assert!(matches!(h.adapter.close(), Err(Error::NotOpen)));
    }

    #[test]
    fn test_reset_peer_is_fire_and_forget() {
        let h = harness();
        open(&h).unwrap();

        h.adapter.reset_peer().unwrap();

        // The reset went out as a kind-tagged payload with no response.
        let ops = h.peer.oplog();
        assert!(
            ops.contains(&WireOp::HostData(vec![PacketKind::Reset.as_byte()])),
            "reset packet missing from {ops:?}"
        );

        h.adapter.close().unwrap();
    }

    #[test]
    fn test_events_reach_application_decoded() {
        let h = harness();
        open(&h).unwrap();

        h.peer
            .peer_send_data(&[PacketKind::Event.as_byte(), 0x10, 0xAA, 0xBB]);

        assert!(wait_until(Duration::from_secs(1), || {
            h.events.lock().len() == 1
        }));
        assert_eq!(
            h.events.lock().clone(),
            vec![TestEvent {
                code: 0x10,
                body: vec![0xAA, 0xBB],
            }]
        );

        h.adapter.close().unwrap();
    }

    #[test]
    fn test_packet_stats_accumulate() {
        let h = harness();
        open(&h).unwrap();

        h.adapter.send(&[0x01]).unwrap();
        let stats = h.adapter.packet_stats();
        assert!(stats.outgoing > 0);
        assert!(stats.incoming > 0);
        assert_eq!(stats.errors, 0);

        h.adapter.close().unwrap();
    }
}
