//! The boundary to the external HTTP/2 protocol engine.
//!
//! The engine owns framing, header compression, and flow-control
//! bookkeeping. This crate owns everything around it: who may touch the
//! engine when, and how inbound events reach the request that wants them.

use bytes::Bytes;

use crate::error::Result;

/// An inbound protocol event produced by [`ProtocolEngine::receive_data`].
///
/// This is a closed set; the connection dispatches it exhaustively.
#[derive(Debug, Clone)]
pub enum Event {
    /// Response body bytes arrived for a stream.
    DataReceived { stream_id: u32, data: Bytes },
    /// Response headers arrived for a stream.
    HeadersReceived {
        stream_id: u32,
        headers: Vec<(String, String)>,
    },
    /// The peer raised a flow-control window. A `stream_id` of 0 refers to
    /// the connection-wide window.
    WindowUpdated { stream_id: u32 },
    /// The peer half-closed a stream. No later event will reference it.
    StreamEnded { stream_id: u32 },
}

impl Event {
    /// The stream the event refers to (0 for connection-scoped events).
    pub fn stream_id(&self) -> u32 {
        match self {
            Event::DataReceived { stream_id, .. }
            | Event::HeadersReceived { stream_id, .. }
            | Event::WindowUpdated { stream_id }
            | Event::StreamEnded { stream_id } => *stream_id,
        }
    }
}

/// A sans-io HTTP/2 state machine, exclusively owned by one connection.
///
/// The engine never performs I/O itself: outbound bytes accumulate inside it
/// until [`data_to_send`](ProtocolEngine::data_to_send) is drained, and
/// inbound transport bytes are pushed through
/// [`receive_data`](ProtocolEngine::receive_data). Every method is called
/// under the owning connection's engine lock, so implementations need no
/// internal synchronization.
pub trait ProtocolEngine: Send {
    /// Queue the client connection preamble.
    fn initiate_connection(&mut self);

    /// The next stream identifier available for a client-initiated stream.
    fn next_stream_id(&mut self) -> Result<u32>;

    /// Queue a HEADERS frame for the stream.
    fn send_headers(
        &mut self,
        stream_id: u32,
        headers: &[(String, String)],
        end_stream: bool,
    ) -> Result<()>;

    /// Queue a DATA frame. `data` must fit within the stream's current
    /// flow-control window.
    fn send_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<()>;

    /// How many body bytes the peer currently permits on the stream.
    fn local_flow_control_window(&self, stream_id: u32) -> usize;

    /// The largest DATA payload the peer accepts in a single frame.
    fn max_outbound_frame_size(&self) -> usize;

    /// Decode inbound transport bytes into zero or more protocol events.
    fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>>;

    /// Tell the engine that received bytes were consumed by the application,
    /// so it can replenish the peer's window.
    fn acknowledge_received(&mut self, len: usize, stream_id: u32) -> Result<()>;

    /// Drain the bytes the engine wants written to the transport.
    fn data_to_send(&mut self) -> Bytes;

    /// Queue connection termination.
    fn close_connection(&mut self);
}
