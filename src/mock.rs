//! Utilities to control h2mux during tests.
//!
//! [`expect_connect`] prepares a fake peer wired to an in-memory duplex
//! pipe; [`connect`] then builds a real [`Connection`] against it, through
//! the same construction path as a live connect. The real wire engine is an
//! external collaborator, so the harness carries its own: [`MockEngine`], a
//! [`ProtocolEngine`] speaking a trivially framed private wire format with
//! genuine per-stream flow-control bookkeeping. Both ends of the pipe run
//! one.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use once_cell::sync::Lazy;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::connection::Connection;
use crate::engine::{Event, ProtocolEngine};
use crate::error::{Error, Result};

/// Initial per-stream flow-control window unless overridden.
const DEFAULT_INITIAL_WINDOW: usize = 65_535;
/// Largest DATA payload per frame unless overridden.
const DEFAULT_MAX_FRAME_SIZE: usize = 16_384;
/// In-memory pipe capacity, large enough that tests never block on writes.
const PIPE_CAPACITY: usize = 1024 * 1024;

/// Fake peers waiting for a connection attempt, keyed by host and port.
///
/// Process-wide state scoped to the test run; [`reset`] clears it between
/// independent test cases.
static SERVERS: Lazy<Mutex<HashMap<(String, u16), DuplexStream>>> =
    Lazy::new(Default::default);

/// Prepare for an upcoming attempt to connect to `host:port`.
///
/// Builds a [`MockServer`] attached to one end of an in-memory pipe and
/// parks the other end in the registry for [`connect`] to claim.
///
/// # Panics
///
/// If an expectation for `host:port` is already installed.
pub async fn expect_connect(host: &str, port: u16) -> MockServer {
    let (client_end, server_end) = tokio::io::duplex(PIPE_CAPACITY);
    let server = MockServer::new(host, port, server_end).await;
    let previous = SERVERS
        .lock()
        .unwrap()
        .insert((host.to_string(), port), client_end);
    assert!(
        previous.is_none(),
        "already expecting a connection to {}:{}",
        host,
        port
    );
    server
}

/// Clear any expectations left over from a previous test case.
pub fn reset() {
    SERVERS.lock().unwrap().clear();
}

/// Connect a [`Connection`] to a previously prepared fake peer, using a
/// default client [`MockEngine`].
///
/// # Panics
///
/// If no expectation for `host:port` was installed.
pub async fn connect(host: &str, port: u16) -> Result<Connection> {
    connect_with(host, port, MockEngine::client()).await
}

/// Like [`connect`], with control over the client engine's window and frame
/// size knobs.
pub async fn connect_with(host: &str, port: u16, engine: MockEngine) -> Result<Connection> {
    // Release the registry lock before panicking so a missing expectation
    // does not poison it for other tests in the process.
    let transport = SERVERS
        .lock()
        .unwrap()
        .remove(&(host.to_string(), port));
    let transport =
        transport.unwrap_or_else(|| panic!("no expected connection to {}:{}", host, port));
    Connection::from_transport(host, Box::new(transport), Box::new(engine)).await
}

// Wire format shared by both ends of the pipe: a fixed header of kind (1),
// flags (1), stream id (4, big-endian), payload length (4, big-endian),
// followed by the payload. Headers payloads are length-prefixed name/value
// pairs; window update payloads are a 4-byte increment.

const FRAME_HEADER_LEN: usize = 10;

mod flags {
    pub const END_STREAM: u8 = 0x1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Preamble,
    Headers,
    Data,
    WindowUpdate,
    Shutdown,
}

impl FrameKind {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Preamble),
            1 => Ok(Self::Headers),
            2 => Ok(Self::Data),
            3 => Ok(Self::WindowUpdate),
            4 => Ok(Self::Shutdown),
            other => Err(Error::Protocol(format!("unknown frame kind {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
struct Frame {
    kind: FrameKind,
    flags: u8,
    stream_id: u32,
    payload: Bytes,
}

impl Frame {
    fn end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }
}

fn encode_frame(out: &mut BytesMut, frame: &Frame) {
    out.put_u8(frame.kind as u8);
    out.put_u8(frame.flags);
    out.put_u32(frame.stream_id);
    out.put_u32(frame.payload.len() as u32);
    out.extend_from_slice(&frame.payload);
}

fn encode_headers(headers: &[(String, String)]) -> Bytes {
    let mut payload = BytesMut::new();
    for (name, value) in headers {
        payload.put_u16(name.len() as u16);
        payload.extend_from_slice(name.as_bytes());
        payload.put_u16(value.len() as u16);
        payload.extend_from_slice(value.as_bytes());
    }
    payload.freeze()
}

fn decode_header_field(payload: &mut Bytes, what: &str) -> Result<String> {
    if payload.remaining() < 2 {
        return Err(Error::Protocol(format!("truncated header {}", what)));
    }
    let len = payload.get_u16() as usize;
    if payload.remaining() < len {
        return Err(Error::Protocol(format!("truncated header {}", what)));
    }
    String::from_utf8(payload.split_to(len).to_vec())
        .map_err(|_| Error::Protocol(format!("header {} is not utf-8", what)))
}

fn decode_headers(mut payload: Bytes) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    while payload.has_remaining() {
        let name = decode_header_field(&mut payload, "name")?;
        let value = decode_header_field(&mut payload, "value")?;
        headers.push((name, value));
    }
    Ok(headers)
}

/// Incremental frame parser; frames may arrive split across reads or
/// coalesced into one.
#[derive(Default)]
struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn next(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let kind = FrameKind::from_u8(self.buf[0])?;
        let frame_flags = self.buf[1];
        let stream_id = u32::from_be_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]]);
        let len = u32::from_be_bytes([self.buf[6], self.buf[7], self.buf[8], self.buf[9]]) as usize;
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();
        Ok(Some(Frame {
            kind,
            flags: frame_flags,
            stream_id,
            payload,
        }))
    }
}

/// A stand-in for the external protocol engine.
///
/// Tracks a send window per stream, refuses DATA beyond it, and raises it on
/// inbound window updates, so the connection's body pump is exercised
/// against real accounting. The window and frame-size knobs exist so tests
/// can force chunking.
pub struct MockEngine {
    next_stream_id: u32,
    initial_window: usize,
    max_frame_size: usize,
    /// Send window per stream the engine has seen headers for, either way.
    send_windows: HashMap<u32, usize>,
    out: BytesMut,
    decoder: FrameDecoder,
}

impl MockEngine {
    /// An engine in client mode: stream ids start at 1 and stay odd.
    pub fn client() -> Self {
        Self::with_first_stream_id(1)
    }

    /// An engine in server mode, for the peer end of the pipe.
    pub fn server() -> Self {
        Self::with_first_stream_id(2)
    }

    fn with_first_stream_id(first: u32) -> Self {
        Self {
            next_stream_id: first,
            initial_window: DEFAULT_INITIAL_WINDOW,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_windows: HashMap::new(),
            out: BytesMut::new(),
            decoder: FrameDecoder::default(),
        }
    }

    /// Override the initial per-stream send window.
    pub fn initial_window(mut self, window: usize) -> Self {
        self.initial_window = window;
        self
    }

    /// Override the maximum DATA payload per frame.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Queue a window update raising the peer's send window for `stream_id`.
    pub fn send_window_update(&mut self, stream_id: u32, increment: u32) {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32(increment);
        encode_frame(
            &mut self.out,
            &Frame {
                kind: FrameKind::WindowUpdate,
                flags: 0,
                stream_id,
                payload: payload.freeze(),
            },
        );
    }

    fn push_frame(&mut self, kind: FrameKind, flags: u8, stream_id: u32, payload: Bytes) {
        encode_frame(
            &mut self.out,
            &Frame {
                kind,
                flags,
                stream_id,
                payload,
            },
        );
    }
}

impl ProtocolEngine for MockEngine {
    fn initiate_connection(&mut self) {
        self.push_frame(FrameKind::Preamble, 0, 0, Bytes::new());
    }

    fn next_stream_id(&mut self) -> Result<u32> {
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        Ok(id)
    }

    fn send_headers(
        &mut self,
        stream_id: u32,
        headers: &[(String, String)],
        end_stream: bool,
    ) -> Result<()> {
        self.send_windows
            .entry(stream_id)
            .or_insert(self.initial_window);
        let frame_flags = if end_stream { flags::END_STREAM } else { 0 };
        let payload = encode_headers(headers);
        self.push_frame(FrameKind::Headers, frame_flags, stream_id, payload);
        Ok(())
    }

    fn send_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<()> {
        let window = self
            .send_windows
            .get_mut(&stream_id)
            .ok_or_else(|| Error::Protocol(format!("data for unknown stream {}", stream_id)))?;
        if data.len() > *window {
            return Err(Error::Protocol(format!(
                "stream {}: {} bytes exceed the {} byte window",
                stream_id,
                data.len(),
                window
            )));
        }
        *window -= data.len();
        let frame_flags = if end_stream { flags::END_STREAM } else { 0 };
        self.push_frame(FrameKind::Data, frame_flags, stream_id, data);
        Ok(())
    }

    fn local_flow_control_window(&self, stream_id: u32) -> usize {
        self.send_windows.get(&stream_id).copied().unwrap_or(0)
    }

    fn max_outbound_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>> {
        self.decoder.push(data);
        let mut events = Vec::new();
        while let Some(frame) = self.decoder.next()? {
            match frame.kind {
                FrameKind::Preamble | FrameKind::Shutdown => {}
                FrameKind::Headers => {
                    // A stream the peer opened is one we may answer on.
                    self.send_windows
                        .entry(frame.stream_id)
                        .or_insert(self.initial_window);
                    events.push(Event::HeadersReceived {
                        stream_id: frame.stream_id,
                        headers: decode_headers(frame.payload.clone())?,
                    });
                    if frame.end_stream() {
                        events.push(Event::StreamEnded {
                            stream_id: frame.stream_id,
                        });
                    }
                }
                FrameKind::Data => {
                    events.push(Event::DataReceived {
                        stream_id: frame.stream_id,
                        data: frame.payload.clone(),
                    });
                    if frame.end_stream() {
                        events.push(Event::StreamEnded {
                            stream_id: frame.stream_id,
                        });
                    }
                }
                FrameKind::WindowUpdate => {
                    let mut payload = frame.payload.clone();
                    if payload.len() != 4 {
                        return Err(Error::Protocol("malformed window update".into()));
                    }
                    let increment = payload.get_u32() as usize;
                    if frame.stream_id != 0 {
                        *self.send_windows.entry(frame.stream_id).or_insert(0) += increment;
                    }
                    events.push(Event::WindowUpdated {
                        stream_id: frame.stream_id,
                    });
                }
            }
        }
        Ok(events)
    }

    fn acknowledge_received(&mut self, len: usize, stream_id: u32) -> Result<()> {
        self.send_window_update(stream_id, len as u32);
        Ok(())
    }

    fn data_to_send(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    fn close_connection(&mut self) {
        self.push_frame(FrameKind::Shutdown, 0, 0, Bytes::new());
    }
}

/// The fake peer: the far end of the pipe, driven manually by a test.
pub struct MockServer {
    host: String,
    port: u16,
    stream: DuplexStream,
    engine: MockEngine,
    decoder: FrameDecoder,
}

impl MockServer {
    async fn new(host: &str, port: u16, stream: DuplexStream) -> Self {
        let mut server = Self {
            host: host.to_string(),
            port,
            stream,
            engine: MockEngine::server(),
            decoder: FrameDecoder::default(),
        };
        server.engine.initiate_connection();
        server.flush().await.expect("mock pipe closed during setup");
        server
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for bytes from the client and render every complete frame
    /// received so far as one line of text. Returns `None` once the client
    /// has closed its end.
    pub async fn read(&mut self) -> Result<Option<String>> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = self
            .stream
            .read(&mut buf)
            .await
            .map_err(|e| Error::Transport(format!("mock receive: {}", e)))?;
        if n == 0 {
            return Ok(None);
        }
        self.decoder.push(&buf[..n]);
        let mut lines = Vec::new();
        while let Some(frame) = self.decoder.next()? {
            lines.push(format_frame(&frame)?);
        }
        Ok(Some(lines.join("\n")))
    }

    /// Queue response headers on a stream.
    pub fn send_headers(
        &mut self,
        stream_id: u32,
        headers: &[(&str, &str)],
        end_stream: bool,
    ) -> Result<()> {
        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        self.engine.send_headers(stream_id, &headers, end_stream)
    }

    /// Queue response body bytes on a stream.
    pub fn send_data(
        &mut self,
        stream_id: u32,
        data: impl Into<Bytes>,
        end_stream: bool,
    ) -> Result<()> {
        self.engine.send_data(stream_id, data.into(), end_stream)
    }

    /// Queue a window update raising the client's send window.
    pub fn send_window_update(&mut self, stream_id: u32, increment: u32) {
        self.engine.send_window_update(stream_id, increment);
    }

    /// Apply the engine's pending output into the pipe.
    pub async fn flush(&mut self) -> Result<()> {
        let data = self.engine.data_to_send();
        if !data.is_empty() {
            self.stream
                .write_all(&data)
                .await
                .map_err(|e| Error::Transport(format!("mock send: {}", e)))?;
        }
        Ok(())
    }
}

fn format_frame(frame: &Frame) -> Result<String> {
    Ok(match frame.kind {
        FrameKind::Preamble => "[Preamble]".to_string(),
        FrameKind::Shutdown => "[Shutdown]".to_string(),
        FrameKind::Headers => {
            let mut line = format!(
                "[Headers] stream_id={} end_stream={}",
                frame.stream_id,
                frame.end_stream()
            );
            for (name, value) in decode_headers(frame.payload.clone())? {
                line.push_str(&format!(" {}={}", name, value));
            }
            line
        }
        FrameKind::Data => format!(
            "[Data] stream_id={} end_stream={} len={} data={}",
            frame.stream_id,
            frame.end_stream(),
            frame.payload.len(),
            String::from_utf8_lossy(&frame.payload)
        ),
        FrameKind::WindowUpdate => {
            let mut payload = frame.payload.clone();
            if payload.len() != 4 {
                return Err(Error::Protocol("malformed window update".into()));
            }
            format!(
                "[WindowUpdate] stream_id={} increment={}",
                frame.stream_id,
                payload.get_u32()
            )
        }
    })
}
