//! HTTP/2 connection multiplexing.
//!
//! One [`Connection`] owns the transport and the protocol engine, and any
//! number of requests share it. All engine mutation happens under a single
//! lock, held for one encode/decode/flush step at a time and never across a
//! blocking transport read. The task that awaits a request becomes the
//! connection's reader if nobody else is reading, and hands the role off
//! when its own response completes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use bytes::{Bytes, BytesMut};
use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};

use crate::engine::{Event, ProtocolEngine};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::transport::{self, Transport};

/// Bytes requested from the transport per read.
const RECV_CHUNK: usize = 64 * 1024;

/// An HTTP/2 client connection.
///
/// Cheap to clone; every clone drives the same transport and engine.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    host: String,
    /// Engine state, the outbound transport half, and the stream map.
    /// Everything that mutates protocol state goes through this lock.
    locked: Mutex<Locked>,
    /// Inbound transport half. Reader election guarantees at most one task
    /// blocks here, and never while holding the engine lock.
    reader: Mutex<ReadHalf<Box<dyn Transport>>>,
}

struct Locked {
    engine: Box<dyn ProtocolEngine>,
    writer: WriteHalf<Box<dyn Transport>>,
    /// Stream id -> live request, for exactly the streams whose headers have
    /// been sent but whose terminal stream end has not yet been observed.
    streams: HashMap<u32, Arc<LiveShared>>,
    /// Whether some task is currently looping inside `read`.
    reading: bool,
    /// Latched once the peer closes its end; no dispatch happens after this.
    eof: bool,
}

impl Connection {
    /// Connect to `host:port` over plain TCP and flush the engine's
    /// connection preamble.
    pub async fn connect(host: &str, port: u16, engine: Box<dyn ProtocolEngine>) -> Result<Self> {
        let transport = transport::tcp_connect(host, port).await?;
        Self::from_transport(host, transport, engine).await
    }

    /// Build a connection over an already-established duplex stream, such as
    /// a TLS session or an in-memory pipe.
    ///
    /// Initializes the engine for client mode and flushes its preamble
    /// before returning, so the returned value is fully usable.
    pub async fn from_transport(
        host: &str,
        transport: Box<dyn Transport>,
        mut engine: Box<dyn ProtocolEngine>,
    ) -> Result<Self> {
        engine.initiate_connection();
        let (read_half, writer) = tokio::io::split(transport);
        let conn = Self {
            inner: Arc::new(Inner {
                host: host.to_string(),
                locked: Mutex::new(Locked {
                    engine,
                    writer,
                    streams: HashMap::new(),
                    reading: false,
                    eof: false,
                }),
                reader: Mutex::new(read_half),
            }),
        };
        {
            let mut locked = conn.inner.locked.lock().await;
            flush(&mut locked).await?;
        }
        tracing::debug!(host, "connection established");
        Ok(conn)
    }

    /// The host this connection was opened against.
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Send a bare request with no extra headers and no body.
    pub async fn request(&self, method: Method, path: &str) -> Result<LiveRequest> {
        self.send(Request::new(method, path)).await
    }

    /// Send the given request.
    ///
    /// Under the engine lock: obtains a stream id, registers the live
    /// request, sends the headers (marking end-of-stream when the body is
    /// empty), and sends as much of the body as the current flow-control
    /// window permits. Returns as soon as those bytes are on the wire; it
    /// never waits for response bytes.
    pub async fn send(&self, request: Request) -> Result<LiveRequest> {
        let mut locked = self.inner.locked.lock().await;
        match self.issue(&mut locked, &request).await {
            Ok(live) => Ok(live),
            Err(e) => {
                fail_all(&mut locked, &e);
                Err(e)
            }
        }
    }

    async fn issue(&self, locked: &mut Locked, request: &Request) -> Result<LiveRequest> {
        let stream_id = locked.engine.next_stream_id()?;
        let headers = request.header_list(&self.inner.host);
        let shared = Arc::new(LiveShared {
            stream_id,
            state: StdMutex::new(LiveState {
                received_headers: None,
                received_data: Vec::new(),
                to_send: request.body_bytes(),
                value: None,
                waiters: Vec::new(),
            }),
        });
        locked.streams.insert(stream_id, Arc::clone(&shared));

        let end_stream = request.body_bytes().is_empty();
        locked.engine.send_headers(stream_id, &headers, end_stream)?;
        tracing::debug!(stream_id, method = %request.method, path = %request.path, "request issued");
        if !end_stream {
            pump_body(locked, &shared).await?;
        }
        flush(locked).await?;
        Ok(LiveRequest {
            connection: self.clone(),
            shared,
        })
    }

    /// Wait for inbound data and dispatch it.
    ///
    /// The one blocking primitive. The transport read happens outside the
    /// engine lock, so concurrent [`send`](Connection::send) calls are never
    /// stuck behind it. Returns `Ok(false)` when the peer has closed its
    /// end: nothing is dispatched, every later call reports the same, and
    /// any not-yet-complete request stays incomplete from then on.
    pub async fn read(&self) -> Result<bool> {
        let data = {
            let mut reader = self.inner.reader.lock().await;
            let mut buf = vec![0u8; RECV_CHUNK];
            match reader.read(&mut buf).await {
                Ok(0) => {
                    let mut locked = self.inner.locked.lock().await;
                    locked.eof = true;
                    tracing::debug!("peer closed the transport");
                    return Ok(false);
                }
                Ok(n) => {
                    buf.truncate(n);
                    Bytes::from(buf)
                }
                Err(e) => {
                    let err = Error::Transport(format!("receive: {}", e));
                    let mut locked = self.inner.locked.lock().await;
                    fail_all(&mut locked, &err);
                    return Err(err);
                }
            }
        };

        let mut locked = self.inner.locked.lock().await;
        let events = match locked.engine.receive_data(&data) {
            Ok(events) => events,
            Err(e) => {
                fail_all(&mut locked, &e);
                return Err(e);
            }
        };
        for event in events {
            if let Err(e) = dispatch(&mut locked, event).await {
                fail_all(&mut locked, &e);
                return Err(e);
            }
        }
        if let Err(e) = flush(&mut locked).await {
            fail_all(&mut locked, &e);
            return Err(e);
        }
        Ok(true)
    }

    /// How many requests are in flight: headers sent, terminal stream end
    /// not yet observed.
    pub async fn active_requests(&self) -> usize {
        self.inner.locked.lock().await.streams.len()
    }

    /// Close the connection: signal termination to the engine, flush, and
    /// shut down the transport's write side.
    pub async fn close(&self) -> Result<()> {
        let mut locked = self.inner.locked.lock().await;
        locked.engine.close_connection();
        flush(&mut locked).await?;
        locked
            .writer
            .shutdown()
            .await
            .map_err(|e| Error::Transport(format!("shutdown: {}", e)))?;
        tracing::debug!(host = %self.inner.host, "connection closed");
        Ok(())
    }
}

/// Dispatch one inbound engine event to the live request it belongs to.
async fn dispatch(locked: &mut Locked, event: Event) -> Result<()> {
    match event {
        Event::DataReceived { stream_id, data } => {
            // Replenish the peer's window first so it is not starved.
            locked.engine.acknowledge_received(data.len(), stream_id)?;
            let stream = lookup(locked, stream_id)?;
            tracing::trace!(stream_id, len = data.len(), "data received");
            stream.state.lock().unwrap().received_data.push(data);
        }
        Event::HeadersReceived { stream_id, headers } => {
            let stream = lookup(locked, stream_id)?;
            tracing::trace!(stream_id, "headers received");
            stream.state.lock().unwrap().received_headers = Some(headers);
        }
        Event::WindowUpdated { stream_id } => {
            // Connection-wide updates carry no stream to resume.
            if stream_id != 0 {
                let stream = lookup(locked, stream_id)?;
                pump_body(locked, &stream).await?;
            }
        }
        Event::StreamEnded { stream_id } => {
            // Removal and completion happen together, under the engine lock,
            // so no later frame can reach a completed request.
            let stream = locked.streams.remove(&stream_id).ok_or_else(|| {
                Error::Protocol(format!("stream {} ended but is not live", stream_id))
            })?;
            tracing::debug!(stream_id, "stream ended");
            stream.complete();
        }
    }
    Ok(())
}

fn lookup(locked: &Locked, stream_id: u32) -> Result<Arc<LiveShared>> {
    locked
        .streams
        .get(&stream_id)
        .cloned()
        .ok_or_else(|| Error::Protocol(format!("event for unknown stream {}", stream_id)))
}

/// Write any engine-buffered outbound bytes to the transport.
async fn flush(locked: &mut Locked) -> Result<()> {
    let data = locked.engine.data_to_send();
    if !data.is_empty() {
        locked
            .writer
            .write_all(&data)
            .await
            .map_err(|e| Error::Transport(format!("send: {}", e)))?;
        locked
            .writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush: {}", e)))?;
    }
    Ok(())
}

/// Send as much of the request's remaining body as the stream's window
/// allows.
///
/// Each frame is capped at the smaller of the engine-reported window and the
/// engine's maximum frame size; the frame carrying the last byte marks
/// end-of-stream. The window value is read from the engine every iteration,
/// never tracked here. A no-op when the remaining body is empty or the
/// window is zero; a later window update resumes it.
async fn pump_body(locked: &mut Locked, stream: &Arc<LiveShared>) -> Result<()> {
    loop {
        let (chunk, end_stream) = {
            let mut state = stream.state.lock().unwrap();
            if state.to_send.is_empty() {
                return Ok(());
            }
            let window = locked.engine.local_flow_control_window(stream.stream_id);
            if window == 0 {
                return Ok(());
            }
            let limit = window
                .min(locked.engine.max_outbound_frame_size())
                .min(state.to_send.len());
            let chunk = state.to_send.split_to(limit);
            (chunk, state.to_send.is_empty())
        };
        tracing::trace!(
            stream_id = stream.stream_id,
            len = chunk.len(),
            end_stream,
            "body frame"
        );
        locked.engine.send_data(stream.stream_id, chunk, end_stream)?;
        flush(locked).await?;
    }
}

/// Fail every pending request with a copy of `err` and wake all waiters.
/// Used once transport or engine state is no longer trustworthy.
fn fail_all(locked: &mut Locked, err: &Error) {
    locked.eof = true;
    for (_, stream) in locked.streams.drain() {
        let mut state = stream.state.lock().unwrap();
        if state.value.is_none() {
            state.value = Some(Err(err.clone()));
        }
        for tx in state.waiters.drain(..) {
            let _ = tx.send(());
        }
    }
}

/// Wake the first live request that has a registered waiter, so it becomes
/// the next elected reader. Wake choice follows map iteration order; it is
/// not required to be FIFO.
fn wake_one(locked: &mut Locked) {
    for stream in locked.streams.values() {
        let mut state = stream.state.lock().unwrap();
        if !state.waiters.is_empty() {
            tracing::trace!(stream_id = stream.stream_id, "handing off reader role");
            for tx in state.waiters.drain(..) {
                let _ = tx.send(());
            }
            return;
        }
    }
}

/// A request that has been sent over a [`Connection`] and whose terminal
/// stream end has not yet been awaited.
///
/// Clones share the same state; [`wait`](LiveRequest::wait) is idempotent.
#[derive(Clone)]
pub struct LiveRequest {
    connection: Connection,
    shared: Arc<LiveShared>,
}

struct LiveShared {
    stream_id: u32,
    state: StdMutex<LiveState>,
}

struct LiveState {
    received_headers: Option<Vec<(String, String)>>,
    received_data: Vec<Bytes>,
    /// Body bytes not yet handed to the engine.
    to_send: Bytes,
    /// The completion value. Set exactly once, by the dispatch path.
    value: Option<Result<Response>>,
    /// Wake signals for tasks suspended in `wait` while another task reads.
    waiters: Vec<oneshot::Sender<()>>,
}

impl LiveShared {
    fn completion(&self) -> Option<Result<Response>> {
        self.state.lock().unwrap().value.clone()
    }

    /// Build and store the completion value from the accumulated headers and
    /// body, then wake every waiter registered on this request.
    fn complete(&self) {
        let mut state = self.state.lock().unwrap();
        let value = match state.received_headers.take() {
            Some(headers) => {
                let mut body = BytesMut::new();
                for chunk in &state.received_data {
                    body.extend_from_slice(chunk);
                }
                Response::from_parts(headers, body.freeze())
            }
            None => Err(Error::Protocol(format!(
                "stream {} ended before response headers",
                self.stream_id
            ))),
        };
        debug_assert!(state.value.is_none());
        state.value = Some(value);
        for tx in state.waiters.drain(..) {
            let _ = tx.send(());
        }
    }
}

enum Plan {
    Done(Result<Response>),
    Wait(oneshot::Receiver<()>),
    Read,
}

impl LiveRequest {
    /// The engine-assigned stream identifier, unique within the connection.
    pub fn stream_id(&self) -> u32 {
        self.shared.stream_id
    }

    /// Wait until the response is complete, reading from the connection if
    /// nobody else already is.
    ///
    /// At most one task is ever inside the connection's read loop. When the
    /// elected reader's own response completes, it steps down and wakes one
    /// other waiting request, which takes over reading. Once a completion
    /// value exists, this returns it immediately, for any caller, any number
    /// of times.
    pub async fn wait(&self) -> Result<Response> {
        loop {
            let plan = {
                let mut locked = self.connection.inner.locked.lock().await;
                let mut state = self.shared.state.lock().unwrap();
                if let Some(value) = state.value.clone() {
                    Plan::Done(value)
                } else if locked.reading || locked.eof {
                    // Someone else is reading, or nothing more will ever be
                    // read. Either way, park until woken.
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push(tx);
                    Plan::Wait(rx)
                } else {
                    locked.reading = true;
                    Plan::Read
                }
            };

            match plan {
                Plan::Done(value) => return value,
                Plan::Wait(rx) => {
                    let _ = rx.await;
                }
                Plan::Read => {
                    tracing::trace!(stream_id = self.shared.stream_id, "elected reader");
                    if let Some(value) = self.read_until_complete().await {
                        return value;
                    }
                }
            }
        }
    }

    /// Loop the connection's read primitive until our own completion value
    /// is set, then step down and hand the reader role to one other waiter.
    ///
    /// Returns `None` when the peer closed the transport before our response
    /// completed; the caller parks in that case.
    async fn read_until_complete(&self) -> Option<Result<Response>> {
        loop {
            let progressed = match self.connection.read().await {
                Ok(progressed) => progressed,
                Err(e) => {
                    // read() already failed every pending request.
                    let mut locked = self.connection.inner.locked.lock().await;
                    locked.reading = false;
                    return Some(Err(e));
                }
            };
            if let Some(value) = self.shared.completion() {
                let mut locked = self.connection.inner.locked.lock().await;
                locked.reading = false;
                wake_one(&mut locked);
                return Some(value);
            }
            if !progressed {
                // Graceful peer close with our response still incomplete.
                // Step down; nobody can make progress, so there is no one
                // useful to wake.
                let mut locked = self.connection.inner.locked.lock().await;
                locked.reading = false;
                return None;
            }
        }
    }
}
