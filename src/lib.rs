//! # h2mux
//!
//! Multiplexed HTTP/2 client connections over a pluggable protocol engine.
//!
//! One [`Connection`] shares a single transport among any number of
//! in-flight requests. The wire-level HTTP/2 state machine (framing, HPACK,
//! window arithmetic) is consumed through the [`ProtocolEngine`] trait; this
//! crate owns the concurrency layer around it: serialized engine access,
//! flow-control-gated body sending, and the single-reader election that lets
//! each caller await its own response without duplicating reads.
//!
//! A caller that awaits a [`LiveRequest`] becomes the connection's reader if
//! nobody else is reading, dispatching inbound events to whichever request
//! they belong to until its own response is complete, then hands the reader
//! role to one other waiting request.
//!
//! ```no_run
//! use h2mux::{mock, Request};
//! use http::Method;
//!
//! # async fn example() -> h2mux::Result<()> {
//! let mut server = mock::expect_connect("example.com", 443).await;
//! let conn = mock::connect("example.com", 443).await?;
//!
//! let live = conn.send(Request::new(Method::GET, "/dummy")).await?;
//! server.send_headers(live.stream_id(), &[(":status", "200")], false)?;
//! server.send_data(live.stream_id(), "dummy response", true)?;
//! server.flush().await?;
//!
//! let response = live.wait().await?;
//! assert_eq!(response.text()?, "dummy response");
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod engine;
pub mod error;
pub mod mock;
pub mod request;
pub mod response;
pub mod transport;

pub use connection::{Connection, LiveRequest};
pub use engine::{Event, ProtocolEngine};
pub use error::{Error, Result};
pub use request::{ContentType, Request};
pub use response::Response;
pub use transport::Transport;
