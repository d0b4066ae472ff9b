//! The duplex byte stream a connection runs over.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// A duplex byte stream. Implemented for anything tokio can read and write,
/// so TCP sockets, TLS sessions, and in-memory pipes all qualify.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Open a plain TCP stream to `host:port`.
///
/// TLS is layered outside this crate; hand a finished session to
/// [`Connection::from_transport`](crate::Connection::from_transport) instead.
pub(crate) async fn tcp_connect(host: &str, port: u16) -> Result<Box<dyn Transport>> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::Transport(format!("connect {}:{}: {}", host, port, e)))?;
    stream.set_nodelay(true).ok();
    Ok(Box::new(stream))
}
