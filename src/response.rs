//! HTTP/2 responses.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::request::ContentType;

/// A completed HTTP/2 response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Response {
    /// Assemble a response from the accumulated header list and body. Fails
    /// when the `:status` pseudo-header is missing or malformed.
    pub(crate) fn from_parts(headers: Vec<(String, String)>, body: Bytes) -> Result<Self> {
        let status = headers
            .iter()
            .find(|(name, _)| name == ":status")
            .ok_or_else(|| Error::Protocol("response is missing the :status pseudo-header".into()))?
            .1
            .parse::<u16>()
            .map_err(|_| Error::Protocol("response :status is not a number".into()))?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The first header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All response headers, pseudo-headers included, in arrival order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn content_type(&self) -> ContentType {
        ContentType::parse(self.header("content-type").unwrap_or(""))
    }

    /// The body decoded as utf-8.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|_| Error::Protocol("response body is not valid utf-8".into()))
    }
}
