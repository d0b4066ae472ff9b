//! HTTP/2 requests and their content-type bookkeeping.

use bytes::Bytes;
use http::Method;
use serde::Serialize;

use crate::error::Result;

/// A parsed `content-type` header value: the media type plus the charset
/// and boundary parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentType {
    pub mediatype: Option<String>,
    pub charset: Option<String>,
    pub boundary: Option<String>,
}

impl ContentType {
    pub fn parse(value: &str) -> Self {
        let mut pieces = value.split(';').map(str::trim);
        let mediatype = match pieces.next() {
            None | Some("") => None,
            Some(mediatype) => Some(mediatype.to_string()),
        };
        let mut charset = None;
        let mut boundary = None;
        for piece in pieces {
            if let Some((key, val)) = piece.split_once('=') {
                match key {
                    "charset" => charset = Some(val.to_string()),
                    "boundary" => boundary = Some(val.to_string()),
                    _ => {}
                }
            }
        }
        Self {
            mediatype,
            charset,
            boundary,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(mediatype) = &self.mediatype else {
            return Ok(());
        };
        write!(f, "{}", mediatype)?;
        if let Some(charset) = &self.charset {
            write!(f, "; charset={}", charset)?;
        }
        if let Some(boundary) = &self.boundary {
            write!(f, "; boundary={}", boundary)?;
        }
        Ok(())
    }
}

/// An HTTP/2 request: method, path, extra headers, body.
///
/// The pseudo-header block is assembled when the request is sent; the
/// connection supplies the authority.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    headers: Vec<(String, String)>,
    content_type: ContentType,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            content_type: ContentType::default(),
            body: Bytes::new(),
        }
    }

    /// Add a header. `content-type` is parsed rather than stored verbatim,
    /// so the body helpers can fill in the charset.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = ContentType::parse(value);
        } else {
            self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        }
        self
    }

    /// Attach a raw body. The content type is left untouched.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Attach a text body. The media type defaults to `text/plain` and the
    /// charset is marked utf-8.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        if self.content_type.mediatype.is_none() {
            self.content_type.mediatype = Some("text/plain".to_string());
        }
        self.content_type.charset = Some("utf-8".to_string());
        self.body = Bytes::from(body.into().into_bytes());
        self
    }

    /// Attach a JSON body and set the content type accordingly.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.body = Bytes::from(serde_json::to_vec(value)?);
        self.content_type = ContentType {
            mediatype: Some("application/json".to_string()),
            charset: Some("utf-8".to_string()),
            boundary: None,
        };
        Ok(self)
    }

    pub(crate) fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// The full header list as sent on the wire: pseudo-headers first, then
    /// the synthesized content-type, then everything the caller added.
    pub(crate) fn header_list(&self, authority: &str) -> Vec<(String, String)> {
        let mut headers = vec![
            (":method".to_string(), self.method.as_str().to_string()),
            (":path".to_string(), self.path.clone()),
            (":authority".to_string(), authority.to_string()),
            (":scheme".to_string(), "https".to_string()),
        ];
        let content_type = self.content_type.to_string();
        if !content_type.is_empty() {
            headers.push(("content-type".to_string(), content_type));
        }
        headers.extend(self.headers.iter().cloned());
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_parses_parameters() {
        let ct = ContentType::parse("multipart/form-data; charset=utf-8; boundary=xyz");
        assert_eq!(ct.mediatype.as_deref(), Some("multipart/form-data"));
        assert_eq!(ct.charset.as_deref(), Some("utf-8"));
        assert_eq!(ct.boundary.as_deref(), Some("xyz"));
        assert_eq!(ct.to_string(), "multipart/form-data; charset=utf-8; boundary=xyz");
    }

    #[test]
    fn empty_content_type_renders_empty() {
        let ct = ContentType::parse("");
        assert_eq!(ct.mediatype, None);
        assert_eq!(ct.to_string(), "");
    }

    #[test]
    fn text_body_defaults_media_type() {
        let request = Request::new(Method::POST, "/dummy").text("hi");
        let headers = request.header_list("example.com");
        assert!(headers.contains(&("content-type".to_string(), "text/plain; charset=utf-8".to_string())));
        assert_eq!(request.body_bytes(), Bytes::from_static(b"hi"));
    }

    #[test]
    fn text_body_keeps_explicit_media_type() {
        let request = Request::new(Method::POST, "/dummy")
            .header("content-type", "text/html")
            .text("<p>hi</p>");
        let headers = request.header_list("example.com");
        assert!(headers.contains(&("content-type".to_string(), "text/html; charset=utf-8".to_string())));
    }

    #[test]
    fn json_body_sets_content_type() {
        let request = Request::new(Method::POST, "/dummy")
            .json(&serde_json::json!({"a": 1}))
            .unwrap();
        assert_eq!(request.body_bytes(), Bytes::from_static(b"{\"a\":1}"));
        let headers = request.header_list("example.com");
        assert!(headers.contains(&(
            "content-type".to_string(),
            "application/json; charset=utf-8".to_string()
        )));
    }

    #[test]
    fn pseudo_headers_come_first() {
        let request = Request::new(Method::GET, "/path").header("Accept", "text/plain");
        let headers = request.header_list("example.com");
        assert_eq!(
            headers,
            vec![
                (":method".to_string(), "GET".to_string()),
                (":path".to_string(), "/path".to_string()),
                (":authority".to_string(), "example.com".to_string()),
                (":scheme".to_string(), "https".to_string()),
                ("accept".to_string(), "text/plain".to_string()),
            ]
        );
    }
}
