//! Minimal HTTP/1.1 framing for the daemon socket.
//!
//! Only the subset the daemon needs is supported: requests are rendered once
//! into bytes, responses are parsed incrementally. [`ResponseParser::feed`]
//! tolerates a read boundary anywhere (status line, header, chunk-size token,
//! chunk data) and yields a message only once the head and the complete body
//! have been observed.

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

const CRLF: &[u8] = b"\r\n";
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Content codings the daemon never emits. Seeing one means we are talking
/// to something that is not the daemon.
const UNSUPPORTED_CODINGS: [&str; 5] = ["gzip", "x-gzip", "deflate", "compress", "x-compress"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("invalid status line: {line:?}")]
    InvalidStatusLine { line: String },

    #[error("malformed header line: {line:?}")]
    MalformedHeader { line: String },

    #[error("invalid Content-Length value: {value:?}")]
    InvalidContentLength { value: String },

    #[error("invalid chunk size line: {line:?}")]
    InvalidChunkSize { line: String },

    #[error("chunk data is not followed by CRLF")]
    MissingChunkTerminator,

    #[error("unsupported content coding: {coding}")]
    UnsupportedCoding { coding: String },

    #[error("response line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("response head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("response head is not valid UTF-8")]
    NonUtf8Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list with case-insensitive lookup.
///
/// `set` keeps names unique (used when building requests), `append` keeps
/// duplicates in arrival order (used when parsing responses).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every value stored under `name` with a single `value`, keeping
    /// the position of the first occurrence.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => {
                self.entries[index].1 = value;
                let mut seen = 0usize;
                self.entries.retain(|(existing, _)| {
                    if existing.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|index| self.entries[index].1.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

/// An outgoing request. Built once through the consuming builder methods and
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    headers: Headers,
    body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    /// New request for `path` carrying the `Host: localhost` header the daemon
    /// insists on.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let mut headers = Headers::new();
        headers.set("Host", "localhost");
        Self {
            method,
            path: path.into(),
            headers,
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers.set("Content-Type", content_type);
        self.headers.set("Content-Length", body.len().to_string());
        self.body = Some(body);
        self
    }

    pub fn json(self, body: Vec<u8>) -> Self {
        self.body("application/json", body)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Render the request line, headers, blank line and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.as_ref().map_or(0, Vec::len));
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        out.extend_from_slice(b" HTTP/1.1");
        out.extend_from_slice(CRLF);
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }
}

/// A fully received response. Fields are only exposed through accessors so
/// consumers cannot alter what the daemon sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    status: u16,
    status_text: String,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseMessage {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Default)]
struct Head {
    status: u16,
    status_text: String,
    headers: Headers,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Phase {
    #[default]
    Head,
    Fixed {
        remaining: usize,
    },
    ChunkSize,
    ChunkData {
        remaining: usize,
    },
    ChunkEnd,
    Trailers,
}

/// Incremental response parser.
///
/// Owned by exactly one connection. After each completed message the parse
/// state is reset; only raw bytes that arrived after the end of that message
/// are kept, because they already belong to the next response.
#[derive(Debug, Default)]
pub struct ResponseParser {
    buffer: Vec<u8>,
    phase: Phase,
    head: Head,
    body: Vec<u8>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one inbound read and try to complete a response.
    ///
    /// Call [`ResponseParser::poll`] afterwards until it returns `None` to
    /// drain further responses that arrived in the same read.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<ResponseMessage>, WireError> {
        self.buffer.extend_from_slice(data);
        self.poll()
    }

    /// Try to complete a response from bytes already buffered.
    pub fn poll(&mut self) -> Result<Option<ResponseMessage>, WireError> {
        let mut consumed = 0usize;
        let result = self.advance(&mut consumed);
        match result {
            Ok(message) => {
                self.buffer.drain(..consumed);
                Ok(message)
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    /// True when no partial response is pending.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Head && self.buffer.is_empty()
    }

    /// Drop every buffered byte and partial state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.phase = Phase::Head;
        self.head = Head::default();
        self.body.clear();
    }

    fn advance(&mut self, consumed: &mut usize) -> Result<Option<ResponseMessage>, WireError> {
        loop {
            let input = &self.buffer[*consumed..];
            match self.phase {
                Phase::Head => {
                    let Some(end) = find(input, HEAD_TERMINATOR) else {
                        if input.len() > MAX_HEAD_BYTES {
                            return Err(WireError::HeadTooLarge {
                                limit: MAX_HEAD_BYTES,
                            });
                        }
                        return Ok(None);
                    };
                    if end > MAX_HEAD_BYTES {
                        return Err(WireError::HeadTooLarge {
                            limit: MAX_HEAD_BYTES,
                        });
                    }
                    let head = parse_head(&input[..end])?;
                    *consumed += end + HEAD_TERMINATOR.len();
                    self.phase = body_phase(&head)?;
                    self.head = head;
                }
                Phase::Fixed { remaining } => {
                    let take = remaining.min(input.len());
                    self.body.extend_from_slice(&input[..take]);
                    *consumed += take;
                    if take < remaining {
                        self.phase = Phase::Fixed {
                            remaining: remaining - take,
                        };
                        return Ok(None);
                    }
                    return Ok(Some(self.complete()));
                }
                Phase::ChunkSize => {
                    let Some(end) = find(input, CRLF) else {
                        if input.len() > MAX_LINE_BYTES {
                            return Err(WireError::LineTooLong {
                                limit: MAX_LINE_BYTES,
                            });
                        }
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&input[..end])?;
                    *consumed += end + CRLF.len();
                    self.phase = if size == 0 {
                        Phase::Trailers
                    } else {
                        Phase::ChunkData { remaining: size }
                    };
                }
                Phase::ChunkData { remaining } => {
                    let take = remaining.min(input.len());
                    self.body.extend_from_slice(&input[..take]);
                    *consumed += take;
                    if take < remaining {
                        self.phase = Phase::ChunkData {
                            remaining: remaining - take,
                        };
                        return Ok(None);
                    }
                    self.phase = Phase::ChunkEnd;
                }
                Phase::ChunkEnd => {
                    if input.len() < CRLF.len() {
                        return Ok(None);
                    }
                    if &input[..CRLF.len()] != CRLF {
                        return Err(WireError::MissingChunkTerminator);
                    }
                    *consumed += CRLF.len();
                    self.phase = Phase::ChunkSize;
                }
                Phase::Trailers => {
                    let Some(end) = find(input, CRLF) else {
                        if input.len() > MAX_LINE_BYTES {
                            return Err(WireError::LineTooLong {
                                limit: MAX_LINE_BYTES,
                            });
                        }
                        return Ok(None);
                    };
                    *consumed += end + CRLF.len();
                    // Trailer fields are consumed and dropped; an empty line ends the message.
                    if end == 0 {
                        return Ok(Some(self.complete()));
                    }
                }
            }
        }
    }

    fn complete(&mut self) -> ResponseMessage {
        let head = std::mem::take(&mut self.head);
        self.phase = Phase::Head;
        ResponseMessage {
            status: head.status,
            status_text: head.status_text,
            headers: head.headers,
            body: std::mem::take(&mut self.body),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_head(raw: &[u8]) -> Result<Head, WireError> {
    let text = std::str::from_utf8(raw).map_err(|_| WireError::NonUtf8Head)?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let (status, status_text) = parse_status_line(status_line)?;

    let mut headers = Headers::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(WireError::MalformedHeader {
                line: line.to_string(),
            });
        };
        if name.is_empty() || name.chars().any(|c| c.is_ascii_whitespace()) {
            return Err(WireError::MalformedHeader {
                line: line.to_string(),
            });
        }
        headers.append(name, value.trim());
    }

    Ok(Head {
        status,
        status_text,
        headers,
    })
}

fn parse_status_line(line: &str) -> Result<(u16, String), WireError> {
    let invalid = || WireError::InvalidStatusLine {
        line: line.to_string(),
    };
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(invalid());
    }
    let code = parts.next().unwrap_or_default();
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let status = code.parse::<u16>().map_err(|_| invalid())?;
    let status_text = parts.next().unwrap_or_default().trim().to_string();
    Ok((status, status_text))
}

fn body_phase(head: &Head) -> Result<Phase, WireError> {
    let mut chunked = false;
    for value in head
        .headers
        .get_all("Content-Encoding")
        .chain(head.headers.get_all("Transfer-Encoding"))
    {
        for coding in value.split(',').map(|c| c.trim().to_ascii_lowercase()) {
            if UNSUPPORTED_CODINGS.contains(&coding.as_str()) {
                return Err(WireError::UnsupportedCoding { coding });
            }
        }
    }
    if let Some(last) = head
        .headers
        .get_all("Transfer-Encoding")
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .last()
    {
        chunked = last.eq_ignore_ascii_case("chunked");
    }

    if matches!(head.status, 100..=199 | 204 | 304) {
        return Ok(Phase::Fixed { remaining: 0 });
    }
    if chunked {
        return Ok(Phase::ChunkSize);
    }
    match head.headers.get("Content-Length") {
        Some(value) => {
            let remaining =
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| WireError::InvalidContentLength {
                        value: value.to_string(),
                    })?;
            Ok(Phase::Fixed { remaining })
        }
        // The daemon keeps connections alive, so an unframed body is empty.
        None => Ok(Phase::Fixed { remaining: 0 }),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, WireError> {
    let invalid = || WireError::InvalidChunkSize {
        line: String::from_utf8_lossy(line).into_owned(),
    };
    let text = std::str::from_utf8(line).map_err(|_| invalid())?;
    let size = text.split(';').next().unwrap_or_default().trim();
    if size.is_empty() {
        return Err(invalid());
    }
    usize::from_str_radix(size, 16).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_are_the_ones_the_daemon_api_sends() {
        let names: Vec<&str> = [Method::Get, Method::Post, Method::Delete]
            .iter()
            .map(Method::as_str)
            .collect();
        assert_eq!(names, vec!["GET", "POST", "DELETE"]);
    }

    #[test]
    fn request_renders_crlf_framing() {
        let request = RequestDescriptor::new(Method::Post, "/v1.43/containers/create")
            .json(br#"{"Image":"alpine"}"#.to_vec());

        let rendered = String::from_utf8(request.to_bytes()).unwrap();
        assert_eq!(
            rendered,
            "POST /v1.43/containers/create HTTP/1.1\r\n\
             Host: localhost\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 18\r\n\
             \r\n\
             {\"Image\":\"alpine\"}"
        );
    }

    #[test]
    fn request_without_body_ends_with_blank_line() {
        let rendered = RequestDescriptor::new(Method::Get, "/_ping").to_bytes();
        assert!(rendered.ends_with(b"Host: localhost\r\n\r\n"));
    }

    #[test]
    fn headers_set_is_case_insensitive_and_unique() {
        let mut headers = Headers::new();
        headers.append("content-type", "text/plain");
        headers.append("X-Other", "1");
        headers.append("Content-Type", "text/html");
        headers.set("CONTENT-TYPE", "application/json");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("Content-Type"), Some("application/json"));
        let names: Vec<&str> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["content-type", "X-Other"]);
    }

    #[test]
    fn duplicate_response_headers_keep_arrival_order() {
        let mut parser = ResponseParser::new();
        let message = parser
            .feed(b"HTTP/1.1 200 OK\r\nSet-Thing: a\r\nset-thing: b\r\nContent-Length: 0\r\n\r\n")
            .unwrap()
            .unwrap();

        let values: Vec<&str> = message.headers().get_all("SET-THING").collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn content_length_body_waits_for_all_bytes() {
        let mut parser = ResponseParser::new();
        assert!(parser
            .feed(b"HTTP/1.1 201 Created\r\nContent-Length: 11\r\n\r\nhello")
            .unwrap()
            .is_none());
        let message = parser.feed(b" world").unwrap().unwrap();

        assert_eq!(message.status(), 201);
        assert_eq!(message.status_text(), "Created");
        assert_eq!(message.body(), b"hello world");
        assert!(parser.is_idle());
    }

    #[test]
    fn no_content_has_empty_body() {
        let mut parser = ResponseParser::new();
        let message = parser
            .feed(b"HTTP/1.1 204 No Content\r\nServer: Docker\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(message.status(), 204);
        assert!(message.body().is_empty());
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let mut parser = ResponseParser::new();
        let message = parser
            .feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3;name=x\r\nabc\r\n0\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(message.body(), b"abc");
    }

    #[test]
    fn gzip_content_encoding_is_rejected() {
        let mut parser = ResponseParser::new();
        let err = parser
            .feed(b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 0\r\n\r\n")
            .unwrap_err();
        assert_eq!(
            err,
            WireError::UnsupportedCoding {
                coding: "gzip".to_string()
            }
        );
        assert!(parser.is_idle());
    }

    #[test]
    fn deflate_transfer_coding_is_rejected() {
        let mut parser = ResponseParser::new();
        let err = parser
            .feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: deflate, chunked\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, WireError::UnsupportedCoding { .. }));
    }

    #[test]
    fn garbage_status_line_is_a_protocol_error() {
        let mut parser = ResponseParser::new();
        let err = parser.feed(b"SSH-2.0-OpenSSH\r\n\r\n").unwrap_err();
        assert!(matches!(err, WireError::InvalidStatusLine { .. }));
    }

    #[test]
    fn bad_chunk_size_is_a_protocol_error() {
        let mut parser = ResponseParser::new();
        let err = parser
            .feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n")
            .unwrap_err();
        assert!(matches!(err, WireError::InvalidChunkSize { .. }));
    }

    #[test]
    fn missing_crlf_after_chunk_data_is_rejected() {
        let mut parser = ResponseParser::new();
        let err = parser
            .feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nabXX")
            .unwrap_err();
        assert_eq!(err, WireError::MissingChunkTerminator);
    }
}
