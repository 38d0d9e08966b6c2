use anyhow::Result;
use daemon_wire::{Method, RequestDescriptor, ResponseMessage, ResponseParser, WireError};

const CHUNKED_WAIT: &[u8] = b"HTTP/1.1 200 OK\r\n\
Api-Version: 1.43\r\n\
Content-Type: application/json\r\n\
Transfer-Encoding: chunked\r\n\
\r\n\
f\r\n{\"StatusCode\":0\r\n\
1\r\n}\r\n\
0\r\n\
X-Trailer: ignored\r\n\
\r\n";

fn parse_in_pieces(bytes: &[u8], piece: usize) -> Result<Vec<ResponseMessage>> {
    let mut parser = ResponseParser::new();
    let mut messages = Vec::new();
    for chunk in bytes.chunks(piece) {
        if let Some(message) = parser.feed(chunk)? {
            messages.push(message);
        }
        while let Some(message) = parser.poll()? {
            messages.push(message);
        }
    }
    Ok(messages)
}

/// Rewrites a request into the equivalent response so the serializer output
/// can be pushed back through the parser.
fn echo_response(request: &RequestDescriptor) -> Vec<u8> {
    let rendered = request.to_bytes();
    let body = request.body_bytes().unwrap_or_default();
    let mut response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n", rendered.len())
        .into_bytes();
    for (name, value) in request.headers().iter() {
        response.extend_from_slice(format!("X-Echo-{name}: {value}\r\n").as_bytes());
    }
    response.extend_from_slice(b"\r\n");
    response.extend_from_slice(&rendered);
    assert!(rendered.ends_with(body));
    response
}

#[test]
fn test_byte_at_a_time_matches_single_chunk() -> Result<()> {
    let requests = vec![
        RequestDescriptor::new(Method::Get, "/v1.43/_ping"),
        RequestDescriptor::new(Method::Post, "/v1.43/containers/create")
            .json(br#"{"Image":"w2wizard/single","Env":["A=1"]}"#.to_vec()),
        RequestDescriptor::new(Method::Delete, "/v1.43/containers/abc?force=true")
            .header("X-Request", "cleanup"),
    ];

    for request in requests {
        let bytes = echo_response(&request);
        let whole = parse_in_pieces(&bytes, bytes.len())?;
        let single = parse_in_pieces(&bytes, 1)?;

        assert_eq!(whole.len(), 1);
        assert_eq!(whole, single);
        assert_eq!(whole[0].body(), request.to_bytes().as_slice());
    }

    Ok(())
}

#[test]
fn test_chunked_body_reassembles_across_every_split() -> Result<()> {
    for piece in 1..=CHUNKED_WAIT.len() {
        let messages = parse_in_pieces(CHUNKED_WAIT, piece)?;
        assert_eq!(messages.len(), 1, "split size {piece}");
        assert_eq!(messages[0].body(), br#"{"StatusCode":0}"#);
        // Trailers are consumed, not merged into the head.
        assert!(!messages[0].headers().contains("X-Trailer"));
        assert_eq!(messages[0].headers().get("api-version"), Some("1.43"));
    }
    Ok(())
}

#[test]
fn test_two_responses_in_one_read_are_both_emitted() -> Result<()> {
    let mut bytes = b"HTTP/1.1 201 Created\r\nContent-Length: 11\r\n\r\n{\"Id\":\"a\"}\n".to_vec();
    bytes.extend_from_slice(b"HTTP/1.1 204 No Content\r\n\r\n");
    bytes.extend_from_slice(CHUNKED_WAIT);

    let mut parser = ResponseParser::new();
    let first = parser.feed(&bytes)?.expect("first response");
    let second = parser.poll()?.expect("second response");
    let third = parser.poll()?.expect("third response");

    assert_eq!(first.status(), 201);
    assert_eq!(first.body_text(), "{\"Id\":\"a\"}\n");
    assert_eq!(second.status(), 204);
    assert!(second.body().is_empty());
    assert_eq!(third.status(), 200);
    assert!(parser.poll()?.is_none());
    assert!(parser.is_idle());
    Ok(())
}

#[test]
fn test_partial_message_is_never_emitted() -> Result<()> {
    let mut parser = ResponseParser::new();
    let cut = CHUNKED_WAIT.len() - 2;

    assert!(parser.feed(&CHUNKED_WAIT[..cut])?.is_none());
    assert!(!parser.is_idle());
    assert!(parser.feed(&CHUNKED_WAIT[cut..])?.is_some());
    Ok(())
}

#[test]
fn test_unsupported_coding_discards_state() {
    let mut parser = ResponseParser::new();
    let err = parser
        .feed(b"HTTP/1.1 200 OK\r\nContent-Encoding: compress\r\nContent-Length: 3\r\n\r\nabc")
        .unwrap_err();

    assert_eq!(
        err,
        WireError::UnsupportedCoding {
            coding: "compress".to_string()
        }
    );
    assert!(parser.is_idle());
}

#[test]
fn test_invalid_content_length_is_rejected() {
    let mut parser = ResponseParser::new();
    let err = parser
        .feed(b"HTTP/1.1 200 OK\r\nContent-Length: ten\r\n\r\n")
        .unwrap_err();
    assert!(matches!(err, WireError::InvalidContentLength { .. }));
}
