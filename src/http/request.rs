//! Request framing.
//!
//! Reads one HTTP/1.x request (request line, header block, optional
//! `content-length` body) off a buffered stream. Anything that does not parse
//! cleanly is a [`ParseError`]; the caller closes the connection without
//! answering.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::config::RequestLimits;

/// Blank lines tolerated before a request line.
const MAX_LEADING_BLANK_LINES: usize = 4;

/// Why a request could not be read.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("connection closed mid-request")]
    Truncated,

    #[error("malformed request line")]
    RequestLine,

    #[error("unsupported protocol version")]
    Version,

    #[error("malformed header line")]
    Header,

    #[error("header section exceeds limits")]
    HeadersTooLarge,

    #[error("invalid content-length")]
    ContentLength,

    #[error("body of {0} bytes exceeds limit")]
    BodyTooLarge(usize),

    #[error("transfer-encoding is not supported")]
    TransferEncoding,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::Truncated => "truncated",
            ParseError::RequestLine => "request_line",
            ParseError::Version => "version",
            ParseError::Header => "header",
            ParseError::HeadersTooLarge => "headers_too_large",
            ParseError::ContentLength => "content_length",
            ParseError::BodyTooLarge(_) => "body_too_large",
            ParseError::TransferEncoding => "transfer_encoding",
            ParseError::Io(_) => "io",
        }
    }
}

/// Read the next request.
///
/// Returns `Ok(None)` when the peer closed the stream before sending any
/// byte of a new request.
pub async fn read_request<R>(
    reader: &mut R,
    limits: &RequestLimits,
) -> Result<Option<Request<Bytes>>, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(256);

    let mut blank_lines = 0;
    loop {
        line.clear();
        if read_line(reader, &mut line, limits.max_header_bytes).await? == 0 {
            return Ok(None);
        }
        if !trim_eol(&line).is_empty() {
            break;
        }
        blank_lines += 1;
        if blank_lines > MAX_LEADING_BLANK_LINES {
            return Err(ParseError::RequestLine);
        }
    }
    let (method, uri, version) = parse_request_line(trim_eol(&line))?;

    let mut headers = HeaderMap::new();
    loop {
        line.clear();
        if read_line(reader, &mut line, limits.max_header_bytes).await? == 0 {
            return Err(ParseError::Truncated);
        }
        let raw = trim_eol(&line);
        if raw.is_empty() {
            break;
        }
        if headers.len() >= limits.max_headers {
            return Err(ParseError::HeadersTooLarge);
        }
        let (name, value) = parse_header_line(raw)?;
        headers.append(name, value);
    }

    if headers.contains_key(header::TRANSFER_ENCODING) {
        return Err(ParseError::TransferEncoding);
    }

    let length = content_length(&headers)?;
    if length > limits.max_body_bytes {
        return Err(ParseError::BodyTooLarge(length));
    }
    let mut body = vec![0u8; length];
    if length > 0 {
        reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ParseError::Truncated,
            _ => ParseError::Io(e),
        })?;
    }

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .version(version)
        .body(Bytes::from(body))
        .map_err(|_| ParseError::RequestLine)?;
    *request.headers_mut() = headers;
    Ok(Some(request))
}

/// Whether the client asked to keep the connection open after this exchange.
///
/// HTTP/1.1 defaults to persistent unless `Connection: close`; HTTP/1.0
/// defaults to closing unless `Connection: keep-alive`.
pub fn wants_keep_alive<B>(request: &Request<B>) -> bool {
    let mut close = false;
    let mut keep_alive = false;
    for value in request.headers().get_all(header::CONNECTION) {
        let Ok(value) = value.to_str() else { continue };
        for token in value.split(',').map(str::trim) {
            if token.eq_ignore_ascii_case("close") {
                close = true;
            } else if token.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }
    }

    if close {
        return false;
    }
    match request.version() {
        Version::HTTP_10 => keep_alive,
        _ => true,
    }
}

async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> Result<usize, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let n = (&mut *reader).take(limit as u64).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(0);
    }
    if buf.last() != Some(&b'\n') {
        return Err(if n >= limit {
            ParseError::HeadersTooLarge
        } else {
            ParseError::Truncated
        });
    }
    Ok(n)
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_request_line(line: &[u8]) -> Result<(Method, Uri, Version), ParseError> {
    let mut parts = line.split(|b| *b == b' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::RequestLine);
    };

    let method = Method::from_bytes(method).map_err(|_| ParseError::RequestLine)?;
    if target.is_empty() {
        return Err(ParseError::RequestLine);
    }
    let uri = Uri::try_from(target).map_err(|_| ParseError::RequestLine)?;
    let version = match version {
        b"HTTP/1.1" => Version::HTTP_11,
        b"HTTP/1.0" => Version::HTTP_10,
        _ => return Err(ParseError::Version),
    };
    Ok((method, uri, version))
}

fn parse_header_line(line: &[u8]) -> Result<(HeaderName, HeaderValue), ParseError> {
    // Obsolete line folding.
    if line.first().is_some_and(|b| *b == b' ' || *b == b'\t') {
        return Err(ParseError::Header);
    }
    let colon = line.iter().position(|b| *b == b':').ok_or(ParseError::Header)?;
    let name = HeaderName::from_bytes(&line[..colon]).map_err(|_| ParseError::Header)?;
    let value = line[colon + 1..].trim_ascii();
    let value = HeaderValue::from_bytes(value).map_err(|_| ParseError::Header)?;
    Ok((name, value))
}

fn content_length(headers: &HeaderMap) -> Result<usize, ParseError> {
    let mut length = None;
    for value in headers.get_all(header::CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or(ParseError::ContentLength)?;
        match length {
            Some(previous) if previous != parsed => return Err(ParseError::ContentLength),
            _ => length = Some(parsed),
        }
    }
    Ok(length.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(input: &[u8]) -> Result<Option<Request<Bytes>>, ParseError> {
        let mut reader = input;
        read_request(&mut reader, &RequestLimits::default()).await
    }

    #[tokio::test]
    async fn parses_simple_get() {
        let request = parse(b"GET /nodes/7 HTTP/1.1\r\nHost: tracker\r\n\r\n")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.uri().path(), "/nodes/7");
        assert_eq!(request.version(), Version::HTTP_11);
        assert_eq!(request.headers()["host"], "tracker");
        assert!(request.body().is_empty());
    }

    #[tokio::test]
    async fn header_names_are_case_insensitive_and_ordered() {
        let request = parse(b"GET / HTTP/1.1\r\nX-Peer: a\r\nx-peer: b\r\n\r\n")
            .await
            .unwrap()
            .unwrap();

        let values: Vec<_> = request.headers().get_all("X-PEER").iter().collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reads_body_by_content_length() {
        let request = parse(b"PUT /nodes/1 HTTP/1.1\r\nContent-Length: 13\r\n\r\n{\"port\":4000}")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&request.body()[..], b"{\"port\":4000}");
    }

    #[tokio::test]
    async fn accepts_bare_lf_and_leading_blank_line() {
        let request = parse(b"\r\nGET / HTTP/1.0\nHost: x\n\n").await.unwrap().unwrap();
        assert_eq!(request.version(), Version::HTTP_10);
    }

    #[tokio::test]
    async fn empty_stream_is_clean_close() {
        assert!(parse(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_malformed_input() {
        assert!(matches!(parse(b"GARBAGE\r\n\r\n").await, Err(ParseError::RequestLine)));
        assert!(matches!(parse(b"GET / SPDY/3\r\n\r\n").await, Err(ParseError::Version)));
        assert!(matches!(parse(b"GET / HTTP/1.1\r\nno colon\r\n\r\n").await, Err(ParseError::Header)));
        assert!(matches!(
            parse(b"GET / HTTP/1.1\r\nA: b\r\n folded\r\n\r\n").await,
            Err(ParseError::Header)
        ));
    }

    #[tokio::test]
    async fn rejects_truncated_input() {
        assert!(matches!(parse(b"GET / HTTP/1.1\r\nHost: x\r\n").await, Err(ParseError::Truncated)));
        assert!(matches!(parse(b"GET / HTT").await, Err(ParseError::Truncated)));
        assert!(matches!(
            parse(b"PUT / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc").await,
            Err(ParseError::Truncated)
        ));
    }

    #[tokio::test]
    async fn rejects_bad_lengths_and_chunking() {
        assert!(matches!(
            parse(b"PUT / HTTP/1.1\r\nContent-Length: x\r\n\r\n").await,
            Err(ParseError::ContentLength)
        ));
        assert!(matches!(
            parse(b"PUT / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\nab").await,
            Err(ParseError::ContentLength)
        ));
        assert!(matches!(
            parse(b"PUT / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n").await,
            Err(ParseError::TransferEncoding)
        ));
    }

    #[tokio::test]
    async fn enforces_limits() {
        let limits = RequestLimits {
            max_header_bytes: 64,
            max_headers: 2,
            max_body_bytes: 4,
        };

        let long_line = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(100));
        let mut reader = long_line.as_bytes();
        assert!(matches!(
            read_request(&mut reader, &limits).await,
            Err(ParseError::HeadersTooLarge)
        ));

        let mut reader: &[u8] = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        assert!(matches!(
            read_request(&mut reader, &limits).await,
            Err(ParseError::HeadersTooLarge)
        ));

        let mut reader: &[u8] = b"PUT / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        assert!(matches!(
            read_request(&mut reader, &limits).await,
            Err(ParseError::BodyTooLarge(5))
        ));
    }

    #[tokio::test]
    async fn reads_pipelined_requests_in_order() {
        let mut reader: &[u8] = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let limits = RequestLimits::default();

        let first = read_request(&mut reader, &limits).await.unwrap().unwrap();
        let second = read_request(&mut reader, &limits).await.unwrap().unwrap();
        assert_eq!(first.uri().path(), "/a");
        assert_eq!(second.uri().path(), "/b");
        assert!(read_request(&mut reader, &limits).await.unwrap().is_none());
    }

    #[test]
    fn keep_alive_defaults_follow_version() {
        let build = |version, connection: Option<&str>| {
            let mut builder = Request::builder().version(version);
            if let Some(value) = connection {
                builder = builder.header(header::CONNECTION, value);
            }
            builder.body(()).unwrap()
        };

        assert!(wants_keep_alive(&build(Version::HTTP_11, None)));
        assert!(!wants_keep_alive(&build(Version::HTTP_11, Some("close"))));
        assert!(!wants_keep_alive(&build(Version::HTTP_10, None)));
        assert!(wants_keep_alive(&build(Version::HTTP_10, Some("Keep-Alive"))));
        assert!(!wants_keep_alive(&build(Version::HTTP_11, Some("upgrade, Close"))));
    }
}
