//! Response construction and serialization.
//!
//! Responses leave the router as `Response<Body>`, get buffered into
//! `Response<Bytes>`, and are written with an explicit `content-length` and a
//! `connection` header that reflects the keep-alive decision.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, Response, StatusCode, Version};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Value of the `server` header on every response.
pub const SERVER_NAME: &str = concat!("peer-tracker/", env!("CARGO_PKG_VERSION"));

const TEXT_PLAIN: &str = "text/plain";

/// Largest router response body we buffer.
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Empty `text/plain` response carrying the server header.
pub fn empty(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    response
}

/// `429 Too Many Requests` with `retry-after` in whole seconds, rounded up.
pub fn too_many_requests(retry_after: Duration) -> Response<Bytes> {
    let mut secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs += 1;
    }

    let mut response = empty(StatusCode::TOO_MANY_REQUESTS);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}

/// Buffer a router response body.
pub async fn into_bytes(response: Response<Body>) -> Response<Bytes> {
    let (parts, body) = response.into_parts();
    match axum::body::to_bytes(body, MAX_RESPONSE_BYTES).await {
        Ok(bytes) => Response::from_parts(parts, bytes),
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response body");
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Serialize `response` onto `writer` and flush.
pub async fn write_response<W>(
    writer: &mut W,
    response: &Response<Bytes>,
    version: Version,
    keep_alive: bool,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = encode_head(response, version, keep_alive);
    writer.write_all(&head).await?;
    writer.write_all(response.body()).await?;
    writer.flush().await
}

fn encode_head(response: &Response<Bytes>, version: Version, keep_alive: bool) -> Vec<u8> {
    let status = response.status();
    let version = match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    };

    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(
        format!(
            "{} {} {}\r\n",
            version,
            status.as_str(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );

    for (name, value) in response.headers() {
        if name == header::CONTENT_LENGTH
            || name == header::CONNECTION
            || name == header::TRANSFER_ENCODING
        {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    head.extend_from_slice(format!("content-length: {}\r\n", response.body().len()).as_bytes());
    head.extend_from_slice(if keep_alive {
        b"connection: keep-alive\r\n\r\n".as_slice()
    } else {
        b"connection: close\r\n\r\n".as_slice()
    });
    head
}
