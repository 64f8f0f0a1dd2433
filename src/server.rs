//! Minimal HTTP/1.1 front end over tokio.
//!
//! Parses the request line and headers by hand, hands the request to the
//! engine on the blocking pool and writes the response back. Connections
//! are kept alive unless the client asks otherwise.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONNECTION};
use http::{HeaderMap, Method, Request, Response, StatusCode, Version};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::handler::{Handled, StaticEngine};

pub const MAX_REQUEST_SIZE: usize = 8192;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const KEEPALIVE_TIMEOUT_SECS: u64 = 5;
const LINGER_MILLIS: u64 = 100;

/// Accepts connections until `shutdown` resolves. Connections already being
/// served finish their current request and then close.
pub async fn serve<F>(
    listener: TcpListener,
    engine: Arc<StaticEngine>,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    let stopping = Arc::new(AtomicBool::new(false));
    tokio::pin!(shutdown);

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&engine),
                            Arc::clone(&stopping),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping server");
                stopping.store(true, Ordering::Relaxed);
                break;
            }
        }
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Why a request could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reject {
    Malformed,
    TooLarge,
    Timeout,
}

impl Reject {
    fn response(self) -> Response<Bytes> {
        let (status, message): (StatusCode, &'static str) = match self {
            Reject::Malformed => (StatusCode::BAD_REQUEST, "Malformed request"),
            Reject::TooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "Request too large"),
            Reject::Timeout => (StatusCode::REQUEST_TIMEOUT, "Request timeout"),
        };
        let mut response = Response::new(Bytes::from_static(message.as_bytes()));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
            .headers_mut()
            .insert(http::header::CONTENT_LENGTH, HeaderValue::from(message.len()));
        response
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<StaticEngine>,
    stopping: Arc<AtomicBool>,
) {
    if let Err(e) = handle_connection_inner(&mut stream, &engine, &stopping).await {
        debug!(%peer, error = %e, "connection closed with error");
    }
}

async fn handle_connection_inner(
    stream: &mut TcpStream,
    engine: &Arc<StaticEngine>,
    stopping: &AtomicBool,
) -> io::Result<()> {
    let (read_half, mut writer) = stream.split();
    let mut reader = BufReader::new(read_half);

    loop {
        if stopping.load(Ordering::Relaxed) {
            break;
        }

        let parsed = match read_request(&mut reader).await {
            Ok(Some(parsed)) => parsed,
            Ok(None) => break,
            Err(reject) => {
                debug!(?reject, "rejecting request");
                write_response(&mut writer, &reject.response(), false).await?;
                linger(&mut reader).await;
                break;
            }
        };

        // Bodies are never read, so only body-less methods can share the
        // connection with a following request.
        let body_less = matches!(*parsed.request.method(), Method::GET | Method::HEAD);
        let keep_alive = parsed.keep_alive && body_less;

        let method = parsed.request.method().clone();
        let path = parsed.request.uri().path().to_string();
        let engine = Arc::clone(engine);
        let request = parsed.request;
        let handled = tokio::task::spawn_blocking(move || engine.handle(&request)).await;

        let response = match handled {
            Ok(Handled::Response(response)) => response,
            Ok(Handled::Declined) => not_found(),
            Err(e) => {
                warn!(error = %e, "request handler failed");
                write_response(&mut writer, &internal_error(), false).await?;
                break;
            }
        };

        debug!(%method, path = %path, status = response.status().as_u16(), "request served");
        write_response(&mut writer, &response, keep_alive).await?;
        if !keep_alive {
            break;
        }
    }

    Ok(())
}

/// Swallows whatever the client is still sending so closing the socket does
/// not reset the connection before the error response is read.
async fn linger<R>(reader: &mut R)
where
    R: AsyncBufRead + Unpin,
{
    let mut drain = reader.take(MAX_REQUEST_SIZE as u64 * 4);
    let _ = timeout(
        Duration::from_millis(LINGER_MILLIS),
        tokio::io::copy(&mut drain, &mut tokio::io::sink()),
    )
    .await;
}

struct ParsedRequest {
    request: Request<()>,
    keep_alive: bool,
}

/// Reads one request head. `Ok(None)` means the peer went away or stayed
/// idle past the keep-alive window.
async fn read_request<R>(reader: &mut R) -> Result<Option<ParsedRequest>, Reject>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_REQUEST_SIZE;
    let mut request_line = String::new();

    loop {
        request_line.clear();
        let read = timeout(
            Duration::from_secs(KEEPALIVE_TIMEOUT_SECS),
            read_limited_line(reader, &mut request_line, budget),
        )
        .await;
        match read {
            Err(_) | Ok(Ok(0)) | Ok(Err(LineError::Io)) => return Ok(None),
            Ok(Err(LineError::TooLong)) => return Err(Reject::TooLarge),
            Ok(Ok(_)) => {}
        }
        // Tolerate stray CRLFs between pipelined requests.
        if !request_line.trim().is_empty() {
            budget -= request_line.len();
            break;
        }
    }

    let (method, path, version) =
        parse_request_line_fast(request_line.trim().as_bytes()).ok_or(Reject::Malformed)?;
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        _ => return Err(Reject::Malformed),
    };
    let method = Method::from_bytes(method).map_err(|_| Reject::Malformed)?;

    let headers = timeout(
        Duration::from_secs(REQUEST_TIMEOUT_SECS),
        read_headers(reader, budget),
    )
    .await
    .map_err(|_| Reject::Timeout)??;

    let keep_alive = wants_keep_alive(version, &headers);

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .version(version)
        .body(())
        .map_err(|_| Reject::Malformed)?;
    *request.headers_mut() = headers;

    Ok(Some(ParsedRequest { request, keep_alive }))
}

async fn read_headers<R>(reader: &mut R, mut budget: usize) -> Result<HeaderMap, Reject>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = HeaderMap::new();
    let mut line = String::new();

    loop {
        line.clear();
        let read = read_limited_line(reader, &mut line, budget)
            .await
            .map_err(|e| match e {
                LineError::TooLong => Reject::TooLarge,
                LineError::Io => Reject::Malformed,
            })?;
        if read == 0 {
            return Err(Reject::Malformed);
        }
        budget -= read;

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(headers);
        }

        let (name, value) = line.split_once(':').ok_or(Reject::Malformed)?;
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| Reject::Malformed)?;
        let value = HeaderValue::from_str(value.trim()).map_err(|_| Reject::Malformed)?;
        headers.append(name, value);
    }
}

enum LineError {
    TooLong,
    Io,
}

/// `read_line` that refuses to buffer more than `limit` bytes.
async fn read_limited_line<R>(
    reader: &mut R,
    buf: &mut String,
    limit: usize,
) -> Result<usize, LineError>
where
    R: AsyncBufRead + Unpin,
{
    let read = reader
        .take(limit as u64 + 1)
        .read_line(buf)
        .await
        .map_err(|_| LineError::Io)?;
    if read > limit {
        return Err(LineError::TooLong);
    }
    Ok(read)
}

fn wants_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let connection = headers.get(CONNECTION).and_then(|v| v.to_str().ok());
    match connection {
        Some(value) if header_contains(value, "close") => false,
        Some(value) if header_contains(value, "keep-alive") => true,
        _ => version == Version::HTTP_11,
    }
}

// Case-insensitive substring search without allocating.
fn header_contains(header_line: &str, substring: &str) -> bool {
    let header_bytes = header_line.as_bytes();
    let sub_bytes = substring.as_bytes();

    if sub_bytes.is_empty() {
        return true;
    }

    header_bytes
        .windows(sub_bytes.len())
        .any(|window| window.eq_ignore_ascii_case(sub_bytes))
}

fn parse_request_line_fast(request: &[u8]) -> Option<(&[u8], &str, &str)> {
    let mut parts = request.split(|&b| b == b' ').filter(|part| !part.is_empty());

    let method = parts.next()?;
    let path_bytes = parts.next()?;
    let version_bytes = parts.next()?;

    if parts.next().is_some() {
        return None;
    }

    let path = std::str::from_utf8(path_bytes).ok()?;
    let version = std::str::from_utf8(version_bytes).ok()?;

    if !path.starts_with('/') {
        return None;
    }

    Some((method, path, version))
}

fn not_found() -> Response<Bytes> {
    plain(StatusCode::NOT_FOUND, "File not found")
}

fn internal_error() -> Response<Bytes> {
    plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn plain(status: StatusCode, message: &'static str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from_static(message.as_bytes()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
        .headers_mut()
        .insert(http::header::CONTENT_LENGTH, HeaderValue::from(message.len()));
    response
}

/// Serializes the status line and headers. `Content-Length` comes from the
/// response itself, so HEAD replies advertise the length of the body they
/// omit.
fn encode_head(response: &Response<Bytes>, keep_alive: bool) -> Vec<u8> {
    let status = response.status();
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(b"HTTP/1.1 ");
    head.extend_from_slice(status.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes());
    head.extend_from_slice(b"\r\n");

    for (name, value) in response.headers() {
        if name == CONNECTION {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    head.extend_from_slice(if keep_alive {
        b"Connection: keep-alive\r\n\r\n".as_slice()
    } else {
        b"Connection: close\r\n\r\n".as_slice()
    });
    head
}

async fn write_response<W>(
    writer: &mut W,
    response: &Response<Bytes>,
    keep_alive: bool,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_head(response, keep_alive)).await?;
    if !response.body().is_empty() {
        writer.write_all(response.body()).await?;
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_parsing() {
        let (method, path, version) = parse_request_line_fast(b"GET /a.js HTTP/1.1").unwrap();
        assert_eq!(method, b"GET");
        assert_eq!(path, "/a.js");
        assert_eq!(version, "HTTP/1.1");

        assert!(parse_request_line_fast(b"GET /a.js").is_none());
        assert!(parse_request_line_fast(b"GET /a.js HTTP/1.1 extra").is_none());
        assert!(parse_request_line_fast(b"GET a.js HTTP/1.1").is_none());
    }

    #[test]
    fn keep_alive_rules() {
        let mut headers = HeaderMap::new();
        assert!(wants_keep_alive(Version::HTTP_11, &headers));
        assert!(!wants_keep_alive(Version::HTTP_10, &headers));

        headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
        assert!(wants_keep_alive(Version::HTTP_10, &headers));

        headers.insert(CONNECTION, HeaderValue::from_static("CLOSE"));
        assert!(!wants_keep_alive(Version::HTTP_11, &headers));
    }

    #[test]
    fn head_encoding_keeps_content_length() {
        let mut response = Response::new(Bytes::new());
        response
            .headers_mut()
            .insert(http::header::CONTENT_LENGTH, HeaderValue::from(42usize));
        let head = String::from_utf8(encode_head(&response, true)).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("content-length: 42\r\n"));
        assert!(head.ends_with("Connection: keep-alive\r\n\r\n"));
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_REQUEST_SIZE));
        raw.extend_from_slice(b"\r\n\r\n");
        let mut reader = BufReader::new(&raw[..]);
        assert_eq!(read_request(&mut reader).await.err(), Some(Reject::TooLarge));
    }

    #[tokio::test]
    async fn headers_are_collected() {
        let raw = b"GET /x HTTP/1.1\r\nAccept-Encoding: gzip\r\nIf-None-Match: \"abc\"\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let parsed = read_request(&mut reader).await.unwrap().unwrap();
        assert_eq!(parsed.request.uri().path(), "/x");
        assert_eq!(parsed.request.headers()["accept-encoding"], "gzip");
        assert_eq!(parsed.request.headers()["if-none-match"], "\"abc\"");
        assert!(parsed.keep_alive);
    }
}
