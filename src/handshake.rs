use crate::config::WsConfig;
use crate::connection::WsConnection;
use crate::error::Error;
use crate::request::{build_handshake_request, parse_ws_url};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use bytes::BytesMut;
use log::debug;
use rand::random;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub(crate) const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

// Limit the maximum amount of response data read, to prevent a misbehaving
// server from feeding us headers forever.
const MAX_RESPONSE_SIZE: usize = 1024 * 16; // 16 kilobytes
const MAX_RESPONSE_HEADERS: usize = 32;

/// Fresh `Sec-WebSocket-Key` value: 16 random bytes, base64 encoded.
/// The bytes come from the thread RNG, which is seeded from the OS
/// cryptographic source.
pub fn generate_websocket_key() -> String {
    let random_bytes: [u8; 16] = random();
    BASE64_STANDARD.encode(random_bytes)
}

/// The `Sec-WebSocket-Accept` value a compliant server must answer `key`
/// with: base64 of the SHA-1 over the key concatenated with the fixed GUID.
pub fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Connects to a `ws://` URL with the default configuration.
pub async fn connect_async(ws_url: &str) -> Result<WsConnection<TcpStream>, Error> {
    connect_async_with_config(ws_url, WsConfig::default()).await
}

/// Connects to a `ws://` URL: resolves and dials the host, performs the
/// opening handshake, and returns an open connection. The whole sequence
/// runs under the configured handshake timeout.
pub async fn connect_async_with_config(
    ws_url: &str,
    config: WsConfig,
) -> Result<WsConnection<TcpStream>, Error> {
    if config.enable_compression {
        return Err(Error::CompressionNotSupported);
    }
    let url = parse_ws_url(ws_url)?;

    timeout(config.handshake_timeout(), async {
        let stream = TcpStream::connect((url.host.as_str(), url.port)).await?;
        perform_client_handshake(stream, &url.host, url.port, &url.path, config).await
    })
    .await?
}

/// Performs the opening handshake over an already established transport.
/// Useful when the caller dials the socket itself (or tests the engine over
/// an in-memory pipe). Runs under the configured handshake timeout.
pub async fn client_handshake_with_config<S>(
    stream: S,
    host: &str,
    port: u16,
    path: &str,
    config: WsConfig,
) -> Result<WsConnection<S>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if config.enable_compression {
        return Err(Error::CompressionNotSupported);
    }
    timeout(
        config.handshake_timeout(),
        perform_client_handshake(stream, host, port, path, config),
    )
    .await?
}

async fn perform_client_handshake<S>(
    stream: S,
    host: &str,
    port: u16,
    path: &str,
    config: WsConfig,
) -> Result<WsConnection<S>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_websocket_key();
    let expected_accept = generate_websocket_accept_value(&key);
    let request = build_handshake_request(host, port, path, &key, &config);

    let mut conn = WsConnection::new(stream, config);
    conn.begin_connect();

    debug!("performing opening handshake with {}:{}", host, port);
    conn.stream_mut().write_all(request.as_bytes()).await?;

    let mut response_buf = BytesMut::with_capacity(MAX_RESPONSE_SIZE);
    let header_end = loop {
        if response_buf.len() >= MAX_RESPONSE_SIZE {
            return Err(Error::HandshakeTooLarge);
        }
        let mut tmp_buf = [0u8; 1024];
        let n = conn.stream_mut().read(&mut tmp_buf).await?;
        if n == 0 {
            // EOF before the response terminator is a transport failure
            return Err(Error::HandshakeInterrupted);
        }
        response_buf.extend_from_slice(&tmp_buf[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&response_buf)? {
            httparse::Status::Partial => continue,
            httparse::Status::Complete(offset) => {
                validate_response(&response, &expected_accept)?;
                break offset;
            }
        }
    };

    debug!("handshake with {}:{} complete, connection open", host, port);
    // A fast server may pipeline frames right behind the 101; those bytes
    // belong to the data phase and are kept for the first receive.
    conn.finish_connect(&response_buf[header_end..]);
    Ok(conn)
}

/// Checks a parsed 101 response against RFC 6455 section 4.2.2: the status
/// must be 101, `Upgrade`/`Connection` must carry their tokens, and the
/// accept key must match the derivation byte for byte after trimming.
/// Header names compare case-insensitively and duplicates are tolerated
/// with the first occurrence winning.
pub(crate) fn validate_response(
    response: &httparse::Response<'_, '_>,
    expected_accept: &str,
) -> Result<(), Error> {
    match response.code {
        Some(101) => {}
        Some(code) => return Err(Error::HandshakeStatus(code)),
        None => return Err(Error::HandshakeStatus(0)),
    }

    let upgrade = first_header(response, "Upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
    if !contains_token(upgrade, b"websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }

    let connection = first_header(response, "Connection").ok_or(Error::NoConnectionHeaderPresent)?;
    if !contains_token(connection, b"upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }

    let accept = first_header(response, "Sec-WebSocket-Accept").ok_or(Error::InvalidAcceptKey)?;
    if accept.trim_ascii() != expected_accept.as_bytes() {
        return Err(Error::InvalidAcceptKey);
    }

    Ok(())
}

fn first_header<'b>(response: &httparse::Response<'_, 'b>, name: &str) -> Option<&'b [u8]> {
    response
        .headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value)
}

// Case-insensitive substring search, enough for the single-token values the
// upgrade headers are required to contain.
fn contains_token(value: &[u8], token: &[u8]) -> bool {
    value
        .windows(token.len())
        .any(|window| window.eq_ignore_ascii_case(token))
}
