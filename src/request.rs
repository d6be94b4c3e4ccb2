use crate::config::WsConfig;
use crate::error::Error;
use url::Url;

/// The pieces of a `ws://` URL the handshake needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WsUrl {
    pub host: String,
    pub port: u16,
    /// Request path including the query string, `/` when the URL has none.
    pub path: String,
}

// Parses and validates the WebSocket URL a client connects to. Only the
// plain ws scheme is accepted here; TLS termination is outside the engine,
// so a wss URL is an argument error rather than something we half-support.
pub(crate) fn parse_ws_url(input: &str) -> Result<WsUrl, Error> {
    let parsed = Url::parse(input)?;

    if parsed.scheme() != "ws" {
        return Err(Error::InvalidSchemeURL);
    }

    let host = parsed.host_str().ok_or(Error::URLNoHost)?.to_string();
    let port = parsed.port().unwrap_or(80);

    // The query string is part of the request target in the GET line
    let path = match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    };

    Ok(WsUrl { host, port, path })
}

// Builds the opening handshake request. The fixed headers always come out
// in the same order, each line CRLF-terminated, with an empty line closing
// the request. The Host header always carries the port, even the default
// one. Optional headers are appended only when configured non-empty, so a
// default config produces the minimal six-line request.
//
// Since everything ends up as bytes in the TCP stream anyway, the request
// is assembled as a plain string rather than going through an HTTP type.
pub(crate) fn build_handshake_request(
    host: &str,
    port: u16,
    path: &str,
    key: &str,
    config: &WsConfig,
) -> String {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}:{}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        path, host, port, key,
    );

    if let Some(user_agent) = config.user_agent.as_deref().filter(|v| !v.is_empty()) {
        request.push_str("User-Agent: ");
        request.push_str(user_agent);
        request.push_str("\r\n");
    }
    if let Some(origin) = config.origin.as_deref().filter(|v| !v.is_empty()) {
        request.push_str("Origin: ");
        request.push_str(origin);
        request.push_str("\r\n");
    }
    if let Some(protocol) = config.protocol.as_deref().filter(|v| !v.is_empty()) {
        request.push_str("Sec-WebSocket-Protocol: ");
        request.push_str(protocol);
        request.push_str("\r\n");
    }

    request.push_str("\r\n");
    request
}
