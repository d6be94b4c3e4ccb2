use std::time::Duration;

pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u32 = 5000;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1 << 20; // 1 MiB

/// Client configuration for a single WebSocket connection.
///
/// The optional headers are only emitted in the handshake request when they
/// are set to a non-empty value. A zero timeout or frame size means "use the
/// default", so a zeroed config behaves the same as `WsConfig::default()`.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Value for the `User-Agent` request header.
    pub user_agent: Option<String>,
    /// Value for the `Origin` request header.
    pub origin: Option<String>,
    /// Value for the `Sec-WebSocket-Protocol` request header.
    pub protocol: Option<String>,
    /// Time allowed for TCP connect plus the opening handshake.
    pub handshake_timeout_ms: u32,
    /// Largest single frame the parser accepts; also sizes the receive buffer.
    pub max_frame_size: usize,
    /// Reserved for per-message deflate. Connecting with this set is rejected.
    pub enable_compression: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        WsConfig {
            user_agent: None,
            origin: None,
            protocol: None,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            enable_compression: false,
        }
    }
}

impl WsConfig {
    pub fn handshake_timeout(&self) -> Duration {
        let ms = if self.handshake_timeout_ms == 0 {
            DEFAULT_HANDSHAKE_TIMEOUT_MS
        } else {
            self.handshake_timeout_ms
        };
        Duration::from_millis(u64::from(ms))
    }

    pub fn frame_size_limit(&self) -> usize {
        if self.max_frame_size == 0 {
            DEFAULT_MAX_FRAME_SIZE
        } else {
            self.max_frame_size
        }
    }
}
