use httparse::Error as HttpParseError;
use std::fmt;
use std::io;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

/// The closed set of error categories the engine can report.
///
/// Every [`Error`] variant maps onto exactly one kind, and the connection
/// remembers the kind of the last terminal failure, so callers that only
/// care about the coarse outcome (FFI bindings in particular) never have to
/// match on the full variant list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Ok,
    InvalidArgs,
    Memory,
    Network,
    Handshake,
    Protocol,
    Timeout,
    Closed,
    BufferFull,
    NotReady,
}

impl ErrorKind {
    /// Stable human-readable description, one per kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Ok => "OK",
            ErrorKind::InvalidArgs => "Invalid arguments",
            ErrorKind::Memory => "Out of memory",
            ErrorKind::Network => "Network error",
            ErrorKind::Handshake => "Handshake failed",
            ErrorKind::Protocol => "Protocol error",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Closed => "Connection closed",
            ErrorKind::BufferFull => "Buffer full",
            ErrorKind::NotReady => "Not ready",
        }
    }

    /// Terminal kinds tear the connection down; NotReady and Timeout are
    /// idempotent and the caller may simply retry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::Handshake
                | ErrorKind::Protocol
                | ErrorKind::Closed
                | ErrorKind::BufferFull
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // General Errors
    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    // URL Errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("Invalid scheme in WebSocket URL, only ws:// is supported")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    // Handshake Errors
    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("Server replied with status `{0}` instead of 101")]
    HandshakeStatus(u16),

    #[error("Upgrade: websocket header missing in the response")]
    NoUpgradeHeaderPresent,

    #[error("Connection: Upgrade header missing in the response")]
    NoConnectionHeaderPresent,

    #[error("Server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("Connection closed before the handshake completed")]
    HandshakeInterrupted,

    #[error("Handshake response exceeded the header size limit")]
    HandshakeTooLarge,

    // Framing Errors
    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Invalid Opcode")]
    InvalidOpcode,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("Received a masked frame from the server")]
    MaskedFrameFromServer,

    #[error("64-bit payload length with the most significant bit set")]
    InvalidPayloadLength,

    #[error("Max frame size reached")]
    MaxFrameSize,

    // Fragmentation Errors
    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("Incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    // Payload validation Errors
    #[error("Invalid UTF-8 in text payload or close reason")]
    InvalidUtf8,

    #[error("Close frame with a 1-byte payload")]
    InvalidClosePayload,

    #[error("Close frame with invalid status code: `{0}`")]
    InvalidCloseCode(u16),

    // API surface Errors
    #[error("Ping payload can't be greater than 125 bytes")]
    PingPayloadSize,

    #[error("Per-message compression is not supported")]
    CompressionNotSupported,

    // Connection lifecycle
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("No complete frame available yet")]
    NotReady,

    #[error("Receive buffer full")]
    BufferFull,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IOError { .. } | Error::HandshakeInterrupted => ErrorKind::Network,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::URLParseError { .. }
            | Error::InvalidSchemeURL
            | Error::URLNoHost
            | Error::PingPayloadSize
            | Error::CompressionNotSupported => ErrorKind::InvalidArgs,
            Error::HttpParseError { .. }
            | Error::HandshakeStatus(_)
            | Error::NoUpgradeHeaderPresent
            | Error::NoConnectionHeaderPresent
            | Error::InvalidAcceptKey
            | Error::HandshakeTooLarge => ErrorKind::Handshake,
            Error::RSVNotZero
            | Error::InvalidOpcode
            | Error::ControlFramesFragmented
            | Error::ControlFramePayloadSize
            | Error::MaskedFrameFromServer
            | Error::InvalidPayloadLength
            | Error::InvalidFrameFragmentation
            | Error::FragmentedInProgress
            | Error::InvalidContinuationFrame
            | Error::InvalidUtf8
            | Error::InvalidClosePayload
            | Error::InvalidCloseCode(_) => ErrorKind::Protocol,
            // An over-limit frame can never be staged in the receive buffer,
            // which is sized from the same cap.
            Error::MaxFrameSize | Error::BufferFull => ErrorKind::BufferFull,
            Error::ConnectionClosed => ErrorKind::Closed,
            Error::NotReady => ErrorKind::NotReady,
        }
    }
}
