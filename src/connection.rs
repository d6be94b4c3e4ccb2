use crate::config::WsConfig;
use crate::error::{Error, ErrorKind};
use crate::frame::{build_frame, CloseFrame, OpCode, MAX_CONTROL_PAYLOAD, MAX_HEADER_LEN};
use crate::message::Message;
use crate::parser::{FeedStatus, FrameParser};
use crate::ringbuf::RingBuffer;
use log::{debug, trace, warn};
use rand::random;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

// Headroom on top of the frame-size cap so the widest header fits next to a
// maximum payload in the staging buffer.
const RECV_BUFFER_SLACK: usize = 16;

// Frames up to this payload size are encoded in a stack scratch instead of
// allocating per send.
const SMALL_SEND_PAYLOAD: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

// Owned summary of one parsed frame; control payloads are small and copied
// out so the parser borrow can end before any reply is written.
struct FrameEvent {
    opcode: OpCode,
    is_final: bool,
    header_len: usize,
    payload_len: usize,
    ctrl: Vec<u8>,
}

/// A client WebSocket connection over any async byte transport.
///
/// The connection owns the transport, the receive staging buffer, and the
/// frame parser, and drives the RFC 6455 lifecycle: handshake (performed by
/// the `handshake` module), data exchange with automatic control-frame
/// replies, the closing handshake, and teardown. It is single-owner state;
/// `&mut self` on every operation is what serializes callers.
///
/// Receiving is zero-copy: [`recv`] yields a [`Message`] whose payload
/// borrows the staging buffer, and the connection keeps those bytes pinned
/// until [`release_payload`] drops the pin. While a pin is live, further
/// receives refuse with a not-ready error instead of corrupting the view.
///
/// [`recv`]: WsConnection::recv
/// [`release_payload`]: WsConnection::release_payload
#[derive(Debug)]
pub struct WsConnection<S = TcpStream> {
    stream: S,
    config: WsConfig,
    state: ConnectionState,
    last_error: ErrorKind,
    recv_buf: RingBuffer,
    parser: FrameParser,
    // bytes at the front of recv_buf already pushed through the parser
    fed: usize,
    pinned_refcnt: u32,
    pending_consume: usize,
    close_sent: bool,
    peer_close: Option<CloseFrame>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WsConnection<S> {
    pub(crate) fn new(stream: S, config: WsConfig) -> Self {
        let max_frame_size = config.frame_size_limit();
        WsConnection {
            stream,
            state: ConnectionState::Init,
            last_error: ErrorKind::Ok,
            recv_buf: RingBuffer::with_capacity(max_frame_size + RECV_BUFFER_SLACK),
            parser: FrameParser::new(max_frame_size),
            fed: 0,
            pinned_refcnt: 0,
            pending_consume: 0,
            close_sent: false,
            peer_close: None,
            config,
        }
    }

    pub(crate) fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub(crate) fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    // Marks the handshake as validated. Any bytes the server sent past the
    // 101 terminator already belong to the frame stream and are staged.
    pub(crate) fn finish_connect(&mut self, leftover: &[u8]) {
        self.recv_buf.clear();
        if !leftover.is_empty() {
            self.recv_buf.write_copy(leftover);
        }
        self.state = ConnectionState::Open;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Kind of the last terminal failure, `ErrorKind::Ok` while none
    /// happened. NotReady and Timeout results never end up here.
    pub fn last_error(&self) -> ErrorKind {
        self.last_error
    }

    /// The close record the peer sent, once one arrived.
    pub fn peer_close(&self) -> Option<&CloseFrame> {
        self.peer_close.as_ref()
    }

    pub fn payload_pinned(&self) -> bool {
        self.pinned_refcnt > 0
    }

    /// Takes an extra reference on the currently pinned payload, for callers
    /// (FFI bindings mostly) that hand the view to code with its own
    /// lifetime. No effect when nothing is pinned.
    pub fn retain_payload(&mut self) {
        if self.pinned_refcnt > 0 {
            self.pinned_refcnt += 1;
        }
    }

    /// Drops one reference on the pinned payload. When the count reaches
    /// zero the frame's bytes leave the staging buffer and receiving may
    /// resume.
    pub fn release_payload(&mut self) {
        if self.pinned_refcnt == 0 {
            return;
        }
        self.pinned_refcnt -= 1;
        if self.pinned_refcnt == 0 {
            let n = self.pending_consume;
            self.pending_consume = 0;
            self.discard_staged(n);
        }
    }

    /// Waits for and returns the next data frame.
    ///
    /// `wait` bounds the whole call: `None` waits indefinitely and
    /// `Some(Duration::ZERO)` only polls for data that is already there.
    /// Control frames never surface here; the connection answers pings,
    /// ignores pongs, completes the closing handshake, and reports their
    /// arrival as `Error::NotReady` so frames keep their wire order for the
    /// caller. A partial frame in flight is also `NotReady`, and an expired
    /// wait is `Error::Timeout`; both leave the connection untouched and the
    /// call can simply be retried.
    ///
    /// The returned message pins its payload: until [`release_payload`]
    /// brings the pin count back to zero, further receives refuse with
    /// `NotReady`.
    ///
    /// [`release_payload`]: WsConnection::release_payload
    pub async fn recv(&mut self, wait: Option<Duration>) -> Result<Message<'_>, Error> {
        match self.state {
            ConnectionState::Closed | ConnectionState::Error => return Err(Error::ConnectionClosed),
            ConnectionState::Init | ConnectionState::Connecting => return Err(Error::NotReady),
            ConnectionState::Open | ConnectionState::Closing => {}
        }
        if self.pinned_refcnt > 0 {
            return Err(Error::NotReady);
        }

        let deadline = wait.map(|d| Instant::now() + d);
        let meta = match self.next_data_frame(deadline).await {
            Ok(meta) => meta,
            Err(err) => {
                if err.kind().is_terminal() {
                    self.fail(err.kind());
                }
                return Err(err);
            }
        };

        trace!(
            "delivering {:?} frame with a {} byte payload",
            meta.opcode,
            meta.payload_len
        );
        self.pinned_refcnt = 1;
        self.pending_consume = meta.header_len + meta.payload_len;

        let payload =
            &self.recv_buf.peek_read()[meta.header_len..meta.header_len + meta.payload_len];
        Ok(Message {
            opcode: meta.opcode,
            payload,
            is_final: meta.is_final,
        })
    }

    /// Sends a single final text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), Error> {
        self.send_data(OpCode::Text, text.as_bytes()).await
    }

    /// Sends a single final binary frame.
    pub async fn send_binary(&mut self, data: &[u8]) -> Result<(), Error> {
        self.send_data(OpCode::Binary, data).await
    }

    /// Sends a ping carrying up to 125 bytes of application data.
    pub async fn send_ping(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::PingPayloadSize);
        }
        self.send_data(OpCode::Ping, data).await
    }

    /// Starts the closing handshake: sends a close frame with the given
    /// status code and optional reason (truncated to 123 bytes) and moves to
    /// the closing state. The caller may keep receiving until the peer's
    /// close or EOF arrives.
    pub async fn send_close(&mut self, code: u16, reason: Option<&str>) -> Result<(), Error> {
        if self.state != ConnectionState::Open {
            return Err(Error::ConnectionClosed);
        }
        let payload = CloseFrame::encode(code, reason.unwrap_or(""));
        match self.write_frame(OpCode::Close, &payload).await {
            Ok(()) => {
                debug!("close sent with code {}, awaiting peer close", code);
                self.close_sent = true;
                self.state = ConnectionState::Closing;
                Ok(())
            }
            Err(err) => {
                if err.kind().is_terminal() {
                    self.fail(err.kind());
                }
                Err(err)
            }
        }
    }

    /// Tears the connection down, sending a best-effort close frame first
    /// when the closing handshake never started.
    pub async fn close(mut self) -> Result<(), Error> {
        if self.state == ConnectionState::Open && !self.close_sent {
            let _ = self.write_frame(OpCode::Close, &[]).await;
        }
        self.state = ConnectionState::Closed;
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    async fn send_data(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        if self.state != ConnectionState::Open {
            return Err(Error::ConnectionClosed);
        }
        match self.write_frame(opcode, payload).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.kind().is_terminal() {
                    self.fail(err.kind());
                }
                Err(err)
            }
        }
    }

    // Builds and writes one final masked frame. According to the WebSockets
    // RFC all frames sent from the client need their payload masked, with a
    // fresh key per frame; the thread RNG providing it is CSPRNG-backed.
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        let mask: [u8; 4] = random();

        if payload.len() <= SMALL_SEND_PAYLOAD {
            let mut scratch = [0u8; SMALL_SEND_PAYLOAD + MAX_HEADER_LEN];
            let n = build_frame(&mut scratch, true, opcode, Some(mask), payload)?;
            self.stream.write_all(&scratch[..n]).await?;
        } else {
            let mut scratch = vec![0u8; payload.len() + MAX_HEADER_LEN];
            let n = build_frame(&mut scratch, true, opcode, Some(mask), payload)?;
            self.stream.write_all(&scratch[..n]).await?;
        }
        Ok(())
    }

    // Parses staged bytes (reading more when they run out) until a data
    // frame completes or a control frame was absorbed.
    async fn next_data_frame(&mut self, deadline: Option<Instant>) -> Result<FrameEvent, Error> {
        loop {
            // drain whatever is already staged before touching the socket
            while self.fed < self.recv_buf.len() {
                match self.feed_parser()? {
                    Some(event) if event.opcode.is_control() => {
                        self.handle_control(event).await?;
                        // absorbed; surface as not-ready so control traffic
                        // stays invisible but keeps its place in the order
                        return Err(Error::NotReady);
                    }
                    Some(event) => return Ok(event),
                    None => break,
                }
            }

            let n = self.read_into_buf(deadline).await?;
            if n == 0 {
                debug!("transport EOF");
                self.state = ConnectionState::Closed;
                return Err(Error::ConnectionClosed);
            }
        }
    }

    // Runs the parser over the staged bytes it has not seen yet. Whole
    // frames always start at offset zero here, because completed frames are
    // compacted away before the next one is parsed; that is what keeps a
    // frame's payload addressable as one contiguous slice.
    fn feed_parser(&mut self) -> Result<Option<FrameEvent>, Error> {
        let staged = self.recv_buf.peek_read();
        let unfed = &staged[self.fed..];
        let (n, status) = self.parser.feed(unfed)?;
        let event = match status {
            FeedStatus::NeedMore(_) => None,
            FeedStatus::Frame(frame) => Some(FrameEvent {
                opcode: frame.opcode,
                is_final: frame.is_final,
                header_len: frame.header_len,
                payload_len: frame.payload_len,
                ctrl: if frame.opcode.is_control() {
                    frame.payload.to_vec()
                } else {
                    Vec::new()
                },
            }),
        };
        self.fed += n;
        Ok(event)
    }

    async fn handle_control(&mut self, event: FrameEvent) -> Result<(), Error> {
        // control frames never pend, their bytes leave the staging buffer now
        self.discard_staged(event.header_len + event.payload_len);

        match event.opcode {
            OpCode::Ping => {
                debug!("ping received, echoing {} bytes back as pong", event.ctrl.len());
                self.write_frame(OpCode::Pong, &event.ctrl).await?;
                Ok(())
            }
            OpCode::Pong => {
                trace!("pong received");
                Ok(())
            }
            OpCode::Close => {
                let close = CloseFrame::parse(&event.ctrl);
                match &close {
                    Some(c) => debug!("peer close with code {} reason {:?}", c.code, c.reason),
                    None => debug!("peer close without a status code"),
                }
                if !self.close_sent {
                    // echo the peer's code back, or an empty payload when it
                    // sent none; per the RFC a close is answered exactly once
                    let reply = close
                        .as_ref()
                        .map(|c| c.code.to_be_bytes().to_vec())
                        .unwrap_or_default();
                    if let Err(err) = self.write_frame(OpCode::Close, &reply).await {
                        warn!("failed to answer the peer close: {}", err);
                    }
                    self.close_sent = true;
                }
                self.peer_close = close;
                self.state = ConnectionState::Closed;
                Err(Error::ConnectionClosed)
            }
            _ => Ok(()),
        }
    }

    async fn read_into_buf(&mut self, deadline: Option<Instant>) -> Result<usize, Error> {
        let region = self.recv_buf.peek_write();
        if region.is_empty() {
            return Err(Error::BufferFull);
        }
        let n = match deadline {
            Some(at) => timeout_at(at, self.stream.read(region)).await??,
            None => self.stream.read(region).await?,
        };
        self.recv_buf.commit(n);
        Ok(n)
    }

    // Removes a fully handled frame from the front of the staging buffer
    // and re-anchors the remaining bytes at offset zero.
    fn discard_staged(&mut self, n: usize) {
        self.recv_buf.consume(n);
        self.recv_buf.make_contiguous();
        self.fed -= n;
    }

    fn fail(&mut self, kind: ErrorKind) {
        self.last_error = kind;
        if self.state != ConnectionState::Closed {
            self.state = if kind == ErrorKind::Closed {
                ConnectionState::Closed
            } else {
                ConnectionState::Error
            };
        }
    }
}

#[cfg(unix)]
impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + std::os::fd::AsRawFd,
{
    /// Raw file descriptor of the transport, for event-loop integration.
    pub fn fileno(&self) -> std::os::fd::RawFd {
        self.stream.as_raw_fd()
    }
}
