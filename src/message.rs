use crate::error::Error;
use crate::frame::OpCode;

/// A data frame handed to the caller by `recv`.
///
/// The payload borrows the connection's staging buffer, so no copy happens
/// on the receive path. The borrow (and the pin the connection keeps on the
/// backing bytes) must be given up before the next receive; see
/// `WsConnection::release_payload`.
///
/// Fragmented messages surface one frame at a time: the first fragment
/// carries the text/binary opcode with `is_final` false, the following ones
/// arrive as `OpCode::Continue`, and the last has `is_final` true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    pub opcode: OpCode,
    pub payload: &'a [u8],
    pub is_final: bool,
}

impl<'a> Message<'a> {
    pub fn is_text(&self) -> bool {
        self.opcode == OpCode::Text
    }

    pub fn is_binary(&self) -> bool {
        self.opcode == OpCode::Binary
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The payload as text. Text frames were already validated by the
    /// parser, so this only fails for binary payloads that happen to carry
    /// invalid UTF-8.
    pub fn as_text(&self) -> Result<&'a str, Error> {
        std::str::from_utf8(self.payload).map_err(|_| Error::InvalidUtf8)
    }
}
