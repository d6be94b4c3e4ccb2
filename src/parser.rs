use crate::error::Error;
use crate::frame::{OpCode, MAX_CONTROL_PAYLOAD, MAX_HEADER_LEN};
use crate::utf8::Utf8Validator;

/// One decoded frame, reported as soon as its last payload byte has been
/// consumed.
///
/// `payload` is a zero-copy view over the bytes taken from the current
/// `feed` call. The parser never coalesces data payloads across feeds, so
/// when a frame arrived in several pieces the view only covers the final
/// piece and the earlier pieces were reported through
/// [`FeedStatus::NeedMore`]; `header_len` and `payload_len` let a caller
/// that staged the whole frame contiguously (the connection does) address
/// the complete payload in its own buffer instead. Control-frame payloads
/// are the exception: they are at most 125 bytes and are coalesced
/// internally, so their view is always the complete payload no matter how
/// the input was split.
#[derive(Debug)]
pub struct ParsedFrame<'a> {
    pub opcode: OpCode,
    pub is_final: bool,
    pub payload: &'a [u8],
    pub header_len: usize,
    pub payload_len: usize,
}

#[derive(Debug)]
pub enum FeedStatus<'a> {
    /// The input ran out mid-frame. The view covers the data-payload bytes
    /// consumed by this feed (empty while the header is still incomplete),
    /// so callers assembling a payload themselves can accumulate it.
    NeedMore(&'a [u8]),
    /// A complete frame was decoded. Input past it was left unconsumed.
    Frame(ParsedFrame<'a>),
}

#[derive(Debug, Default, Clone, Copy)]
struct FrameHeader {
    fin: bool,
    opcode: u8,
    payload_len: u64,
}

/// Incremental RFC 6455 frame decoder.
///
/// The parser is a pure state machine: it owns no transport, performs no
/// waiting, and reports progress through the result of [`feed`]. Header
/// bytes accumulate in a small scratch whose expected size grows as the
/// extended length field reveals itself; payload bytes are consumed without
/// copying.
///
/// [`feed`]: FrameParser::feed
#[derive(Debug)]
pub struct FrameParser {
    max_frame_size: usize,
    hdr: [u8; MAX_HEADER_LEN],
    hdr_need: usize,
    hdr_have: usize,
    header_done: bool,
    cur: FrameHeader,
    payload_read: u64,
    // set while a fragmented message is open; continuations inherit the
    // text/binary nature of its first frame
    fragmented: bool,
    first_fragment_opcode: Option<OpCode>,
    validate_utf8: bool,
    utf8: Utf8Validator,
    ctrl_buf: [u8; MAX_CONTROL_PAYLOAD],
    ctrl_len: usize,
}

impl FrameParser {
    pub fn new(max_frame_size: usize) -> Self {
        FrameParser {
            max_frame_size,
            hdr: [0u8; MAX_HEADER_LEN],
            hdr_need: 2,
            hdr_have: 0,
            header_done: false,
            cur: FrameHeader::default(),
            payload_read: 0,
            fragmented: false,
            first_fragment_opcode: None,
            validate_utf8: false,
            utf8: Utf8Validator::new(),
            ctrl_buf: [0u8; MAX_CONTROL_PAYLOAD],
            ctrl_len: 0,
        }
    }

    /// Consumes bytes from `data` and reports how far the current frame got.
    ///
    /// Returns the number of bytes consumed together with the status. At
    /// most one frame is decoded per call; when a frame completes, any
    /// remaining input is left for the next call. Protocol violations and
    /// over-limit frames are returned as errors and leave the parser in an
    /// unusable state, which matches how the connection treats them: the
    /// stream can't be resynchronized after a framing error.
    pub fn feed<'a>(&'a mut self, data: &'a [u8]) -> Result<(usize, FeedStatus<'a>), Error> {
        let mut consumed = 0;

        if !self.header_done {
            loop {
                while self.hdr_have < self.hdr_need && consumed < data.len() {
                    self.hdr[self.hdr_have] = data[consumed];
                    self.hdr_have += 1;
                    consumed += 1;
                }
                if self.decode_header()? {
                    break;
                }
                // decode_header may have raised hdr_need for an extended
                // length field; loop to pull the extra bytes if we have them
                if consumed == data.len() {
                    return Ok((consumed, FeedStatus::NeedMore(&[])));
                }
            }
            self.header_done = true;
            self.begin_payload();
        }

        // Take as much of the declared payload as this feed can provide,
        // recording a view of exactly the bytes taken.
        let need = self.cur.payload_len - self.payload_read;
        let take = (need.min((data.len() - consumed) as u64)) as usize;
        let chunk = &data[consumed..consumed + take];
        consumed += take;
        self.payload_read += take as u64;

        if opcode_is_control(self.cur.opcode) {
            self.ctrl_buf[self.ctrl_len..self.ctrl_len + take].copy_from_slice(chunk);
            self.ctrl_len += take;
        } else if self.validate_utf8 && !self.utf8.feed(chunk) {
            return Err(Error::InvalidUtf8);
        }

        if self.payload_read < self.cur.payload_len {
            return Ok((consumed, FeedStatus::NeedMore(chunk)));
        }

        let frame = self.finish_frame(chunk)?;
        Ok((consumed, FeedStatus::Frame(frame)))
    }

    /// Attempts to decode the header from the scratch bytes gathered so far.
    /// Returns Ok(false) when more bytes are required, possibly after
    /// raising `hdr_need`.
    fn decode_header(&mut self) -> Result<bool, Error> {
        if self.hdr_have < self.hdr_need {
            return Ok(false);
        }
        let b0 = self.hdr[0];
        let b1 = self.hdr[1];

        let fin = b0 & 0b1000_0000 != 0;
        let opcode = b0 & 0b0000_1111;

        // RSV bits are only meaningful under a negotiated extension, and we
        // never negotiate one, so any of them being set fails the connection
        if b0 & 0b0111_0000 != 0 {
            return Err(Error::RSVNotZero);
        }
        // probe for the reserved ranges 0x3-0x7 and 0xB-0xF
        OpCode::from(opcode)?;

        let masked = b1 & 0b1000_0000 != 0;
        let len7 = u64::from(b1 & 0b0111_1111);

        let mut need = 2;
        let payload_len = if len7 <= 125 {
            len7
        } else if len7 == 126 {
            need += 2;
            if self.hdr_have < need {
                self.hdr_need = need;
                return Ok(false);
            }
            u64::from(u16::from_be_bytes([self.hdr[2], self.hdr[3]]))
        } else {
            need += 8;
            if self.hdr_have < need {
                self.hdr_need = need;
                return Ok(false);
            }
            // the RFC requires the 64-bit length's most significant bit clear
            if self.hdr[2] & 0b1000_0000 != 0 {
                return Err(Error::InvalidPayloadLength);
            }
            u64::from_be_bytes(self.hdr[2..10].try_into().unwrap_or_default())
        };

        if opcode_is_control(opcode) {
            // control frames can't be fragmented and carry at most 125 bytes
            if !fin {
                return Err(Error::ControlFramesFragmented);
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(Error::ControlFramePayloadSize);
            }
        }

        // Servers must not mask frames sent to a client; rather than guess
        // at the sender's intent we fail the connection, so the mask bytes
        // that would otherwise follow are never even waited for.
        if masked {
            return Err(Error::MaskedFrameFromServer);
        }

        if payload_len > self.max_frame_size as u64 {
            return Err(Error::MaxFrameSize);
        }

        self.cur = FrameHeader {
            fin,
            opcode,
            payload_len,
        };
        Ok(true)
    }

    fn begin_payload(&mut self) {
        if opcode_is_control(self.cur.opcode) {
            self.ctrl_len = 0;
        } else {
            self.validate_utf8 = self.cur.opcode == 0x1
                || (self.cur.opcode == 0x0 && self.first_fragment_opcode == Some(OpCode::Text));
            // a text opcode starts a new message, so validation starts clean
            if self.cur.opcode == 0x1 {
                self.utf8.reset();
            }
        }
    }

    /// Runs the end-of-frame rules: fragmentation bookkeeping, close-payload
    /// validation, final UTF-8 check, then resets for the next header.
    fn finish_frame<'a>(&'a mut self, last_chunk: &'a [u8]) -> Result<ParsedFrame<'a>, Error> {
        let opcode = OpCode::from(self.cur.opcode)?;

        if !opcode.is_control() {
            match opcode {
                OpCode::Continue => {
                    if !self.fragmented {
                        return Err(Error::InvalidContinuationFrame);
                    }
                    if self.cur.fin {
                        self.fragmented = false;
                        self.first_fragment_opcode = None;
                    }
                }
                _ => {
                    if self.fragmented {
                        // a second data frame may not start before the open
                        // fragmented message saw its final continuation
                        return if self.cur.fin {
                            Err(Error::InvalidFrameFragmentation)
                        } else {
                            Err(Error::FragmentedInProgress)
                        };
                    }
                    if !self.cur.fin {
                        self.fragmented = true;
                        self.first_fragment_opcode = Some(opcode);
                    }
                }
            }

            if self.validate_utf8 && self.cur.fin && !self.utf8.finish() {
                return Err(Error::InvalidUtf8);
            }
        }

        if opcode == OpCode::Close {
            self.validate_close_payload()?;
        }

        let header_len = self.hdr_need;
        let payload_len = self.cur.payload_len as usize;
        let is_final = self.cur.fin;

        self.hdr_need = 2;
        self.hdr_have = 0;
        self.header_done = false;
        self.payload_read = 0;

        let payload: &[u8] = if opcode.is_control() {
            &self.ctrl_buf[..self.ctrl_len]
        } else {
            last_chunk
        };

        Ok(ParsedFrame {
            opcode,
            is_final,
            payload,
            header_len,
            payload_len,
        })
    }

    fn validate_close_payload(&self) -> Result<(), Error> {
        let payload = &self.ctrl_buf[..self.ctrl_len];
        // a bare status code needs two bytes; one byte can't encode anything
        if payload.len() == 1 {
            return Err(Error::InvalidClosePayload);
        }
        if payload.len() >= 2 {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if !crate::frame::is_valid_close_code(code) {
                return Err(Error::InvalidCloseCode(code));
            }
            if std::str::from_utf8(&payload[2..]).is_err() {
                return Err(Error::InvalidUtf8);
            }
        }
        Ok(())
    }
}

fn opcode_is_control(opcode: u8) -> bool {
    opcode & 0x8 != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::build_frame;

    fn parser() -> FrameParser {
        FrameParser::new(1 << 20)
    }

    // Feeds the whole input at once and expects exactly one frame, returning
    // (consumed, opcode, is_final, payload copy).
    fn parse_one(data: &[u8]) -> (usize, OpCode, bool, Vec<u8>) {
        let mut p = parser();
        let (consumed, status) = p.feed(data).unwrap();
        match status {
            FeedStatus::Frame(f) => (consumed, f.opcode, f.is_final, f.payload.to_vec()),
            FeedStatus::NeedMore(_) => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn small_binary_frame() {
        let (consumed, opcode, is_final, payload) = parse_one(&[0x82, 0x03, 0x01, 0x02, 0x03]);
        assert_eq!(consumed, 5);
        assert_eq!(opcode, OpCode::Binary);
        assert!(is_final);
        assert_eq!(payload, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn counters_reset_after_emission() {
        let mut p = parser();
        let (consumed, status) = p.feed(&[0x82, 0x03, 0x01, 0x02, 0x03]).unwrap();
        assert!(matches!(status, FeedStatus::Frame(_)));
        assert_eq!(consumed, 5);
        assert_eq!(p.hdr_have, 0);
        assert_eq!(p.hdr_need, 2);
        assert_eq!(p.payload_read, 0);
    }

    #[test]
    fn sixteen_bit_length_frame() {
        let payload = vec![0xAB; 200];
        let mut wire = vec![0x82, 126, 0x00, 200];
        wire.extend_from_slice(&payload);

        let (consumed, opcode, is_final, got) = parse_one(&wire);
        assert_eq!(consumed, wire.len());
        assert_eq!(opcode, OpCode::Binary);
        assert!(is_final);
        assert_eq!(got, payload);
    }

    #[test]
    fn sixty_four_bit_length_frame() {
        let payload = vec![0x5A; 65536];
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&(65536u64).to_be_bytes());
        wire.extend_from_slice(&payload);

        let mut p = FrameParser::new(1 << 20);
        let (consumed, status) = p.feed(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        match status {
            FeedStatus::Frame(f) => {
                assert_eq!(f.header_len, 10);
                assert_eq!(f.payload_len, 65536);
                assert_eq!(f.payload, &payload[..]);
            }
            FeedStatus::NeedMore(_) => panic!("expected a frame"),
        }
    }

    #[test]
    fn same_frames_under_any_split() {
        // text "Hi", ping "ok", then a 130-byte binary with 16-bit length
        let mut stream = vec![0x81, 0x02, b'H', b'i'];
        stream.extend_from_slice(&[0x89, 0x02, b'o', b'k']);
        stream.extend_from_slice(&[0x82, 126, 0x00, 130]);
        stream.extend_from_slice(&[0x77; 130]);

        let expected = [
            (OpCode::Text, b"Hi".to_vec()),
            (OpCode::Ping, b"ok".to_vec()),
            (OpCode::Binary, vec![0x77; 130]),
        ];

        for split in 0..=stream.len() {
            let mut p = parser();
            let mut frames: Vec<(OpCode, bool, Vec<u8>)> = Vec::new();
            // reassembles data payloads out of the per-feed views
            let mut acc: Vec<u8> = Vec::new();

            for part in [&stream[..split], &stream[split..]] {
                let mut rest = part;
                while !rest.is_empty() {
                    let (n, status) = p.feed(rest).unwrap();
                    match status {
                        FeedStatus::Frame(f) => {
                            if f.opcode.is_control() {
                                // control payloads come coalesced; drop any
                                // partial bytes gathered for them
                                acc.clear();
                                frames.push((f.opcode, f.is_final, f.payload.to_vec()));
                            } else {
                                acc.extend_from_slice(f.payload);
                                frames.push((f.opcode, f.is_final, std::mem::take(&mut acc)));
                            }
                        }
                        FeedStatus::NeedMore(partial) => {
                            acc.extend_from_slice(partial);
                        }
                    }
                    rest = &rest[n..];
                }
            }

            assert_eq!(frames.len(), 3, "split at {split}");
            for ((opcode, is_final, payload), (want_opcode, want_payload)) in
                frames.iter().zip(expected.iter())
            {
                assert_eq!(opcode, want_opcode, "split at {split}");
                assert!(*is_final, "split at {split}");
                assert_eq!(payload, want_payload, "split at {split}");
            }
        }
    }

    #[test]
    fn control_payload_coalesces_across_feeds() {
        let mut p = parser();
        let (n, status) = p.feed(&[0x89, 0x04, b'a', b'b']).unwrap();
        assert_eq!(n, 4);
        assert!(matches!(status, FeedStatus::NeedMore(_)));

        let (n, status) = p.feed(&[b'c', b'd']).unwrap();
        assert_eq!(n, 2);
        match status {
            FeedStatus::Frame(f) => {
                assert_eq!(f.opcode, OpCode::Ping);
                assert_eq!(f.payload, b"abcd");
            }
            FeedStatus::NeedMore(_) => panic!("expected the ping to complete"),
        }
    }

    #[test]
    fn non_final_ping_is_rejected() {
        let mut p = parser();
        assert!(matches!(
            p.feed(&[0x09, 0x00]),
            Err(Error::ControlFramesFragmented)
        ));
    }

    #[test]
    fn oversized_control_frame_rejected() {
        let mut p = parser();
        assert!(matches!(
            p.feed(&[0x88, 126, 0x00, 0x80]),
            Err(Error::ControlFramePayloadSize)
        ));
    }

    #[test]
    fn rsv_bits_rejected() {
        let mut p = parser();
        assert!(matches!(p.feed(&[0xC2, 0x00]), Err(Error::RSVNotZero)));
    }

    #[test]
    fn reserved_opcodes_rejected() {
        for opcode in [0x3, 0x7, 0xB, 0xF] {
            let mut p = parser();
            assert!(
                matches!(p.feed(&[0x80 | opcode, 0x00]), Err(Error::InvalidOpcode)),
                "opcode {opcode:#x}"
            );
        }
    }

    #[test]
    fn masked_server_frame_rejected() {
        let mut wire = [0u8; 16];
        let n = build_frame(
            &mut wire,
            true,
            OpCode::Binary,
            Some([1, 2, 3, 4]),
            &[9, 9],
        )
        .unwrap();
        let mut p = parser();
        assert!(matches!(
            p.feed(&wire[..n]),
            Err(Error::MaskedFrameFromServer)
        ));
    }

    #[test]
    fn sixty_four_bit_length_with_msb_set_rejected() {
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&(1u64 << 63).to_be_bytes());
        let mut p = parser();
        assert!(matches!(p.feed(&wire), Err(Error::InvalidPayloadLength)));
    }

    #[test]
    fn frame_above_cap_rejected() {
        let mut p = FrameParser::new(64);
        assert!(matches!(p.feed(&[0x82, 65]), Err(Error::MaxFrameSize)));
    }

    #[test]
    fn fragmented_text_message() {
        let mut p = parser();

        let (_, status) = p.feed(&[0x01, 0x01, b'H']).unwrap();
        match status {
            FeedStatus::Frame(f) => {
                assert_eq!(f.opcode, OpCode::Text);
                assert!(!f.is_final);
            }
            FeedStatus::NeedMore(_) => panic!("first fragment should complete"),
        }

        let (_, status) = p.feed(&[0x00, 0x01, b'e']).unwrap();
        assert!(matches!(
            status,
            FeedStatus::Frame(ParsedFrame {
                opcode: OpCode::Continue,
                is_final: false,
                ..
            })
        ));

        let (_, status) = p.feed(&[0x80, 0x01, b'y']).unwrap();
        match status {
            FeedStatus::Frame(f) => {
                assert_eq!(f.opcode, OpCode::Continue);
                assert!(f.is_final);
            }
            FeedStatus::NeedMore(_) => panic!("final fragment should complete"),
        }

        // fragmentation is closed again: a fresh text frame is legal
        let (_, status) = p.feed(&[0x81, 0x01, b'!']).unwrap();
        assert!(matches!(status, FeedStatus::Frame(_)));
    }

    #[test]
    fn control_frames_interleave_between_fragments() {
        let mut p = parser();

        let (_, status) = p.feed(&[0x02, 0x01, 0xFF]).unwrap();
        assert!(matches!(status, FeedStatus::Frame(_)));

        let (_, status) = p.feed(&[0x89, 0x00]).unwrap();
        assert!(matches!(
            status,
            FeedStatus::Frame(ParsedFrame {
                opcode: OpCode::Ping,
                ..
            })
        ));

        let (_, status) = p.feed(&[0x80, 0x01, 0xFE]).unwrap();
        assert!(matches!(
            status,
            FeedStatus::Frame(ParsedFrame {
                opcode: OpCode::Continue,
                is_final: true,
                ..
            })
        ));
    }

    #[test]
    fn stray_continuation_rejected() {
        let mut p = parser();
        assert!(matches!(
            p.feed(&[0x80, 0x01, 0x00]),
            Err(Error::InvalidContinuationFrame)
        ));
    }

    #[test]
    fn new_data_frame_during_fragmentation_rejected() {
        let mut p = parser();
        let (_, status) = p.feed(&[0x01, 0x01, b'a']).unwrap();
        assert!(matches!(status, FeedStatus::Frame(_)));

        assert!(matches!(
            p.feed(&[0x81, 0x01, b'b']),
            Err(Error::InvalidFrameFragmentation)
        ));
    }

    #[test]
    fn text_with_invalid_utf8_rejected() {
        let mut p = parser();
        assert!(matches!(
            p.feed(&[0x81, 0x02, 0xC3, 0x28]),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn text_truncated_mid_codepoint_rejected() {
        // "€" minus its last byte
        let mut p = parser();
        assert!(matches!(
            p.feed(&[0x81, 0x02, 0xE2, 0x82]),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn utf8_split_across_fragments_is_legal() {
        // "€" = E2 82 AC split over a text frame and its continuation
        let mut p = parser();
        let (_, status) = p.feed(&[0x01, 0x02, 0xE2, 0x82]).unwrap();
        assert!(matches!(status, FeedStatus::Frame(_)));

        let (_, status) = p.feed(&[0x80, 0x01, 0xAC]).unwrap();
        assert!(matches!(
            status,
            FeedStatus::Frame(ParsedFrame { is_final: true, .. })
        ));
    }

    #[test]
    fn utf8_split_across_feeds_within_one_frame_is_legal() {
        let mut p = parser();
        let (_, status) = p.feed(&[0x81, 0x03, 0xE2]).unwrap();
        assert!(matches!(status, FeedStatus::NeedMore(_)));
        let (_, status) = p.feed(&[0x82, 0xAC]).unwrap();
        assert!(matches!(status, FeedStatus::Frame(_)));
    }

    #[test]
    fn close_with_one_byte_payload_rejected() {
        let mut p = parser();
        assert!(matches!(
            p.feed(&[0x88, 0x01, 0x03]),
            Err(Error::InvalidClosePayload)
        ));
    }

    #[test]
    fn close_code_validation() {
        // 1000 with reason passes
        let mut p = parser();
        let (_, status) = p.feed(&[0x88, 0x05, 0x03, 0xE8, b'b', b'y', b'e']).unwrap();
        match status {
            FeedStatus::Frame(f) => {
                assert_eq!(f.opcode, OpCode::Close);
                assert_eq!(f.payload, &[0x03, 0xE8, b'b', b'y', b'e']);
            }
            FeedStatus::NeedMore(_) => panic!("close frame should complete"),
        }

        // 1005 must never appear on the wire
        let mut p = parser();
        assert!(matches!(
            p.feed(&[0x88, 0x02, 0x03, 0xED]),
            Err(Error::InvalidCloseCode(1005))
        ));

        // reserved band 1012-1014
        let mut p = parser();
        assert!(matches!(
            p.feed(&[0x88, 0x02, 0x03, 0xF4]),
            Err(Error::InvalidCloseCode(1012))
        ));

        // application codes from 3000 pass
        let mut p = parser();
        let (_, status) = p.feed(&[0x88, 0x02, 0x0B, 0xB8]).unwrap();
        assert!(matches!(status, FeedStatus::Frame(_)));
    }

    #[test]
    fn close_reason_must_be_utf8() {
        let mut p = parser();
        assert!(matches!(
            p.feed(&[0x88, 0x04, 0x03, 0xE8, 0xC3, 0x28]),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn empty_close_payload_is_legal() {
        let mut p = parser();
        let (_, status) = p.feed(&[0x88, 0x00]).unwrap();
        assert!(matches!(
            status,
            FeedStatus::Frame(ParsedFrame {
                opcode: OpCode::Close,
                payload_len: 0,
                ..
            })
        ));
    }

    #[test]
    fn builder_output_round_trips_through_parser() {
        let payload: Vec<u8> = (0..300u32).map(|b| b as u8).collect();
        let mut wire = vec![0u8; payload.len() + MAX_HEADER_LEN];
        let n = build_frame(&mut wire, true, OpCode::Binary, None, &payload).unwrap();

        let (consumed, _, is_final, got) = parse_one(&wire[..n]);
        assert_eq!(consumed, n);
        assert!(is_final);
        assert_eq!(got, payload);
    }

    #[test]
    fn two_frames_in_one_feed_are_taken_one_at_a_time() {
        let wire = [0x82, 0x01, 0xAA, 0x82, 0x01, 0xBB];
        let mut p = parser();

        let (n, status) = p.feed(&wire).unwrap();
        assert_eq!(n, 3);
        match status {
            FeedStatus::Frame(f) => assert_eq!(f.payload, &[0xAA]),
            FeedStatus::NeedMore(_) => panic!("first frame should complete"),
        }

        let (n, status) = p.feed(&wire[3..]).unwrap();
        assert_eq!(n, 3);
        match status {
            FeedStatus::Frame(f) => assert_eq!(f.payload, &[0xBB]),
            FeedStatus::NeedMore(_) => panic!("second frame should complete"),
        }
    }
}
