use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use std::str;
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{self, Frame, MAX_NESTING_DEPTH};

/// Default upper bound for a single frame, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

#[derive(Debug, ThisError)]
pub enum CodecError {
    #[error("{0}")]
    Frame(#[from] frame::Error),
    #[error("frame size exceeds limit of {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Whether the peer sent bytes that cannot be parsed, as opposed to the socket failing.
    pub fn is_protocol_error(&self) -> bool {
        !matches!(self, CodecError::Io(_))
    }
}

/// Streaming RESP codec. Decoding yields one frame at a time and leaves any trailing bytes (the
/// start of the next pipelined request) in the buffer.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    scanner: FrameScanner,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> FrameCodec {
        FrameCodec {
            max_frame_size,
            scanner: FrameScanner::default(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if let Scan::Incomplete = self.scanner.scan(&src[..], self.max_frame_size) {
            // Check the size of what is buffered so far, a peer must not be able to make us
            // buffer an unbounded amount of data for a frame that never completes.
            if src.len() > self.max_frame_size {
                return Err(CodecError::FrameTooLarge {
                    limit: self.max_frame_size,
                });
            }

            return Ok(None);
        }

        // The frame is fully buffered, or holds an error the parser reports below.
        self.scanner = FrameScanner::default();

        let mut cursor = Cursor::new(&src[..]);
        let frame = match Frame::parse_bounded(&mut cursor, self.max_frame_size) {
            Ok(frame) => frame,
            // A declared length over the limit is rejected before its payload is buffered.
            Err(frame::Error::LengthTooLarge { .. }) => {
                return Err(CodecError::FrameTooLarge {
                    limit: self.max_frame_size,
                });
            }
            // The scanner only reports frames whose bytes are all buffered.
            Err(frame::Error::Incomplete) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let position = cursor.position() as usize;
        if position > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                limit: self.max_frame_size,
            });
        }

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&frame.serialize());
        Ok(())
    }
}

/// Finds where the frame at the start of the buffer ends without building it. The scan resumes
/// where the previous call stopped, so a frame arriving over many reads is walked once instead of
/// being parsed again after every read.
#[derive(Debug, Clone, Default)]
struct FrameScanner {
    // Start of the next element to scan.
    offset: usize,
    // Where the search for the CRLF ending the current header resumes.
    next_index: usize,
    // Elements still expected by each open array, innermost last.
    pending: Vec<usize>,
}

#[derive(Debug, PartialEq)]
enum Scan {
    // The frame, or the malformed part of it, is buffered and can go to the parser.
    Ready,
    Incomplete,
}

impl FrameScanner {
    fn scan(&mut self, buf: &[u8], max_length: usize) -> Scan {
        loop {
            let data_type = match buf.get(self.offset) {
                Some(data_type) => *data_type,
                None => return Scan::Incomplete,
            };

            let header_start = self.offset + 1;
            let search_from = self.next_index.max(header_start);
            let line_end = match buf
                .get(search_from..)
                .and_then(|rest| rest.windows(2).position(|window| window == b"\r\n"))
            {
                Some(index) => search_from + index,
                None => {
                    // The CR may be the last buffered byte.
                    self.next_index = buf.len().saturating_sub(1).max(header_start);
                    return Scan::Incomplete;
                }
            };
            let header_end = line_end + 2;
            let header = &buf[header_start..line_end];

            let element_end = match data_type {
                b'+' | b'-' | b':' | b'_' => header_end,
                b'$' => match scan_length(header) {
                    Some(None) => header_end,
                    Some(Some(length)) if length <= max_length => {
                        let end = header_end.saturating_add(length).saturating_add(2);
                        if buf.len() < end {
                            self.next_index = line_end;
                            return Scan::Incomplete;
                        }
                        end
                    }
                    _ => return Scan::Ready,
                },
                b'*' => match scan_length(header) {
                    Some(None) | Some(Some(0)) => header_end,
                    Some(Some(length))
                        if length <= max_length && self.pending.len() < MAX_NESTING_DEPTH =>
                    {
                        self.pending.push(length);
                        self.offset = header_end;
                        self.next_index = header_end;
                        continue;
                    }
                    _ => return Scan::Ready,
                },
                _ => return Scan::Ready,
            };

            self.offset = element_end;
            self.next_index = element_end;

            // Close every array this element completes.
            loop {
                match self.pending.last_mut() {
                    None => return Scan::Ready,
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                    }
                }
                self.pending.pop();
            }
        }
    }
}

/// `None` for a header the parser rejects, `Some(None)` for the `-1` null length.
fn scan_length(header: &[u8]) -> Option<Option<usize>> {
    match str::from_utf8(header).ok()?.parse::<i64>().ok()? {
        -1 => Some(None),
        length => usize::try_from(length).ok().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        // Nothing is consumed while the frame is incomplete.
        assert_eq!(buf.len(), 15);

        buf.extend_from_slice(b"\r\nB\r\n");
        let frame = codec.decode(&mut buf).unwrap();

        assert_eq!(
            frame,
            Some(Frame::Array(vec![
                Frame::Bulk(Bytes::from("GET")),
                Frame::Bulk(Bytes::from("B")),
            ]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_pipelined_frames_one_at_a_time() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(
            &b"*3\r\n$3\r\nSET\r\n$1\r\nB\r\n$7\r\ncrayoli\r\n*2\r\n$3\r\nGET\r\n$1\r\nB\r\n"[..],
        );

        let set = codec.decode(&mut buf).unwrap().unwrap();
        let get = codec.decode(&mut buf).unwrap().unwrap();

        assert!(matches!(set, Frame::Array(ref a) if a.len() == 3));
        assert!(matches!(get, Frame::Array(ref a) if a.len() == 2));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_malformed_length_is_protocol_error() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*1\r\n$x\r\nPING\r\n"[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(err.is_protocol_error());
        assert!(matches!(
            err,
            CodecError::Frame(frame::Error::InvalidLength(ref l)) if l == "x"
        ));
    }

    #[test]
    fn decode_rejects_oversized_incomplete_frame() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::from(&b"*1\r\n$100\r\naaaaaaaaaaaaaaaa"[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(matches!(err, CodecError::FrameTooLarge { limit: 16 }));
    }

    #[test]
    fn decode_rejects_oversized_complete_frame() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&b"$10\r\n0123456789\r\n"[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(matches!(err, CodecError::FrameTooLarge { limit: 8 }));
    }

    #[test]
    fn decode_rejects_declared_length_over_limit() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::from(&b"*1\r\n$1000\r\nab"[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(err.is_protocol_error());
        assert!(matches!(err, CodecError::FrameTooLarge { limit: 16 }));
    }

    #[test]
    fn decode_rejects_deep_nesting() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*1\r\n".repeat(10_000)[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(err.is_protocol_error());
        assert!(matches!(
            err,
            CodecError::Frame(frame::Error::NestingTooDeep(frame::MAX_NESTING_DEPTH))
        ));
    }

    #[test]
    fn decode_frame_arriving_byte_by_byte() {
        let mut codec = FrameCodec::default();
        let request = b"*3\r\n$3\r\nSET\r\n$1\r\nB\r\n$7\r\ncrayoli\r\n";
        let mut buf = BytesMut::new();

        for byte in &request[..request.len() - 1] {
            buf.extend_from_slice(&[*byte]);
            assert!(codec.decode(&mut buf).unwrap().is_none());
        }

        // Complete elements are not scanned again.
        assert_eq!(codec.scanner.offset, 20);
        assert_eq!(codec.scanner.pending, vec![1]);

        buf.extend_from_slice(&request[request.len() - 1..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Array(vec![
                Frame::Bulk(Bytes::from("SET")),
                Frame::Bulk(Bytes::from("B")),
                Frame::Bulk(Bytes::from("crayoli")),
            ]))
        );
        assert!(buf.is_empty());
        assert_eq!(codec.scanner.offset, 0);
    }

    #[test]
    fn scan_stops_at_frame_end() {
        let mut scanner = FrameScanner::default();
        let buf = b"*2\r\n*0\r\n$-1\r\n+PONG\r\n";

        assert_eq!(scanner.scan(&buf[..], usize::MAX), Scan::Ready);
        assert_eq!(scanner.offset, 13);
        assert!(scanner.pending.is_empty());
    }

    #[test]
    fn scan_hands_malformed_headers_to_the_parser() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n?\r\n"[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(matches!(
            err,
            CodecError::Frame(frame::Error::InvalidDataType(b'?'))
        ));
    }

    #[test]
    fn encode_reply() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();

        codec
            .encode(Frame::Simple("OK".to_string()), &mut buf)
            .unwrap();
        codec
            .encode(Frame::Bulk(Bytes::from("crayoli")), &mut buf)
            .unwrap();

        assert_eq!(&buf[..], b"+OK\r\n$7\r\ncrayoli\r\n");
    }
}
