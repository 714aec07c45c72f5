// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::Cursor;
use std::str;

use bytes::{Buf, Bytes};
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

// Upper bound for the capacity reserved up front for an array. The declared length comes from
// the peer, so it is never trusted for allocation.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// Deepest array nesting accepted. Requests are flat arrays of strings, the limit keeps the
/// recursive parser's stack use bounded.
pub const MAX_NESTING_DEPTH: usize = 8;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type '{}'", char::from(*.0))]
    InvalidDataType(u8),
    #[error("invalid length {0:?}")]
    InvalidLength(String),
    #[error("invalid integer {0:?}")]
    InvalidInteger(String),
    #[error("expected CRLF after bulk string payload")]
    MissingDelimiter,
    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,
    #[error("arrays nested deeper than {0} levels")]
    NestingTooDeep(usize),
    #[error("declared length {length} exceeds limit of {limit}")]
    LengthTooLarge { length: usize, limit: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    /// Parses one frame starting at the cursor position. On success the cursor is left right after
    /// the frame, so the caller knows how many bytes were consumed. `Error::Incomplete` means the
    /// buffer holds a valid prefix and more bytes are needed. Arrays nested deeper than
    /// [`MAX_NESTING_DEPTH`] fail with `Error::NestingTooDeep`.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_bounded(src, usize::MAX)
    }

    /// Same as [`Frame::parse`], but a bulk string or array declaring more than `max_length`
    /// bytes or elements fails with `Error::LengthTooLarge` as soon as its header is read.
    pub fn parse_bounded(src: &mut Cursor<&[u8]>, max_length: usize) -> Result<Self, Error> {
        parse_frame(src, max_length, 0)
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::Simple(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleString));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Error(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleError));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Integer(i) => {
                let digits = i.to_string();
                let mut bytes = Vec::with_capacity(1 + digits.len() + CRLF.len());
                bytes.push(u8::from(DataType::Integer));
                bytes.extend_from_slice(digits.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Bulk(bytes) => {
                let length_str = bytes.len().to_string();
                let mut result = Vec::with_capacity(
                    1 + length_str.len() + CRLF.len() + bytes.len() + CRLF.len(),
                );
                result.push(u8::from(DataType::BulkString));
                result.extend_from_slice(length_str.as_bytes());
                result.extend_from_slice(CRLF);
                result.extend_from_slice(bytes);
                result.extend_from_slice(CRLF);
                result
            }
            // Clients speak RESP2, where nil is the null bulk string.
            Frame::Null => b"$-1\r\n".to_vec(),
            Frame::Array(arr) => {
                let length_str = arr.len().to_string();
                let mut bytes = Vec::with_capacity(1 + length_str.len() + CRLF.len());
                bytes.push(u8::from(DataType::Array));
                bytes.extend_from_slice(length_str.as_bytes());
                bytes.extend_from_slice(CRLF);
                for frame in arr {
                    bytes.extend(frame.serialize());
                }
                bytes
            }
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

fn parse_frame(src: &mut Cursor<&[u8]>, max_length: usize, depth: usize) -> Result<Frame, Error> {
    // The first byte in an RESP-serialized payload always identifies its type.
    // Subsequent bytes constitute the type's contents.
    let first_byte = get_byte(src)?;
    let data_type = DataType::try_from(first_byte)?;

    match data_type {
        DataType::SimpleString => {
            let string = get_line_string(src)?;
            Ok(Frame::Simple(string))
        }
        DataType::SimpleError => {
            let string = get_line_string(src)?;
            Ok(Frame::Error(string))
        }
        DataType::Integer => {
            let string = get_line_string(src)?;
            let integer = string
                .parse::<i64>()
                .map_err(|_| Error::InvalidInteger(string))?;

            Ok(Frame::Integer(integer))
        }
        // $<length>\r\n<data>\r\n
        DataType::BulkString => {
            let length = match get_length(src, max_length)? {
                Some(length) => length,
                None => return Ok(Frame::Null),
            };

            let data = get_exact(src, length)?;
            Ok(Frame::Bulk(Bytes::copy_from_slice(data)))
        }
        // *<number-of-elements>\r\n<element-1>...<element-n>
        DataType::Array => {
            if depth >= MAX_NESTING_DEPTH {
                return Err(Error::NestingTooDeep(MAX_NESTING_DEPTH));
            }

            let length = match get_length(src, max_length)? {
                Some(length) => length,
                None => return Ok(Frame::Null),
            };

            let mut frames = Vec::with_capacity(length.min(MAX_PREALLOCATED_ELEMENTS));
            for _ in 0..length {
                let frame = parse_frame(src, max_length, depth + 1)?;
                frames.push(frame);
            }

            Ok(Frame::Array(frames))
        }
        // _\r\n
        DataType::Null => {
            let line = get_line(src)?;
            if !line.is_empty() {
                return Err(Error::InvalidLength(
                    String::from_utf8_lossy(line).into_owned(),
                ));
            }

            Ok(Frame::Null)
        }
    }
}

/// Returns the bytes up to the next CRLF and moves the cursor past it.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;

    let line_end = buf[start..]
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((line_end + CRLF.len()) as u64);

    Ok(&buf[start..line_end])
}

fn get_line_string(src: &mut Cursor<&[u8]>) -> Result<String, Error> {
    let line = get_line(src)?;
    let string = str::from_utf8(line).map_err(|_| Error::InvalidUtf8)?;
    Ok(string.to_string())
}

/// Reads a length header. `None` stands for the `-1` null length.
fn get_length(src: &mut Cursor<&[u8]>, max_length: usize) -> Result<Option<usize>, Error> {
    let line = get_line(src)?;
    let invalid = || Error::InvalidLength(String::from_utf8_lossy(line).into_owned());

    let length = str::from_utf8(line)
        .map_err(|_| invalid())?
        .parse::<i64>()
        .map_err(|_| invalid())?;

    match length {
        -1 => Ok(None),
        length if length < 0 => Err(invalid()),
        length => {
            let length = usize::try_from(length).map_err(|_| invalid())?;
            if length > max_length {
                return Err(Error::LengthTooLarge {
                    length,
                    limit: max_length,
                });
            }
            Ok(Some(length))
        }
    }
}

/// Reads exactly `length` bytes followed by CRLF.
fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;
    let end = start.checked_add(length).ok_or(Error::Incomplete)?;

    if src.remaining() < length.saturating_add(CRLF.len()) {
        return Err(Error::Incomplete);
    }

    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(Error::MissingDelimiter);
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
    // RESP3 null. Accepted on input only, replies use the RESP2 null bulk string.
    Null, // '_'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
            DataType::Null => b'_',
        }
    }
}
