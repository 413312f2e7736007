// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::Buf;
use bytes::Bytes;
use std::io::Cursor;
use std::string::FromUtf8Error;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    /// Invalid message encoding.
    #[error("{0}")]
    Other(crate::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// Stands for both the null bulk string and the null array.
    Null,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    /// Parses one frame starting at the cursor position, leaving the cursor right after it.
    ///
    /// Clients always send requests as arrays of bulk strings, so those are the only two types
    /// understood here. Any other leading byte fails with [`Error::InvalidDataType`].
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            // $<length>\r\n<data>\r\n
            DataType::BulkString => {
                let length = get_length(src)?;

                // A negative length is the RESP2 null bulk string, there is no payload to read.
                if length < 0 {
                    return Ok(Frame::Null);
                }

                let data = get_exact(src, length as usize)?;
                let data = Bytes::copy_from_slice(data);

                let (rest, _) = get_line(src)?;
                if !rest.is_empty() {
                    return Err("protocol error; bulk string longer than its declared length".into());
                }

                Ok(Frame::Bulk(data))
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let length = get_length(src)?;

                if length < 0 {
                    return Ok(Frame::Null);
                }

                // The declared length is untrusted, don't preallocate more than a page of frames.
                let mut frames = Vec::with_capacity((length as usize).min(1024));
                for _ in 0..length {
                    let frame = Self::parse(src)?;
                    frames.push(frame);
                }

                Ok(Frame::Array(frames))
            }
            data_type => Err(Error::InvalidDataType(u8::from(data_type))),
        }
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
            Frame::Null => {
                let mut bytes = Vec::with_capacity(5);
                bytes.push(u8::from(DataType::BulkString));
                bytes.extend_from_slice(b"-1");
                bytes.extend_from_slice(CRLF);
                bytes
            }
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

/// Reads up to the next CRLF. Returns the line without the terminator and the number of bytes
/// consumed, terminator included.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<(&'a [u8], usize), Error> {
    let start = src.position() as usize;
    let end = src.get_ref().len();

    if start >= end {
        return Err(Error::Incomplete);
    }

    let line_end = src.get_ref()[start..end]
        .windows(2)
        .position(|window| window == CRLF)
        .ok_or(Error::Incomplete)
        .map(|index| start + index)?;

    src.set_position((line_end + CRLF.len()) as u64);

    Ok((
        &src.get_ref()[start..line_end],
        line_end + CRLF.len() - start,
    ))
}

fn get_length(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    let (line, _) = get_line(src)?;
    let line = String::from_utf8(line.to_vec())?;

    // An empty length line reads as zero elements.
    if line.is_empty() {
        return Ok(0);
    }

    line.parse::<i64>()
        .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
        .map_err(Error::Other)
}

fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, n: usize) -> Result<&'a [u8], Error> {
    if src.remaining() < n {
        return Err(Error::Incomplete);
    }

    let start = src.position() as usize;
    src.advance(n);

    Ok(&src.get_ref()[start..start + n])
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
    BulkString,   // '$'
    SimpleError,  // '-'
    Integer,      // ':'
    Array,        // '*'
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
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        "protocol error; invalid frame format".into()
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Other(src.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<Frame, Error> {
        let mut cursor = Cursor::new(data);
        Frame::parse(&mut cursor)
    }

    #[test]
    fn parse_bulk_string_frame() {
        let frame = parse(b"$6\r\nfoobar\r\n");

        assert!(matches!(
            frame,
            Ok(Frame::Bulk(ref b)) if b == &Bytes::from("foobar")
        ));
    }

    #[test]
    fn parse_bulk_string_frame_empty() {
        let frame = parse(b"$0\r\n\r\n");

        assert!(matches!(
            frame,
            Ok(Frame::Bulk(ref b)) if b == &Bytes::from("")
        ));
    }

    #[test]
    fn parse_bulk_string_frame_with_crlf_in_payload() {
        let frame = parse(b"$4\r\na\r\nb\r\n");

        assert!(matches!(
            frame,
            Ok(Frame::Bulk(ref b)) if b == &Bytes::from("a\r\nb")
        ));
    }

    #[test]
    fn parse_bulk_string_frame_null() {
        assert!(matches!(parse(b"$-1\r\n"), Ok(Frame::Null)));
        assert!(matches!(parse(b"$-7\r\n"), Ok(Frame::Null)));
    }

    #[test]
    fn parse_bulk_string_frame_incomplete() {
        assert!(matches!(parse(b"$6\r\nfoo"), Err(Error::Incomplete)));
        assert!(matches!(parse(b"$6\r\nfoobar"), Err(Error::Incomplete)));
        assert!(matches!(parse(b"$6"), Err(Error::Incomplete)));
    }

    #[test]
    fn parse_bulk_string_frame_too_long() {
        assert!(matches!(parse(b"$3\r\nfoobar\r\n"), Err(Error::Other(_))));
    }

    #[test]
    fn parse_array_frame_empty() {
        let frame = parse(b"*0\r\n");

        assert!(matches!(frame, Ok(Frame::Array(ref a)) if a.is_empty()));
    }

    #[test]
    fn parse_array_frame_empty_length_line() {
        let frame = parse(b"*\r\n");

        assert!(matches!(frame, Ok(Frame::Array(ref a)) if a.is_empty()));
    }

    #[test]
    fn parse_array_frame() {
        let frame = parse(b"*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n").unwrap();

        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("hello")),
                Frame::Bulk(Bytes::from("world")),
            ])
        );
    }

    #[test]
    fn parse_array_frame_nested() {
        let frame = parse(b"*2\r\n*1\r\n$1\r\na\r\n$1\r\nb\r\n").unwrap();

        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Array(vec![Frame::Bulk(Bytes::from("a"))]),
                Frame::Bulk(Bytes::from("b")),
            ])
        );
    }

    #[test]
    fn parse_array_frame_null() {
        assert!(matches!(parse(b"*-1\r\n"), Ok(Frame::Null)));
    }

    #[test]
    fn parse_array_frame_null_in_the_middle() {
        let frame = parse(b"*3\r\n$5\r\nhello\r\n$-1\r\n$5\r\nworld\r\n").unwrap();

        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("hello")),
                Frame::Null,
                Frame::Bulk(Bytes::from("world")),
            ])
        );
    }

    #[test]
    fn parse_array_frame_incomplete() {
        assert!(matches!(
            parse(b"*2\r\n$5\r\nhello\r\n"),
            Err(Error::Incomplete)
        ));
    }

    #[test]
    fn parse_unsupported_data_types() {
        assert!(matches!(parse(b"+OK\r\n"), Err(Error::InvalidDataType(b'+'))));
        assert!(matches!(parse(b":1\r\n"), Err(Error::InvalidDataType(b':'))));
        assert!(matches!(parse(b"-ERR\r\n"), Err(Error::InvalidDataType(b'-'))));
        assert!(matches!(parse(b"%1\r\n"), Err(Error::InvalidDataType(b'%'))));
    }

    #[test]
    fn parse_invalid_length() {
        assert!(matches!(parse(b"$abc\r\n"), Err(Error::Other(_))));
    }

    #[test]
    fn parse_leaves_cursor_after_frame() {
        let data = b"$1\r\na\r\n$1\r\nb\r\n";
        let mut cursor = Cursor::new(&data[..]);

        let first = Frame::parse(&mut cursor).unwrap();
        assert_eq!(cursor.position(), 7);
        let second = Frame::parse(&mut cursor).unwrap();

        assert_eq!(first, Frame::Bulk(Bytes::from("a")));
        assert_eq!(second, Frame::Bulk(Bytes::from("b")));
    }

    #[test]
    fn get_line_reports_consumed_bytes() {
        let data = b"1234\r\nrest";
        let mut cursor = Cursor::new(&data[..]);

        let (line, consumed) = get_line(&mut cursor).unwrap();

        assert_eq!(line, b"1234");
        assert_eq!(consumed, 6);
    }

    #[test]
    fn serialize_frames() {
        assert_eq!(Frame::Simple("OK".to_string()).serialize(), b"+OK\r\n");
        assert_eq!(Frame::Error("ERR x".to_string()).serialize(), b"-ERR x\r\n");
        assert_eq!(Frame::Integer(-42).serialize(), b":-42\r\n");
        assert_eq!(Frame::Bulk(Bytes::from("foo")).serialize(), b"$3\r\nfoo\r\n");
        assert_eq!(Frame::Null.serialize(), b"$-1\r\n");
        assert_eq!(
            Frame::Array(vec![Frame::Bulk(Bytes::from("a")), Frame::Null]).serialize(),
            b"*2\r\n$1\r\na\r\n$-1\r\n"
        );
    }

    #[test]
    fn serialized_requests_parse_back() {
        let request = Frame::Array(vec![
            Frame::Bulk(Bytes::from("SET")),
            Frame::Bulk(Bytes::from("key")),
            Frame::Bulk(Bytes::from("multi\r\nline")),
            Frame::Bulk(Bytes::new()),
            Frame::Array(vec![]),
        ]);

        let bytes = request.serialize();

        assert_eq!(parse(&bytes).unwrap(), request);
    }
}
