//! RTSP Control Messages
//!
//! The control channel carries small newline-separated text messages.
//!
//! Request:  `<METHOD>\n[<argument>]`
//! Response: `<METHOD>\n<status>\n[<parameter>]`
//!
//! Parsing is a bounded line tokenizer: input longer than
//! [`MAX_MESSAGE_SIZE`] is rejected up front, and trailing NUL padding (sent by
//! peers that write fixed-size buffers) is ignored.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Largest control message accepted by the tokenizer
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Control message errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Empty control message")]
    Empty,

    #[error("Control message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Control message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unknown method: {0:?}")]
    UnknownMethod(String),

    #[error("Missing status code")]
    MissingStatus,

    #[error("Invalid status code: {0:?}")]
    InvalidStatus(String),

    #[error("Invalid argument: {0:?}")]
    InvalidArgument(String),
}

/// Control request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Setup,
    Play,
    Pause,
    Teardown,
    /// Explicit congestion-level reduction request
    Modify,
    Describe,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Setup,
        Method::Play,
        Method::Pause,
        Method::Teardown,
        Method::Modify,
        Method::Describe,
    ];

    /// Wire token for this method
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::Modify => "MODIFY",
            Method::Describe => "DESCRIBE",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Method::ALL.into_iter().find(|m| m.as_str() == token)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Method::from_token(&token.to_ascii_uppercase())
            .ok_or_else(|| MessageError::UnknownMethod(token.to_string()))
    }
}

/// Response status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const METHOD_NOT_VALID_IN_STATE: StatusCode = StatusCode(455);

    pub const fn new(code: u16) -> Self {
        StatusCode(code)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == StatusCode::OK
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parsed control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub method: Method,
    pub argument: Option<String>,
}

impl ControlRequest {
    /// Request without an argument
    pub fn new(method: Method) -> Self {
        ControlRequest {
            method,
            argument: None,
        }
    }

    /// Request with an argument
    ///
    /// The argument must fit on a single line. An empty argument is treated
    /// as absent.
    pub fn with_argument(method: Method, argument: impl Into<String>) -> Result<Self, MessageError> {
        let argument = validate_field(argument.into())?;
        Ok(ControlRequest { method, argument })
    }

    /// SETUP request for the named frame source
    pub fn setup(file_name: impl Into<String>) -> Result<Self, MessageError> {
        Self::with_argument(Method::Setup, file_name)
    }

    /// Serialize as `<METHOD>\n<argument>`
    pub fn to_bytes(&self) -> Bytes {
        let arg_len = self.argument.as_ref().map_or(0, String::len);
        let mut buf = BytesMut::with_capacity(self.method.as_str().len() + 1 + arg_len);
        buf.put_slice(self.method.as_str().as_bytes());
        buf.put_u8(b'\n');
        if let Some(arg) = &self.argument {
            buf.put_slice(arg.as_bytes());
        }
        buf.freeze()
    }

    /// Parse a request from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let mut lines = Lines::new(bytes)?;

        // The first line is the method. Tolerate `SETUP clip.dat` on one line.
        let first = lines.next_line().ok_or(MessageError::Empty)?;
        let (token, inline_arg) = match first.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, Some(rest.trim())),
            None => (first, None),
        };
        let method = Method::from_token(token)
            .ok_or_else(|| MessageError::UnknownMethod(token.to_string()))?;

        let argument = inline_arg
            .or_else(|| lines.next_line())
            .filter(|arg| !arg.is_empty())
            .map(str::to_string);

        Ok(ControlRequest { method, argument })
    }
}

impl fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            Some(arg) => write!(f, "{} {}", self.method, arg),
            None => write!(f, "{}", self.method),
        }
    }
}

/// Parsed control response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub method: Method,
    pub status: StatusCode,
    pub parameter: Option<String>,
}

impl ControlResponse {
    pub fn ok(method: Method) -> Self {
        ControlResponse {
            method,
            status: StatusCode::OK,
            parameter: None,
        }
    }

    /// Successful response carrying a parameter
    pub fn ok_with(method: Method, parameter: impl Into<String>) -> Result<Self, MessageError> {
        Ok(ControlResponse {
            method,
            status: StatusCode::OK,
            parameter: validate_field(parameter.into())?,
        })
    }

    pub fn error(method: Method, status: StatusCode) -> Self {
        ControlResponse {
            method,
            status,
            parameter: None,
        }
    }

    /// SETUP success response advertising the frame period
    pub fn setup_ok(frame_period: Duration) -> Self {
        ControlResponse {
            method: Method::Setup,
            status: StatusCode::OK,
            parameter: Some(frame_period.as_millis().to_string()),
        }
    }

    /// Interpret the parameter as a period in integer milliseconds
    pub fn period_parameter(&self) -> Option<Duration> {
        self.parameter
            .as_deref()
            .and_then(|p| p.parse::<u64>().ok())
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// Serialize as `<METHOD>\n<status>\n<parameter>`
    pub fn to_bytes(&self) -> Bytes {
        let mut text = format!("{}\n{}\n", self.method, self.status);
        if let Some(param) = &self.parameter {
            text.push_str(param);
        }
        Bytes::from(text)
    }

    /// Parse a response from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let mut lines = Lines::new(bytes)?;

        let token = lines.next_line().ok_or(MessageError::Empty)?;
        let method = Method::from_token(token)
            .ok_or_else(|| MessageError::UnknownMethod(token.to_string()))?;

        let status_line = lines
            .next_line()
            .filter(|s| !s.is_empty())
            .ok_or(MessageError::MissingStatus)?;
        let status = status_line
            .parse::<u16>()
            .map(StatusCode::new)
            .map_err(|_| MessageError::InvalidStatus(status_line.to_string()))?;

        let parameter = lines
            .next_line()
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(ControlResponse {
            method,
            status,
            parameter,
        })
    }
}

fn validate_field(value: String) -> Result<Option<String>, MessageError> {
    if value.contains(['\n', '\r', '\0']) {
        return Err(MessageError::InvalidArgument(value));
    }
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else if trimmed.len() == value.len() {
        Ok(Some(value))
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

/// Bounded line iterator over a control message
struct Lines<'a> {
    inner: std::str::Split<'a, char>,
}

impl<'a> Lines<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, MessageError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let text = std::str::from_utf8(&bytes[..end]).map_err(|_| MessageError::InvalidUtf8)?;
        if text.trim().is_empty() {
            return Err(MessageError::Empty);
        }

        Ok(Lines {
            inner: text.split('\n'),
        })
    }

    fn next_line(&mut self) -> Option<&'a str> {
        self.inner.next().map(str::trim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_request_bytes() {
        let req = ControlRequest::setup("clip.dat").unwrap();
        assert_eq!(&req.to_bytes()[..], b"SETUP\nclip.dat");

        let parsed = ControlRequest::from_bytes(b"SETUP\nclip.dat").unwrap();
        assert_eq!(parsed.method, Method::Setup);
        assert_eq!(parsed.argument.as_deref(), Some("clip.dat"));
    }

    #[test]
    fn test_request_without_argument() {
        let req = ControlRequest::new(Method::Play);
        assert_eq!(&req.to_bytes()[..], b"PLAY\n");

        let parsed = ControlRequest::from_bytes(b"PLAY\n").unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_request_with_nul_padding() {
        let mut padded = b"TEARDOWN\n".to_vec();
        padded.resize(100, 0);

        let parsed = ControlRequest::from_bytes(&padded).unwrap();
        assert_eq!(parsed.method, Method::Teardown);
        assert_eq!(parsed.argument, None);
    }

    #[test]
    fn test_request_inline_argument() {
        let parsed = ControlRequest::from_bytes(b"SETUP movie.txt").unwrap();
        assert_eq!(parsed.argument.as_deref(), Some("movie.txt"));
    }

    #[test]
    fn test_unknown_method() {
        let err = ControlRequest::from_bytes(b"RECORD\nfoo").unwrap_err();
        assert_eq!(err, MessageError::UnknownMethod("RECORD".to_string()));
    }

    #[test]
    fn test_empty_and_oversized() {
        assert_eq!(ControlRequest::from_bytes(b""), Err(MessageError::Empty));
        assert_eq!(ControlRequest::from_bytes(b"\n \n"), Err(MessageError::Empty));

        let big = vec![b'A'; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            ControlRequest::from_bytes(&big),
            Err(MessageError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(
            ControlRequest::from_bytes(&[0xFF, 0xFE, b'\n']),
            Err(MessageError::InvalidUtf8)
        );
    }

    #[test]
    fn test_argument_with_newline_rejected() {
        assert!(ControlRequest::setup("a\nb").is_err());
        assert_eq!(ControlRequest::setup("  ").unwrap().argument, None);
    }

    #[test]
    fn test_setup_response() {
        let resp = ControlResponse::setup_ok(Duration::from_millis(32));
        assert_eq!(&resp.to_bytes()[..], b"SETUP\n200\n32");

        let parsed = ControlResponse::from_bytes(b"SETUP\n200\n32\n").unwrap();
        assert!(parsed.status.is_success());
        assert_eq!(parsed.period_parameter(), Some(Duration::from_millis(32)));
    }

    #[test]
    fn test_error_response() {
        let resp = ControlResponse::error(Method::Play, StatusCode::METHOD_NOT_VALID_IN_STATE);
        let parsed = ControlResponse::from_bytes(&resp.to_bytes()).unwrap();
        assert_eq!(parsed.status.as_u16(), 455);
        assert!(!parsed.status.is_success());
        assert_eq!(parsed.parameter, None);
    }

    #[test]
    fn test_response_missing_status() {
        assert_eq!(
            ControlResponse::from_bytes(b"PLAY\n"),
            Err(MessageError::MissingStatus)
        );
        assert_eq!(
            ControlResponse::from_bytes(b"PLAY\nabc"),
            Err(MessageError::InvalidStatus("abc".to_string()))
        );
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("play".parse::<Method>().unwrap(), Method::Play);
        assert!("jump".parse::<Method>().is_err());
    }
}
