//! Protocol error
use std::{fmt, str::Utf8Error};

use super::BackendMessage;

/// An error when translating buffer from or to postgres.
///
/// Any of this error means both side of the stream is no longer in sync,
/// the connection should be discarded.
pub enum ProtocolError {
    /// Backend message is not the one expected in current phase.
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    /// Message body is shorter than its layout requires.
    Truncated,
    /// String in message body is not nul terminated.
    MissingNul,
    /// String in message body is not utf8.
    Utf8(Utf8Error),
    /// Declared message length is invalid.
    InvalidLength {
        msgtype: u8,
        len: i32,
    },
    /// Unknown format code in a row description.
    InvalidFormat(u16),
    /// Stream closed in the middle of a message.
    UnexpectedEof,
    /// Frontend length or count too large to be represented on the wire.
    Overflow {
        len: usize,
    },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let found = BackendMessage::message_name(found);
                match expect {
                    Some(m) => {
                        write!(
                            f,
                            "Expected message `{}` found `{found}`",
                            BackendMessage::message_name(m),
                        )?
                    },
                    None => write!(f, "Unexpected message `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::Truncated => f.write_str("message body shorter than its layout"),
            ProtocolError::MissingNul => f.write_str("string is not nul terminated"),
            ProtocolError::Utf8(ref e) => write!(f, "non utf8 string in message: {e}"),
            ProtocolError::InvalidLength { msgtype, len } => write!(
                f,
                "invalid length {len} for message `{}`",
                BackendMessage::message_name(msgtype),
            ),
            ProtocolError::InvalidFormat(code) => write!(f, "unknown format code {code}"),
            ProtocolError::UnexpectedEof => f.write_str("stream closed in the middle of a message"),
            ProtocolError::Overflow { len } => write!(f, "length {len} too large for protocol"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }
}
