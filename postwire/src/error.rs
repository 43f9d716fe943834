//! `postwire` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    auth::AuthError,
    connection::ParseError,
    net::TlsError,
    postgres::{ErrorResponse, ProtocolError},
    row::DecodeError,
};

/// A specialized [`Result`] type for `postwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `postwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Attach a context message, shown before the error itself.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns `true` if the connection that produced this error is no longer usable.
    ///
    /// Only [`ErrorKind::Database`] and [`ErrorKind::Decode`] abort a single query
    /// while keeping the connection in sync.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, ErrorKind::Database(_) | ErrorKind::Decode(_))
    }

    /// Returns the backend error, if this error is reported by the backend.
    pub fn as_database(&self) -> Option<&ErrorResponse> {
        match &self.kind {
            ErrorKind::Database(e) => Some(e),
            _ => None,
        }
    }
}

/// All possible error kind from `postwire` library.
pub enum ErrorKind {
    /// Invalid connection configuration.
    Config(ParseError),
    /// Stream open, read, or write failure.
    Io(io::Error),
    /// Length or message type inconsistency, the stream is out of sync.
    Protocol(ProtocolError),
    /// The backend declined encryption or the handshake failed.
    Tls(TlsError),
    /// Authentication could not be completed.
    Auth(AuthError),
    /// Error reported by the backend.
    Database(ErrorResponse),
    /// Result row could not be decoded.
    Decode(DecodeError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<TlsError>e => ErrorKind::Tls(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<ErrorResponse>e => ErrorKind::Database(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<io::Error>e => match e.kind() {
    io::ErrorKind::UnexpectedEof => ErrorKind::Protocol(ProtocolError::UnexpectedEof),
    _ => ErrorKind::Io(e),
});

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(e) => Some(e),
            ErrorKind::Tls(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Tls(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
