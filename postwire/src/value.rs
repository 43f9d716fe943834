use bytes::Bytes;
use std::fmt;

use crate::{common::ByteStr, ext::FmtExt, postgres::PgFormat};

/// A single column value of a row.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Value {
    /// Column length of `-1`.
    #[default]
    Null,
    /// Value of a text format column.
    Text(ByteStr),
    /// Value of a binary format column, kept as is.
    Binary(Bytes),
}

impl Value {
    pub(crate) fn from_column(value: Option<Bytes>, format: PgFormat) -> Result<Self, std::str::Utf8Error> {
        match (value, format) {
            (None, _) => Ok(Self::Null),
            (Some(bytes), PgFormat::Text) => ByteStr::from_utf8(bytes).map(Self::Text),
            (Some(bytes), PgFormat::Binary) => Ok(Self::Binary(bytes)),
        }
    }

    /// Return `true` if value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the text, if this is a text format value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Returns the raw bytes of either format.
    ///
    /// Returns [`None`] if value is NULL.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Null => None,
            Self::Text(text) => Some(text.as_bytes()),
            Self::Binary(bytes) => Some(&bytes[..]),
        }
    }
}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == Some(other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Text(text) => fmt::Debug::fmt(text, f),
            Self::Binary(bytes) => write!(f, "b\"{}\"", bytes.lossy()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Text(text) => f.write_str(text),
            Self::Binary(bytes) => write!(f, "\\x{}", hex::encode(bytes)),
        }
    }
}
