//! Error and notice response fields.
//!
//! <https://www.postgresql.org/docs/current/protocol-error-fields.html>
use bytes::Bytes;
use std::fmt;

use super::ProtocolError;
use crate::ext::BytesExt;

/// Identified fields of an `ErrorResponse` or `NoticeResponse`.
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order.
///
/// Since more field types might be added in future, fields of unrecognized type are kept
/// and available through [`Fields::get`].
#[derive(Clone, Default)]
pub struct Fields {
    fields: Vec<(u8, String)>,
}

impl Fields {
    /// Parse a response body.
    pub fn parse(mut body: Bytes) -> Result<Fields, ProtocolError> {
        let mut fields = vec![];
        loop {
            // A code identifying the field type; if zero, this is the message terminator
            let code = body.checked_u8()?;
            if code == b'\0' {
                break;
            }
            // field values may be in the server encoding before `client_encoding` is applied
            let value = body.get_nul_bytes()?;
            fields.push((code, String::from_utf8_lossy(&value).into_owned()));
        }
        Ok(Fields { fields })
    }

    /// Get field by its identifying code.
    pub fn get(&self, code: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, value)| value.as_str())
    }

    /// Iterate over every `(code, value)` pair in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.fields.iter().map(|(c, v)| (*c, v.as_str()))
    }

    /// `ERROR`, `FATAL`, or `PANIC` (in an error message), or `WARNING`, `NOTICE`, `DEBUG`,
    /// `INFO`, or `LOG` (in a notice message), or a localized translation of one of these.
    ///
    /// Prefer the non localized `V` field when present.
    pub fn severity(&self) -> &str {
        self.get(b'V').or_else(|| self.get(b'S')).unwrap_or("UNKNOWN")
    }

    /// The SQLSTATE code for the error.
    pub fn code(&self) -> &str {
        self.get(b'C').unwrap_or_default()
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        self.get(b'M').unwrap_or_default()
    }

    /// An optional secondary error message carrying more detail about the problem.
    pub fn detail(&self) -> Option<&str> {
        self.get(b'D')
    }

    /// An optional suggestion what to do about the problem.
    pub fn hint(&self) -> Option<&str> {
        self.get(b'H')
    }

    /// Error cursor position as an index into the original query string, counted in characters.
    pub fn position(&self) -> Option<u32> {
        self.get(b'P').and_then(|p| p.parse().ok())
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code(), self.message())?;
        if let Some(detail) = self.detail() {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (code, value) in self.iter() {
            map.entry(&(code as char), &value);
        }
        map.finish()
    }
}
