//! Postgres Frontend Messages
//!
//! Messages are written into a shared [`BytesMut`], several messages can be
//! written before a single flush, which is how the extended query pipeline is sent.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{BufMut, BytesMut};

use super::{Oid, PgFormat, ProtocolError};
use crate::{encode::Encoded, ext::{BufMutExt, UsizeExt}};

/// Begin a message in `buf`, returns the offset of the length field.
///
/// Tagged message put `msgtype` first, the tag-less startup and ssl request pass [`None`].
/// The length is a placeholder until [`finish_message`] is called.
pub fn start_message(buf: &mut BytesMut, msgtype: Option<u8>) -> usize {
    if let Some(msgtype) = msgtype {
        buf.put_u8(msgtype);
    }
    let offset = buf.len();
    buf.put_u32(0);
    offset
}

/// Complete a message started by [`start_message`].
///
/// Write the length of everything from the length field itself to the end of `buf`.
pub fn finish_message(buf: &mut BytesMut, offset: usize) -> Result<(), ProtocolError> {
    let len = (buf.len() - offset).to_u32()?;
    buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Write a bind parameter, length prefixed bytes or `-1` for `NULL`.
pub fn put_param(buf: &mut BytesMut, value: Option<&[u8]>) -> Result<(), ProtocolError> {
    match value {
        Some(value) => {
            let len = i32::try_from(value.len())
                .map_err(|_| ProtocolError::Overflow { len: value.len() })?;
            buf.put_i32(len);
            buf.put_slice(value);
        }
        // no value bytes follow in the NULL case
        None => buf.put_i32(-1),
    }
    Ok(())
}

/// Write a frontend message to `buf`.
///
/// On error, anything partially written by this message is discarded.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let start = buf.len();
    let offset = start_message(buf, Some(F::MSGTYPE));
    let result = msg.encode(buf).and_then(|_| finish_message(buf, offset));
    if result.is_err() {
        buf.truncate(start);
    }
    result
}

/// A type which can be encoded into postgres frontend message
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Write the main body of the message.
    ///
    /// Message type and length is written by [`write`].
    fn encode(self, buf: &mut BytesMut) -> Result<(), ProtocolError>;
}

/// Postgres Startup frontend message
///
/// For historical reasons, the very first message sent by the client (the [`Startup`] message)
/// has no initial message-type byte, thus [`Startup`] does not implement [`FrontendProtocol`].
///
/// To write startup message, use [`Startup::write`].
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
    /// Reported in `pg_stat_activity`.
    pub application_name: Option<&'a str>,
}

impl Startup<'_> {
    /// The protocol version number.
    ///
    /// The most significant 16 bits are the major version number (3 for the protocol described here).
    /// The least significant 16 bits are the minor version number (0 for the protocol described here).
    pub const PROTOCOL_VERSION: u32 = 3 << 16;

    pub fn write(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let offset = start_message(buf, None);

        buf.put_u32(Self::PROTOCOL_VERSION);

        // The protocol version number is followed by one or more pairs of parameter name and value strings.

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        if let Some(db) = self.database {
            buf.put_nul_string("database");
            buf.put_nul_string(db);
        }

        if let Some(name) = self.application_name {
            buf.put_nul_string("application_name");
            buf.put_nul_string(name);
        }

        // values are decoded as utf8 later
        buf.put_nul_string("client_encoding");
        buf.put_nul_string("UTF8");

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        finish_message(buf, offset)
    }
}

/// Request the backend to upgrade the stream to TLS.
///
/// Like [`Startup`], the message has no message-type byte.
#[derive(Debug)]
pub struct SslRequest;

impl SslRequest {
    /// The SSL request code.
    ///
    /// The value is chosen to contain 1234 in the most significant 16 bits,
    /// and 5679 in the least significant 16 bits.
    pub const CODE: u32 = 80_877_103;

    pub fn write(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let offset = start_message(buf, None);
        buf.put_u32(Self::CODE);
        finish_message(buf, offset)
    }
}

/// Identifies the message as a password response.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password (encrypted, if requested)
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn encode(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_nul_string(self.password);
        Ok(())
    }
}

/// Identifies the message as an initial SASL response.
///
/// Shares the message type with [`PasswordMessage`], the backend knows which one to expect.
#[derive(Debug)]
pub struct SaslInitialResponse<'a> {
    /// Name of the SASL authentication mechanism that the client selected.
    pub mechanism: &'a str,
    /// SASL mechanism specific "Initial Response".
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslInitialResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn encode(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_nul_string(self.mechanism);
        put_param(buf, Some(self.data))
    }
}

/// Identifies the message as a SASL response.
#[derive(Debug)]
pub struct SaslResponse<'a> {
    /// SASL mechanism specific message data, not nul terminated.
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn encode(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_slice(self.data);
        Ok(())
    }
}

/// Identifies the message as a simple query
#[derive(Debug)]
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn encode(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_nul_string(self.sql);
        Ok(())
    }
}

/// Identifies the message as a Parse command
#[derive(Debug)]
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub prepare_name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// Specifies the object ID of the parameter data type.
    ///
    /// Note that this is not an indication of the number of parameters that might appear in the query string,
    /// only the number that the frontend wants to prespecify types for.
    pub oids: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn encode(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_u16(self.oids.len().to_u16()?);
        for &oid in self.oids {
            buf.put_u32(oid);
        }
        Ok(())
    }
}

/// Identifies the message as a Sync command
#[derive(Debug)]
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn encode(self, _: &mut BytesMut) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Identifies the message as a Bind command.
#[derive(Debug)]
pub struct Bind<'a, P> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub stmt_name: &'a str,
    /// The parameter [`PgFormat`].
    ///
    /// This can be empty to indicate that there are no parameters or that the parameters
    /// all use the default format (text); or one, in which case the specified format code
    /// is applied to all parameters; or it can equal the actual number of parameters.
    pub param_formats: &'a [PgFormat],
    /// The parameter values, must match the number of parameters needed by the query.
    pub params: P,
    /// The result-columns [`PgFormat`], same rule as `param_formats`.
    pub result_formats: &'a [PgFormat],
}

impl<'p, P> FrontendProtocol for Bind<'_, P>
where
    P: ExactSizeIterator<Item = Encoded<'p>>,
{
    const MSGTYPE: u8 = b'B';

    fn encode(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);

        buf.put_u16(self.param_formats.len().to_u16()?);
        for format in self.param_formats {
            buf.put_u16(format.format_code());
        }

        buf.put_u16(self.params.len().to_u16()?);
        for param in self.params {
            param.write_param(buf)?;
        }

        buf.put_u16(self.result_formats.len().to_u16()?);
        for format in self.result_formats {
            buf.put_u16(format.format_code());
        }
        Ok(())
    }
}

/// Identifies the message as a Execute command
#[derive(Debug)]
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes “no limit”.
    pub max_row: u32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn encode(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_nul_string(self.portal_name);
        buf.put_u32(self.max_row);
        Ok(())
    }
}

/// Identifies the message as a Describe command.
#[derive(Debug)]
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn encode(self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
        Ok(())
    }
}

/// Identifies the message as a termination.
#[derive(Debug)]
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn encode(self, _: &mut BytesMut) -> Result<(), ProtocolError> {
        Ok(())
    }
}
