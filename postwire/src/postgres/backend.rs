//! Postgres Backend Messages
use bytes::{Buf, Bytes};
use std::fmt;

use super::{Fields, Oid, PgFormat, ProtocolError};
use crate::{common::ByteStr, ext::BytesExt};

/// A type that can be decoded into postgres backend message
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError>;
}

/// Postgres backend messages
///
/// Message type not listed here decodes into [`BackendMessage::Unknown`] instead of failing,
/// backends are allowed to send advisory messages that does not affect the current exchange.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    ErrorResponse(ErrorResponse),
    EmptyQueryResponse(EmptyQueryResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
    Unknown(UnknownMessage),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                    Self::Unknown(u) => u.msgtype,
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => Self::Unknown(UnknownMessage { msgtype, body }),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    DataRow,
    ErrorResponse,
    EmptyQueryResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE,$typ))
        }
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that Kerberos V5 authentication is required.
    KerberosV5,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8;4],
    },
    /// Specifies that GSSAPI authentication is required.
    GSS,
    /// GSSAPI or SSPI authentication data.
    GSSContinue {
        data: Bytes,
    },
    /// Specifies that SSPI authentication is required.
    SSPI,
    /// Specifies that SASL authentication is required.
    SASL {
        /// The message body is a list of SASL authentication mechanisms, in the server's order of preference.
        ///
        /// A zero byte is required as terminator after the last authentication mechanism name.
        mechanisms: Bytes,
    },
    /// Specifies that this message contains a SASL challenge.
    SASLContinue {
        /// SASL data, specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// Specifies that SASL authentication has completed.
    SASLFinal {
        /// SASL outcome "additional data", specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// Authentication code this library does not know about.
    Unknown {
        code: u32,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    /// Name of the authentication method, for error reporting.
    pub fn method_name(&self) -> &'static str {
        match self {
            Authentication::Ok => "Ok",
            Authentication::KerberosV5 => "KerberosV5",
            Authentication::CleartextPassword => "CleartextPassword",
            Authentication::MD5Password { .. } => "MD5Password",
            Authentication::GSS => "GSS",
            Authentication::GSSContinue { .. } => "GSSContinue",
            Authentication::SSPI => "SSPI",
            Authentication::SASL { .. } => "SASL",
            Authentication::SASLContinue { .. } => "SASLContinue",
            Authentication::SASLFinal { .. } => "SASLFinal",
            Authentication::Unknown { .. } => "Unknown",
        }
    }
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let auth = match body.checked_u32()? {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => Authentication::MD5Password { salt: body.checked_u32()?.to_be_bytes(), },
            7 => Authentication::GSS,
            8 => Authentication::GSSContinue { data: body },
            9 => Authentication::SSPI,
            10 => Authentication::SASL { mechanisms: body },
            11 => Authentication::SASLContinue { data: body },
            12 => Authentication::SASLFinal { data: body },
            code => Authentication::Unknown { code },
        };
        Ok(auth)
    }
}

/// Iterate SASL mechanism names from [`Authentication::SASL`] body.
///
/// Invalid utf8 names are skipped, they can never match a supported mechanism.
pub fn sasl_mechanisms(mechanisms: &Bytes) -> impl Iterator<Item = &str> {
    mechanisms
        .split(|&b| b == b'\0')
        .filter(|name| !name.is_empty())
        .filter_map(|name| std::str::from_utf8(name).ok())
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: body.checked_u32()?,
            secret_key: body.checked_u32()?,
        })
    }
}

/// Identifies the message as a run-time parameter status report
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: ByteStr,
    /// The current value of the parameter
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: body.get_nul_bytestr()?,
            value: body.get_nul_bytestr()?,
        })
    }
}

/// A warning message. The frontend should display the message.
#[derive(Debug)]
pub struct NoticeResponse {
    pub fields: Fields,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(NoticeResponse { fields: Fields::parse(body)? })
    }
}

impl fmt::Display for NoticeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.fields, f)
    }
}

/// Identifies the message as an error
///
/// See [`Fields`] for the message body.
pub struct ErrorResponse {
    pub fields: Fields,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    /// The SQLSTATE code for the error.
    pub fn code(&self) -> &str {
        self.fields.code()
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        self.fields.message()
    }

    /// The error severity.
    pub fn severity(&self) -> &str {
        self.fields.severity()
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { fields: Fields::parse(body)? })
    }
}

impl std::error::Error for ErrorResponse { }

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.fields, f)
    }
}

impl fmt::Debug for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Column metadata from a [`RowDescription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table, the object ID of the table;
    /// otherwise zero.
    pub table_oid: Oid,
    /// If the field can be identified as a column of a specific table, the attribute number of the column;
    /// otherwise zero.
    pub attribute: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size (see `pg_type.typlen`). Note that negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier (see `pg_attribute.atttypmod`). The meaning of the modifier is type-specific.
    pub type_modifier: i32,
    /// The format being used for the field.
    pub format: PgFormat,
}

/// Identifies the message as a row description
#[derive(Debug)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        // Specifies the number of fields in a row (can be zero).
        let len = body.checked_u16()?;
        let mut fields = Vec::with_capacity(len as usize);
        for _ in 0..len {
            fields.push(FieldDescription {
                name: body.get_nul_bytestr()?,
                table_oid: body.checked_u32()?,
                attribute: body.checked_i16()?,
                type_oid: body.checked_u32()?,
                type_size: body.checked_i16()?,
                type_modifier: body.checked_i32()?,
                format: PgFormat::from_code(body.checked_u16()?)?,
            });
        }
        Ok(Self { fields })
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// The number of column values that follow (possibly zero).
    pub column_len: u16,
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';

    /// Iterate column values, `None` for NULL.
    pub fn columns(&self) -> Columns {
        Columns { remaining: self.column_len, body: self.body.clone() }
    }
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            column_len: body.checked_u16()?,
            body,
        })
    }
}

/// Column values iterator of a [`DataRow`].
#[derive(Debug)]
pub struct Columns {
    remaining: u16,
    body: Bytes,
}

impl Iterator for Columns {
    type Item = Result<Option<Bytes>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let column = self.body.checked_i32().and_then(|len| match len {
            // As a special case, -1 indicates a NULL column value.
            -1 => Ok(None),
            len => match usize::try_from(len) {
                Ok(len) => self.body.checked_split_to(len).map(Some),
                Err(_) => Err(ProtocolError::Truncated),
            },
        });

        if column.is_err() {
            self.remaining = 0;
        }
        Some(column)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

/// Identifies the message as a command-completed response
///
/// For an INSERT command, the tag is INSERT oid rows, where rows is the number of rows inserted.
/// oid used to be the object ID of the inserted row if rows was 1 and the target table had OIDs,
/// but OIDs system columns are not supported anymore; therefore oid is always 0.
///
/// For a DELETE, UPDATE, MERGE, SELECT, MOVE, FETCH or COPY command, the tag is `<COMMAND> rows`.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';

    /// The leading word of the tag.
    pub fn command(&self) -> &str {
        self.tag.split_whitespace().next().unwrap_or_default()
    }

    /// Number of rows the command affected, zero for commands that does not report it.
    pub fn rows_affected(&self) -> u64 {
        let mut whs = self.tag.split_whitespace();
        let Some(tag) = whs.next() else {
            return 0;
        };
        let Some(rows) = whs.next() else {
            return 0;
        };
        match tag {
            "INSERT" => whs.next().unwrap_or_default(),
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY" => rows,
            _ => return 0,
        }
        .parse()
        .unwrap_or_default()
    }
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            tag: body.get_nul_bytestr()?,
        })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major protocol version requested by the client.
    pub minor: u32,
    /// Number of protocol options not recognized by the server.
    pub len: u32,
    /// Then, for protocol option not recognized by the server, there is the following:
    pub opt_names: Bytes,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            minor: body.checked_u32()?,
            len: body.checked_u32()?,
            opt_names: body,
        })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// Specifies the object ID of each parameter data type.
    pub oids: Vec<Oid>,
}

impl ParameterDescription  {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.checked_u16()?;
        let mut oids = Vec::with_capacity(len as usize);
        for _ in 0..len {
            oids.push(body.checked_u32()?);
        }
        Ok(Self { oids })
    }
}

/// Current backend transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    Idle,
    /// In a transaction block.
    Transaction,
    /// In a failed transaction block (queries will be rejected until block is ended).
    Failed,
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let status = match body.checked_u8()? {
            b'T' => TransactionStatus::Transaction,
            b'E' => TransactionStatus::Failed,
            // 'I', anything else is treated as idle
            _ => TransactionStatus::Idle,
        };
        Ok(Self { status })
    }
}

/// Backend message with a type this library does not know about.
pub struct UnknownMessage {
    pub msgtype: u8,
    pub body: Bytes,
}

impl fmt::Debug for UnknownMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnknownMessage")
            .field("msgtype", &(self.msgtype as char))
            .field("len", &self.body.remaining())
            .finish()
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self,ProtocolError> {
                    assert_msgtype!(msgtype);
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;

    fn row_description() -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(2);
        for (name, oid) in [("id", 23u32), ("name", 25)] {
            buf.put_slice(name.as_bytes());
            buf.put_u8(0);
            buf.put_u32(16384);
            buf.put_i16(1);
            buf.put_u32(oid);
            buf.put_i16(-1);
            buf.put_i32(-1);
            buf.put_u16(0);
        }
        buf.freeze()
    }

    #[test]
    fn decode_row_description() {
        let BackendMessage::RowDescription(desc) =
            BackendMessage::decode(b'T', row_description()).unwrap()
        else {
            panic!("not a row description")
        };
        assert_eq!(desc.fields.len(), 2);
        assert_eq!(desc.fields[1].name, "name");
        assert_eq!(desc.fields[1].type_oid, 25);
        assert_eq!(desc.fields[0].table_oid, 16384);
        assert_eq!(desc.fields[0].format, PgFormat::Text);
    }

    #[test]
    fn truncated_row_description() {
        let body = row_description().slice(..20);
        assert!(matches!(
            RowDescription::decode(b'T', body),
            Err(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn data_row_columns() {
        let row = DataRow::decode(
            b'D',
            Bytes::from_static(b"\x00\x02\xff\xff\xff\xff\x00\x00\x00\x02hi"),
        )
        .unwrap();
        let columns: Vec<_> = row.columns().collect::<Result<_, _>>().unwrap();
        assert_eq!(columns, vec![None, Some(Bytes::from_static(b"hi"))]);
    }

    #[test]
    fn data_row_length_past_body() {
        let row = DataRow::decode(b'D', Bytes::from_static(b"\x00\x01\x00\x00\x00\x09hi")).unwrap();
        let mut columns = row.columns();
        assert!(matches!(columns.next(), Some(Err(ProtocolError::Truncated))));
        assert!(columns.next().is_none());
    }

    #[test]
    fn authentication_codes() {
        let md5 = Authentication::decode(b'R', Bytes::from_static(b"\0\0\0\x05\x01\x02\x03\x04")).unwrap();
        assert!(matches!(md5, Authentication::MD5Password { salt: [1, 2, 3, 4] }));

        let sasl = Authentication::decode(
            b'R',
            Bytes::from_static(b"\0\0\0\x0aSCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0"),
        )
        .unwrap();
        let Authentication::SASL { mechanisms } = sasl else { panic!("not sasl") };
        assert_eq!(
            sasl_mechanisms(&mechanisms).collect::<Vec<_>>(),
            ["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]
        );

        let unknown = Authentication::decode(b'R', Bytes::from_static(b"\0\0\0\x63")).unwrap();
        assert!(matches!(unknown, Authentication::Unknown { code: 99 }));

        assert!(Authentication::decode(b'Z', Bytes::from_static(b"I")).is_err());
    }

    #[test]
    fn command_complete_tag() {
        let cmd = CommandComplete { tag: "INSERT 0 3".into() };
        assert_eq!(cmd.command(), "INSERT");
        assert_eq!(cmd.rows_affected(), 3);

        let cmd = CommandComplete { tag: "SELECT 12".into() };
        assert_eq!(cmd.rows_affected(), 12);

        let cmd = CommandComplete { tag: "CREATE TABLE".into() };
        assert_eq!(cmd.command(), "CREATE");
        assert_eq!(cmd.rows_affected(), 0);
    }

    #[test]
    fn unknown_message_is_not_an_error() {
        let msg = BackendMessage::decode(b'A', Bytes::from_static(b"anything")).unwrap();
        assert_eq!(msg.msgtype(), b'A');
        assert!(matches!(msg, BackendMessage::Unknown(_)));
    }
}
