//! Postgres row operation.
//!
//! - [`Row`]
//! - [`QueryResult`]
//! - [`Decode`]
//!
//! - [`Index`]
//! - [`DecodeError`]
use bytes::Bytes;
use std::{borrow::Cow, fmt, str::Utf8Error, sync::Arc};

use crate::{
    postgres::backend::{DataRow, FieldDescription},
    value::Value,
};

/// Postgres row.
///
/// Values are kept in column order, matching the field set of the `RowDescription`
/// the row was decoded against.
#[derive(Clone)]
pub struct Row {
    fields: Arc<[FieldDescription]>,
    values: Vec<Value>,
}

impl Row {
    /// Decode a `DataRow` against the current field set.
    pub(crate) fn decode(fields: Arc<[FieldDescription]>, row: DataRow) -> Result<Self, crate::Error> {
        if row.column_len as usize != fields.len() {
            return Err(DecodeError::ColumnCountMismatch {
                expected: fields.len(),
                found: row.column_len as usize,
            }
            .into());
        }

        let mut values = Vec::with_capacity(fields.len());
        for (field, column) in fields.iter().zip(row.columns()) {
            values.push(Value::from_column(column?, field.format).map_err(DecodeError::Utf8)?);
        }

        Ok(Self { fields, values })
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns the field descriptions, in column order.
    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    /// Returns the values, in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Iterate over `(field name, value)` in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|f| f.name.as_str()).zip(self.values.iter())
    }

    /// Get column value.
    ///
    /// When more than one column have the same name, the first one is returned.
    pub fn get<I: Index>(&self, idx: I) -> Option<&Value> {
        idx.position(&self.fields).ok().map(|i| &self.values[i])
    }

    /// Try get and decode column.
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        let i = idx.position(&self.fields)?;
        R::decode(&self.values[i])
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    /// Panics if `idx` is out of bounds.
    fn index(&self, idx: usize) -> &Value {
        &self.values[idx]
    }
}

impl std::ops::Index<&str> for Row {
    type Output = Value;

    /// Missing column index to [`Value::Null`].
    fn index(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.get(name).unwrap_or(&NULL)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Outcome of one query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Command verb of the last `CommandComplete`, e.g. `SELECT` or `INSERT`.
    ///
    /// Empty for an empty query string.
    pub command: String,
    /// Field set of the last `RowDescription`.
    pub fields: Vec<FieldDescription>,
    /// Rows in arrival order.
    pub rows: Vec<Row>,
    /// Number of rows in [`QueryResult::rows`].
    pub row_count: usize,
    /// Trailing count of the command tag, summed over every statement.
    pub rows_affected: u64,
}

impl QueryResult {
    /// Returns the first row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;

    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Row;

    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

// ===== Traits =====

/// A type that can be constructed from a column [`Value`].
///
/// Text format values are parsed from their text representation.
pub trait Decode: Sized {
    /// Try decode self from value.
    fn decode(value: &Value) -> Result<Self, DecodeError>;
}

impl Decode for Value {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        Ok(value.clone())
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        match value.is_null() {
            true => Ok(None),
            false => T::decode(value).map(Some),
        }
    }
}

fn text(value: &Value) -> Result<&str, DecodeError> {
    match value {
        Value::Null => Err(DecodeError::Null),
        Value::Text(text) => Ok(text.as_str()),
        Value::Binary(_) => Err(DecodeError::BinaryFormat),
    }
}

impl Decode for String {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        text(value).map(Into::into)
    }
}

impl Decode for Bytes {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Err(DecodeError::Null),
            Value::Text(text) => Ok(text.clone().into_bytes()),
            Value::Binary(bytes) => Ok(bytes.clone()),
        }
    }
}

impl Decode for bool {
    fn decode(value: &Value) -> Result<Self, DecodeError> {
        match text(value)? {
            "t" | "true" => Ok(true),
            "f" | "false" => Ok(false),
            other => Err(DecodeError::Parse {
                ty: "bool",
                value: other.into(),
            }),
        }
    }
}

macro_rules! decode_parse {
    ($($ty:ty),*) => {
        $(
            impl Decode for $ty {
                fn decode(value: &Value) -> Result<Self, DecodeError> {
                    let text = text(value)?;
                    text.parse().map_err(|_| DecodeError::Parse {
                        ty: stringify!($ty),
                        value: text.into(),
                    })
                }
            }
        )*
    };
}

decode_parse!(i16, i32, i64, u32, f32, f64);

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the column position.
    fn position(self, fields: &[FieldDescription]) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, fields: &[FieldDescription]) -> Result<usize, DecodeError> {
        match self < fields.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    fn position(self, fields: &[FieldDescription]) -> Result<usize, DecodeError> {
        fields
            .iter()
            .position(|f| f.name == self)
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

/// An error when decoding row value.
pub enum DecodeError {
    /// `DataRow` column count differ from the current `RowDescription`.
    ColumnCountMismatch { expected: usize, found: usize },
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static, str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Row is null.
    Null,
    /// Binary format value requested as text.
    BinaryFormat,
    /// Text value is not a valid representation of the requested type.
    Parse { ty: &'static str, value: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::ColumnCountMismatch { expected, found } => {
                write!(f, "row has {found} columns, but {expected} fields are described")
            }
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::Null => write!(f, "unexpected NULL value"),
            Self::BinaryFormat => write!(f, "binary format value cannot be read as text"),
            Self::Parse { ty, value } => write!(f, "invalid {ty}: {value:?}"),
        }
    }
}

impl From<Utf8Error> for DecodeError {
    fn from(e: Utf8Error) -> Self {
        Self::Utf8(e)
    }
}

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{common::ByteStr, postgres::PgFormat};

    fn field(name: &'static str, format: PgFormat) -> FieldDescription {
        FieldDescription {
            name: ByteStr::from_static(name),
            table_oid: 0,
            attribute: 0,
            type_oid: 25,
            type_size: -1,
            type_modifier: -1,
            format,
        }
    }

    fn data_row(columns: &[Option<&str>]) -> DataRow {
        let mut body = vec![];
        for col in columns {
            match col {
                Some(v) => {
                    body.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    body.extend_from_slice(v.as_bytes());
                }
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        DataRow { column_len: columns.len() as u16, body: body.into() }
    }

    #[test]
    fn decode_text_and_null() {
        let fields: Arc<[_]> = vec![
            field("id", PgFormat::Text),
            field("name", PgFormat::Text),
            field("raw", PgFormat::Binary),
        ]
        .into();
        let row = Row::decode(fields, data_row(&[Some("42"), None, Some("\0\x01")])).unwrap();

        assert_eq!(row.len(), 3);
        assert_eq!(row.try_get::<_, i32>("id").unwrap(), 42);
        assert_eq!(row.try_get::<_, Option<String>>("name").unwrap(), None);
        assert!(row["name"].is_null());
        assert_eq!(row[2], Value::Binary(Bytes::from_static(b"\x00\x01")));
        assert_eq!(row["id"], "42");
        assert!(row["missing"].is_null());
        assert!(matches!(row.try_get::<_, String>(1), Err(DecodeError::Null)));
        assert!(matches!(row.try_get::<_, String>(3), Err(DecodeError::IndexOutOfBounds(3))));
        assert!(matches!(row.try_get::<_, String>("raw"), Err(DecodeError::BinaryFormat)));
    }

    #[test]
    fn null_regardless_of_format() {
        let fields: Arc<[_]> = vec![
            field("raw", PgFormat::Binary),
            field("name", PgFormat::Text),
        ]
        .into();
        let row = Row::decode(fields, data_row(&[None, None])).unwrap();

        assert_eq!(row[0], Value::Null);
        assert_eq!(row["name"], Value::Null);
        assert_eq!(row.try_get::<_, Option<Bytes>>("raw").unwrap(), None);
    }

    #[test]
    fn column_count_mismatch() {
        let fields: Arc<[_]> = vec![field("a", PgFormat::Text)].into();
        let err = Row::decode(fields, data_row(&[Some("1"), Some("2")])).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::ErrorKind::Decode(DecodeError::ColumnCountMismatch { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn parse_failure() {
        let value = Value::Text(ByteStr::from_static("yes"));
        assert!(matches!(bool::decode(&value), Err(DecodeError::Parse { ty: "bool", .. })));
        assert_eq!(f64::decode(&Value::Text(ByteStr::from_static("1.25"))).unwrap(), 1.25);
    }
}
