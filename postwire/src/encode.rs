//! Query parameter encoding.
//!
//! Every parameter is sent in text format, postgres infer the parameter type from the statement.
//!
//! - [`Encode`], value that can be bound as a query parameter
//! - [`Encoded`], closed set of supported parameter kinds
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    postgres::{ProtocolError, frontend},
    value::Value,
};

/// Value that can be encoded to be bound to sql parameter.
///
/// The trait is object safe, so heterogeneous parameters can be passed as
/// `&[&(dyn Encode + Sync)]`.
pub trait Encode {
    fn encode(&self) -> Encoded<'_>;
}

/// Postgres encoded parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Encoded<'a> {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(&'a str),
    /// Sent in `bytea` hex form, `\x` followed by two hex digits per byte.
    Bytes(&'a [u8]),
}

impl Encoded<'_> {
    /// Returns `true` if parameter is `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Write the length prefixed text representation, or `-1` for `NULL`.
    pub fn write_param(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        match *self {
            Self::Null => frontend::put_param(buf, None),
            Self::Bool(b) => {
                let text: &[u8] = if b { b"t" } else { b"f" };
                frontend::put_param(buf, Some(text))
            }
            Self::Int(i) => frontend::put_param(buf, Some(itoa::Buffer::new().format(i).as_bytes())),
            Self::UInt(u) => frontend::put_param(buf, Some(itoa::Buffer::new().format(u).as_bytes())),
            Self::Float(f) => frontend::put_param(buf, Some(float_text(f).as_bytes())),
            Self::Text(s) => frontend::put_param(buf, Some(s.as_bytes())),
            Self::Bytes(b) => {
                let mut hex = BytesMut::with_capacity(2 + b.len() * 2);
                hex.put_slice(b"\\x");
                hex.put_slice(hex::encode(b).as_bytes());
                frontend::put_param(buf, Some(&hex[..]))
            }
        }
    }
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        "NaN".into()
    } else if f.is_infinite() {
        let inf = if f.is_sign_positive() { "Infinity" } else { "-Infinity" };
        inf.into()
    } else {
        f.to_string()
    }
}

impl Encode for Encoded<'_> {
    fn encode(&self) -> Encoded<'_> {
        *self
    }
}

impl Encode for bool {
    fn encode(&self) -> Encoded<'_> {
        Encoded::Bool(*self)
    }
}

macro_rules! encode_int {
    ($variant:ident as $cast:ty: $($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode(&self) -> Encoded<'_> {
                    Encoded::$variant(*self as $cast)
                }
            }
        )*
    };
}

encode_int!(Int as i64: i8, i16, i32, i64, isize);
encode_int!(UInt as u64: u8, u16, u32, u64, usize);

impl Encode for f32 {
    fn encode(&self) -> Encoded<'_> {
        Encoded::Float(f64::from(*self))
    }
}

impl Encode for f64 {
    fn encode(&self) -> Encoded<'_> {
        Encoded::Float(*self)
    }
}

impl Encode for str {
    fn encode(&self) -> Encoded<'_> {
        Encoded::Text(self)
    }
}

impl Encode for String {
    fn encode(&self) -> Encoded<'_> {
        Encoded::Text(self)
    }
}

impl Encode for [u8] {
    fn encode(&self) -> Encoded<'_> {
        Encoded::Bytes(self)
    }
}

impl Encode for Vec<u8> {
    fn encode(&self) -> Encoded<'_> {
        Encoded::Bytes(self)
    }
}

impl Encode for Bytes {
    fn encode(&self) -> Encoded<'_> {
        Encoded::Bytes(self)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self) -> Encoded<'_> {
        match self {
            Some(value) => value.encode(),
            None => Encoded::Null,
        }
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self) -> Encoded<'_> {
        T::encode(self)
    }
}

impl Encode for Value {
    fn encode(&self) -> Encoded<'_> {
        match self {
            Value::Null => Encoded::Null,
            Value::Text(text) => Encoded::Text(text.as_str()),
            Value::Binary(bytes) => Encoded::Bytes(bytes),
        }
    }
}
