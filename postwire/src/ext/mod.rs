use bytes::{Buf, BufMut, Bytes};

use crate::{common::ByteStr, postgres::ProtocolError};

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// Length is `usize` in rust, while postgres want `u32`,
    /// returns [`ProtocolError::Overflow`] instead of wrapping.
    fn to_u32(self) -> Result<u32, ProtocolError>;
    /// Length is `usize` in rust, while postgres want `u16`,
    /// returns [`ProtocolError::Overflow`] instead of wrapping.
    fn to_u16(self) -> Result<u16, ProtocolError>;
}

/// Nul string operation in [`BufMut`]
pub trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

/// Checked reads on a backend message body.
///
/// Every read returns [`ProtocolError::Truncated`] instead of panicking when the
/// body is shorter than what the message layout declares.
pub trait BytesExt {
    /// Try to read nul terminated string.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`]
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError>;

    /// Try to read nul terminated bytes, excluding the nul.
    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError>;

    fn checked_u8(&mut self) -> Result<u8, ProtocolError>;

    fn checked_u16(&mut self) -> Result<u16, ProtocolError>;

    fn checked_i16(&mut self) -> Result<i16, ProtocolError>;

    fn checked_u32(&mut self) -> Result<u32, ProtocolError>;

    fn checked_i32(&mut self) -> Result<i32, ProtocolError>;

    /// Split off exactly `len` bytes.
    fn checked_split_to(&mut self, len: usize) -> Result<Bytes, ProtocolError>;
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_u32(self) -> Result<u32, ProtocolError> {
        self.try_into().map_err(|_| ProtocolError::Overflow { len: self })
    }

    fn to_u16(self) -> Result<u16, ProtocolError> {
        self.try_into().map_err(|_| ProtocolError::Overflow { len: self })
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

macro_rules! checked {
    ($($name:ident => $get:ident -> $ty:ty;)*) => {$(
        fn $name(&mut self) -> Result<$ty, ProtocolError> {
            if self.remaining() < size_of::<$ty>() {
                return Err(ProtocolError::Truncated);
            }
            Ok(self.$get())
        }
    )*};
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        let bytes = self.get_nul_bytes()?;
        ByteStr::from_utf8(bytes).map_err(ProtocolError::Utf8)
    }

    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let Some(end) = self.iter().position(|e| matches!(e, b'\0')) else {
            return Err(ProtocolError::MissingNul);
        };
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(me)
    }

    checked! {
        checked_u8 => get_u8 -> u8;
        checked_u16 => get_u16 -> u16;
        checked_i16 => get_i16 -> i16;
        checked_u32 => get_u32 -> u32;
        checked_i32 => get_i32 -> i32;
    }

    fn checked_split_to(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        if self.len() < len {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.split_to(len))
    }
}

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checked_reads() {
        let mut body = Bytes::from_static(b"user\0\x00\x2a\x00");
        assert_eq!(body.get_nul_bytestr().unwrap(), "user");
        assert_eq!(body.checked_u16().unwrap(), 42);
        assert!(matches!(body.checked_u32(), Err(ProtocolError::Truncated)));
        assert!(matches!(body.get_nul_bytes(), Ok(b) if b.is_empty()));
        assert!(matches!(body.get_nul_bytes(), Err(ProtocolError::MissingNul)));
    }

    #[test]
    fn overflow_is_checked() {
        assert_eq!(5usize.to_u16().unwrap(), 5);
        let err = 70_000usize.to_u16().unwrap_err();
        assert!(matches!(err, ProtocolError::Overflow { len: 70_000 }));
        assert_eq!(err.to_string(), "length 70000 too large for protocol");
        assert!(70_000usize.to_u32().is_ok());
    }

    #[test]
    fn lossy_display() {
        assert_eq!(b"ok\x01".lossy().to_string(), "ok\\x01");
    }
}
