use bytes::{Buf, BufMut, Bytes};

use crate::{common::ByteStr, postgres::ProtocolError};

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// Length is `usize` in rust, while sometime postgres want `u32`,
    /// this will panic when overflow instead of wrapping.
    fn to_u32(self) -> u32;
    /// Length is `usize` in rust, while sometime postgres want `u16`,
    /// this will panic when overflow instead of wrapping.
    fn to_u16(self) -> u16;
}

/// Nul string operation.
pub trait StrExt {
    /// String length plus nul (1).
    fn nul_string_len(&self) -> u32;
}

/// Nul string operation in [`BufMut`]
pub trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

/// Checked read on a message body.
///
/// Backend message are untrusted input, so running out of bytes is reported
/// as [`ProtocolError`] instead of panicking like [`Buf::get_u8`] does.
pub trait BufExt: Buf {
    fn checked_u8(&mut self) -> Result<u8, ProtocolError> {
        self.check(1)?;
        Ok(self.get_u8())
    }

    fn checked_u16(&mut self) -> Result<u16, ProtocolError> {
        self.check(2)?;
        Ok(self.get_u16())
    }

    fn checked_i16(&mut self) -> Result<i16, ProtocolError> {
        self.check(2)?;
        Ok(self.get_i16())
    }

    fn checked_u32(&mut self) -> Result<u32, ProtocolError> {
        self.check(4)?;
        Ok(self.get_u32())
    }

    fn checked_i32(&mut self) -> Result<i32, ProtocolError> {
        self.check(4)?;
        Ok(self.get_i32())
    }

    fn check(&self, len: usize) -> Result<(), ProtocolError> {
        match self.remaining() >= len {
            true => Ok(()),
            false => Err(ProtocolError::malformed("message body truncated")),
        }
    }
}

impl<B: Buf> BufExt for B { }

/// Nul string operation in [`Bytes`]
pub trait BytesExt {
    /// Try to read nul terminated string.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`]
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError>;

    /// Split `len` bytes from the front, failing when not enough remaining.
    fn checked_split(&mut self, len: usize) -> Result<Bytes, ProtocolError>;
}

/// Helper trait for efficient operation on [`Bind`][crate::postgres::frontend::Bind] message.
pub trait BindParams: Buf {
    /// The length of the parameter value, in bytes (this count does not include itself).
    ///
    /// Can be zero. As a special case, -1 indicates a NULL parameter value.
    /// No value bytes follow in the NULL case.
    fn size(&self) -> i32;
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("message size too large for protocol")
    }
}

impl StrExt for str {
    fn nul_string_len(&self) -> u32 {
        self.len().to_u32() + 1/* nul */
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        let Some(end) = memchr::memchr(b'\0', self) else {
            return Err(ProtocolError::malformed("string is not nul terminated"));
        };
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        ByteStr::from_utf8(me).map_err(|_| ProtocolError::malformed("string is not valid utf8"))
    }

    fn checked_split(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        self.check(len)?;
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
            if b.is_ascii_graphic() || b.is_ascii_whitespace() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:x}")?;
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
    fn nul_string() {
        let mut bytes = Bytes::from_static(b"user\0postgres\0");
        assert_eq!(bytes.get_nul_bytestr().unwrap(), "user");
        assert_eq!(bytes.get_nul_bytestr().unwrap(), "postgres");
        assert!(bytes.is_empty());
    }

    #[test]
    fn unterminated_string_is_error() {
        let mut bytes = Bytes::from_static(b"user");
        assert!(bytes.get_nul_bytestr().is_err());
    }

    #[test]
    fn truncated_read_is_error() {
        let mut bytes = Bytes::from_static(&[0, 1]);
        assert!(bytes.checked_u32().is_err());
        assert_eq!(bytes.checked_u16().unwrap(), 1);
        assert!(bytes.checked_u8().is_err());
    }
}
