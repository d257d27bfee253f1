//! Cursor-based Encoder/Decoder di atas fixed byte slices
//!
//! Encode dan decode langsung ke/dari pre-allocated buffer.
//! Tidak ada alokasi di hot path (kecuali `read_string`, yang
//! harus menghasilkan `String` milik message).
//!
//! Semua integer little-endian. String: panjang 7-bit varint lalu
//! byte UTF-8.

use crate::error::WireError;

/// Maximum bytes of a 7-bit encoded `u32` length.
const MAX_VARINT_LEN: usize = 5;

macro_rules! write_le {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Write a little-endian `", stringify!($ty), "`.")]
            #[inline(always)]
            pub fn $name(&mut self, value: $ty) -> Result<(), WireError> {
                self.write_bytes(&value.to_le_bytes())
            }
        )*
    };
}

macro_rules! read_le {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Read a little-endian `", stringify!($ty), "`.")]
            #[inline(always)]
            pub fn $name(&mut self) -> Result<$ty, WireError> {
                let bytes = self.read_bytes(std::mem::size_of::<$ty>())?;
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                Ok(<$ty>::from_le_bytes(raw))
            }
        )*
    };
}

/// Writer cursor over a borrowed, fixed-capacity buffer.
///
/// The buffer never grows: a write that does not fit fails with
/// [`WireError::BufferOverflow`] and leaves the cursor where it was.
pub struct Encoder<'a> {
    buffer: &'a mut [u8],
    write_pos: usize,
}

impl<'a> Encoder<'a> {
    /// Membuat encoder di awal buffer
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            write_pos: 0,
        }
    }

    /// Reset encoder untuk reuse
    #[inline(always)]
    pub fn reset(&mut self) {
        self.write_pos = 0;
    }

    /// Bytes written so far.
    #[inline(always)]
    pub fn position(&self) -> usize {
        self.write_pos
    }

    /// Available space in buffer
    #[inline(always)]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.write_pos
    }

    /// Get current buffer content
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.write_pos]
    }

    /// Consume the encoder, keeping the written range borrowed for `'a`.
    pub fn into_bytes(self) -> &'a [u8] {
        let written = self.write_pos;
        let buffer: &'a [u8] = self.buffer;
        &buffer[..written]
    }

    /// Copy raw bytes at the cursor.
    #[inline(always)]
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if bytes.len() > self.available() {
            return Err(WireError::BufferOverflow {
                needed: bytes.len(),
                available: self.available(),
            });
        }

        let end = self.write_pos + bytes.len();
        self.buffer[self.write_pos..end].copy_from_slice(bytes);
        self.write_pos = end;
        Ok(())
    }

    write_le! {
        write_i8: i8,
        write_u8: u8,
        write_i16: i16,
        write_u16: u16,
        write_i32: i32,
        write_u32: u32,
        write_i64: i64,
        write_u64: u64,
        write_f32: f32,
        write_f64: f64,
    }

    /// Write a bool as a single `0`/`1` byte.
    #[inline(always)]
    pub fn write_bool(&mut self, value: bool) -> Result<(), WireError> {
        self.write_u8(u8::from(value))
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<(), WireError> {
        let len = u32::try_from(value.len()).map_err(|_| WireError::MalformedLength)?;

        let mut prefix = [0u8; MAX_VARINT_LEN];
        let prefix_len = encode_varint(len, &mut prefix);

        // Cek dulu supaya prefix tidak tertulis tanpa isinya
        let needed = prefix_len + value.len();
        if needed > self.available() {
            return Err(WireError::BufferOverflow {
                needed,
                available: self.available(),
            });
        }

        self.write_bytes(&prefix[..prefix_len])?;
        self.write_bytes(value.as_bytes())
    }
}

/// Reader cursor over a received byte range.
pub struct Decoder<'a> {
    buffer: &'a [u8],
    read_pos: usize,
}

impl<'a> Decoder<'a> {
    /// Membuat decoder dari buffer
    #[inline(always)]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            read_pos: 0,
        }
    }

    /// Bytes consumed so far.
    #[inline(always)]
    pub fn position(&self) -> usize {
        self.read_pos
    }

    /// Remaining bytes
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Borrow the next `len` bytes and advance past them.
    #[inline(always)]
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if len > self.remaining() {
            return Err(WireError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }

        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.buffer[start..self.read_pos])
    }

    read_le! {
        read_i8: i8,
        read_u8: u8,
        read_i16: i16,
        read_u16: u16,
        read_i32: i32,
        read_u32: u32,
        read_i64: i64,
        read_u64: u64,
        read_f32: f32,
        read_f64: f64,
    }

    /// Read a bool; any non-zero byte is `true`.
    #[inline(always)]
    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_varint()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }

    fn read_varint(&mut self) -> Result<u32, WireError> {
        let mut value = 0u32;
        for index in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            // Byte ke-5 hanya boleh membawa 4 bit terakhir
            if index == MAX_VARINT_LEN - 1 && byte > 0x0F {
                return Err(WireError::MalformedLength);
            }
            value |= u32::from(byte & 0x7F) << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::MalformedLength)
    }
}

fn encode_varint(mut value: u32, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut len = 0;
    while value >= 0x80 {
        out[len] = (value as u8) | 0x80;
        value >>= 7;
        len += 1;
    }
    out[len] = value as u8;
    len + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_little_endian() {
        let mut buf = [0u8; 16];
        let mut encoder = Encoder::new(&mut buf);
        encoder.write_i32(2020).unwrap();
        encoder.write_u16(0xBEEF).unwrap();

        assert_eq!(encoder.as_bytes(), &[0xE4, 0x07, 0x00, 0x00, 0xEF, 0xBE]);

        let mut decoder = Decoder::new(encoder.as_bytes());
        assert_eq!(decoder.read_i32().unwrap(), 2020);
        assert_eq!(decoder.read_u16().unwrap(), 0xBEEF);
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_string_layout_matches_binary_writer() {
        let mut buf = [0u8; 512];
        let mut encoder = Encoder::new(&mut buf);
        encoder.write_string("abc").unwrap();
        assert_eq!(encoder.as_bytes(), &[3, b'a', b'b', b'c']);

        // 200 byte string -> 2 byte prefix (0xC8 0x01)
        encoder.reset();
        let long = "x".repeat(200);
        encoder.write_string(&long).unwrap();
        assert_eq!(&encoder.as_bytes()[..2], &[0xC8, 0x01]);

        let mut decoder = Decoder::new(encoder.as_bytes());
        assert_eq!(decoder.read_string().unwrap(), long);
    }

    #[test]
    fn test_overflow_leaves_cursor() {
        let mut buf = [0u8; 4];
        let mut encoder = Encoder::new(&mut buf);
        encoder.write_u16(1).unwrap();

        let err = encoder.write_u32(7).unwrap_err();
        assert!(matches!(
            err,
            WireError::BufferOverflow {
                needed: 4,
                available: 2
            }
        ));
        assert_eq!(encoder.position(), 2);

        // String prefix must not be written when the body does not fit
        assert!(encoder.write_string("abc").is_err());
        assert_eq!(encoder.position(), 2);
    }

    #[test]
    fn test_truncated_read() {
        let mut decoder = Decoder::new(&[1, 2]);
        assert!(matches!(
            decoder.read_i32(),
            Err(WireError::UnexpectedEof {
                needed: 4,
                remaining: 2
            })
        ));
    }

    #[test]
    fn test_malformed_strings() {
        // Prefix claims 5 bytes, only 1 present
        let mut decoder = Decoder::new(&[5, b'a']);
        assert!(matches!(
            decoder.read_string(),
            Err(WireError::UnexpectedEof { .. })
        ));

        // Varint never terminates
        let mut decoder = Decoder::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(
            decoder.read_string(),
            Err(WireError::MalformedLength)
        ));

        let mut decoder = Decoder::new(&[2, 0xC3, 0x28]);
        assert!(matches!(decoder.read_string(), Err(WireError::InvalidUtf8)));
    }

    #[test]
    fn test_empty_string() {
        let mut buf = [0u8; 4];
        let mut encoder = Encoder::new(&mut buf);
        encoder.write_string("").unwrap();
        let bytes = encoder.into_bytes();
        assert_eq!(bytes, &[0]);
        assert_eq!(Decoder::new(bytes).read_string().unwrap(), "");
    }
}
