//! Little-endian byte helpers shared by the key codec and the catalogue.
//!
//! Writers into a `Vec<u8>` cannot fail, so key encoding goes through the
//! infallible [`PutLe`]. Streams go through [`WriteLeExt`] / [`ReadLeExt`].

use std::io::{self, Read, Write};

/// Infallible little-endian appends onto a byte buffer.
pub trait PutLe {
    fn put_u8(&mut self, v: u8);
    fn put_u32_le(&mut self, v: u32);
    fn put_u64_le(&mut self, v: u64);
    fn put_i32_le(&mut self, v: i32);
    fn put_i64_le(&mut self, v: i64);

    fn put_bool(&mut self, v: bool) {
        self.put_u8(u8::from(v));
    }

    /// Writes a `u32` length prefix followed by the UTF-8 bytes.
    fn put_str(&mut self, s: &str);
}

impl PutLe for Vec<u8> {
    #[inline]
    fn put_u8(&mut self, v: u8) {
        self.push(v);
    }

    #[inline]
    fn put_u32_le(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn put_u64_le(&mut self, v: u64) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn put_i32_le(&mut self, v: i32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn put_i64_le(&mut self, v: i64) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_str(&mut self, s: &str) {
        self.put_u32_le(s.len() as u32);
        self.extend_from_slice(s.as_bytes());
    }
}

pub trait WriteLeExt: Write {
    fn write_u32_le(&mut self, v: u32) -> io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_u64_le(&mut self, v: u64) -> io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_i64_le(&mut self, v: i64) -> io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_len_prefixed_bytes_u32(&mut self, bytes: &[u8]) -> io::Result<()> {
        let len: u32 = bytes.len().try_into().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "length does not fit in u32")
        })?;
        self.write_u32_le(len)?;
        self.write_all(bytes)
    }
}

impl<T: Write + ?Sized> WriteLeExt for T {}

pub trait ReadLeExt: Read {
    fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_bool(&mut self) -> io::Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid bool byte {other}"),
            )),
        }
    }

    fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32_le(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_i64_le(&mut self) -> io::Result<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Reads exactly `len` bytes, refusing lengths above `max_len`.
    fn read_exact_vec(&mut self, len: usize, max_len: usize) -> io::Result<Vec<u8>> {
        if len > max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("length {len} exceeds limit {max_len}"),
            ));
        }
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_string_u32(&mut self, max_len: usize) -> io::Result<String> {
        let len = self.read_u32_le()? as usize;
        let bytes = self.read_exact_vec(len, max_len)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T: Read + ?Sized> ReadLeExt for T {}
