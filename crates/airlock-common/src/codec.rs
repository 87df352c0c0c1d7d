//! Size-prefixed frame codec.
//!
//! Every datagram between the supervisor and a scout is a little-endian
//! 32-bit `payload_size` followed by exactly `payload_size` bytes of
//! body. Field encoding rules:
//!
//! - fixed-width integers: little-endian, no padding;
//! - plain structs (e.g. `stat` on this ABI): raw bytes;
//! - nul-terminated strings: u32 length *including* the nul, then bytes;
//! - fixed-length buffers: u32 length, then exactly that many bytes.
//!
//! The codec is shared with the `no_std` scout, so both halves operate
//! on caller-provided buffers. A [`Packer`] reserves the prefix slot up
//! front and patches it on [`Packer::finish`]; an [`Unpacker`] walks a
//! payload and fails with [`CodecError::Truncated`] instead of reading
//! past the end, which is the receiving side's completeness check.

use core::ffi::CStr;
use core::fmt;

/// Decode/encode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The destination buffer cannot hold the next field.
    Overflow,
    /// The payload ended in the middle of a field.
    Truncated,
    /// A fixed-length buffer's wire size does not match the reader's
    /// declared size.
    FixedLen {
        /// Size declared by the reader.
        expected: u32,
        /// Size found on the wire.
        got: u32,
    },
    /// A string field is missing its nul terminator.
    BadString,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => f.write_str("frame buffer too small"),
            Self::Truncated => f.write_str("truncated frame"),
            Self::FixedLen { expected, got } => {
                write!(f, "fixed buffer size mismatch: expected {expected}, got {got}")
            }
            Self::BadString => f.write_str("string field missing nul terminator"),
        }
    }
}

impl core::error::Error for CodecError {}

/// Frame builder over a caller-provided buffer.
///
/// The first four bytes of the buffer are reserved for the size prefix.
pub struct Packer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Packer<'a> {
    /// Starts a frame in `buf`, reserving the prefix slot.
    ///
    /// # Panics
    ///
    /// Panics if `buf` cannot hold even the prefix.
    pub fn new(buf: &'a mut [u8]) -> Self {
        assert!(buf.len() >= 4);
        Self { buf, pos: 4 }
    }

    /// Payload bytes written so far (prefix excluded).
    #[must_use]
    pub const fn size(&self) -> usize {
        self.pos - 4
    }

    /// Total frame size including the prefix.
    #[must_use]
    pub const fn size_with_prefix(&self) -> usize {
        self.pos
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let end = self.pos.checked_add(bytes.len()).ok_or(CodecError::Overflow)?;
        if end > self.buf.len() {
            return Err(CodecError::Overflow);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// Appends a little-endian `u32`.
    pub fn put_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.put(&v.to_le_bytes())
    }

    /// Appends a little-endian `i32`.
    pub fn put_i32(&mut self, v: i32) -> Result<(), CodecError> {
        self.put(&v.to_le_bytes())
    }

    /// Appends a little-endian `u64`.
    pub fn put_u64(&mut self, v: u64) -> Result<(), CodecError> {
        self.put(&v.to_le_bytes())
    }

    /// Appends a little-endian `i64`.
    pub fn put_i64(&mut self, v: i64) -> Result<(), CodecError> {
        self.put(&v.to_le_bytes())
    }

    /// Appends a nul-terminated string: u32 length (incl. nul) + bytes.
    pub fn put_cstr(&mut self, s: &CStr) -> Result<(), CodecError> {
        let bytes = s.to_bytes_with_nul();
        let len = u32::try_from(bytes.len()).map_err(|_| CodecError::Overflow)?;
        self.put_u32(len)?;
        self.put(bytes)
    }

    /// Appends a fixed-length buffer: u32 length + bytes.
    pub fn put_buf(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = u32::try_from(bytes.len()).map_err(|_| CodecError::Overflow)?;
        self.put_u32(len)?;
        self.put(bytes)
    }

    /// Appends a plain struct as raw bytes (no length prefix).
    pub fn put_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.put(bytes)
    }

    /// The packed body without its size prefix.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf[4..self.pos]
    }

    /// Patches the size prefix and returns the finished frame.
    #[must_use]
    pub fn finish(self) -> &'a [u8] {
        let Self { buf, pos } = self;
        let payload = (pos - 4) as u32;
        buf[..4].copy_from_slice(&payload.to_le_bytes());
        &buf[..pos]
    }
}

/// Field reader over a frame payload (prefix already stripped).
#[derive(Debug)]
pub struct Unpacker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    /// Wraps a payload slice.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Splits a raw datagram into its payload, validating the prefix.
    pub fn from_datagram(datagram: &'a [u8]) -> Result<Self, CodecError> {
        if datagram.len() < 4 {
            return Err(CodecError::Truncated);
        }
        let mut le = [0u8; 4];
        le.copy_from_slice(&datagram[..4]);
        let payload = u32::from_le_bytes(le) as usize;
        if datagram.len() - 4 != payload {
            return Err(CodecError::Truncated);
        }
        Ok(Self::new(&datagram[4..]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Reads a little-endian `u32`.
    pub fn u32(&mut self) -> Result<u32, CodecError> {
        let mut le = [0u8; 4];
        le.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(le))
    }

    /// Reads a little-endian `i32`.
    pub fn i32(&mut self) -> Result<i32, CodecError> {
        let mut le = [0u8; 4];
        le.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(le))
    }

    /// Reads a little-endian `u64`.
    pub fn u64(&mut self) -> Result<u64, CodecError> {
        let mut le = [0u8; 8];
        le.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(le))
    }

    /// Reads a little-endian `i64`.
    pub fn i64(&mut self) -> Result<i64, CodecError> {
        let mut le = [0u8; 8];
        le.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(le))
    }

    /// Reads a nul-terminated string field.
    pub fn cstr(&mut self) -> Result<&'a CStr, CodecError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        CStr::from_bytes_with_nul(bytes).map_err(|_| CodecError::BadString)
    }

    /// Reads a fixed-length buffer into `dst`.
    ///
    /// The wire length must match `dst.len()` exactly; a mismatch is a
    /// decode error, never a truncation.
    pub fn buf_exact(&mut self, dst: &mut [u8]) -> Result<(), CodecError> {
        let got = self.u32()?;
        let expected = u32::try_from(dst.len()).map_err(|_| CodecError::Overflow)?;
        if got != expected {
            return Err(CodecError::FixedLen { expected, got });
        }
        dst.copy_from_slice(self.take(got as usize)?);
        Ok(())
    }

    /// Reads a length-prefixed buffer of unknown size.
    pub fn buf(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Reads `n` raw struct bytes (no length prefix).
    pub fn raw(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    /// True when every payload byte has been consumed.
    #[must_use]
    pub const fn finished(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_round_trips() {
        let mut buf = [0u8; 256];
        let mut p = Packer::new(&mut buf);
        p.put_u32(0xdead_beef).unwrap();
        p.put_i32(-2).unwrap();
        p.put_cstr(c"/etc/hosts").unwrap();
        p.put_u64(0x0123_4567_89ab_cdef).unwrap();
        p.put_buf(&[1, 2, 3, 4, 5]).unwrap();
        let frame = p.finish();

        let mut u = Unpacker::from_datagram(frame).unwrap();
        assert_eq!(u.u32().unwrap(), 0xdead_beef);
        assert_eq!(u.i32().unwrap(), -2);
        assert_eq!(u.cstr().unwrap(), c"/etc/hosts");
        assert_eq!(u.u64().unwrap(), 0x0123_4567_89ab_cdef);
        assert_eq!(u.buf().unwrap(), &[1, 2, 3, 4, 5]);
        assert!(u.finished());
    }

    #[test]
    fn size_prefix_counts_payload_only() {
        let mut buf = [0u8; 64];
        let mut p = Packer::new(&mut buf);
        p.put_u32(7).unwrap();
        assert_eq!(p.size(), 4);
        assert_eq!(p.size_with_prefix(), 8);
        let frame = p.finish();
        assert_eq!(frame.len(), 8);
        assert_eq!(&frame[..4], &4u32.to_le_bytes());
    }

    #[test]
    fn empty_payload_is_a_legal_frame() {
        let mut buf = [0u8; 8];
        let frame = Packer::new(&mut buf).finish();
        assert_eq!(frame, &0u32.to_le_bytes());
        let u = Unpacker::from_datagram(frame).unwrap();
        assert!(u.finished());
    }

    #[test]
    fn truncated_field_is_rejected() {
        let mut buf = [0u8; 64];
        let mut p = Packer::new(&mut buf);
        p.put_u32(1).unwrap();
        let frame = p.finish();
        let mut u = Unpacker::from_datagram(frame).unwrap();
        assert_eq!(u.u32().unwrap(), 1);
        assert_eq!(u.u64(), Err(CodecError::Truncated));
    }

    #[test]
    fn datagram_with_wrong_prefix_is_rejected() {
        let mut bad = vec![9u8, 0, 0, 0];
        bad.extend_from_slice(&[0u8; 4]);
        assert_eq!(
            Unpacker::from_datagram(&bad).unwrap_err(),
            CodecError::Truncated
        );
    }

    #[test]
    fn fixed_buffer_size_mismatch_is_an_error() {
        let mut buf = [0u8; 64];
        let mut p = Packer::new(&mut buf);
        p.put_buf(&[0xab; 8]).unwrap();
        let frame = p.finish();
        let mut u = Unpacker::from_datagram(frame).unwrap();
        let mut dst = [0u8; 4];
        assert_eq!(
            u.buf_exact(&mut dst),
            Err(CodecError::FixedLen { expected: 4, got: 8 })
        );
    }

    #[test]
    fn cstr_without_nul_is_rejected() {
        let mut buf = [0u8; 64];
        let mut p = Packer::new(&mut buf);
        p.put_u32(3).unwrap();
        p.put_raw(b"abc").unwrap();
        let frame = p.finish();
        let mut u = Unpacker::from_datagram(frame).unwrap();
        assert_eq!(u.cstr(), Err(CodecError::BadString));
    }

    #[test]
    fn packer_overflow_is_reported() {
        let mut buf = [0u8; 8];
        let mut p = Packer::new(&mut buf);
        p.put_u32(1).unwrap();
        assert_eq!(p.put_u64(2), Err(CodecError::Overflow));
    }
}
