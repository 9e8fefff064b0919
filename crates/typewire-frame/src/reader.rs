use std::io::ErrorKind;

use bytes::{Buf, BytesMut};
use typewire_transport::Device;

use crate::codec::FrameConfig;
use crate::endian::Endianness;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 256;

/// Buffered byte source over a [`Device`].
///
/// Frame scanning consumes one byte at a time; the reader refills from the
/// device in chunks so that costs one device read per chunk, not per byte.
pub struct FrameReader {
    buf: BytesMut,
    config: FrameConfig,
}

impl FrameReader {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Next byte from the device (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at end of stream.
    pub fn next_byte(&mut self, device: &dyn Device) -> Result<u8> {
        if !self.buf.has_remaining() {
            self.fill(device)?;
        }
        Ok(self.buf.get_u8())
    }

    /// Fill `out` completely from the device.
    pub fn read_exact(&mut self, device: &dyn Device, out: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < out.len() {
            if !self.buf.has_remaining() {
                self.fill(device)?;
            }
            let n = (out.len() - filled).min(self.buf.len());
            self.buf.copy_to_slice(&mut out[filled..filled + n]);
            filled += n;
        }
        Ok(())
    }

    fn fill(&mut self, device: &dyn Device) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match device.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Drop any buffered bytes (used when a new device is bound).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes read from the device but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

/// Checksumming primitive reader handed to [`Message::read`](crate::Message::read).
///
/// Mirrors [`WireWriter`](crate::WireWriter): every byte consumed is added
/// into the running payload accumulator.
pub struct WireReader<'a> {
    reader: &'a mut FrameReader,
    device: &'a dyn Device,
    checksum: u8,
}

impl<'a> WireReader<'a> {
    pub fn new(reader: &'a mut FrameReader, device: &'a dyn Device) -> Self {
        Self {
            reader,
            device,
            checksum: 0,
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.reader.read_exact(self.device, &mut out)?;
        for &b in &out {
            self.checksum = self.checksum.wrapping_add(b);
        }
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let raw = u16::from_ne_bytes(self.take()?);
        Ok(self.endianness().fix16(raw))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let raw = u32::from_ne_bytes(self.take()?);
        Ok(self.endianness().fix32(raw))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let raw = u64::from_ne_bytes(self.take()?);
        Ok(self.endianness().fix64(raw))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a `u32` written with
    /// [`WireWriter::write_checksummed_u32`](crate::WireWriter::write_checksummed_u32)
    /// and verify its sub-field checksum.
    pub fn read_checksummed_u32(&mut self) -> Result<u32> {
        let outer = std::mem::replace(&mut self.checksum, 0);
        let value = self.read_u32()?;
        let computed = self.checksum;
        let expected = self.read_u8()?;
        self.checksum = self.checksum.wrapping_add(outer);
        if expected != computed {
            return Err(FrameError::ChecksumMismatch { expected, computed });
        }
        Ok(value)
    }

    /// Read a length-prefixed byte string.
    ///
    /// The length is validated against its checksum and the configured
    /// maximum before anything is allocated.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_checksummed_u32()? as usize;
        let max = self.reader.config.max_string_len;
        if len > max {
            return Err(FrameError::LengthTooLarge { len, max });
        }
        let mut out = vec![0u8; len];
        self.reader.read_exact(self.device, &mut out)?;
        for &b in &out {
            self.checksum = self.checksum.wrapping_add(b);
        }
        Ok(out)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        String::from_utf8(self.read_bytes()?).map_err(|_| FrameError::InvalidUtf8)
    }

    /// Running payload checksum.
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn endianness(&self) -> Endianness {
        self.reader.config.endianness
    }

    /// Upper bound for lengths decoded from the wire.
    pub fn max_len(&self) -> usize {
        self.reader.config.max_string_len
    }
}
