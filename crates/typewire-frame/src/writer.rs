use std::io::ErrorKind;

use bytes::{BufMut, BytesMut};
use typewire_transport::Device;

use crate::codec::{encode_header, FrameConfig};
use crate::endian::Endianness;
use crate::error::{FrameError, Result};
use crate::message::{Message, TypeId};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Checksumming primitive writer handed to [`Message::write`].
///
/// Every byte written is added into a running 8-bit accumulator which the
/// codec appends as the payload checksum.
pub struct WireWriter<'a> {
    buf: &'a mut BytesMut,
    checksum: u8,
    endianness: Endianness,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut BytesMut, endianness: Endianness) -> Self {
        Self {
            buf,
            checksum: 0,
            endianness,
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.checksum = self.checksum.wrapping_add(b);
        }
        self.buf.put_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.write_u8(v as u8);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.put(&self.endianness.fix16(v).to_ne_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.put(&self.endianness.fix32(v).to_ne_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.put(&self.endianness.fix64(v).to_ne_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_u64(v as u64);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    /// Write a `u32` followed by its own checksum byte.
    ///
    /// The sub-field is summed in isolation and then folded back into the
    /// payload accumulator, so a reader can validate it before trusting it.
    pub fn write_checksummed_u32(&mut self, v: u32) {
        let outer = std::mem::replace(&mut self.checksum, 0);
        self.write_u32(v);
        let field = self.checksum;
        self.write_u8(field);
        self.checksum = self.checksum.wrapping_add(outer);
    }

    /// Write a length-prefixed byte string.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| FrameError::LengthTooLarge {
            len: bytes.len(),
            max: u32::MAX as usize,
        })?;
        self.write_checksummed_u32(len);
        self.put(bytes);
        Ok(())
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }

    /// Running payload checksum.
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }
}

/// Encodes frames and writes each one to a device in a single pass.
pub struct FrameWriter {
    buf: BytesMut,
    config: FrameConfig,
}

impl FrameWriter {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode one frame into the internal buffer and return its bytes.
    pub fn encode(&mut self, id: TypeId, message: &dyn Message) -> Result<&[u8]> {
        self.buf.clear();
        encode_frame(id, message, self.config.endianness, &mut self.buf)?;
        Ok(&self.buf)
    }

    /// Encode and write one frame (blocking).
    pub fn write_frame(
        &mut self,
        device: &dyn Device,
        id: TypeId,
        message: &dyn Message,
    ) -> Result<usize> {
        self.encode(id, message)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match device.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        loop {
            match device.flush() {
                Ok(()) => return Ok(offset),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

/// Append one complete frame for `message` to `dst`.
///
/// ```text
/// [0xAB][type id][header checksum][payload ...][payload checksum]
/// ```
pub fn encode_frame(
    id: TypeId,
    message: &dyn Message,
    endianness: Endianness,
    dst: &mut BytesMut,
) -> Result<()> {
    encode_header(id, dst);
    let mut wire = WireWriter::new(dst, endianness);
    message.write(&mut wire)?;
    let checksum = wire.checksum();
    dst.put_u8(checksum);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{header_checksum, SYNC_BYTE};
    use crate::testing::Text;
    use typewire_transport::MemoryDevice;

    #[test]
    fn checksum_accumulates_every_byte() {
        let mut buf = BytesMut::new();
        let mut w = WireWriter::new(&mut buf, Endianness::Native);
        w.write_u8(200);
        w.write_u8(100);
        w.write_u16(0x0101);
        assert_eq!(w.checksum(), 200u8.wrapping_add(100).wrapping_add(2));
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn checksummed_field_folds_into_outer_sum() {
        let mut buf = BytesMut::new();
        let mut w = WireWriter::new(&mut buf, Endianness::Little);
        w.write_u8(7);
        w.write_checksummed_u32(0x0000_0102);

        // 7, then 02 01 00 00, then field checksum 03
        assert_eq!(&buf[..], &[7, 2, 1, 0, 0, 3]);
        let mut w = WireWriter::new(&mut buf, Endianness::Little);
        w.write_u8(7);
        w.write_checksummed_u32(0x0000_0102);
        assert_eq!(w.checksum(), 7 + 3 + 3);
    }

    #[test]
    fn string_layout_is_length_check_then_bytes() {
        let mut buf = BytesMut::new();
        let mut w = WireWriter::new(&mut buf, Endianness::Little);
        w.write_str("ab").unwrap();
        assert_eq!(&buf[..], &[2, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn big_endian_policy_orders_bytes() {
        let mut buf = BytesMut::new();
        let mut w = WireWriter::new(&mut buf, Endianness::Big);
        w.write_u32(0x0102_0304);
        w.write_i16(-2);
        assert_eq!(&buf[..], &[1, 2, 3, 4, 0xFF, 0xFE]);
    }

    #[test]
    fn frame_has_valid_preamble_and_trailer() {
        let mut buf = BytesMut::new();
        let msg = Text {
            text: "hi".to_string(),
        };
        encode_frame(9, &msg, Endianness::Little, &mut buf).unwrap();

        assert_eq!(buf[0], SYNC_BYTE);
        assert_eq!(buf[1], 9);
        assert_eq!(buf[2], header_checksum(9));
        assert_eq!(buf[0].wrapping_add(buf[1]).wrapping_add(buf[2]), 255);

        let payload = &buf[3..buf.len() - 1];
        let sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(buf[buf.len() - 1], sum);
    }

    #[test]
    fn write_frame_sends_whole_frame() {
        let (a, b) = MemoryDevice::pair();
        let mut writer = FrameWriter::new(FrameConfig::default());
        let msg = Text {
            text: "ping".to_string(),
        };

        let n = writer.write_frame(&a, 4, &msg).unwrap();
        let expected = writer.encode(4, &msg).unwrap().to_vec();
        assert_eq!(n, expected.len());
        assert_eq!(b.take_pending(), expected);
    }

    #[test]
    fn write_to_closed_device_fails() {
        let (a, _b) = MemoryDevice::pair();
        a.close();
        let mut writer = FrameWriter::new(FrameConfig::default());
        let err = writer
            .write_frame(&a, 4, &Text::default())
            .unwrap_err();
        assert!(!err.is_recoverable());
    }
}
