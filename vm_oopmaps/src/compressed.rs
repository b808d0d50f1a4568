//! The runtime's compressed integer stream.
//!
//! An `int` is written as one to five bytes. A byte below `L` ends the value;
//! bytes at or above `L` carry `lg(H)` more bits each, the final (fifth) byte
//! is taken whole. Signed values are zig-zag folded first.

use crate::error::{Corruption, Result};
use crate::memory::{Address, ExternalMemory, Target};

const LG_H: u32 = 6;
const H: u32 = 1 << LG_H;
const L: u32 = (1 << 8) - H;
const MAX_I: usize = 4;

pub struct CompressedReadStream<'a, M: ?Sized> {
    target: Target<'a, M>,
    buffer: Address,
    limit: Address,
    position: u64,
}

impl<'a, M: ExternalMemory + ?Sized> CompressedReadStream<'a, M> {
    /// A stream over the bytes from `buffer` up to (not including) `limit`.
    pub fn new(target: Target<'a, M>, buffer: Address, limit: Address) -> Self {
        Self {
            target,
            buffer,
            limit,
            position: 0,
        }
    }

    pub fn target(&self) -> Target<'a, M> {
        self.target
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let addr = self.buffer + self.position;
        if addr >= self.limit {
            return Err(Corruption::ReadPastEnd {
                addr,
                limit: self.limit,
            }
            .into());
        }
        let b = self.target.read_byte(addr)?;
        self.position += 1;
        Ok(b)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_byte()? != 0)
    }

    pub fn read_int(&mut self) -> Result<i32> {
        let b0 = u32::from(self.read_byte()?);
        if b0 < L {
            return Ok(b0 as i32);
        }

        let mut sum = b0;
        let mut shift = LG_H;
        let mut i = 1;
        loop {
            let b_i = u32::from(self.read_byte()?);
            sum = sum.wrapping_add(b_i << shift);
            if b_i < L || i == MAX_I {
                return Ok(sum as i32);
            }
            shift += LG_H;
            i += 1;
        }
    }

    pub fn read_signed_int(&mut self) -> Result<i32> {
        Ok(decode_sign(self.read_int()? as u32))
    }
}

fn decode_sign(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

fn encode_sign(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Writer half of the encoding, producing bytes the read stream accepts.
#[derive(Debug, Clone, Default)]
pub struct CompressedWriteStream {
    buffer: Vec<u8>,
}

impl CompressedWriteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_byte(&mut self, b: u8) {
        self.buffer.push(b);
    }

    pub fn write_bool(&mut self, b: bool) {
        self.write_byte(b as u8);
    }

    pub fn write_int(&mut self, value: i32) {
        let mut sum = value as u32;
        let mut i = 0;
        loop {
            if sum < L || i == MAX_I {
                // five bytes always suffice for 32 bits, so this fits a byte
                self.buffer.push(sum as u8);
                return;
            }
            sum -= L;
            self.buffer.push((L + sum % H) as u8);
            sum >>= LG_H;
            i += 1;
        }
    }

    pub fn write_signed_int(&mut self, value: i32) {
        self.write_int(encode_sign(value) as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::layout::{Endian, Layout};
    use crate::memory::RegionMemory;

    const BASE: Address = Address(0x4000);

    fn read_all(bytes: &[u8], f: impl FnOnce(&mut CompressedReadStream<RegionMemory>)) {
        let layout = Layout::new(8, Endian::Little).unwrap();
        let memory = RegionMemory::new().with_region(BASE, bytes.to_vec());
        let target = Target::new(&memory, &layout);
        let mut stream = CompressedReadStream::new(target, BASE, BASE + bytes.len());
        f(&mut stream);
    }

    #[test]
    fn known_encodings() {
        let mut w = CompressedWriteStream::new();
        w.write_int(0);
        w.write_int(191);
        w.write_int(192);
        w.write_int(300);
        assert_eq!(w.as_bytes(), &[0, 191, 192, 0, 236, 1]);
    }

    #[test]
    fn multibyte_values() {
        let values = [0, 1, 191, 192, 255, 256, 4095, 12_345, 1 << 20, i32::MAX, -1, i32::MIN];
        let mut w = CompressedWriteStream::new();
        for v in values {
            w.write_int(v);
        }
        for v in values {
            w.write_signed_int(v);
        }

        read_all(w.as_bytes(), |stream| {
            for v in values {
                assert_eq!(stream.read_int().unwrap(), v);
            }
            for v in values {
                assert_eq!(stream.read_signed_int().unwrap(), v);
            }
            assert_eq!(stream.position(), w.position() as u64);
        });
    }

    #[test]
    fn negative_takes_five_bytes() {
        let mut w = CompressedWriteStream::new();
        w.write_int(-1);
        assert_eq!(w.position(), 5);

        let mut w = CompressedWriteStream::new();
        w.write_signed_int(-1);
        assert_eq!(w.as_bytes(), &[1]);
    }

    #[test]
    fn bytes_and_bools() {
        read_all(&[7, 0, 1], |stream| {
            assert_eq!(stream.read_byte().unwrap(), 7);
            assert!(!stream.read_bool().unwrap());
            assert!(stream.read_bool().unwrap());
        });
    }

    #[test]
    fn truncated_value_is_corrupt() {
        // a continuation byte with nothing after it
        read_all(&[200], |stream| {
            assert!(matches!(
                stream.read_int(),
                Err(Error::CorruptMapData(Corruption::ReadPastEnd { .. }))
            ));
            assert_eq!(stream.position(), 1);
        });
    }
}
