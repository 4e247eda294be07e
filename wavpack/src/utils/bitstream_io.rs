//! Bit-level reader for block bitstreams.
//!
//! WavPack packs residuals least-significant bit first. Reads past the end of
//! the data do not fail: they yield one bits and latch an error flag, which
//! the decoder checks once the block is complete.

use std::io;

use bitstream_io::{BitRead, BitReader, LittleEndian};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, LittleEndian>,
    len: u64,
    pos: u64,
    error: bool,
}

pub type BsIoVecReader = BitstreamIoReader<io::Cursor<Vec<u8>>>;
pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
            pos: 0,
            error: false,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> bool {
        if self.pos >= self.len {
            self.error = true;
            return true;
        }

        self.pos += 1;
        match self.bs.read_bit() {
            Ok(bit) => bit,
            Err(_) => {
                self.error = true;
                true
            }
        }
    }

    /// Reads `n` bits (0..=32), first bit in the least significant position.
    /// Wider requests latch the error flag and return all ones without
    /// consuming anything.
    #[inline(always)]
    pub fn get_n(&mut self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }

        if n > 32 {
            self.error = true;
            return u32::MAX;
        }

        let avail = self.available().min(n as u64) as u32;
        let mut value = 0u64;

        if avail > 0 {
            self.pos += avail as u64;
            match self.bs.read_unsigned_var::<u32>(avail) {
                Ok(v) => value = v as u64,
                Err(_) => {
                    self.error = true;
                    return u32::MAX >> (32 - n);
                }
            }
        }

        if avail < n {
            self.error = true;
            value |= ((1u64 << (n - avail)) - 1) << avail;
        }

        value as u32
    }

    #[inline(always)]
    pub fn available(&self) -> u64 {
        self.len - self.pos
    }

    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// True once a read ran past the end of the data.
    #[inline(always)]
    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn len_bits(&self) -> u64 {
        self.len
    }
}

impl BsIoVecReader {
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let len = buf.len() as u64;
        Self::new(io::Cursor::new(buf), len)
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        Self::new(io::Cursor::new(buf), len)
    }
}

impl Default for BsIoVecReader {
    fn default() -> Self {
        Self::from_vec(Vec::new())
    }
}
