//! Block header structures.
//!
//! Every WavPack block starts with a fixed 32-byte little-endian header:
//!
//! | Offset | Field |
//! |---|---|
//! | 0-3 | `wvpk` magic |
//! | 4-7 | chunk size, excluding the first 8 bytes |
//! | 8-9 | stream version |
//! | 10 | high byte of the 40-bit block index |
//! | 11 | high byte of the 40-bit total sample count |
//! | 12-15 | total samples, low 32 bits |
//! | 16-19 | block index, low 32 bits |
//! | 20-23 | samples in this block |
//! | 24-27 | flags |
//! | 28-31 | checksum of the decoded samples |

use log::trace;

pub const HEADER_SIZE: usize = 32;
pub const MAGIC: &[u8; 4] = b"wvpk";

pub const MIN_STREAM_VERS: u16 = 0x402;
pub const MAX_STREAM_VERS: u16 = 0x410;

pub const BYTES_STORED: u32 = 3;
pub const MONO_FLAG: u32 = 4;
pub const HYBRID_FLAG: u32 = 8;
pub const JOINT_STEREO: u32 = 0x10;
pub const CROSS_DECORR: u32 = 0x20;
pub const HYBRID_SHAPE: u32 = 0x40;
pub const FLOAT_DATA: u32 = 0x80;
pub const INT32_DATA: u32 = 0x100;
pub const HYBRID_BITRATE: u32 = 0x200;
pub const HYBRID_BALANCE: u32 = 0x400;
pub const INITIAL_BLOCK: u32 = 0x800;
pub const FINAL_BLOCK: u32 = 0x1000;

pub const SHIFT_LSB: u32 = 13;
pub const SHIFT_MASK: u32 = 0x1f << SHIFT_LSB;

pub const MAG_LSB: u32 = 18;
pub const MAG_MASK: u32 = 0x1f << MAG_LSB;

pub const SRATE_LSB: u32 = 23;
pub const SRATE_MASK: u32 = 0xf << SRATE_LSB;

pub const FALSE_STEREO: u32 = 0x4000_0000;
pub const DSD_FLAG: u32 = 0x8000_0000;

/// Either flag means only one channel of data is coded.
pub const MONO_DATA: u32 = MONO_FLAG | FALSE_STEREO;

pub const SAMPLE_RATES: [u32; 15] = [
    6000, 8000, 9600, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000,
    192000,
];

/// Parsed 32-byte block header.
///
/// `stream_position` and `average_block_size` are filled in by the scanner
/// and only serve the seek search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub ck_size: u32,
    pub version: u16,
    pub block_index_u8: u8,
    pub total_samples_u8: u8,
    pub total_samples_low: u32,
    pub block_index_low: u32,
    pub block_samples: u32,
    pub flags: u32,
    pub crc: u32,

    pub stream_position: u64,
    pub average_block_size: u32,
}

impl BlockHeader {
    /// Checks the magic and the structural bytes of a header candidate.
    pub fn is_valid(buf: &[u8]) -> bool {
        buf.len() >= HEADER_SIZE
            && &buf[..4] == MAGIC
            && buf[4] & 1 == 0
            && buf[6] < 16
            && buf[7] == 0
            && buf[9] == 4
            && buf[8] >= (MIN_STREAM_VERS & 0xff) as u8
            && buf[8] <= (MAX_STREAM_VERS & 0xff) as u8
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if !Self::is_valid(buf) {
            return None;
        }

        let le32 = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        let header = Self {
            ck_size: le32(4),
            version: u16::from_le_bytes([buf[8], buf[9]]),
            block_index_u8: buf[10],
            total_samples_u8: buf[11],
            total_samples_low: le32(12),
            block_index_low: le32(16),
            block_samples: le32(20),
            flags: le32(24),
            crc: le32(28),
            ..Default::default()
        };

        trace!(
            "Block header: index {} samples {} flags {:#010x} size {}",
            header.block_index(),
            header.block_samples,
            header.flags,
            header.ck_size
        );

        Some(header)
    }

    /// Absolute index of the first sample in this block (40 bits).
    #[inline]
    pub fn block_index(&self) -> u64 {
        self.block_index_low as u64 + ((self.block_index_u8 as u64) << 32)
    }

    /// One past the last sample index covered by this block.
    #[inline]
    pub fn block_end(&self) -> u64 {
        self.block_index() + self.block_samples as u64
    }

    /// Stream length in samples, when the encoder knew it.
    pub fn total_samples(&self) -> Option<u64> {
        if self.total_samples_low == u32::MAX {
            return None;
        }

        Some(
            self.total_samples_low as u64 + ((self.total_samples_u8 as u64) << 32)
                - self.total_samples_u8 as u64,
        )
    }

    /// Bytes following the header.
    #[inline]
    pub fn body_len(&self) -> usize {
        (self.ck_size as usize + 8).saturating_sub(HEADER_SIZE)
    }

    #[inline]
    pub fn contains(&self, sample: u64) -> bool {
        sample >= self.block_index() && sample < self.block_end()
    }

    #[inline]
    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    #[inline]
    pub fn is_mono_data(&self) -> bool {
        self.flags & MONO_DATA != 0
    }

    #[inline]
    pub fn shift(&self) -> u32 {
        (self.flags & SHIFT_MASK) >> SHIFT_LSB
    }

    #[inline]
    pub fn magnitude(&self) -> u32 {
        (self.flags & MAG_MASK) >> MAG_LSB
    }

    /// Sample rate from the header table; `None` for the custom index.
    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES
            .get(((self.flags & SRATE_MASK) >> SRATE_LSB) as usize)
            .copied()
    }

    #[inline]
    pub fn bytes_stored(&self) -> u32 {
        (self.flags & BYTES_STORED) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::test_util::BlockBuilder;

    fn header_only(block_index: u32, block_samples: u32, flags: u32, crc: u32) -> Vec<u8> {
        BlockBuilder::new(block_index, block_samples, flags, crc).build()
    }

    #[test]
    fn header_only_block() {
        let buf = header_only(0, 0, 0, 0xffff_ffff);
        let header = BlockHeader::from_bytes(&buf).unwrap();
        assert_eq!(header.ck_size, 24);
        assert_eq!(header.body_len(), 0);
        assert_eq!(header.block_samples, 0);
        assert_eq!(header.version, 0x407);
        assert_eq!(header.crc, 0xffff_ffff);
        assert_eq!(header.total_samples(), Some(0));
    }

    #[test]
    fn rejects_bad_structure() {
        let mut buf = header_only(0, 0, 0, 0);
        buf[9] = 5;
        assert!(BlockHeader::from_bytes(&buf).is_none());

        let mut buf = header_only(0, 0, 0, 0);
        buf[8] = 0x11;
        assert!(BlockHeader::from_bytes(&buf).is_none());

        let mut buf = header_only(0, 0, 0, 0);
        buf[4] = 25;
        assert!(BlockHeader::from_bytes(&buf).is_none());
        buf[4] = 24;
        buf[7] = 1;
        assert!(BlockHeader::from_bytes(&buf).is_none());

        assert!(BlockHeader::from_bytes(&buf[..HEADER_SIZE - 1]).is_none());
    }

    #[test]
    fn forty_bit_fields() {
        let mut buf = BlockBuilder::new(0x10, 100, 0, 0).total(5).build();
        buf[10] = 2;
        buf[11] = 1;
        let header = BlockHeader::from_bytes(&buf).unwrap();
        assert_eq!(header.block_index(), (2u64 << 32) + 0x10);
        assert_eq!(header.block_end(), (2u64 << 32) + 0x10 + 100);
        assert_eq!(header.total_samples(), Some((1u64 << 32) + 5 - 1));

        let buf = BlockBuilder::new(0x10, 100, 0, 0).total(u32::MAX).build();
        let header = BlockHeader::from_bytes(&buf).unwrap();
        assert_eq!(header.total_samples(), None);
    }

    #[test]
    fn flag_fields() {
        let flags = 1 | MONO_FLAG | (2 << SHIFT_LSB) | (15 << MAG_LSB) | (9 << SRATE_LSB);
        let header = BlockHeader::from_bytes(&header_only(0, 0, flags, 0)).unwrap();
        assert_eq!(header.bytes_stored(), 2);
        assert_eq!(header.shift(), 2);
        assert_eq!(header.magnitude(), 15);
        assert_eq!(header.sample_rate(), Some(44100));
        assert!(header.is_mono_data());

        let header = BlockHeader::from_bytes(&header_only(0, 0, SRATE_MASK, 0)).unwrap();
        assert_eq!(header.sample_rate(), None);
    }
}
