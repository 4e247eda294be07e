//! Extended-precision side information: 32-bit integer widening, float
//! reconstruction and the extra-bits ("x") bitstream.

use crate::structs::header::FLOAT_DATA;
use crate::utils::bitstream_io::BsIoVecReader;
use crate::utils::errors::MetadataError;
use anyhow::{Result, bail};

pub const FLOAT_SHIFT_ONES: u8 = 1;
pub const FLOAT_SHIFT_SAME: u8 = 2;
pub const FLOAT_SHIFT_SENT: u8 = 4;
pub const FLOAT_ZEROS_SENT: u8 = 8;
pub const FLOAT_NEG_ZEROS: u8 = 0x10;
pub const FLOAT_EXCEPTIONS: u8 = 0x20;

/// Float flags that mean the main stream alone is not lossless.
pub const FLOAT_LOSSY_MASK: u8 = FLOAT_EXCEPTIONS | FLOAT_ZEROS_SENT | FLOAT_SHIFT_SENT | FLOAT_SHIFT_SAME;

/// How stored integers are widened back to 32 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Int32Info {
    /// Low bits carried literally in the extra-bits stream.
    pub sent_bits: u8,
    pub zeros: u8,
    pub ones: u8,
    pub dups: u8,
}

impl Int32Info {
    pub fn read(data: &[u8]) -> Result<Self> {
        let &[sent_bits, zeros, ones, dups] = data else {
            bail!(MetadataError::InvalidSize {
                name: "int32 info",
                len: data.len(),
            });
        };

        // a 32-bit sample has at most 32 literal bits and 31 bits of shift
        if sent_bits > 32 || zeros > 31 || ones > 31 || dups > 31 {
            bail!(MetadataError::Int32InfoRange {
                sent_bits,
                zeros,
                ones,
                dups,
            });
        }

        Ok(Self {
            sent_bits,
            zeros,
            ones,
            dups,
        })
    }

    pub fn has_widening(&self) -> bool {
        self.zeros as u32 + self.ones as u32 + self.dups as u32 != 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FloatInfo {
    pub flags: u8,
    pub shift: u8,
    pub max_exp: u8,
    pub norm_exp: u8,
}

impl FloatInfo {
    pub fn read(data: &[u8]) -> Result<Self> {
        let &[flags, shift, max_exp, norm_exp] = data else {
            bail!(MetadataError::InvalidSize {
                name: "float info",
                len: data.len(),
            });
        };

        Ok(Self {
            flags,
            shift,
            max_exp,
            norm_exp,
        })
    }

    pub fn is_lossy(&self) -> bool {
        self.flags & FLOAT_LOSSY_MASK != 0
    }
}

/// The extra-bits stream with its checksum and width limits.
#[derive(Debug)]
pub struct ExtraBits {
    pub crc_mvx: u32,
    pub reader: BsIoVecReader,
    pub int32_max_width: u32,
    pub float_min_shifted_zeros: u32,
    pub float_max_shifted_ones: u32,
}

impl ExtraBits {
    /// Opens the stream. The newer sub-block form starts with 5-bit limits.
    pub fn open(data: &[u8], flags: u32, new_format: bool) -> Result<Self> {
        if data.len() <= 4 || data.len() & 1 != 0 {
            bail!(MetadataError::InvalidSize {
                name: "extra bitstream",
                len: data.len(),
            });
        }

        let mut extra = Self {
            crc_mvx: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            reader: BsIoVecReader::from_vec(data[4..].to_vec()),
            int32_max_width: 0,
            float_min_shifted_zeros: 0,
            float_max_shifted_ones: 0,
        };

        if new_format {
            if flags & FLOAT_DATA != 0 {
                extra.float_min_shifted_zeros = extra.reader.get_n(5);
                extra.float_max_shifted_ones = extra.reader.get_n(5);
            } else {
                extra.int32_max_width = extra.reader.get_n(5);
            }
        }

        Ok(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_size_infos() {
        assert!(Int32Info::read(&[1, 2, 3]).is_err());
        let info = Int32Info::read(&[4, 0, 2, 0]).unwrap();
        assert_eq!(info.sent_bits, 4);
        assert!(info.has_widening());

        let float = FloatInfo::read(&[FLOAT_SHIFT_ONES, 0, 150, 127]).unwrap();
        assert!(!float.is_lossy());
        assert!(FloatInfo::read(&[FLOAT_ZEROS_SENT, 0, 0, 0]).unwrap().is_lossy());
    }

    #[test]
    fn int32_info_limits() {
        assert!(Int32Info::read(&[32, 31, 0, 0]).is_ok());
        assert!(Int32Info::read(&[0, 0, 31, 31]).is_ok());

        for data in [[33u8, 0, 0, 0], [40, 0, 0, 0], [0, 32, 0, 0], [0, 0, 32, 0], [0, 0, 0, 0xff]] {
            let err = Int32Info::read(&data).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<MetadataError>(),
                Some(MetadataError::Int32InfoRange { .. })
            ));
        }
    }

    #[test]
    fn extra_bits_header() {
        assert!(ExtraBits::open(&[0; 4], 0, false).is_err());
        assert!(ExtraBits::open(&[0; 7], 0, false).is_err());

        let extra = ExtraBits::open(&[0x78, 0x56, 0x34, 0x12, 0x18, 0x00], 0, true).unwrap();
        assert_eq!(extra.crc_mvx, 0x1234_5678);
        assert_eq!(extra.int32_max_width, 0x18);
        assert_eq!(extra.reader.position(), 5);

        let extra = ExtraBits::open(&[0, 0, 0, 0, 0b0010_0011, 0], FLOAT_DATA, true).unwrap();
        assert_eq!(extra.float_min_shifted_zeros, 3);
        assert_eq!(extra.float_max_shifted_ones, 1);
    }
}
