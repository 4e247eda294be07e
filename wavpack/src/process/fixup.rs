//! Final sample reconstruction after decorrelation.
//!
//! Float blocks are scaled to 24-bit integers. Blocks carrying more than
//! 24 significant bits are widened back to 32 bits, optionally splicing in
//! literal low bits from the extra-bits stream. Lossy blocks are clipped to
//! the stored width before the final shift.

use crate::structs::extended::{ExtraBits, FloatInfo, Int32Info};
use crate::structs::header::{BYTES_STORED, FLOAT_DATA, HYBRID_FLAG, INT32_DATA, SHIFT_LSB, SHIFT_MASK};
use crate::utils::crc::crc_extended;
use crate::utils::log2::count_bits;

const FLOAT_MAX: i64 = 8_388_607;
const FLOAT_MIN: i64 = -8_388_608;

/// Scales float mantissas to 24-bit integers.
pub fn float_values(info: &FloatInfo, values: &mut [i32]) {
    let shift = (info.max_exp as i32 - info.norm_exp as i32 + info.shift as i32).clamp(-32, 32);

    for value in values {
        let mut wide = *value as i64;

        if shift > 0 {
            wide <<= shift;
        } else if shift < 0 {
            wide >>= -shift;
        }

        *value = wide.clamp(FLOAT_MIN, FLOAT_MAX) as i32;
    }
}

#[inline(always)]
fn widen(value: i32, zeros: u32, ones: u32, dups: u32) -> i32 {
    if zeros != 0 {
        value.wrapping_shl(zeros)
    } else if ones != 0 {
        value.wrapping_add(1).wrapping_shl(ones).wrapping_sub(1)
    } else if dups != 0 {
        let low = value & 1;
        value.wrapping_add(low).wrapping_shl(dups).wrapping_sub(low)
    } else {
        value
    }
}

/// Splices literal low bits from the extra-bits stream into each value.
fn splice_sent_bits(value: i32, sent_bits: u32, extra: &mut ExtraBits) -> i32 {
    let mask = ((1u64 << sent_bits) - 1) as u32;
    let max_width = extra.int32_max_width;

    if max_width == 0 {
        let data = extra.reader.get_n(sent_bits) & mask;
        return (shl(value as u32, sent_bits) | data) as i32;
    }

    let magnitude = if value < 0 { !value } else { value };
    let width = count_bits(magnitude as u32) + sent_bits;
    let bits_to_read = if width <= max_width {
        sent_bits as i32
    } else {
        sent_bits as i32 - (width - max_width) as i32
    };

    if bits_to_read > 0 {
        let bits_to_read = bits_to_read as u32;
        let data = extra.reader.get_n(bits_to_read) & mask;
        (shl(shl(value as u32, bits_to_read) | data, sent_bits - bits_to_read)) as i32
    } else {
        shl(value as u32, sent_bits) as i32
    }
}

/// Left shift where shifting out all 32 bits leaves zero.
#[inline]
fn shl(value: u32, bits: u32) -> u32 {
    value.checked_shl(bits).unwrap_or(0)
}

/// Applies float scaling, integer widening, lossy clipping and the final
/// shift to `values` (interleaved when stereo). `crc_x` accumulates over
/// widened values when an extra-bits stream is attached.
pub fn fixup_samples(
    flags: u32,
    int32: &Int32Info,
    float: &FloatInfo,
    extra: Option<&mut ExtraBits>,
    crc_x: &mut u32,
    values: &mut [i32],
) {
    let lossy = flags & HYBRID_FLAG != 0;
    let mut shift = (flags & SHIFT_MASK) >> SHIFT_LSB;

    if flags & FLOAT_DATA != 0 {
        float_values(float, values);
        return;
    }

    if flags & INT32_DATA != 0 {
        let sent_bits = (int32.sent_bits as u32).min(32);
        let mut zeros = (int32.zeros as u32).min(31);
        let mut ones = (int32.ones as u32).min(31);
        let mut dups = (int32.dups as u32).min(31);

        if let Some(extra) = extra {
            let mut crc = *crc_x;

            for value in values.iter_mut() {
                if sent_bits > 0 {
                    *value = splice_sent_bits(*value, sent_bits, extra);
                }

                *value = widen(*value, zeros, ones, dups);
                crc = crc_extended(crc, *value);
            }

            *crc_x = crc;
        } else if sent_bits == 0 && int32.has_widening() {
            // lossy values get clipped anyway, so fold low widening into the shift
            while lossy && flags & BYTES_STORED == 3 && shift < 8 {
                if zeros > 0 {
                    zeros -= 1;
                } else if ones > 0 {
                    ones -= 1;
                } else if dups > 0 {
                    dups -= 1;
                } else {
                    break;
                }

                shift += 1;
            }

            for value in values.iter_mut() {
                *value = widen(*value, zeros, ones, dups);
            }
        } else {
            shift += zeros + sent_bits + ones + dups;
        }
    }

    shift &= 0x1f;

    if lossy {
        let (min_value, max_value) = match flags & BYTES_STORED {
            0 => (-128i32 >> shift, 127i32 >> shift),
            1 => (-32_768 >> shift, 32_767 >> shift),
            2 => (-8_388_608 >> shift, 8_388_607 >> shift),
            _ => (i32::MIN >> shift, i32::MAX >> shift),
        };
        let min_shifted = min_value.wrapping_shl(shift);
        let max_shifted = max_value.wrapping_shl(shift);

        for value in values.iter_mut() {
            *value = if *value < min_value {
                min_shifted
            } else if *value > max_value {
                max_shifted
            } else {
                value.wrapping_shl(shift)
            };
        }
    } else if shift != 0 {
        for value in values.iter_mut() {
            *value = value.wrapping_shl(shift);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crc::CRC_INIT;

    fn plain(flags: u32, values: &mut [i32]) {
        let mut crc_x = CRC_INIT;
        fixup_samples(flags, &Int32Info::default(), &FloatInfo::default(), None, &mut crc_x, values);
        assert_eq!(crc_x, CRC_INIT);
    }

    #[test]
    fn lossless_shift() {
        let mut values = [1, -1, 0x100];
        plain(4 << SHIFT_LSB, &mut values);
        assert_eq!(values, [16, -16, 0x1000]);

        let mut values = [3, -3];
        plain(1, &mut values);
        assert_eq!(values, [3, -3]);
    }

    #[test]
    fn lossy_clip_16_bit() {
        let mut values = [40_000, -40_000, 1234];
        plain(HYBRID_FLAG | 1, &mut values);
        assert_eq!(values, [32_767, -32_768, 1234]);

        // shift 2: range is -8192..=8191 before shifting
        let mut values = [9000, -9000, 100];
        plain(HYBRID_FLAG | 1 | (2 << SHIFT_LSB), &mut values);
        assert_eq!(values, [8191 << 2, -8192 << 2, 400]);
    }

    #[test]
    fn float_scaling_and_clamp() {
        let info = FloatInfo {
            flags: 0,
            shift: 0,
            max_exp: 130,
            norm_exp: 127,
        };
        let mut values = [1, -3, 0x20_0000];
        let mut crc_x = CRC_INIT;
        fixup_samples(FLOAT_DATA, &Int32Info::default(), &info, None, &mut crc_x, &mut values);
        assert_eq!(values, [8, -24, 8_388_607]);

        let info = FloatInfo {
            max_exp: 0,
            norm_exp: 127,
            ..info
        };
        let mut values = [i32::MAX, -1];
        float_values(&info, &mut values);
        // shift clamps at -32
        assert_eq!(values, [0, -1]);
    }

    #[test]
    fn int32_widening_without_extra_bits() {
        let zeros = Int32Info {
            zeros: 3,
            ..Default::default()
        };
        let ones = Int32Info {
            ones: 2,
            ..Default::default()
        };
        let dups = Int32Info {
            dups: 2,
            ..Default::default()
        };
        let mut crc_x = CRC_INIT;

        let mut values = [5, -1];
        fixup_samples(INT32_DATA | 3, &zeros, &FloatInfo::default(), None, &mut crc_x, &mut values);
        assert_eq!(values, [40, -8]);

        let mut values = [5, 0];
        fixup_samples(INT32_DATA | 3, &ones, &FloatInfo::default(), None, &mut crc_x, &mut values);
        assert_eq!(values, [23, 3]);

        let mut values = [5, 4];
        fixup_samples(INT32_DATA | 3, &dups, &FloatInfo::default(), None, &mut crc_x, &mut values);
        assert_eq!(values, [23, 16]);
    }

    #[test]
    fn lossy_widening_folds_into_shift() {
        // 3 zeros become part of the final shift, so clipping still applies
        let info = Int32Info {
            zeros: 3,
            ..Default::default()
        };
        let mut crc_x = CRC_INIT;
        let mut values = [5, i32::MAX];
        fixup_samples(INT32_DATA | HYBRID_FLAG | 3, &info, &FloatInfo::default(), None, &mut crc_x, &mut values);
        assert_eq!(values, [40, (i32::MAX >> 3) << 3]);
    }

    #[test]
    fn sent_bits_from_extra_stream() {
        let info = Int32Info {
            sent_bits: 4,
            ..Default::default()
        };
        let mut extra = ExtraBits::open(&[0, 0, 0, 0, 0xa5, 0x00], INT32_DATA, false).unwrap();
        let mut crc_x = CRC_INIT;
        let mut values = [1, -1];
        fixup_samples(INT32_DATA | 3, &info, &FloatInfo::default(), Some(&mut extra), &mut crc_x, &mut values);

        assert_eq!(values, [0x15, -16 | 0xa]);
        let expected = crc_extended(crc_extended(CRC_INIT, 0x15), -16 | 0xa);
        assert_eq!(crc_x, expected);
    }

    #[test]
    fn sent_bits_limited_by_max_width() {
        let info = Int32Info {
            sent_bits: 4,
            ..Default::default()
        };
        // max width 6: value 7 has 3 bits, so only 3 of the 4 bits are read
        let mut extra = ExtraBits::open(&[0, 0, 0, 0, 0b1110_0110, 0b0000_0000], INT32_DATA, true).unwrap();
        assert_eq!(extra.int32_max_width, 6);

        let mut crc_x = CRC_INIT;
        let mut values = [7];
        fixup_samples(INT32_DATA | 3, &info, &FloatInfo::default(), Some(&mut extra), &mut crc_x, &mut values);
        assert_eq!(values, [((7 << 3) | 0b111) << 1]);
    }

    #[test]
    fn oversized_sent_bits_are_clamped() {
        let info = Int32Info {
            sent_bits: 40,
            ..Default::default()
        };
        let mut extra = ExtraBits::open(&[0, 0, 0, 0, 0x78, 0x56, 0x34, 0x12], INT32_DATA, false).unwrap();
        let mut crc_x = CRC_INIT;
        let mut values = [1];
        fixup_samples(INT32_DATA | 3, &info, &FloatInfo::default(), Some(&mut extra), &mut crc_x, &mut values);

        assert_eq!(values, [0x1234_5678]);
        assert!(!extra.reader.is_error());
    }
}
