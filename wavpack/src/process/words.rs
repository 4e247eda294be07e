//! Adaptive entropy ("word") decoder.
//!
//! Each residual is coded as a unary count of ones selecting one of three
//! magnitude ranges tracked by running medians, followed by a truncated
//! binary offset within the range and a sign bit. Long runs of zeros are
//! sent as a single escape-coded count once both channels' medians settle
//! near zero.

use crate::structs::header::{HYBRID_BALANCE, HYBRID_BITRATE, HYBRID_FLAG, MONO_DATA};
use crate::structs::words::{EntropyChannel, WordsState};
use crate::utils::bitstream_io::BitstreamIoReader;
use crate::utils::log2::{count_bits, exp2s, log2};
use std::io;

const LIMIT_ONES: u32 = 16;
const SLS: u32 = 8;
const SLO: u32 = 1 << (SLS - 1);

const DIV: [u32; 3] = [128, 64, 32];

#[inline(always)]
fn get_med(c: &EntropyChannel, n: usize) -> u32 {
    (c.median[n] >> 4) + 1
}

#[inline(always)]
fn inc_med(c: &mut EntropyChannel, n: usize) {
    let div = DIV[n];
    c.median[n] = c.median[n].wrapping_add(((c.median[n].wrapping_add(div)) / div) * 5);
}

#[inline(always)]
fn dec_med(c: &mut EntropyChannel, n: usize) {
    let div = DIV[n];
    c.median[n] = c.median[n].wrapping_sub(((c.median[n].wrapping_add(div - 2)) / div) * 2);
}

#[inline(always)]
fn decay_slow_level(c: &mut EntropyChannel) {
    c.slow_level = c.slow_level.wrapping_sub((c.slow_level.wrapping_add(SLO)) >> SLS);
}

/// Reads an Elias-gamma style count. `None` means 33 leading ones, which
/// only happens on a corrupt or exhausted stream.
fn read_escape<R: io::Read + io::Seek>(bs: &mut BitstreamIoReader<R>) -> Option<u32> {
    let mut cbits = 0;
    while cbits < 33 && bs.get() {
        cbits += 1;
    }

    if cbits == 33 {
        return None;
    }

    if cbits < 2 {
        return Some(cbits);
    }

    let mut value = 0u32;
    let mut mask = 1u32;
    for _ in 1..cbits {
        if bs.get() {
            value |= mask;
        }
        mask = mask.wrapping_shl(1);
    }

    Some(value | mask)
}

/// Reads a value in `0..=max_code` using a truncated binary code.
fn read_code<R: io::Read + io::Seek>(bs: &mut BitstreamIoReader<R>, max_code: u32) -> u32 {
    let bitcount = count_bits(max_code);
    if bitcount == 0 {
        return 0;
    }

    let extras = ((1u64 << bitcount) - max_code as u64 - 1) as u32;
    let mut code = bs.get_n(bitcount - 1);

    if code >= extras {
        code = (code << 1).wrapping_sub(extras);
        if bs.get() {
            code = code.wrapping_add(1);
        }
    }

    code
}

/// Recomputes the hybrid error limits from the bitrate accumulators.
pub fn update_error_limit(w: &mut WordsState, flags: u32) {
    w.bitrate_acc[0] = w.bitrate_acc[0].wrapping_add(w.bitrate_delta[0]);
    let mut bitrate_0 = (w.bitrate_acc[0] >> 16) as i32;

    let limit_for = |slow_log: i32, bitrate: i32| -> u32 {
        if slow_log - bitrate > -0x100 {
            exp2s(slow_log - bitrate + 0x100) as u32
        } else {
            0
        }
    };

    if flags & MONO_DATA != 0 {
        w.c[0].error_limit = if flags & HYBRID_BITRATE != 0 {
            let slow_log_0 = (w.c[0].slow_level.wrapping_add(SLO) >> SLS) as i32;
            limit_for(slow_log_0, bitrate_0)
        } else {
            exp2s(bitrate_0) as u32
        };
        return;
    }

    w.bitrate_acc[1] = w.bitrate_acc[1].wrapping_add(w.bitrate_delta[1]);
    let mut bitrate_1 = (w.bitrate_acc[1] >> 16) as i32;

    if flags & HYBRID_BITRATE != 0 {
        let slow_log_0 = (w.c[0].slow_level.wrapping_add(SLO) >> SLS) as i32;
        let slow_log_1 = (w.c[1].slow_level.wrapping_add(SLO) >> SLS) as i32;

        if flags & HYBRID_BALANCE != 0 {
            let balance = (slow_log_1 - slow_log_0 + bitrate_1 + 1) >> 1;

            if balance > bitrate_0 {
                bitrate_1 = bitrate_0 * 2;
                bitrate_0 = 0;
            } else if -balance > bitrate_0 {
                bitrate_0 *= 2;
                bitrate_1 = 0;
            } else {
                bitrate_1 = bitrate_0 + balance;
                bitrate_0 -= balance;
            }
        }

        w.c[0].error_limit = limit_for(slow_log_0, bitrate_0);
        w.c[1].error_limit = limit_for(slow_log_1, bitrate_1);
    } else {
        w.c[0].error_limit = exp2s(bitrate_0) as u32;
        w.c[1].error_limit = exp2s(bitrate_1) as u32;
    }
}

/// Decodes up to `nsamples` residuals (pairs for stereo) into `buffer`.
///
/// Returns the number of complete samples decoded. Fewer than requested
/// means the bitstream hit an impossible code.
pub fn get_words<R: io::Read + io::Seek>(
    buffer: &mut [i32],
    nsamples: usize,
    flags: u32,
    w: &mut WordsState,
    bs: &mut BitstreamIoReader<R>,
) -> usize {
    let mono = flags & MONO_DATA != 0;
    let nvalues = if mono { nsamples } else { nsamples * 2 };
    let mut csamples = 0;

    while csamples < nvalues {
        let ch = if mono { 0 } else { csamples & 1 };

        if w.c[0].median[0] & !1 == 0 && !w.holding_zero && !w.holding_one && w.c[1].median[0] & !1 == 0 {
            if w.zeros_acc != 0 {
                w.zeros_acc -= 1;
                if w.zeros_acc != 0 {
                    decay_slow_level(&mut w.c[ch]);
                    buffer[csamples] = 0;
                    csamples += 1;
                    continue;
                }
            } else {
                let Some(zeros) = read_escape(bs) else {
                    break;
                };
                w.zeros_acc = zeros;

                if w.zeros_acc != 0 {
                    decay_slow_level(&mut w.c[ch]);
                    w.c[0].median = [0; 3];
                    w.c[1].median = [0; 3];
                    buffer[csamples] = 0;
                    csamples += 1;
                    continue;
                }
            }
        }

        let ones_count = if w.holding_zero {
            w.holding_zero = false;
            0
        } else {
            let mut ones_count = 0;
            while ones_count < LIMIT_ONES + 1 && bs.get() {
                ones_count += 1;
            }

            if ones_count == LIMIT_ONES + 1 {
                break;
            }

            if ones_count == LIMIT_ONES {
                let Some(extra) = read_escape(bs) else {
                    break;
                };
                ones_count = extra.wrapping_add(LIMIT_ONES);
            }

            let held = w.holding_one;
            w.holding_one = ones_count & 1 != 0;
            ones_count = if held { (ones_count >> 1) + 1 } else { ones_count >> 1 };
            w.holding_zero = !w.holding_one;

            ones_count
        };

        if flags & HYBRID_FLAG != 0 && (mono || csamples & 1 == 0) {
            update_error_limit(w, flags);
        }

        let c = &mut w.c[ch];
        let (mut low, mut high);

        if ones_count == 0 {
            low = 0;
            high = get_med(c, 0) - 1;
            dec_med(c, 0);
        } else {
            low = get_med(c, 0);
            inc_med(c, 0);

            if ones_count == 1 {
                high = low.wrapping_add(get_med(c, 1)).wrapping_sub(1);
                dec_med(c, 1);
            } else {
                low = low.wrapping_add(get_med(c, 1));
                inc_med(c, 1);

                if ones_count == 2 {
                    high = low.wrapping_add(get_med(c, 2)).wrapping_sub(1);
                    dec_med(c, 2);
                } else {
                    low = low.wrapping_add((ones_count - 2).wrapping_mul(get_med(c, 2)));
                    high = low.wrapping_add(get_med(c, 2)).wrapping_sub(1);
                    inc_med(c, 2);
                }
            }
        }

        let mut mid = (high.wrapping_add(low).wrapping_add(1)) >> 1;

        if c.error_limit == 0 {
            mid = read_code(bs, high.wrapping_sub(low)).wrapping_add(low);
        } else {
            while high.wrapping_sub(low) > c.error_limit {
                if bs.get() {
                    low = mid;
                } else {
                    high = mid.wrapping_sub(1);
                }
                mid = (high.wrapping_add(low).wrapping_add(1)) >> 1;
            }
        }

        buffer[csamples] = if bs.get() { !(mid as i32) } else { mid as i32 };

        if flags & HYBRID_BITRATE != 0 {
            c.slow_level = c
                .slow_level
                .wrapping_sub((c.slow_level.wrapping_add(SLO)) >> SLS)
                .wrapping_add(log2(mid) as u32);
        }

        csamples += 1;
    }

    if mono { csamples } else { csamples / 2 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::header::{HYBRID_BALANCE, HYBRID_BITRATE, HYBRID_FLAG, MONO_FLAG};
    use crate::utils::bitstream_io::BsIoSliceReader;

    #[test]
    fn small_mono_values() {
        // medians 2, 0, 0: value 1 is unary "1,1,0" + sign "0",
        // value 0 is the held zero + sign "0"
        let mut w = WordsState::default();
        w.c[0].median = [2, 0, 0];

        let mut bs = BsIoSliceReader::from_slice(&[0x03]);
        let mut buf = [0i32; 2];
        let n = get_words(&mut buf, 2, MONO_FLAG, &mut w, &mut bs);

        assert_eq!(n, 2);
        assert_eq!(buf, [1, 0]);
        assert!(!bs.is_error());
    }

    #[test]
    fn zero_run() {
        // escape "1,1,0" + "1" => run of 3, then the fourth value decodes
        // from "0" (ones count) and "0" (sign) with all medians at zero
        let mut w = WordsState::default();
        let mut bs = BsIoSliceReader::from_slice(&[0b0000_1011]);
        let mut buf = [7i32; 4];
        let n = get_words(&mut buf, 4, MONO_FLAG, &mut w, &mut bs);

        assert_eq!(n, 4);
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn coded_value_with_sign() {
        let mut w = WordsState::default();
        w.c[0].median = [0x40, 0, 0];
        w.holding_zero = true;

        let mut bs = BsIoSliceReader::from_slice(&[0b0000_0110]);
        let mut buf = [0i32; 1];
        // holding_zero skips the unary count; range [0, 4] takes a truncated
        // code: "0","1" => 2 (below the 3 extras), then sign "1"
        let n = get_words(&mut buf, 1, MONO_FLAG, &mut w, &mut bs);

        assert_eq!(n, 1);
        assert_eq!(buf[0], -3);
        assert!(!w.holding_zero);
    }

    #[test]
    fn corrupt_stream_stops_early() {
        let mut w = WordsState::default();
        w.c[0].median = [2, 2, 2];
        w.c[1].median = [2, 2, 2];

        let mut bs = BsIoSliceReader::from_slice(&[0xff, 0xff, 0xff]);
        let mut buf = [0i32; 8];
        let n = get_words(&mut buf, 4, 0, &mut w, &mut bs);

        assert_eq!(n, 0);
    }

    #[test]
    fn truncated_codes() {
        let mut bs = BsIoSliceReader::from_slice(&[0b0000_0111]);
        // max 4: 3 bits, extras 3, first two bits "11" => 3 >= 3 => (3<<1)-3+1 = 4
        assert_eq!(read_code(&mut bs, 4), 4);
        assert_eq!(read_code(&mut bs, 0), 0);
    }

    #[test]
    fn error_limit_from_bitrate() {
        let mut w = WordsState::default();
        w.bitrate_acc = [0x0100 << 16, 0x0200 << 16];
        update_error_limit(&mut w, MONO_FLAG);
        assert_eq!(w.c[0].error_limit, 1);

        update_error_limit(&mut w, 0);
        assert_eq!(w.c[0].error_limit, 1);
        assert_eq!(w.c[1].error_limit, 2);
    }

    #[test]
    fn hybrid_values_are_bisected() {
        let mut w = WordsState::default();
        w.c[0].median = [256, 0, 0];
        w.bitrate_acc[0] = 0x200 << 16;
        w.bitrate_delta[0] = 0x100 << 16;

        // first value: unary "0" gives [0, 16] with limit exp2s(0x300) = 4,
        // halved by "1" to [8, 16] then "0" to [8, 11], mid 10, sign "0".
        // second value: held zero, median now 252 gives [0, 15] with limit
        // exp2s(0x400) = 8, halved by "0" to [0, 7], mid 4, sign "0"
        let mut bs = BsIoSliceReader::from_slice(&[0b0100_0010]);
        let mut buf = [0i32; 2];
        let n = get_words(&mut buf, 2, MONO_FLAG | HYBRID_FLAG, &mut w, &mut bs);

        assert_eq!(n, 2);
        assert_eq!(buf, [10, 4]);
        assert_eq!(bs.position(), 6);
        assert_eq!(w.bitrate_acc[0], 0x400 << 16);
        assert_eq!(w.c[0].error_limit, 8);
        assert_eq!(w.c[0].median, [248, 0, 0]);
    }

    #[test]
    fn hybrid_bitrate_limits() {
        let mut w = WordsState::default();
        w.c[0].slow_level = 0x300 << 8;
        w.c[1].slow_level = 0x100 << 8;
        w.bitrate_acc = [0x200 << 16, 0x100 << 16];
        update_error_limit(&mut w, HYBRID_BITRATE);
        assert_eq!(w.c[0].error_limit, 2);
        assert_eq!(w.c[1].error_limit, 1);

        // bitrate far above the signal level leaves no error budget
        let mut w = WordsState::default();
        w.c[0].slow_level = 0x100 << 8;
        w.bitrate_acc[0] = 0x300 << 16;
        update_error_limit(&mut w, MONO_FLAG | HYBRID_BITRATE);
        assert_eq!(w.c[0].error_limit, 0);
    }

    #[test]
    fn hybrid_balance_splits_bitrate() {
        let flags = HYBRID_BITRATE | HYBRID_BALANCE;

        // balance (0x400 - 0x300 + 0x100 + 1) >> 1 = 0x100 moves bits from
        // channel 0 (0x300 -> 0x200) to channel 1 (0x100 -> 0x400)
        let mut w = WordsState::default();
        w.c[0].slow_level = 0x300 << 8;
        w.c[1].slow_level = 0x400 << 8;
        w.bitrate_acc = [0x300 << 16, 0x100 << 16];
        update_error_limit(&mut w, flags);
        assert_eq!(w.c[0].error_limit, 2);
        assert_eq!(w.c[1].error_limit, 1);

        // balance above channel 0's bitrate hands channel 1 all of it twice over
        w.bitrate_acc = [0x80 << 16, 0x100 << 16];
        update_error_limit(&mut w, flags);
        assert_eq!(w.c[0].error_limit, 8);
        assert_eq!(w.c[1].error_limit, 8);
    }
}
