//! Running checksums carried in block headers.
//!
//! These are not polynomial CRCs. WavPack accumulates a multiplicative hash
//! over the final sample values, with wrapping 32-bit arithmetic.

/// Initial value of every block checksum.
pub const CRC_INIT: u32 = 0xFFFF_FFFF;

/// Accumulates one mono PCM sample.
#[inline(always)]
pub const fn crc_mono(crc: u32, sample: i32) -> u32 {
    crc.wrapping_mul(3).wrapping_add(sample as u32)
}

/// Accumulates one interleaved stereo pair.
#[inline(always)]
pub const fn crc_stereo(crc: u32, left: i32, right: i32) -> u32 {
    crc_mono(crc_mono(crc, left), right)
}

/// Accumulates one widened sample into the extra-bits checksum.
#[inline(always)]
pub const fn crc_extended(crc: u32, sample: i32) -> u32 {
    let value = sample as u32;
    crc.wrapping_mul(9)
        .wrapping_add((value & 0xffff).wrapping_mul(3))
        .wrapping_add((value >> 16) & 0xffff)
}

/// Accumulates one DSD byte.
#[inline(always)]
pub const fn crc_dsd(crc: u32, byte: u8) -> u32 {
    crc.wrapping_add(crc << 1).wrapping_add(byte as u32)
}

/// Checksum over the leading bytes of a block, as 16-bit little-endian words.
///
/// A trailing odd byte is not covered.
pub fn block_checksum(data: &[u8]) -> u32 {
    data.chunks_exact(2).fold(CRC_INIT, |csum, word| {
        csum.wrapping_mul(3)
            .wrapping_add(u16::from_le_bytes([word[0], word[1]]) as u32)
    })
}
