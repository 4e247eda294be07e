use crate::utils::errors::FormatError;
use anyhow::{Result, bail};

/// Appends `samples` to `out` as little-endian PCM of `bytes_per_sample`
/// bytes each.
///
/// One-byte PCM is written unsigned (offset by 128), as WAV expects. DSD
/// samples are already whole bytes and are copied as they are.
pub fn format_samples(samples: &[i32], bytes_per_sample: u32, dsd: bool, out: &mut Vec<u8>) -> Result<()> {
    out.reserve(samples.len() * bytes_per_sample as usize);

    match bytes_per_sample {
        1 if dsd => out.extend(samples.iter().map(|&s| s as u8)),
        1 => out.extend(samples.iter().map(|&s| s.wrapping_add(128) as u8)),
        2 => samples
            .iter()
            .for_each(|&s| out.extend_from_slice(&(s as i16).to_le_bytes())),
        3 => samples
            .iter()
            .for_each(|&s| out.extend_from_slice(&s.to_le_bytes()[..3])),
        4 => samples
            .iter()
            .for_each(|&s| out.extend_from_slice(&s.to_le_bytes())),
        other => bail!(FormatError::UnsupportedWidth(other)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_bit_pcm_is_unsigned() -> Result<()> {
        let mut out = Vec::new();
        format_samples(&[-128, -1, 0, 127], 1, false, &mut out)?;
        assert_eq!(out, [0x00, 0x7f, 0x80, 0xff]);
        Ok(())
    }

    #[test]
    fn dsd_bytes_pass_through() -> Result<()> {
        let mut out = vec![0xaa];
        format_samples(&[0x55, 0x69, 0x96], 1, true, &mut out)?;
        assert_eq!(out, [0xaa, 0x55, 0x69, 0x96]);
        Ok(())
    }

    #[test]
    fn wide_samples_are_little_endian() -> Result<()> {
        let samples = [-2, 0x12_3456, i32::MIN];

        let mut out = Vec::new();
        format_samples(&samples[..2], 2, false, &mut out)?;
        assert_eq!(out, [0xfe, 0xff, 0x56, 0x34]);

        out.clear();
        format_samples(&samples[..2], 3, false, &mut out)?;
        assert_eq!(out, [0xfe, 0xff, 0xff, 0x56, 0x34, 0x12]);

        out.clear();
        format_samples(&samples, 4, false, &mut out)?;
        assert_eq!(out.len(), 12);
        assert_eq!(out[8..], [0x00, 0x00, 0x00, 0x80]);

        let back = out
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect::<Vec<_>>();
        assert_eq!(back, samples);
        Ok(())
    }

    /// Reads one value back the way a WAV reader would.
    fn parse_sample(bytes: &[u8]) -> i32 {
        match *bytes {
            [b] => b as i32 - 128,
            [b0, b1] => i16::from_le_bytes([b0, b1]) as i32,
            [b0, b1, b2] => i32::from_le_bytes([0, b0, b1, b2]) >> 8,
            [b0, b1, b2, b3] => i32::from_le_bytes([b0, b1, b2, b3]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn every_width_reads_back() -> Result<()> {
        for bytes in 1..=4u32 {
            let bits = bytes * 8;
            let min = -1i64 << (bits - 1);
            let max = (1i64 << (bits - 1)) - 1;
            let samples = [min, min + 1, -1, 0, 1, max / 3, max - 1, max].map(|v| v as i32);

            let mut out = Vec::new();
            format_samples(&samples, bytes, false, &mut out)?;
            assert_eq!(out.len(), samples.len() * bytes as usize);

            let back = out.chunks_exact(bytes as usize).map(parse_sample).collect::<Vec<_>>();
            assert_eq!(back, samples, "{bytes} bytes per sample");
        }
        Ok(())
    }

    #[test]
    fn width_is_checked() {
        let mut out = Vec::new();
        let err = format_samples(&[0], 5, false, &mut out).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::UnsupportedWidth(5))
        ));
    }
}
