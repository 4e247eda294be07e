//! Entropy coder state and its metadata readers.

use crate::utils::errors::MetadataError;
use crate::utils::log2::exp2s;
use anyhow::{Result, bail};

/// Adaptive statistics for one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntropyChannel {
    /// Running magnitude estimates for the three residual ranges.
    pub median: [u32; 3],
    pub slow_level: u32,
    pub error_limit: u32,
}

/// Entropy decoder state for one block.
#[derive(Clone, Debug, Default)]
pub struct WordsState {
    pub bitrate_delta: [u32; 2],
    pub bitrate_acc: [u32; 2],
    pub zeros_acc: u32,
    pub holding_one: bool,
    pub holding_zero: bool,
    pub c: [EntropyChannel; 2],
}

impl WordsState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Reads the initial medians: three 16-bit log values per channel.
    pub fn read_entropy_vars(&mut self, data: &[u8], mono_data: bool) -> Result<()> {
        let expected = if mono_data { 6 } else { 12 };
        if data.len() != expected {
            bail!(MetadataError::InvalidSize {
                name: "entropy vars",
                len: data.len(),
            });
        }

        for (channel, chunk) in self.c.iter_mut().zip(data.chunks_exact(6)) {
            for (median, word) in channel.median.iter_mut().zip(chunk.chunks_exact(2)) {
                *median = exp2s(u16::from_le_bytes([word[0], word[1]]) as i32) as u32;
            }
        }

        Ok(())
    }

    /// Reads the hybrid noise profile.
    pub fn read_hybrid_profile(&mut self, data: &[u8], flags: u32) -> Result<()> {
        let mono_data = flags & super::header::MONO_DATA != 0;
        let channels = if mono_data { 1 } else { 2 };
        let mut words = data.chunks_exact(2).map(|w| u16::from_le_bytes([w[0], w[1]]));
        let mut used = 0;

        let truncated = || MetadataError::InvalidSize {
            name: "hybrid profile",
            len: data.len(),
        };

        if flags & super::header::HYBRID_BITRATE != 0 {
            for channel in &mut self.c[..channels] {
                let word = words.next().ok_or_else(truncated)?;
                channel.slow_level = exp2s(word as i32) as u32;
                used += 2;
            }
        }

        for acc in &mut self.bitrate_acc[..channels] {
            let word = words.next().ok_or_else(truncated)?;
            *acc = (word as u32) << 16;
            used += 2;
        }

        if used < data.len() {
            for delta in &mut self.bitrate_delta[..channels] {
                let word = words.next().ok_or_else(truncated)?;
                *delta = exp2s(word as i16 as i32) as u32;
                used += 2;
            }

            if used < data.len() {
                bail!(MetadataError::HybridProfileTrailing(data.len() - used));
            }
        } else {
            self.bitrate_delta = [0; 2];
        }

        Ok(())
    }
}
