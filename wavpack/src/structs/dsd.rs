//! DSD block header and "fast" mode probability tables.

use crate::utils::errors::{DsdError, MetadataError};
use anyhow::{Result, bail};

pub const MAX_HISTORY_BITS: u8 = 5;
/// Lookup storage budget per history bin.
pub const MAX_BYTES_PER_BIN: u32 = 1280;

/// Coding mode of a DSD block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DsdMode {
    /// Bytes stored verbatim.
    #[default]
    Raw,
    /// Context-modelled range coding.
    Fast,
    /// Filtered range coding, not decoded here.
    Unsupported(u8),
}

impl From<u8> for DsdMode {
    fn from(value: u8) -> Self {
        match value {
            0 => DsdMode::Raw,
            1 => DsdMode::Fast,
            other => DsdMode::Unsupported(other),
        }
    }
}

/// The two-byte prefix of a DSD sub-block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DsdBlockHeader {
    /// Rate multiplier over 44.1 kHz-based PCM rates, a power of two.
    pub multiplier: u32,
    pub mode: DsdMode,
}

impl DsdBlockHeader {
    pub fn read(data: &[u8]) -> Result<Self> {
        let &[shift, mode, ..] = data else {
            bail!(DsdError::Truncated);
        };

        if shift > 31 {
            bail!(MetadataError::DsdMultiplier(shift));
        }

        Ok(Self {
            multiplier: 1 << shift,
            mode: DsdMode::from(mode),
        })
    }
}

/// Per-context probability model for fast mode.
#[derive(Clone, Debug, Default)]
pub struct FastTables {
    pub history_bins: usize,
    pub probabilities: Vec<[u8; 256]>,
    /// Running sums of `probabilities`, non-decreasing within a bin.
    pub summed_probabilities: Vec<[u32; 256]>,
    /// Each symbol repeated by its probability.
    pub value_lookup: Vec<Vec<u8>>,
}

impl FastTables {
    /// Parses the tables and returns them with the number of bytes consumed.
    pub fn read(data: &[u8]) -> Result<(Self, usize)> {
        let &[history_bits, max_probability, ..] = data else {
            bail!(DsdError::Truncated);
        };

        if history_bits > MAX_HISTORY_BITS {
            bail!(DsdError::HistoryBits(history_bits));
        }

        let history_bins = 1usize << history_bits;
        let table_len = history_bins * 256;
        let mut flat = vec![0u8; table_len];
        let mut pos = 2;

        if max_probability < 0xff {
            let mut out = 0;
            while out < table_len && pos < data.len() {
                let code = data[pos];
                pos += 1;

                if code > max_probability {
                    let zeros = ((code - max_probability) as usize).min(table_len - out);
                    out += zeros;
                } else if code != 0 {
                    flat[out] = code;
                    out += 1;
                } else {
                    break;
                }
            }

            if out < table_len {
                bail!(DsdError::IncompleteTable);
            }
            if pos < data.len() {
                let terminator = data[pos];
                pos += 1;
                if terminator != 0 {
                    bail!(DsdError::IncompleteTable);
                }
            }
        } else if data.len() - pos > table_len {
            flat.copy_from_slice(&data[pos..pos + table_len]);
            pos += table_len;
        } else {
            bail!(DsdError::Truncated);
        }

        let max_total = history_bins as u32 * MAX_BYTES_PER_BIN;
        let mut tables = Self {
            history_bins,
            ..Default::default()
        };
        let mut total = 0u32;

        for bin in flat.chunks_exact(256) {
            let mut probabilities = [0u8; 256];
            probabilities.copy_from_slice(bin);

            let mut summed = [0u32; 256];
            let mut sum = 0u32;
            for (s, &p) in summed.iter_mut().zip(bin) {
                sum += p as u32;
                *s = sum;
            }

            let mut lookup = Vec::new();
            if sum != 0 {
                total += sum;
                if total > max_total {
                    bail!(DsdError::TableOverflow {
                        total,
                        max: max_total
                    });
                }

                lookup.reserve(sum as usize);
                for (symbol, &p) in bin.iter().enumerate() {
                    lookup.extend(std::iter::repeat_n(symbol as u8, p as usize));
                }
            }

            tables.probabilities.push(probabilities);
            tables.summed_probabilities.push(summed);
            tables.value_lookup.push(lookup);
        }

        Ok((tables, pos))
    }

    #[inline(always)]
    pub fn total(&self, bin: usize) -> u32 {
        self.summed_probabilities[bin][255]
    }
}
