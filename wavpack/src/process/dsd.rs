//! DSD (1-bit) block decoding.
//!
//! Output samples are whole bytes of eight 1-bit samples each. Raw blocks
//! copy the payload; fast blocks run a byte-wise range decoder whose
//! probabilities are selected by the previous byte of each channel.

use crate::structs::dsd::{DsdBlockHeader, DsdMode, FastTables};
use crate::utils::crc::crc_dsd;
use crate::utils::errors::DsdError;
use anyhow::{Result, bail};

/// Byte of alternating ones and zeros, DSD silence.
pub const DSD_SILENCE: i32 = 0x55;

/// Range decoder registers and payload cursor of one DSD block.
#[derive(Clone, Debug, Default)]
pub struct DsdState {
    pub mode: DsdMode,
    pub multiplier: u32,
    data: Vec<u8>,
    pos: usize,
    tables: FastTables,
    value: u32,
    low: u32,
    high: u32,
    p0: usize,
    p1: usize,
}

#[inline(always)]
fn byte_ready(low: u32, high: u32) -> bool {
    (low ^ high) & 0xff00_0000 == 0
}

impl DsdState {
    /// Prepares a block from its DSD sub-block payload.
    pub fn init(data: &[u8], block_samples: u32, mono_data: bool) -> Result<Self> {
        let header = DsdBlockHeader::read(data)?;
        let payload = &data[2..];

        let mut state = Self {
            mode: header.mode,
            multiplier: header.multiplier,
            ..Default::default()
        };

        match header.mode {
            DsdMode::Raw => {
                let expected = block_samples as usize * if mono_data { 1 } else { 2 };
                if payload.len() != expected {
                    bail!(DsdError::RawSize {
                        expected,
                        actual: payload.len()
                    });
                }

                state.data = payload.to_vec();
            }
            DsdMode::Fast => {
                let (tables, consumed) = FastTables::read(payload)?;
                let rest = &payload[consumed..];

                let &[b0, b1, b2, b3, ..] = rest else {
                    bail!(DsdError::Truncated);
                };

                state.tables = tables;
                state.value = u32::from_be_bytes([b0, b1, b2, b3]);
                state.high = u32::MAX;
                state.data = rest.to_vec();
                state.pos = 4;
            }
            DsdMode::Unsupported(mode) => bail!(DsdError::UnsupportedMode(mode)),
        }

        Ok(state)
    }

    /// Decodes `count` samples (pairs unless `mono_data`) into `buffer`,
    /// accumulating the block checksum.
    pub fn decode(&mut self, buffer: &mut [i32], count: usize, mono_data: bool, crc: &mut u32) -> Result<(), DsdError> {
        let total = if mono_data { count } else { count * 2 };

        match self.mode {
            DsdMode::Raw => {
                let available = (self.data.len() - self.pos).min(total);
                for (out, &byte) in buffer[..available].iter_mut().zip(&self.data[self.pos..]) {
                    *crc = crc_dsd(*crc, byte);
                    *out = byte as i32;
                }
                self.pos += available;
                Ok(())
            }
            DsdMode::Fast => self.decode_fast(&mut buffer[..total], mono_data, crc),
            DsdMode::Unsupported(mode) => Err(DsdError::UnsupportedMode(mode)),
        }
    }

    fn reload_value(&mut self) {
        if self.data.len() - self.pos >= 4 {
            for _ in 0..4 {
                self.value = (self.value << 8) | self.data[self.pos] as u32;
                self.pos += 1;
            }
        }
    }

    fn decode_fast(&mut self, output: &mut [i32], mono_data: bool, crc: &mut u32) -> Result<(), DsdError> {
        let bin_mask = self.tables.history_bins - 1;

        for out in output.iter_mut() {
            let total = self.tables.total(self.p0);
            if total == 0 {
                return Err(DsdError::ZeroProbability(self.p0));
            }

            let mut mult = (self.high - self.low) / total;

            if mult == 0 {
                self.reload_value();
                self.low = 0;
                self.high = u32::MAX;
                mult = self.high / total;

                if mult == 0 {
                    return Err(DsdError::ZeroMultiplier);
                }
            }

            let index = self.value.wrapping_sub(self.low) / mult;
            if index >= total {
                return Err(DsdError::IndexOutOfRange { index, total });
            }

            let code = self.tables.value_lookup[self.p0][index as usize];
            if code != 0 {
                let below = self.tables.summed_probabilities[self.p0][code as usize - 1];
                self.low = self.low.wrapping_add(below.wrapping_mul(mult));
            }

            let width = self.tables.probabilities[self.p0][code as usize] as u32;
            self.high = self.low.wrapping_add(width.wrapping_mul(mult)).wrapping_sub(1);

            *out = code as i32;
            *crc = crc_dsd(*crc, code);

            if mono_data {
                self.p0 = code as usize & bin_mask;
            } else {
                self.p0 = self.p1;
                self.p1 = code as usize & bin_mask;
            }

            while byte_ready(self.high, self.low) && self.pos < self.data.len() {
                self.value = (self.value << 8) | self.data[self.pos] as u32;
                self.pos += 1;
                self.high = (self.high << 8) | 0xff;
                self.low <<= 8;
            }
        }

        Ok(())
    }
}
