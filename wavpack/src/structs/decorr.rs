//! Decorrelation pass structures and their metadata readers.
//!
//! Terms are stored in the reverse of the order the encoder applied them,
//! so pass 0 of the chain is the last pass of the encoder.

use crate::utils::errors::MetadataError;
use crate::utils::log2::{exp2s, restore_weight};
use anyhow::{Result, bail};

/// Size of the per-channel sample history ring.
pub const MAX_TERM: usize = 8;
pub const MAX_NTERMS: usize = 16;

/// One decorrelation pass.
///
/// `term` selects the predictor: 1..=8 use the sample `term` steps back,
/// 17 and 18 extrapolate from the last two samples, and -1..=-3 predict
/// across channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecorrPass {
    pub term: i32,
    pub delta: i32,
    pub weight_a: i32,
    pub weight_b: i32,
    pub samples_a: [i32; MAX_TERM],
    pub samples_b: [i32; MAX_TERM],
}

/// Fixed-capacity chain of decorrelation passes.
#[derive(Clone, Debug, Default)]
pub struct DecorrChain {
    passes: [DecorrPass; MAX_NTERMS],
    num_terms: usize,
}

impl DecorrChain {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn len(&self) -> usize {
        self.num_terms
    }

    pub fn is_empty(&self) -> bool {
        self.num_terms == 0
    }

    pub fn passes(&self) -> &[DecorrPass] {
        &self.passes[..self.num_terms]
    }

    pub fn passes_mut(&mut self) -> &mut [DecorrPass] {
        &mut self.passes[..self.num_terms]
    }

    /// Builds a chain directly, for callers that already hold decoded passes.
    pub fn from_passes(passes: &[DecorrPass]) -> Result<Self> {
        if passes.len() > MAX_NTERMS {
            bail!(MetadataError::TooManyTerms(passes.len()));
        }

        let mut chain = Self::default();
        chain.passes[..passes.len()].copy_from_slice(passes);
        chain.num_terms = passes.len();
        Ok(chain)
    }

    /// Reads the term list, resetting every pass.
    pub fn read_terms(&mut self, data: &[u8], mono_data: bool) -> Result<()> {
        if data.len() > MAX_NTERMS {
            bail!(MetadataError::TooManyTerms(data.len()));
        }

        self.clear();
        self.num_terms = data.len();

        for (pass, &byte) in self.passes[..data.len()].iter_mut().rev().zip(data) {
            let term = (byte & 0x1f) as i32 - 5;

            if term == 0 || term < -3 || (term > MAX_TERM as i32 && term < 17) || term > 18 {
                bail!(MetadataError::InvalidTerm(term));
            }
            if mono_data && term < 0 {
                bail!(MetadataError::CrossChannelTermInMono(term));
            }

            pass.term = term;
            pass.delta = ((byte >> 5) & 7) as i32;
        }

        Ok(())
    }

    /// Reads stored weights, assigned from the last pass backwards.
    pub fn read_weights(&mut self, data: &[u8], mono_data: bool) -> Result<()> {
        let count = if mono_data { data.len() } else { data.len() / 2 };

        if count > self.num_terms {
            bail!(MetadataError::TooManyWeights {
                count,
                terms: self.num_terms
            });
        }

        for pass in self.passes_mut() {
            pass.weight_a = 0;
            pass.weight_b = 0;
        }

        let mut bytes = data.iter().map(|&b| restore_weight(b as i8));
        for pass in self.passes_mut().iter_mut().rev().take(count) {
            pass.weight_a = bytes.next().unwrap_or(0);
            if !mono_data {
                pass.weight_b = bytes.next().unwrap_or(0);
            }
        }

        Ok(())
    }

    /// Reads stored sample histories, from the last pass backwards.
    ///
    /// `skip_hybrid_prefix` drops the leading words that version 0x402
    /// hybrid streams put in front of the histories.
    pub fn read_samples(&mut self, data: &[u8], mono_data: bool, skip_hybrid_prefix: bool) -> Result<()> {
        for pass in self.passes_mut() {
            pass.samples_a = [0; MAX_TERM];
            pass.samples_b = [0; MAX_TERM];
        }

        let mut pos = 0;
        if skip_hybrid_prefix {
            pos += if mono_data { 2 } else { 4 };
        }

        let next = |pos: &mut usize| -> Result<i32> {
            let Some(word) = data.get(*pos..*pos + 2) else {
                bail!(MetadataError::DecorrSamplesMismatch);
            };
            *pos += 2;
            Ok(exp2s(i16::from_le_bytes([word[0], word[1]]) as i32))
        };

        for pass in self.passes_mut().iter_mut().rev() {
            if pos >= data.len() {
                break;
            }

            if pass.term > MAX_TERM as i32 {
                pass.samples_a[0] = next(&mut pos)?;
                pass.samples_a[1] = next(&mut pos)?;
                if !mono_data {
                    pass.samples_b[0] = next(&mut pos)?;
                    pass.samples_b[1] = next(&mut pos)?;
                }
            } else if pass.term < 0 {
                pass.samples_a[0] = next(&mut pos)?;
                pass.samples_b[0] = next(&mut pos)?;
            } else {
                for m in 0..pass.term as usize {
                    pass.samples_a[m] = next(&mut pos)?;
                    if !mono_data {
                        pass.samples_b[m] = next(&mut pos)?;
                    }
                }
            }
        }

        if pos != data.len() {
            bail!(MetadataError::DecorrSamplesMismatch);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term_byte(term: i32, delta: u8) -> u8 {
        ((term + 5) as u8 & 0x1f) | (delta << 5)
    }

    #[test]
    fn terms_are_reversed() {
        let mut chain = DecorrChain::default();
        chain
            .read_terms(&[term_byte(18, 2), term_byte(-1, 3), term_byte(2, 1)], false)
            .unwrap();

        let terms = chain.passes().iter().map(|p| (p.term, p.delta)).collect::<Vec<_>>();
        assert_eq!(terms, vec![(2, 1), (-1, 3), (18, 2)]);
    }

    #[test]
    fn invalid_terms() {
        let mut chain = DecorrChain::default();
        for term in [0, -4, 9, 16, 19] {
            assert!(chain.read_terms(&[term_byte(term, 0)], false).is_err(), "{term}");
        }
        assert!(chain.read_terms(&[term_byte(-2, 0)], true).is_err());
        assert!(chain.read_terms(&[0; 17], false).is_err());
    }

    #[test]
    fn weights_fill_from_the_end() {
        let mut chain = DecorrChain::default();
        chain
            .read_terms(&[term_byte(1, 2), term_byte(2, 2), term_byte(3, 2)], true)
            .unwrap();
        chain.read_weights(&[1, 127], true).unwrap();

        let weights = chain.passes().iter().map(|p| p.weight_a).collect::<Vec<_>>();
        assert_eq!(weights, vec![0, 1024, 8]);

        assert!(chain.read_weights(&[1, 1, 1, 1], true).is_err());
    }

    #[test]
    fn samples_use_each_pass_term() {
        let mut chain = DecorrChain::default();
        // encoder order: term 2 then term 17, so pass 0 is term 17
        chain
            .read_terms(&[term_byte(2, 0), term_byte(17, 0)], true)
            .unwrap();

        // last pass (term 2) is read first: two samples, then term 17: two samples
        let data = [0x00, 0x01, 0x00, 0x02, 0x00, 0x09, 0x00, 0xff];
        chain.read_samples(&data, true, false).unwrap();

        assert_eq!(chain.passes()[1].term, 2);
        assert_eq!(chain.passes()[1].samples_a[..2], [1, 2]);
        assert_eq!(chain.passes()[0].samples_a[..2], [256, -1]);
    }

    #[test]
    fn samples_trailing_bytes() {
        let mut chain = DecorrChain::default();
        chain.read_terms(&[term_byte(-1, 0)], false).unwrap();
        assert!(chain.read_samples(&[0; 6], false, false).is_err());
        assert!(chain.read_samples(&[0; 4], false, false).is_ok());
        assert!(chain.read_samples(&[0; 8], false, true).is_ok());
    }
}
