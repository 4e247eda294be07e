use crate::process::decode::{Decoder, StreamState};
use crate::structs::header::{BlockHeader, INITIAL_BLOCK};
use crate::utils::errors::SeekError;
use anyhow::{Result, bail};
use log::{debug, trace};
use std::io::{Read, Seek, SeekFrom};

/// Header reads allowed while searching.
const MAX_STEPS: u32 = 25;
/// Block distance below which walking header to header beats jumping.
const WALK_BLOCKS: i64 = 5;
/// Samples decoded per discard call after a seek.
const DISCARD_CHUNK: usize = 4096;

impl<R: Read + Seek> Decoder<R> {
    /// Repositions decoding so the next [`unpack`](Decoder::unpack) starts at
    /// `target`.
    ///
    /// The search jumps by the running average block size, reading one header
    /// per step, and walks header to header once the target is a few blocks
    /// away. The block found is then decoded from its start and the samples
    /// ahead of `target` are dropped.
    pub fn seek_sample(&mut self, target: u64) -> Result<()> {
        let total = self.total_samples.ok_or(SeekError::UnknownLength)?;
        if target >= total {
            bail!(SeekError::OutOfRange { target, total });
        }

        let reader = self.scanner.get_mut();
        let here = reader.stream_position()?;
        let base = here.saturating_sub(self.scanner.position());
        let len = self.scanner.get_mut().seek(SeekFrom::End(0))?;
        self.reposition(base, here - base)?;

        let mut header = self.stream.header;
        let mut found = None;
        let mut closest = None;
        let mut steps = MAX_STEPS;

        while steps > 0 {
            steps -= 1;

            let seek_pos = if header.block_samples == 0 {
                None
            } else {
                search_position(&header, target, len - base)
            };

            if let Some(pos) = seek_pos {
                self.reposition(base, pos)?;
            }

            match self.scanner.next_header() {
                Ok(next) => header = next,
                Err(err) => {
                    trace!("Seek step failed: {err}");
                    continue;
                }
            }

            if header.has(INITIAL_BLOCK) && header.contains(target) {
                debug!(
                    "Found sample {target} in block at {} after {} steps",
                    header.stream_position,
                    MAX_STEPS - steps
                );
                found = Some(header);
                break;
            }

            if is_before(&header, target)
                && closest.is_none_or(|c: BlockHeader| c.block_index() < header.block_index())
            {
                closest = Some(header);
            }

            if seek_pos.is_none() {
                self.reposition(base, header.stream_position + header.ck_size as u64 + 8)?;
                steps += 1;
            }
        }

        // out of steps: decoding on from the closest block before the target
        // still lands on it
        let Some(header) = found.or(closest) else {
            bail!(SeekError::NotFound(target));
        };

        self.reopen_at(base, &header)?;
        self.discard_to(target)
    }

    fn reposition(&mut self, base: u64, pos: u64) -> Result<()> {
        self.scanner.get_mut().seek(SeekFrom::Start(base + pos))?;
        self.scanner.set_position(pos);
        Ok(())
    }

    fn reopen_at(&mut self, base: u64, header: &BlockHeader) -> Result<()> {
        self.reposition(base, header.stream_position)?;
        self.stream = StreamState::default();
        self.deferred = None;
        self.pending_error = None;
        self.find_audio_block()
    }

    fn discard_to(&mut self, target: u64) -> Result<()> {
        let stride = self.output_channels() as usize;
        let mut scratch = vec![0i32; DISCARD_CHUNK * stride];

        while self.stream.sample_index < target {
            let wanted = (target - self.stream.sample_index).min(DISCARD_CHUNK as u64) as usize;
            if self.unpack(&mut scratch, wanted)? == 0 {
                bail!(SeekError::NotFound(target));
            }
        }

        Ok(())
    }
}

/// Where to read the next header from, or `None` to read on from the
/// current position.
fn search_position(header: &BlockHeader, target: u64, len: u64) -> Option<u64> {
    let block_samples = header.block_samples as i64;

    if target < header.block_samples as u64 {
        return Some(0);
    }

    if header.contains(target) {
        if header.has(INITIAL_BLOCK) {
            return Some(header.stream_position);
        }
        // a later channel block of the target frame; step back to its start
        return Some(header.stream_position.saturating_sub(header.average_block_size as u64));
    }

    let mut distance = target as i64 - header.block_index() as i64;
    distance += if distance > 0 {
        1 - block_samples
    } else {
        1 - 2 * block_samples
    };
    let blocks = distance / block_samples;

    if (0..=WALK_BLOCKS).contains(&blocks) {
        return None;
    }

    let pos = header.stream_position as i64 + blocks * header.average_block_size as i64;
    if pos >= len as i64 {
        return None;
    }

    Some(pos.max(0) as u64)
}

fn is_before(header: &BlockHeader, target: u64) -> bool {
    header.block_samples > 0 && header.has(INITIAL_BLOCK) && header.block_index() <= target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::test_util::BlockBuilder;
    use crate::structs::header::{FINAL_BLOCK, MAG_LSB, MONO_FLAG, SRATE_LSB};
    use crate::structs::metadata::{ID_ENTROPY_VARS, ID_WV_BITSTREAM};
    use std::io::Cursor;

    const FLAGS: u32 = 1 | MONO_FLAG | INITIAL_BLOCK | FINAL_BLOCK | (15 << MAG_LSB) | (9 << SRATE_LSB);

    /// `blocks` blocks of two samples each, every block decoding to [1, 0].
    fn stream(blocks: u32, total: u32) -> Vec<u8> {
        (0..blocks)
            .flat_map(|i| {
                BlockBuilder::new(i * 2, 2, FLAGS, 0xffff_fffa)
                    .total(total)
                    .sub(ID_ENTROPY_VARS, &[0x00, 0x02, 0, 0, 0, 0])
                    .sub(ID_WV_BITSTREAM, &[0x03])
                    .build()
            })
            .collect()
    }

    fn drain(decoder: &mut Decoder<Cursor<Vec<u8>>>) -> Result<Vec<i32>> {
        let mut out = Vec::new();
        let mut buf = [0i32; 5];
        loop {
            let n = decoder.unpack(&mut buf, 5)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn seek_within_nearby_block() -> Result<()> {
        let mut decoder = Decoder::open(Cursor::new(stream(3, 6)))?;

        decoder.seek_sample(3)?;
        assert_eq!(decoder.sample_index(), 3);
        assert_eq!(drain(&mut decoder)?, [0, 1, 0]);
        assert_eq!(decoder.crc_errors(), 0);
        Ok(())
    }

    #[test]
    fn seek_back_to_start() -> Result<()> {
        let mut decoder = Decoder::open(Cursor::new(stream(3, 6)))?;
        drain(&mut decoder)?;

        decoder.seek_sample(0)?;
        assert_eq!(drain(&mut decoder)?, [1, 0, 1, 0, 1, 0]);
        Ok(())
    }

    #[test]
    fn seek_jumps_far_ahead() -> Result<()> {
        let mut decoder = Decoder::open(Cursor::new(stream(12, 24)))?;

        decoder.seek_sample(21)?;
        assert_eq!(decoder.sample_index(), 21);
        assert_eq!(drain(&mut decoder)?, [0, 1, 0]);
        assert_eq!(decoder.crc_errors(), 0);

        decoder.seek_sample(4)?;
        assert_eq!(decoder.sample_index(), 4);
        assert_eq!(drain(&mut decoder)?.len(), 20);
        Ok(())
    }

    #[test]
    fn seek_past_end_is_rejected() -> Result<()> {
        let mut decoder = Decoder::open(Cursor::new(stream(3, 6)))?;
        let err = decoder.seek_sample(6).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeekError>(),
            Some(SeekError::OutOfRange { target: 6, total: 6 })
        ));
        Ok(())
    }

    #[test]
    fn seek_needs_known_length() -> Result<()> {
        let mut decoder = Decoder::open(Cursor::new(stream(3, u32::MAX)))?;
        let err = decoder.seek_sample(1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeekError>(),
            Some(SeekError::UnknownLength)
        ));
        Ok(())
    }

    #[test]
    fn search_walks_when_close() {
        let header = BlockHeader {
            block_index_low: 100,
            block_samples: 10,
            flags: INITIAL_BLOCK,
            stream_position: 1000,
            average_block_size: 50,
            ..Default::default()
        };

        assert_eq!(search_position(&header, 5, 10_000), Some(0));
        assert_eq!(search_position(&header, 105, 10_000), Some(1000));
        assert_eq!(search_position(&header, 130, 10_000), None);
        // (200 - 100 - 9) / 10 = 9 blocks ahead
        assert_eq!(search_position(&header, 200, 10_000), Some(1450));
        assert_eq!(search_position(&header, 200, 1200), None);
        // (50 - 100 - 19) / 10 = -6 blocks back
        assert_eq!(search_position(&header, 50, 10_000), Some(700));
    }
}
