use crate::log_or_err;
use crate::process::decorr::{decorr_mono, decorr_stereo, joint_stereo};
use crate::process::dsd::{DSD_SILENCE, DsdState};
use crate::process::fixup::fixup_samples;
use crate::process::scan::{Block, BlockScanner};
use crate::process::words::get_words;
use crate::structs::config::{
    CONFIG_EXTRA_MODE, CONFIG_FAST_FLAG, CONFIG_FLOAT_DATA, CONFIG_HIGH_FLAG, CONFIG_HYBRID_FLAG,
    CONFIG_LOSSY_MODE, CONFIG_MD5_CHECKSUM, CONFIG_VERY_HIGH_FLAG, ChannelInfo, ConfigBlock,
    FileFormat, NewConfigBlock, read_sample_rate,
};
use crate::structs::decorr::DecorrChain;
use crate::structs::extended::{ExtraBits, FloatInfo, Int32Info};
use crate::structs::header::{
    BlockHeader, DSD_FLAG, FALSE_STEREO, FINAL_BLOCK, FLOAT_DATA, HEADER_SIZE, HYBRID_FLAG,
    INITIAL_BLOCK, INT32_DATA, JOINT_STEREO, MONO_FLAG,
};
use crate::structs::metadata::{Metadata, SubBlocks};
use crate::structs::words::WordsState;
use crate::utils::bitstream_io::BsIoVecReader;
use crate::utils::crc::{CRC_INIT, block_checksum, crc_mono, crc_stereo};
use crate::utils::errors::{DecodeError, MetadataError, OpenError, ScanError};
use anyhow::{Result, bail};
use log::{debug, info, trace};
use std::fmt::{Display, Formatter};
use std::io::Read;

pub const MODE_WVC: u32 = 0x1;
pub const MODE_LOSSLESS: u32 = 0x2;
pub const MODE_HYBRID: u32 = 0x4;
pub const MODE_FLOAT: u32 = 0x8;
pub const MODE_HIGH: u32 = 0x20;
pub const MODE_FAST: u32 = 0x40;
pub const MODE_EXTRA: u32 = 0x80;
pub const MODE_VERY_HIGH: u32 = 0x400;
pub const MODE_MD5: u32 = 0x800;
pub const MODE_XMODE: u32 = 0x7000;
pub const MODE_DSD: u32 = 0x8000_0000;

/// Options for [`Decoder::open_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Decode only the first mono or stereo block of multichannel streams
    /// instead of refusing them.
    pub two_channel_max: bool,
}

/// Encoder speed preset, derived from the stream's configuration bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressionLevel {
    Fast,
    #[default]
    Normal,
    High,
    VeryHigh,
}

impl Display for CompressionLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionLevel::Fast => write!(f, "Fast"),
            CompressionLevel::Normal => write!(f, "Normal"),
            CompressionLevel::High => write!(f, "High"),
            CompressionLevel::VeryHigh => write!(f, "Very High"),
        }
    }
}

/// Stream-wide properties gathered from headers and optional metadata.
#[derive(Clone, Debug, Default)]
pub struct StreamConfig {
    /// Low byte from the first audio header, bits 8..31 from the config block.
    pub flags: u32,
    pub xmode: u8,
    pub num_channels: u32,
    pub channel_mask: u32,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub bytes_per_sample: u32,
    pub float_norm_exp: u8,
    pub dsd_multiplier: u32,
    pub file_format: FileFormat,
    pub file_extension: Option<String>,
    pub qmode: u8,
    pub channel_layout: Vec<u8>,
    pub md5: Option<[u8; 16]>,
    pub five: bool,
    /// Container bytes stored ahead of the audio, for passthrough.
    pub header: Vec<u8>,
    /// Container bytes stored after the audio.
    pub trailer: Vec<u8>,
    /// A correction stream was seen. It is not applied.
    pub correction_stream: bool,
}

/// Decode state of the current block.
///
/// Everything here is rebuilt from the metadata of each block; only
/// `sample_index` carries over.
#[derive(Debug, Default)]
pub struct StreamState {
    pub header: BlockHeader,
    pub sample_index: u64,
    pub crc: u32,
    pub crc_x: u32,
    /// Latched on a decode failure; the rest of the block is silence.
    pub mute_error: bool,
    pub initialized: bool,
    pub decorr: DecorrChain,
    pub words: WordsState,
    pub int32: Int32Info,
    pub float: FloatInfo,
    pub wv: Option<BsIoVecReader>,
    pub wvc: Option<BsIoVecReader>,
    pub extra: Option<ExtraBits>,
    pub dsd: Option<DsdState>,
}

impl StreamState {
    fn reset_block(&mut self, header: BlockHeader) {
        let sample_index = if header.block_samples > 0 {
            header.block_index()
        } else {
            self.sample_index
        };

        *self = Self {
            header,
            sample_index,
            crc: CRC_INIT,
            crc_x: CRC_INIT,
            ..Default::default()
        };
    }
}

/// Decodes a WavPack stream into interleaved 32-bit samples.
///
/// Samples come back right-justified: 16-bit audio yields values in
/// `-32768..=32767`, float audio is scaled to 24 bits and DSD audio yields
/// one byte of eight 1-bit samples per value.
///
/// Recoverable problems in a block (CRC mismatch, exhausted bitstream) mute
/// that block and are counted in [`crc_errors`](Decoder::crc_errors). With
/// [`set_fail_level`](Decoder::set_fail_level) at `Warn` they become errors.
/// Errors met after samples were already produced by a call are returned
/// by the next call.
#[derive(Debug)]
pub struct Decoder<R: Read> {
    pub(crate) scanner: BlockScanner<R>,
    pub(crate) stream: StreamState,
    pub(crate) config: StreamConfig,
    pub(crate) options: OpenOptions,
    pub(crate) fail_level: log::Level,
    pub(crate) total_samples: Option<u64>,
    pub(crate) reduced_channels: Option<u32>,
    pub(crate) crc_errors: u32,
    pub(crate) lossy_blocks: bool,
    /// A block read ahead of a gap, initialized once the gap is filled.
    pub(crate) deferred: Option<Block>,
    pub(crate) pending_error: Option<anyhow::Error>,
}

impl<R: Read> Decoder<R> {
    pub fn open(reader: R) -> Result<Self> {
        Self::open_with(reader, OpenOptions::default())
    }

    /// Reads up to the first audio block and derives the stream properties.
    pub fn open_with(reader: R, options: OpenOptions) -> Result<Self> {
        Self::open_inner(reader, options, log::Level::Error)
    }

    /// Like [`open_with`](Decoder::open_with) with the failure level applied
    /// while opening.
    pub fn open_with_fail_level(reader: R, options: OpenOptions, fail_level: log::Level) -> Result<Self> {
        Self::open_inner(reader, options, fail_level)
    }

    fn open_inner(reader: R, options: OpenOptions, fail_level: log::Level) -> Result<Self> {
        let mut decoder = Self {
            scanner: BlockScanner::new(reader),
            stream: StreamState::default(),
            config: StreamConfig::default(),
            options,
            fail_level,
            total_samples: None,
            reduced_channels: None,
            crc_errors: 0,
            lossy_blocks: false,
            deferred: None,
            pending_error: None,
        };

        decoder.find_audio_block()?;
        decoder.configure()?;

        Ok(decoder)
    }

    /// Sets the failure level for recoverable decode problems.
    ///
    /// - `log::Level::Error`: Only fail on Error level messages (default)
    /// - `log::Level::Warn`: Fail on Warning level and above (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    /// Reads and initializes blocks until one carries audio.
    pub(crate) fn find_audio_block(&mut self) -> Result<()> {
        loop {
            let block = match self.scanner.read_block() {
                Ok(block) => block,
                Err(ScanError::UnexpectedEof) => bail!(OpenError::NoAudio),
                Err(err) => return Err(err.into()),
            };

            let header = block.header;
            if header.block_samples > 0 && self.total_samples.is_none() {
                self.total_samples = header.total_samples();
            }

            self.init_block(&block)?;

            if header.block_samples > 0 {
                return Ok(());
            }
        }
    }

    fn configure(&mut self) -> Result<()> {
        let header = self.stream.header;
        let config = &mut self.config;

        config.flags = (config.flags & !0xff) | (header.flags & 0xff);
        config.bytes_per_sample = header.bytes_stored();
        config.bits_per_sample = (config.bytes_per_sample * 8).saturating_sub(header.shift());
        config.float_norm_exp = self.stream.float.norm_exp;

        if header.has(FLOAT_DATA) {
            config.bytes_per_sample = 3;
            config.bits_per_sample = 24;
        }

        if config.sample_rate == 0 {
            config.sample_rate = header.sample_rate().unwrap_or(44100);
        }

        if config.num_channels == 0 {
            config.num_channels = if header.has(MONO_FLAG) { 1 } else { 2 };
            config.channel_mask = 5 - config.num_channels;
        }

        if self.options.two_channel_max && !header.has(FINAL_BLOCK) {
            self.reduced_channels = Some(if header.has(MONO_FLAG) { 1 } else { 2 });
        }

        if !self.options.two_channel_max && config.num_channels > 2 {
            bail!(OpenError::TooManyChannels(config.num_channels));
        }

        if header.has(DSD_FLAG) {
            config.bytes_per_sample = 1;
            config.bits_per_sample = 8;
        }

        info!(
            "Opened stream: {} Hz, {} channel(s), {} bits, {} samples, version {:#x}",
            self.sample_rate(),
            self.config.num_channels,
            self.config.bits_per_sample,
            self.total_samples
                .map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            header.version
        );

        Ok(())
    }

    /// Processes the metadata of `block` and prepares it for unpacking.
    fn init_block(&mut self, block: &Block) -> Result<()> {
        let header = block.header;
        self.stream.reset_block(header);
        self.deferred = None;

        let mono_data = header.is_mono_data();
        let mut checksum_failed = false;

        for sub in SubBlocks::new(&block.body) {
            match Metadata::try_from(sub?)? {
                Metadata::Dummy | Metadata::EncoderInfo(_) | Metadata::ShapingWeights(_) => {}
                Metadata::DecorrTerms(data) => self.stream.decorr.read_terms(data, mono_data)?,
                Metadata::DecorrWeights(data) => self.stream.decorr.read_weights(data, mono_data)?,
                Metadata::DecorrSamples(data) => {
                    let skip_hybrid_prefix = header.version == 0x402 && header.has(HYBRID_FLAG);
                    self.stream
                        .decorr
                        .read_samples(data, mono_data, skip_hybrid_prefix)?
                }
                Metadata::EntropyVars(data) => self.stream.words.read_entropy_vars(data, mono_data)?,
                Metadata::HybridProfile(data) => {
                    self.stream.words.read_hybrid_profile(data, header.flags)?
                }
                Metadata::FloatInfo(data) => self.stream.float = FloatInfo::read(data)?,
                Metadata::Int32Info(data) => self.stream.int32 = Int32Info::read(data)?,
                Metadata::WvBitstream(data) => {
                    self.stream.wv = Some(BsIoVecReader::from_vec(data.to_vec()));
                }
                Metadata::WvcBitstream(data) => {
                    if data.len() & 1 != 0 {
                        bail!(MetadataError::InvalidSize {
                            name: "correction bitstream",
                            len: data.len(),
                        });
                    }
                    self.stream.wvc = Some(BsIoVecReader::from_vec(data.to_vec()));
                    self.config.correction_stream = true;
                }
                Metadata::WvxBitstream { data, new_format } => {
                    self.stream.extra = Some(ExtraBits::open(data, header.flags, new_format)?);
                }
                Metadata::ChannelInfo(data) => {
                    let info = ChannelInfo::read(data)?;
                    self.config.num_channels = info.num_channels;
                    self.config.channel_mask = info.channel_mask;
                }
                Metadata::DsdBlock(data) => {
                    let dsd = DsdState::init(data, header.block_samples, mono_data)?;
                    self.config.dsd_multiplier = dsd.multiplier;
                    self.stream.dsd = Some(dsd);
                }
                Metadata::Header(data) => self.config.header = data.to_vec(),
                Metadata::Trailer(data) => self.config.trailer = data.to_vec(),
                Metadata::ConfigBlock(data) => {
                    if let Some(config) = ConfigBlock::read(data) {
                        self.config.flags = (self.config.flags & 0xff) | config.flags;
                        if let Some(xmode) = config.xmode {
                            self.config.xmode = xmode;
                        }
                        self.config.five |= config.five;
                    }
                }
                Metadata::Md5Checksum(data) => {
                    if let Ok(md5) = <[u8; 16]>::try_from(data) {
                        self.config.md5 = Some(md5);
                    }
                }
                Metadata::SampleRate(data) => {
                    if let Some(rate) = read_sample_rate(data) {
                        self.config.sample_rate = rate;
                    }
                }
                Metadata::AltExtension(data) => match std::str::from_utf8(data) {
                    Ok(ext) => self.config.file_extension = Some(ext.trim_end_matches('\0').to_string()),
                    Err(_) => log_or_err!(self, log::Level::Debug, MetadataError::InvalidExtension),
                },
                Metadata::NewConfigBlock(data) => {
                    let config = NewConfigBlock::read(data);
                    if let Some(format) = config.file_format {
                        self.config.file_format = format;
                    }
                    self.config.qmode = config.qmode;
                    self.config.channel_layout = config.extra;
                    self.config.five = true;
                }
                Metadata::BlockChecksum { data, offset } => {
                    self.config.five = true;
                    checksum_failed |= !verify_block_checksum(block, data, offset);
                }
                Metadata::Unknown { id, data } => {
                    trace!("Skipping optional metadata {id:#04x} ({} bytes)", data.len());
                }
            }
        }

        if header.block_samples > 0 {
            if header.has(DSD_FLAG) {
                if self.stream.dsd.is_none() {
                    bail!(MetadataError::MissingBitstream);
                }
            } else if self.stream.wv.is_none() {
                bail!(MetadataError::MissingBitstream);
            }

            let stream = &self.stream;
            if (header.has(INT32_DATA) && stream.int32.sent_bits != 0 && stream.extra.is_none())
                || (header.has(FLOAT_DATA) && stream.float.is_lossy())
                || header.has(HYBRID_FLAG)
            {
                self.lossy_blocks = true;
            }
        }

        self.stream.initialized = true;

        if checksum_failed {
            self.stream.mute_error = true;
            log_or_err!(self, log::Level::Warn, DecodeError::BlockChecksum(header.block_index()));
        }

        Ok(())
    }

    fn next_block(&mut self) -> Result<Option<Block>> {
        match self.scanner.read_block() {
            Ok(block) => Ok(Some(block)),
            Err(ScanError::UnexpectedEof) => Ok(None),
            Err(err @ ScanError::TruncatedBody { .. }) => {
                log_or_err!(self, log::Level::Warn, err);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn needs_block(&self) -> bool {
        let header = &self.stream.header;
        (!self.stream.initialized && self.deferred.is_none())
            || header.block_samples == 0
            || !header.has(INITIAL_BLOCK)
            || self.stream.sample_index >= header.block_end()
    }

    fn accept_block(&mut self, block: Block) -> Result<()> {
        let header = block.header;
        let sample_index = self.stream.sample_index;

        if header.block_samples == 0 || (header.has(INITIAL_BLOCK) && header.block_index() == sample_index) {
            return self.init_block(&block);
        }

        self.stream.header = header;
        self.stream.initialized = false;

        if header.has(INITIAL_BLOCK) && header.block_index() > sample_index {
            self.deferred = Some(block);
        } else {
            self.deferred = None;
            trace!(
                "Skipping block at sample {} ({} samples)",
                header.block_index(),
                header.block_samples
            );
        }

        Ok(())
    }

    /// Unpacks up to `samples` complete samples into `buffer`, interleaved
    /// by [`output_channels`](Decoder::output_channels).
    ///
    /// Returns the number of samples written. Zero means the end of the
    /// stream. Fewer than requested before the end means a fatal error,
    /// which the next call returns.
    pub fn unpack(&mut self, buffer: &mut [i32], samples: usize) -> Result<usize> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        let stride = self.output_channels() as usize;
        let samples = samples.min(buffer.len() / stride);
        let mut unpacked = 0;

        match self.unpack_into(buffer, samples, stride, &mut unpacked) {
            Ok(()) => Ok(unpacked),
            Err(err) if unpacked > 0 => {
                debug!("Deferring error after {unpacked} samples: {err}");
                self.pending_error = Some(err);
                Ok(unpacked)
            }
            Err(err) => Err(err),
        }
    }

    fn unpack_into(&mut self, buffer: &mut [i32], samples: usize, stride: usize, unpacked: &mut usize) -> Result<()> {
        while *unpacked < samples {
            if self.total_samples == Some(self.stream.sample_index) {
                break;
            }

            if self.needs_block() {
                let Some(block) = self.next_block()? else {
                    break;
                };
                self.accept_block(block)?;
            }

            let header = self.stream.header;
            if header.block_samples == 0
                || !header.has(INITIAL_BLOCK)
                || self.stream.sample_index >= header.block_end()
            {
                continue;
            }

            let remaining = samples - *unpacked;
            let out = &mut buffer[*unpacked * stride..samples * stride];

            if self.stream.sample_index < header.block_index() {
                let gap = (header.block_index() - self.stream.sample_index).min(remaining as u64) as usize;
                out[..gap * stride].fill(0);
                self.stream.sample_index += gap as u64;
                *unpacked += gap;
                continue;
            }

            if let Some(block) = self.deferred.take() {
                self.init_block(&block)?;
            }

            if !self.stream.initialized {
                continue;
            }

            let width = if header.has(MONO_FLAG) { 1 } else { 2 };
            if width != stride {
                bail!(DecodeError::ChannelLayout {
                    expected: stride,
                    actual: width
                });
            }

            let count = (header.block_end() - self.stream.sample_index).min(remaining as u64) as usize;
            let out = &mut out[..count * stride];

            let issue = if header.has(DSD_FLAG) {
                self.unpack_dsd(out, count)?
            } else {
                self.unpack_pcm(out, count)?
            };
            *unpacked += count;

            if let Some(err) = issue {
                log_or_err!(self, log::Level::Warn, err);
            }

            if self.stream.sample_index == header.block_end() {
                if let Some(err) = self.finish_block(out) {
                    log_or_err!(self, log::Level::Warn, err);
                }
            }
        }

        Ok(())
    }

    /// Decodes `count` PCM samples of the current block into `out`.
    fn unpack_pcm(&mut self, out: &mut [i32], count: usize) -> Result<Option<DecodeError>> {
        let stream = &mut self.stream;
        let flags = stream.header.flags;
        let mono_data = stream.header.is_mono_data();
        let values = if mono_data { count } else { count * 2 };

        if stream.mute_error {
            out.fill(0);
            stream.sample_index += count as u64;
            return Ok(None);
        }

        let mut mute_limit = (1u64 << stream.header.magnitude()) + 2;
        if flags & HYBRID_FLAG != 0 {
            mute_limit *= 2;
        }

        let Some(wv) = stream.wv.as_mut() else {
            bail!(MetadataError::MissingBitstream);
        };

        let decoded = get_words(out, count, flags, &mut stream.words, wv);
        let mut crc = stream.crc;
        let mut good = count;

        if mono_data {
            decorr_mono(stream.decorr.passes_mut(), out, count);

            for (i, &sample) in out[..count].iter().enumerate() {
                if sample.unsigned_abs() as u64 > mute_limit {
                    good = i;
                    break;
                }
                crc = crc_mono(crc, sample);
            }
        } else {
            decorr_stereo(stream.decorr.passes_mut(), out, count);

            if flags & JOINT_STEREO != 0 {
                joint_stereo(out, count);
            }

            for (i, frame) in out[..values].chunks_exact(2).enumerate() {
                if frame[0].unsigned_abs() as u64 > mute_limit || frame[1].unsigned_abs() as u64 > mute_limit {
                    good = i;
                    break;
                }
                crc = crc_stereo(crc, frame[0], frame[1]);
            }
        }

        stream.crc = crc;

        if decoded != count || good != count {
            out.fill(0);
            stream.mute_error = true;

            let issue = if decoded != count {
                DecodeError::EntropyUnderflow {
                    decoded,
                    requested: count,
                }
            } else {
                DecodeError::SampleOverflow {
                    limit: mute_limit,
                    index: stream.sample_index + good as u64,
                }
            };

            stream.sample_index += count as u64;
            return Ok(Some(issue));
        }

        fixup_samples(
            flags,
            &stream.int32,
            &stream.float,
            stream.extra.as_mut(),
            &mut stream.crc_x,
            &mut out[..values],
        );

        if flags & FALSE_STEREO != 0 {
            for k in (0..count).rev() {
                out[k * 2 + 1] = out[k];
                out[k * 2] = out[k];
            }
        }

        stream.sample_index += count as u64;
        Ok(None)
    }

    /// Decodes `count` DSD samples of the current block into `out`.
    fn unpack_dsd(&mut self, out: &mut [i32], count: usize) -> Result<Option<DecodeError>> {
        let stream = &mut self.stream;
        let flags = stream.header.flags;
        let mono_data = stream.header.is_mono_data();
        let mut issue = None;

        if !stream.mute_error {
            let Some(dsd) = stream.dsd.as_mut() else {
                bail!(MetadataError::MissingBitstream);
            };

            if let Err(err) = dsd.decode(out, count, mono_data, &mut stream.crc) {
                stream.mute_error = true;
                issue = Some(DecodeError::Dsd(err));
            }
        }

        if stream.mute_error {
            out.fill(DSD_SILENCE);
        } else if flags & FALSE_STEREO != 0 {
            for k in (0..count).rev() {
                out[k * 2 + 1] = out[k];
                out[k * 2] = out[k];
            }
        }

        stream.sample_index += count as u64;
        Ok(issue)
    }

    /// Checks the block checksums once the last sample of a block is out.
    /// `out` holds this call's samples of the block and is silenced on a
    /// mismatch.
    fn finish_block(&mut self, out: &mut [i32]) -> Option<DecodeError> {
        let stream = &mut self.stream;
        let header = stream.header;
        let crc_ok = stream.crc == header.crc;
        let extended_ok = stream.extra.as_ref().is_none_or(|x| stream.crc_x == x.crc_mvx);

        if !stream.mute_error && crc_ok && extended_ok {
            return None;
        }

        self.crc_errors += 1;

        if stream.mute_error {
            return None;
        }

        stream.mute_error = true;
        out.fill(if header.has(DSD_FLAG) { DSD_SILENCE } else { 0 });

        Some(if !crc_ok {
            DecodeError::CrcMismatch {
                block_index: header.block_index(),
                expected: header.crc,
                actual: stream.crc,
            }
        } else {
            DecodeError::ExtendedCrcMismatch {
                block_index: header.block_index(),
            }
        })
    }

    /// Reads the blocks left after the last audio sample, picking up the
    /// container trailer.
    pub fn read_trailing_blocks(&mut self) -> Result<()> {
        while let Some(block) = self.next_block()? {
            if block.header.block_samples == 0 {
                self.init_block(&block)?;
            }
        }

        Ok(())
    }

    /// Sample rate of the unpacked values. For DSD streams this is the byte
    /// rate per channel.
    pub fn sample_rate(&self) -> u32 {
        let rate = if self.config.sample_rate != 0 {
            self.config.sample_rate
        } else {
            44100
        };

        rate * self.config.dsd_multiplier.max(1)
    }

    /// Sample rate in native units: bits per second per channel for DSD.
    pub fn native_sample_rate(&self) -> u32 {
        if self.is_dsd() {
            self.sample_rate() * 8
        } else {
            self.sample_rate()
        }
    }

    pub fn dsd_multiplier(&self) -> u32 {
        self.config.dsd_multiplier
    }

    /// Channels in the stream, which may exceed what is decoded.
    pub fn num_channels(&self) -> u32 {
        if self.config.num_channels != 0 {
            self.config.num_channels
        } else {
            2
        }
    }

    pub fn channel_mask(&self) -> u32 {
        self.config.channel_mask
    }

    /// Channel count of a multichannel stream opened with
    /// [`OpenOptions::two_channel_max`].
    pub fn reduced_channels(&self) -> Option<u32> {
        self.reduced_channels
    }

    /// Values per sample in the buffers filled by [`unpack`](Decoder::unpack).
    pub fn output_channels(&self) -> u32 {
        self.reduced_channels.unwrap_or_else(|| self.num_channels())
    }

    /// Valid bits per sample; 1 for DSD.
    pub fn bits_per_sample(&self) -> u32 {
        if self.is_dsd() {
            1
        } else if self.config.bits_per_sample != 0 {
            self.config.bits_per_sample
        } else {
            16
        }
    }

    pub fn bytes_per_sample(&self) -> u32 {
        if self.config.bytes_per_sample != 0 {
            self.config.bytes_per_sample
        } else {
            2
        }
    }

    pub fn total_samples(&self) -> Option<u64> {
        self.total_samples
    }

    pub fn sample_index(&self) -> u64 {
        self.stream.sample_index
    }

    /// Blocks that failed a checksum or could not be decoded.
    pub fn crc_errors(&self) -> u32 {
        self.crc_errors
    }

    /// True when any block decoded so far was lossy, or the encoder ran in
    /// hybrid mode.
    pub fn lossy(&self) -> bool {
        self.lossy_blocks || self.config.flags & CONFIG_HYBRID_FLAG != 0
    }

    pub fn mode(&self) -> u32 {
        let flags = self.config.flags;
        let mut mode = 0;

        if flags & CONFIG_HYBRID_FLAG != 0 {
            mode |= MODE_HYBRID;
        } else if flags & CONFIG_LOSSY_MODE == 0 {
            mode |= MODE_LOSSLESS;
        }

        if self.lossy_blocks {
            mode &= !MODE_LOSSLESS;
        }

        if self.config.correction_stream {
            mode |= MODE_WVC;
        }

        if flags & CONFIG_FLOAT_DATA != 0 {
            mode |= MODE_FLOAT;
        }

        if flags & CONFIG_HIGH_FLAG != 0 {
            mode |= MODE_HIGH;
            if flags & CONFIG_VERY_HIGH_FLAG != 0 || self.stream.header.version < 0x405 {
                mode |= MODE_VERY_HIGH;
            }
        }

        if flags & CONFIG_FAST_FLAG != 0 {
            mode |= MODE_FAST;
        }

        if flags & CONFIG_EXTRA_MODE != 0 {
            mode |= MODE_EXTRA | (((self.config.xmode as u32) << 12) & MODE_XMODE);
        }

        if flags & CONFIG_MD5_CHECKSUM != 0 || self.config.md5.is_some() {
            mode |= MODE_MD5;
        }

        if self.config.dsd_multiplier > 0 {
            mode |= MODE_DSD;
        }

        mode
    }

    pub fn compression_level(&self) -> CompressionLevel {
        let mode = self.mode();

        if mode & MODE_FAST != 0 {
            CompressionLevel::Fast
        } else if mode & MODE_VERY_HIGH != 0 {
            CompressionLevel::VeryHigh
        } else if mode & MODE_HIGH != 0 {
            CompressionLevel::High
        } else {
            CompressionLevel::Normal
        }
    }

    /// Extra processing level (1..=6) when the encoder used extra mode.
    pub fn extra_mode(&self) -> Option<u8> {
        let mode = self.mode();
        (mode & MODE_EXTRA != 0).then_some(((mode & MODE_XMODE) >> 12) as u8)
    }

    pub fn file_format(&self) -> FileFormat {
        self.config.file_format
    }

    pub fn file_extension(&self) -> &str {
        self.config
            .file_extension
            .as_deref()
            .unwrap_or_else(|| self.config.file_format.extension())
    }

    /// Container header bytes stored by the encoder, empty when absent.
    pub fn header(&self) -> &[u8] {
        &self.config.header
    }

    pub fn trailer(&self) -> &[u8] {
        &self.config.trailer
    }

    pub fn md5(&self) -> Option<[u8; 16]> {
        self.config.md5
    }

    /// Written by a format-5 encoder.
    pub fn is_five(&self) -> bool {
        self.config.five
    }

    /// Stream version of the current block.
    pub fn version(&self) -> u16 {
        self.stream.header.version
    }

    pub fn is_float(&self) -> bool {
        self.config.flags & CONFIG_FLOAT_DATA != 0
    }

    pub fn is_dsd(&self) -> bool {
        self.config.dsd_multiplier > 0
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn get_ref(&self) -> &R {
        self.scanner.get_ref()
    }

    /// Byte offset of the next unread byte of the source.
    pub fn position(&self) -> u64 {
        self.scanner.position()
    }
}

/// Checks a block checksum sub-block against the bytes before it.
fn verify_block_checksum(block: &Block, data: &[u8], offset: usize) -> bool {
    let csum = block_checksum(&block.raw_prefix(HEADER_SIZE + offset));

    match *data {
        [b0, b1] => {
            let folded = (csum ^ (csum >> 16)) & 0xffff;
            folded == u16::from_le_bytes([b0, b1]) as u32
        }
        [b0, b1, b2, b3] => csum == u32::from_le_bytes([b0, b1, b2, b3]),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::test_util::BlockBuilder;
    use crate::structs::header::{MAG_LSB, SRATE_LSB, SRATE_MASK};
    use crate::structs::metadata::{
        ID_CHANNEL_INFO, ID_DECORR_SAMPLES, ID_DECORR_TERMS, ID_DECORR_WEIGHTS, ID_DSD_BLOCK,
        ID_ENTROPY_VARS, ID_HYBRID_PROFILE, ID_INT32_INFO, ID_MD5_CHECKSUM, ID_NEW_CONFIG_BLOCK,
        ID_RIFF_HEADER, ID_RIFF_TRAILER, ID_SAMPLE_RATE, ID_WV_BITSTREAM,
    };
    use crate::utils::crc::crc_dsd;
    use std::io::Cursor;

    const MONO_16: u32 = 1 | MONO_FLAG | INITIAL_BLOCK | FINAL_BLOCK | (15 << MAG_LSB) | (9 << SRATE_LSB);
    const STEREO_16: u32 = 1 | INITIAL_BLOCK | FINAL_BLOCK | (15 << MAG_LSB) | (9 << SRATE_LSB);

    /// Median 2 for channel 0; the bitstream byte 0x03 then decodes to [1, 0].
    const MONO_VARS: [u8; 6] = [0x00, 0x02, 0, 0, 0, 0];
    const MONO_CRC: u32 = 0xffff_fffa;

    fn mono_block(block_index: u32, total: u32, crc: u32) -> Vec<u8> {
        BlockBuilder::new(block_index, 2, MONO_16, crc)
            .total(total)
            .sub(ID_ENTROPY_VARS, &MONO_VARS)
            .sub(ID_WV_BITSTREAM, &[0x03])
            .build()
    }

    fn open(data: Vec<u8>) -> Result<Decoder<Cursor<Vec<u8>>>> {
        Decoder::open(Cursor::new(data))
    }

    #[test]
    fn mono_block_decodes() -> Result<()> {
        let mut decoder = open(mono_block(0, 2, MONO_CRC))?;

        assert_eq!(decoder.sample_rate(), 44100);
        assert_eq!(decoder.num_channels(), 1);
        assert_eq!(decoder.channel_mask(), 4);
        assert_eq!(decoder.bytes_per_sample(), 2);
        assert_eq!(decoder.bits_per_sample(), 16);
        assert_eq!(decoder.total_samples(), Some(2));
        assert_eq!(decoder.mode() & MODE_LOSSLESS, MODE_LOSSLESS);
        assert_eq!(decoder.file_extension(), "wav");

        let mut buf = [9i32; 4];
        assert_eq!(decoder.unpack(&mut buf, 4)?, 2);
        assert_eq!(buf[..2], [1, 0]);
        assert_eq!(decoder.crc_errors(), 0);
        assert_eq!(decoder.sample_index(), 2);
        assert_eq!(decoder.unpack(&mut buf, 4)?, 0);
        Ok(())
    }

    #[test]
    fn crc_mismatch_mutes_block() -> Result<()> {
        let mut decoder = open(mono_block(0, 2, MONO_CRC ^ 1))?;

        let mut buf = [9i32; 2];
        assert_eq!(decoder.unpack(&mut buf, 2)?, 2);
        assert_eq!(buf, [0, 0]);
        assert_eq!(decoder.crc_errors(), 1);
        Ok(())
    }

    #[test]
    fn strict_mode_fails_on_crc_mismatch() -> Result<()> {
        let mut data = mono_block(0, 4, MONO_CRC);
        data.extend(mono_block(2, 4, MONO_CRC ^ 1));
        let mut decoder = open(data)?;
        decoder.set_fail_level(log::Level::Warn);

        let mut buf = [0i32; 4];
        // the failing block's samples are counted, the error comes next call
        assert_eq!(decoder.unpack(&mut buf, 4)?, 4);
        let err = decoder.unpack(&mut buf, 4).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::CrcMismatch { block_index: 2, .. })
        ));
        Ok(())
    }

    #[test]
    fn fatal_error_is_deferred() -> Result<()> {
        let mut data = mono_block(0, 4, MONO_CRC);
        data.extend(
            BlockBuilder::new(2, 2, MONO_16, MONO_CRC)
                .total(4)
                .sub(0x1f, &[0, 0])
                .build(),
        );
        let mut decoder = open(data)?;

        let mut buf = [0i32; 4];
        assert_eq!(decoder.unpack(&mut buf, 4)?, 2);
        let err = decoder.unpack(&mut buf, 4).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MetadataError>(),
            Some(MetadataError::UnsupportedId(0x1f))
        ));
        Ok(())
    }

    #[test]
    fn gap_before_block_is_silence() -> Result<()> {
        let mut data = mono_block(0, 6, MONO_CRC);
        data.extend(mono_block(4, 6, MONO_CRC));
        let mut decoder = open(data)?;

        let mut buf = [9i32; 8];
        assert_eq!(decoder.unpack(&mut buf, 8)?, 6);
        assert_eq!(buf[..6], [1, 0, 0, 0, 1, 0]);
        assert_eq!(decoder.crc_errors(), 0);
        Ok(())
    }

    #[test]
    fn small_requests_span_blocks() -> Result<()> {
        let mut data = mono_block(0, 4, MONO_CRC);
        data.extend(mono_block(2, 4, MONO_CRC));
        let mut decoder = open(data)?;

        let mut out = Vec::new();
        let mut buf = [0i32; 3];
        loop {
            let n = decoder.unpack(&mut buf, 3)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }

        assert_eq!(out, [1, 0, 1, 0]);
        assert_eq!(decoder.crc_errors(), 0);
        Ok(())
    }

    #[test]
    fn false_stereo_duplicates_channels() -> Result<()> {
        let flags = (MONO_16 & !MONO_FLAG) | FALSE_STEREO;
        let data = BlockBuilder::new(0, 2, flags, MONO_CRC)
            .sub(ID_ENTROPY_VARS, &MONO_VARS)
            .sub(ID_WV_BITSTREAM, &[0x03])
            .build();
        let mut decoder = open(data)?;
        assert_eq!(decoder.output_channels(), 2);

        let mut buf = [9i32; 4];
        assert_eq!(decoder.unpack(&mut buf, 2)?, 2);
        assert_eq!(buf, [1, 1, 0, 0]);
        assert_eq!(decoder.crc_errors(), 0);
        Ok(())
    }

    #[test]
    fn stereo_zero_run() -> Result<()> {
        // escape "1,1,1,0" + "0,0" => run of 4 zero values
        let data = BlockBuilder::new(0, 2, STEREO_16, 0xffff_ffaf)
            .sub(ID_WV_BITSTREAM, &[0x07])
            .build();
        let mut decoder = open(data)?;

        let mut buf = [9i32; 4];
        assert_eq!(decoder.unpack(&mut buf, 2)?, 2);
        assert_eq!(buf, [0; 4]);
        assert_eq!(decoder.crc_errors(), 0);
        Ok(())
    }

    #[test]
    fn exhausted_bitstream_mutes() -> Result<()> {
        // all-ones fill after the data ends reads as an impossible unary code
        let data = BlockBuilder::new(0, 4, MONO_16, MONO_CRC)
            .sub(ID_ENTROPY_VARS, &MONO_VARS)
            .sub(ID_WV_BITSTREAM, &[0xff])
            .build();
        let mut decoder = open(data)?;

        let mut buf = [9i32; 4];
        assert_eq!(decoder.unpack(&mut buf, 4)?, 4);
        assert_eq!(buf, [0; 4]);
        assert_eq!(decoder.crc_errors(), 1);
        Ok(())
    }

    #[test]
    fn block_checksum_is_verified() -> Result<()> {
        let builder = BlockBuilder::new(0, 2, MONO_16, MONO_CRC)
            .sub(ID_ENTROPY_VARS, &MONO_VARS)
            .sub(ID_WV_BITSTREAM, &[0x03]);

        let mut decoder = open(builder.build_with_checksum(0))?;
        assert!(decoder.is_five());
        let mut buf = [9i32; 2];
        decoder.unpack(&mut buf, 2)?;
        assert_eq!(buf, [1, 0]);
        assert_eq!(decoder.crc_errors(), 0);

        let mut decoder = open(builder.build_with_checksum(1))?;
        decoder.unpack(&mut buf, 2)?;
        assert_eq!(buf, [0, 0]);
        assert_eq!(decoder.crc_errors(), 1);

        let strict = Decoder::open_with_fail_level(
            Cursor::new(builder.build_with_checksum(1)),
            OpenOptions::default(),
            log::Level::Warn,
        );
        assert!(strict.is_err());
        Ok(())
    }

    #[test]
    fn raw_dsd_block() -> Result<()> {
        let crc = [1u8, 2, 3, 4].iter().fold(CRC_INIT, |c, &b| crc_dsd(c, b));
        let flags = MONO_FLAG | DSD_FLAG | INITIAL_BLOCK | FINAL_BLOCK | (9 << SRATE_LSB);
        let block = |crc| {
            BlockBuilder::new(0, 4, flags, crc)
                .sub(ID_DSD_BLOCK, &[3, 0, 1, 2, 3, 4])
                .build()
        };

        let mut decoder = open(block(crc))?;
        assert!(decoder.is_dsd());
        assert_eq!(decoder.dsd_multiplier(), 8);
        assert_eq!(decoder.bytes_per_sample(), 1);
        assert_eq!(decoder.bits_per_sample(), 1);
        assert_eq!(decoder.sample_rate(), 44100 * 8);
        assert_eq!(decoder.native_sample_rate(), 44100 * 64);

        let mut buf = [0i32; 4];
        assert_eq!(decoder.unpack(&mut buf, 4)?, 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(decoder.crc_errors(), 0);

        let mut decoder = open(block(crc ^ 1))?;
        decoder.unpack(&mut buf, 4)?;
        assert_eq!(buf, [DSD_SILENCE; 4]);
        assert_eq!(decoder.crc_errors(), 1);
        Ok(())
    }

    #[test]
    fn container_metadata_is_captured() -> Result<()> {
        let flags = (MONO_16 & !SRATE_MASK) | SRATE_MASK;
        let mut data = BlockBuilder::new(0, 2, flags, MONO_CRC)
            .sub(ID_RIFF_HEADER, b"RIFF....")
            .sub(ID_SAMPLE_RATE, &[0x00, 0x77, 0x01])
            .sub(ID_MD5_CHECKSUM, &[7; 16])
            .sub(ID_NEW_CONFIG_BLOCK, &[1, 0])
            .sub(ID_ENTROPY_VARS, &MONO_VARS)
            .sub(ID_WV_BITSTREAM, &[0x03])
            .build();
        data.extend(
            BlockBuilder::new(2, 0, flags, 0)
                .total(2)
                .sub(ID_RIFF_TRAILER, b"LIST")
                .build(),
        );

        let mut decoder = open(data)?;
        assert_eq!(decoder.header(), b"RIFF....");
        assert_eq!(decoder.sample_rate(), 96000);
        assert_eq!(decoder.md5(), Some([7; 16]));
        assert_eq!(decoder.file_format(), FileFormat::W64);
        assert_eq!(decoder.file_extension(), "w64");
        assert!(decoder.is_five());
        assert_ne!(decoder.mode() & MODE_MD5, 0);

        let mut buf = [0i32; 2];
        assert_eq!(decoder.unpack(&mut buf, 2)?, 2);
        assert!(decoder.trailer().is_empty());
        decoder.read_trailing_blocks()?;
        assert_eq!(decoder.trailer(), b"LIST");
        Ok(())
    }

    #[test]
    fn metadata_only_stream_has_no_audio() {
        let data = BlockBuilder::new(0, 0, MONO_16, 0)
            .sub(ID_RIFF_HEADER, b"RIFF")
            .build();
        let err = open(data).unwrap_err();
        assert!(matches!(err.downcast_ref::<OpenError>(), Some(OpenError::NoAudio)));
    }

    #[test]
    fn audio_block_needs_bitstream() {
        let data = BlockBuilder::new(0, 2, MONO_16, 0)
            .sub(ID_ENTROPY_VARS, &MONO_VARS)
            .build();
        let err = open(data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MetadataError>(),
            Some(MetadataError::MissingBitstream)
        ));
    }

    #[test]
    fn multichannel_needs_two_channel_option() -> Result<()> {
        let flags = MONO_16 & !FINAL_BLOCK;
        let data = BlockBuilder::new(0, 2, flags, MONO_CRC)
            .sub(ID_CHANNEL_INFO, &[6, 0x3f])
            .sub(ID_ENTROPY_VARS, &MONO_VARS)
            .sub(ID_WV_BITSTREAM, &[0x03])
            .build();

        let err = open(data.clone()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OpenError>(),
            Some(OpenError::TooManyChannels(6))
        ));

        let options = OpenOptions {
            two_channel_max: true,
        };
        let mut decoder = Decoder::open_with(Cursor::new(data), options)?;
        assert_eq!(decoder.num_channels(), 6);
        assert_eq!(decoder.channel_mask(), 0x3f);
        assert_eq!(decoder.reduced_channels(), Some(1));
        assert_eq!(decoder.output_channels(), 1);

        let mut buf = [9i32; 2];
        assert_eq!(decoder.unpack(&mut buf, 2)?, 2);
        assert_eq!(buf, [1, 0]);
        Ok(())
    }

    /// Stereo block with chain order term -1 (delta 2, weights 258/1024,
    /// history 8) then term 1 (delta 2, weights 516/-256, histories 4 and -2).
    fn joint_stereo_block(block_samples: u32, bitstream: &[u8], crc: u32) -> Vec<u8> {
        BlockBuilder::new(0, block_samples, STEREO_16 | JOINT_STEREO, crc)
            .sub(ID_DECORR_TERMS, &[0x46, 0x44])
            .sub(ID_DECORR_WEIGHTS, &[64, 0xe0, 32, 127])
            .sub(ID_DECORR_SAMPLES, &[0x00, 0x03, 0x00, 0xfe, 0x00, 0x04, 0x00, 0x00])
            .sub(ID_ENTROPY_VARS, &[0x00, 0x09, 0, 0, 0, 0, 0x00, 0x09, 0, 0, 0, 0])
            .sub(ID_WV_BITSTREAM, bitstream)
            .build()
    }

    #[test]
    fn joint_stereo_with_cross_channel_terms() -> Result<()> {
        let mut decoder = open(joint_stereo_block(3, &[0xfd, 0xe6, 0xf1, 0xc2], 0xffff_d216))?;
        assert_eq!(decoder.num_channels(), 2);

        // residuals [-17, -18, -4, 17, -14, 1], decorrelated to
        // [-13, -32, -19, 13, -23, -15], then mid/side to left/right
        let mut buf = [0i32; 6];
        assert_eq!(decoder.unpack(&mut buf, 3)?, 3);
        assert_eq!(buf, [-38, -25, 4, 23, -26, -3]);
        assert_eq!(decoder.crc_errors(), 0);

        let mut decoder = open(joint_stereo_block(3, &[0xfd, 0xe6, 0xf1, 0xc2], 0xffff_d217))?;
        decoder.unpack(&mut buf, 3)?;
        assert_eq!(buf, [0; 6]);
        assert_eq!(decoder.crc_errors(), 1);
        Ok(())
    }

    #[test]
    fn long_stereo_block_matches_stateful_passes() -> Result<()> {
        // twenty frames take the split head and tail path through each pass
        let bitstream = [
            0xa5, 0x4d, 0xca, 0x18, 0x25, 0x30, 0xbb, 0x1d, 0x6d, 0x13, 0x2c, 0xde, 0xd6, 0x23, 0x7b,
            0x2e, 0xd9, 0x1e, 0x3f, 0x72, 0x1f, 0xcb, 0x19, 0x71, 0x17,
        ];
        let mut decoder = open(joint_stereo_block(20, &bitstream, 0x170b_8d46))?;

        let mut buf = [0i32; 40];
        assert_eq!(decoder.unpack(&mut buf, 20)?, 20);
        assert_eq!(
            buf,
            [
                0, -13, 12, 4, 29, 17, 15, -2, 10, -11, 38, 17, -22, -24, 8, 18, -6, -2, -44, -25,
                -55, -19, -7, 9, -45, -21, -20, -7, -41, -16, 10, 15, -10, 9, 28, 26, 30, 6, -37,
                -37,
            ]
        );
        assert_eq!(decoder.crc_errors(), 0);
        Ok(())
    }

    #[test]
    fn hybrid_block_decodes() -> Result<()> {
        // bitrate 0x300 gives an error limit of 4 for both samples
        let data = BlockBuilder::new(0, 2, MONO_16 | HYBRID_FLAG, 0x12)
            .sub(ID_HYBRID_PROFILE, &[0x00, 0x03])
            .sub(ID_ENTROPY_VARS, &[0x00, 0x09, 0, 0, 0, 0])
            .sub(ID_WV_BITSTREAM, &[0b0100_0010])
            .build();
        let mut decoder = open(data)?;
        assert!(decoder.lossy());
        assert_ne!(decoder.mode() & MODE_HYBRID, 0);
        assert_eq!(decoder.mode() & MODE_LOSSLESS, 0);

        let mut buf = [0i32; 2];
        assert_eq!(decoder.unpack(&mut buf, 2)?, 2);
        assert_eq!(buf, [10, -3]);
        assert_eq!(decoder.crc_errors(), 0);
        Ok(())
    }

    #[test]
    fn out_of_range_int32_info_fails_block() -> Result<()> {
        let data = BlockBuilder::new(0, 2, MONO_16 | INT32_DATA, MONO_CRC)
            .sub(ID_INT32_INFO, &[40, 0, 0, 0])
            .sub(ID_ENTROPY_VARS, &MONO_VARS)
            .sub(ID_WV_BITSTREAM, &[0x03])
            .build();
        let err = open(data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MetadataError>(),
            Some(MetadataError::Int32InfoRange { sent_bits: 40, .. })
        ));

        // the same block later in the stream fails the unpack call instead
        let mut data = mono_block(0, 4, MONO_CRC);
        data.extend(
            BlockBuilder::new(2, 2, MONO_16 | INT32_DATA, MONO_CRC)
                .total(4)
                .sub(ID_INT32_INFO, &[0, 32, 0, 0])
                .sub(ID_ENTROPY_VARS, &MONO_VARS)
                .sub(ID_WV_BITSTREAM, &[0x03])
                .build(),
        );
        let mut decoder = open(data)?;
        let mut buf = [0i32; 4];
        assert_eq!(decoder.unpack(&mut buf, 4)?, 2);
        let err = decoder.unpack(&mut buf, 4).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MetadataError>(),
            Some(MetadataError::Int32InfoRange { zeros: 32, .. })
        ));
        Ok(())
    }

    #[test]
    fn open_gives_up_on_foreign_data() {
        let err = open(vec![0x55; 2 << 20]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScanError>(),
            Some(ScanError::Desync(skipped)) if *skipped > crate::process::scan::MAX_SKIP
        ));
    }
}
