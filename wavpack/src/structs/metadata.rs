//! Metadata sub-blocks.
//!
//! A block body is a sequence of sub-blocks, each introduced by an id byte
//! and a length in 16-bit words:
//!
//! - bit 7 of the id (`ID_LARGE`): two more length bytes follow
//! - bit 6 (`ID_ODD_SIZE`): the payload is one byte shorter than declared,
//!   a pad byte still follows it
//! - bit 5 (`ID_OPTIONAL_DATA`): the decoder may skip the sub-block when it
//!   does not recognize it

use crate::utils::errors::MetadataError;
use log::trace;

pub const ID_UNIQUE: u8 = 0x3f;
pub const ID_OPTIONAL_DATA: u8 = 0x20;
pub const ID_ODD_SIZE: u8 = 0x40;
pub const ID_LARGE: u8 = 0x80;

pub const ID_DUMMY: u8 = 0x0;
pub const ID_ENCODER_INFO: u8 = 0x1;
pub const ID_DECORR_TERMS: u8 = 0x2;
pub const ID_DECORR_WEIGHTS: u8 = 0x3;
pub const ID_DECORR_SAMPLES: u8 = 0x4;
pub const ID_ENTROPY_VARS: u8 = 0x5;
pub const ID_HYBRID_PROFILE: u8 = 0x6;
pub const ID_SHAPING_WEIGHTS: u8 = 0x7;
pub const ID_FLOAT_INFO: u8 = 0x8;
pub const ID_INT32_INFO: u8 = 0x9;
pub const ID_WV_BITSTREAM: u8 = 0xa;
pub const ID_WVC_BITSTREAM: u8 = 0xb;
pub const ID_WVX_BITSTREAM: u8 = 0xc;
pub const ID_CHANNEL_INFO: u8 = 0xd;
pub const ID_DSD_BLOCK: u8 = 0xe;

pub const ID_RIFF_HEADER: u8 = ID_OPTIONAL_DATA | 0x1;
pub const ID_RIFF_TRAILER: u8 = ID_OPTIONAL_DATA | 0x2;
pub const ID_ALT_HEADER: u8 = ID_OPTIONAL_DATA | 0x3;
pub const ID_ALT_TRAILER: u8 = ID_OPTIONAL_DATA | 0x4;
pub const ID_CONFIG_BLOCK: u8 = ID_OPTIONAL_DATA | 0x5;
pub const ID_MD5_CHECKSUM: u8 = ID_OPTIONAL_DATA | 0x6;
pub const ID_SAMPLE_RATE: u8 = ID_OPTIONAL_DATA | 0x7;
pub const ID_ALT_EXTENSION: u8 = ID_OPTIONAL_DATA | 0x8;
pub const ID_NEW_CONFIG_BLOCK: u8 = ID_OPTIONAL_DATA | 0xa;
pub const ID_WVX_NEW_BITSTREAM: u8 = ID_OPTIONAL_DATA | ID_WVX_BITSTREAM;
pub const ID_BLOCK_CHECKSUM: u8 = ID_OPTIONAL_DATA | 0xf;

/// One framed sub-block borrowed from a block body.
#[derive(Clone, Copy, Debug)]
pub struct SubBlock<'a> {
    /// Id with the size flags stripped.
    pub id: u8,
    pub data: &'a [u8],
    /// Offset of the id byte within the block body.
    pub offset: usize,
}

/// Walks the sub-blocks of a block body.
///
/// Yields an error and stops when a sub-block overruns the body.
#[derive(Debug)]
pub struct SubBlocks<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> SubBlocks<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    /// Bytes consumed so far, including pad bytes.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    fn read_next(&mut self) -> Result<SubBlock<'a>, MetadataError> {
        let offset = self.pos;
        let rest = &self.body[offset..];

        let truncated = |id: u8, len: usize| MetadataError::Truncated {
            id,
            len,
            remaining: rest.len(),
        };

        let (&raw_id, rest_after_id) = rest.split_first().ok_or_else(|| truncated(0, 1))?;
        let Some(&len_lo) = rest_after_id.first() else {
            return Err(truncated(raw_id, 2));
        };

        let mut id = raw_id;
        let mut header_len = 2;
        let mut byte_len = (len_lo as usize) << 1;

        if id & ID_LARGE != 0 {
            id &= !ID_LARGE;
            if rest.len() < 4 {
                return Err(truncated(raw_id, 4));
            }
            byte_len += ((rest[2] as usize) << 9) + ((rest[3] as usize) << 17);
            header_len = 4;
        }

        let padded_len = byte_len;
        if id & ID_ODD_SIZE != 0 {
            id &= !ID_ODD_SIZE;
            if byte_len == 0 {
                return Err(MetadataError::InvalidSize {
                    name: "odd-sized sub-block",
                    len: 0,
                });
            }
            byte_len -= 1;
        }

        if header_len + padded_len > rest.len() {
            return Err(truncated(id, padded_len));
        }

        let data = &rest[header_len..header_len + byte_len];
        self.pos += header_len + padded_len;

        trace!("Sub-block {id:#04x}: {byte_len} bytes at {offset}");

        Ok(SubBlock { id, data, offset })
    }
}

impl<'a> Iterator for SubBlocks<'a> {
    type Item = Result<SubBlock<'a>, MetadataError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.body.len() {
            return None;
        }

        let result = self.read_next();
        if result.is_err() {
            self.pos = self.body.len();
        }

        Some(result)
    }
}

/// Sub-block payloads by kind.
///
/// Payloads stay borrowed; their interpretation depends on the block flags
/// and on sub-blocks seen earlier in the same block, so decoding them is left
/// to the stream state.
#[derive(Clone, Copy, Debug)]
pub enum Metadata<'a> {
    Dummy,
    EncoderInfo(&'a [u8]),
    DecorrTerms(&'a [u8]),
    DecorrWeights(&'a [u8]),
    DecorrSamples(&'a [u8]),
    EntropyVars(&'a [u8]),
    HybridProfile(&'a [u8]),
    ShapingWeights(&'a [u8]),
    FloatInfo(&'a [u8]),
    Int32Info(&'a [u8]),
    WvBitstream(&'a [u8]),
    WvcBitstream(&'a [u8]),
    WvxBitstream { data: &'a [u8], new_format: bool },
    ChannelInfo(&'a [u8]),
    DsdBlock(&'a [u8]),
    Header(&'a [u8]),
    Trailer(&'a [u8]),
    ConfigBlock(&'a [u8]),
    Md5Checksum(&'a [u8]),
    SampleRate(&'a [u8]),
    AltExtension(&'a [u8]),
    NewConfigBlock(&'a [u8]),
    BlockChecksum { data: &'a [u8], offset: usize },
    /// Unrecognized sub-block carrying the optional-data bit.
    Unknown { id: u8, data: &'a [u8] },
}

impl<'a> TryFrom<SubBlock<'a>> for Metadata<'a> {
    type Error = MetadataError;

    fn try_from(sub: SubBlock<'a>) -> Result<Self, Self::Error> {
        let data = sub.data;
        let metadata = match sub.id {
            ID_DUMMY => Metadata::Dummy,
            ID_ENCODER_INFO => Metadata::EncoderInfo(data),
            ID_DECORR_TERMS => Metadata::DecorrTerms(data),
            ID_DECORR_WEIGHTS => Metadata::DecorrWeights(data),
            ID_DECORR_SAMPLES => Metadata::DecorrSamples(data),
            ID_ENTROPY_VARS => Metadata::EntropyVars(data),
            ID_HYBRID_PROFILE => Metadata::HybridProfile(data),
            ID_SHAPING_WEIGHTS => Metadata::ShapingWeights(data),
            ID_FLOAT_INFO => Metadata::FloatInfo(data),
            ID_INT32_INFO => Metadata::Int32Info(data),
            ID_WV_BITSTREAM => Metadata::WvBitstream(data),
            ID_WVC_BITSTREAM => Metadata::WvcBitstream(data),
            ID_WVX_BITSTREAM => Metadata::WvxBitstream {
                data,
                new_format: false,
            },
            ID_WVX_NEW_BITSTREAM => Metadata::WvxBitstream {
                data,
                new_format: true,
            },
            ID_CHANNEL_INFO => Metadata::ChannelInfo(data),
            ID_DSD_BLOCK => Metadata::DsdBlock(data),
            ID_RIFF_HEADER | ID_ALT_HEADER => Metadata::Header(data),
            ID_RIFF_TRAILER | ID_ALT_TRAILER => Metadata::Trailer(data),
            ID_CONFIG_BLOCK => Metadata::ConfigBlock(data),
            ID_MD5_CHECKSUM => Metadata::Md5Checksum(data),
            ID_SAMPLE_RATE => Metadata::SampleRate(data),
            ID_ALT_EXTENSION => Metadata::AltExtension(data),
            ID_NEW_CONFIG_BLOCK => Metadata::NewConfigBlock(data),
            ID_BLOCK_CHECKSUM => Metadata::BlockChecksum {
                data,
                offset: sub.offset,
            },
            id if id & ID_OPTIONAL_DATA != 0 => Metadata::Unknown { id, data },
            id => return Err(MetadataError::UnsupportedId(id)),
        };

        Ok(metadata)
    }
}
