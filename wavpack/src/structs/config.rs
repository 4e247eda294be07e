//! Stream-wide configuration carried in optional sub-blocks.

use crate::utils::errors::MetadataError;
use anyhow::{Result, bail};
use std::fmt::{Display, Formatter};

pub const CONFIG_HYBRID_FLAG: u32 = 8;
pub const CONFIG_FLOAT_DATA: u32 = 0x80;
pub const CONFIG_FAST_FLAG: u32 = 0x200;
pub const CONFIG_HIGH_FLAG: u32 = 0x800;
pub const CONFIG_VERY_HIGH_FLAG: u32 = 0x1000;
pub const CONFIG_LOSSY_MODE: u32 = 0x100_0000;
pub const CONFIG_EXTRA_MODE: u32 = 0x200_0000;
pub const CONFIG_MD5_CHECKSUM: u32 = 0x800_0000;

/// Channel count and speaker mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub num_channels: u32,
    pub channel_mask: u32,
}

impl ChannelInfo {
    pub fn read(data: &[u8]) -> Result<Self> {
        if data.is_empty() || data.len() > 5 {
            bail!(MetadataError::InvalidSize {
                name: "channel info",
                len: data.len(),
            });
        }

        let channel_mask = data[1..]
            .iter()
            .enumerate()
            .fold(0u32, |mask, (i, &b)| mask | (b as u32) << (i * 8));

        Ok(Self {
            num_channels: data[0] as u32,
            channel_mask,
        })
    }
}

/// Encoder configuration bits 8..31 plus the optional extra-mode byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfigBlock {
    pub flags: u32,
    pub xmode: Option<u8>,
    /// Blocks of five or more bytes come from format-5 encoders.
    pub five: bool,
}

impl ConfigBlock {
    /// Returns `None` when the sub-block is too short to carry flags.
    pub fn read(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }

        let flags = ((data[0] as u32) << 8) | ((data[1] as u32) << 16) | ((data[2] as u32) << 24);
        let xmode = (data.len() >= 4 && flags & CONFIG_EXTRA_MODE != 0).then(|| data[3]);

        Some(Self {
            flags,
            xmode,
            five: data.len() >= 5,
        })
    }
}

/// Source container format recorded by the encoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FileFormat {
    #[default]
    Wav,
    W64,
    Caf,
    Dff,
    Dsf,
    Aiff,
    Other(u8),
}

impl From<u8> for FileFormat {
    fn from(value: u8) -> Self {
        match value {
            0 => FileFormat::Wav,
            1 => FileFormat::W64,
            2 => FileFormat::Caf,
            3 => FileFormat::Dff,
            4 => FileFormat::Dsf,
            5 => FileFormat::Aiff,
            other => FileFormat::Other(other),
        }
    }
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Wav | FileFormat::Other(_) => "wav",
            FileFormat::W64 => "w64",
            FileFormat::Caf => "caf",
            FileFormat::Dff => "dff",
            FileFormat::Dsf => "dsf",
            FileFormat::Aiff => "aif",
        }
    }
}

impl Display for FileFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFormat::Wav => write!(f, "WAV"),
            FileFormat::W64 => write!(f, "Wave64"),
            FileFormat::Caf => write!(f, "CAF"),
            FileFormat::Dff => write!(f, "DSDIFF"),
            FileFormat::Dsf => write!(f, "DSF"),
            FileFormat::Aiff => write!(f, "AIFF"),
            FileFormat::Other(id) => write!(f, "unknown ({id})"),
        }
    }
}

/// Format-5 configuration block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewConfigBlock {
    pub file_format: Option<FileFormat>,
    pub qmode: u8,
    /// Channel identities or reordering, kept verbatim.
    pub extra: Vec<u8>,
}

impl NewConfigBlock {
    pub fn read(data: &[u8]) -> Self {
        Self {
            file_format: data.first().map(|&b| FileFormat::from(b)),
            qmode: data.get(1).copied().unwrap_or(0),
            extra: data.get(2..).map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }
}

/// Sample rate override: 24 bits, with an optional fourth byte of high bits.
/// Other sizes are ignored.
pub fn read_sample_rate(data: &[u8]) -> Option<u32> {
    match *data {
        [b0, b1, b2] => Some(u32::from_le_bytes([b0, b1, b2, 0])),
        [b0, b1, b2, b3] => Some(u32::from_le_bytes([b0, b1, b2, b3 & 0x7f])),
        _ => None,
    }
}
