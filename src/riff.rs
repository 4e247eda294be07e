use wavpackd_macros::{ToBytes, riff_chunk_type};

pub const WAVE_FORMAT_PCM: u16 = 1;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xfffe;

/// KSDATAFORMAT_SUBTYPE_PCM
pub const SUBTYPE_PCM: [u8; 16] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

// Sony Wave64 GUIDs
pub const W64_RIFF_GUID: [u8; 16] = [
    0x72, 0x69, 0x66, 0x66, 0x2E, 0x91, 0xCF, 0x11, 0xA5, 0xD6, 0x28, 0xDB, 0x04, 0xC1, 0x00, 0x00,
];
/// Tail shared by the `wave`, `fmt ` and `data` GUIDs, after the fourcc.
const W64_GUID_TAIL: [u8; 12] = [
    0xF3, 0xAC, 0xD3, 0x11, 0x8C, 0xD1, 0x00, 0xC0, 0x4F, 0x8E, 0xDB, 0x8A,
];

pub fn w64_guid(fourcc: &[u8; 4]) -> [u8; 16] {
    let mut guid = [0u8; 16];
    guid[..4].copy_from_slice(fourcc);
    guid[4..].copy_from_slice(&W64_GUID_TAIL);
    guid
}

pub trait RiffChunk {
    fn chunk_id(&self) -> &[u8; 4];
    fn chunk_data(&self) -> Vec<u8>;

    /// Id, 32-bit size, data, padded to an even length.
    fn to_riff(&self) -> Vec<u8> {
        let data = self.chunk_data();
        let mut out = Vec::with_capacity(data.len() + 9);
        out.extend_from_slice(self.chunk_id());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&data);
        if data.len() % 2 != 0 {
            out.push(0);
        }
        out
    }

    /// GUID, 64-bit size counting the 24-byte chunk header, data, padded to
    /// a multiple of eight.
    fn to_w64(&self) -> Vec<u8> {
        let data = self.chunk_data();
        let mut out = Vec::with_capacity(data.len() + 31);
        out.extend_from_slice(&w64_guid(self.chunk_id()));
        out.extend_from_slice(&(data.len() as u64 + 24).to_le_bytes());
        out.extend_from_slice(&data);
        out.resize(out.len().next_multiple_of(8), 0);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ToBytes)]
#[riff_chunk_type(b"fmt ")]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bytes_per_second: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, ToBytes)]
#[riff_chunk_type(b"fmt ")]
pub struct WaveFormatExtensible {
    pub format: WaveFormat,
    pub extension_size: u16,
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
    pub sub_format: [u8; 16],
}

/// The parameters a `fmt ` chunk is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmLayout {
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    pub bytes_per_sample: u32,
    pub channel_mask: u32,
}

impl PcmLayout {
    pub fn block_align(&self) -> u32 {
        self.channels * self.bytes_per_sample
    }

    /// Plain PCM covers mono and stereo at whole-byte depths with the
    /// default speaker mask; anything else needs the extensible form.
    pub fn needs_extensible(&self) -> bool {
        let default_mask = match self.channels {
            1 => 4,
            2 => 3,
            _ => return true,
        };

        self.bits_per_sample != self.bytes_per_sample * 8
            || (self.channel_mask != 0 && self.channel_mask != default_mask)
    }

    fn base(&self, format_tag: u16) -> WaveFormat {
        WaveFormat {
            format_tag,
            channels: self.channels as u16,
            sample_rate: self.sample_rate,
            bytes_per_second: self.sample_rate * self.block_align(),
            block_align: self.block_align() as u16,
            bits_per_sample: (self.bytes_per_sample * 8) as u16,
        }
    }

    /// The `fmt ` chunk for this layout, framed for RIFF or Wave64.
    pub fn fmt_chunk(&self, w64: bool) -> Vec<u8> {
        if self.needs_extensible() {
            let chunk = WaveFormatExtensible {
                format: self.base(WAVE_FORMAT_EXTENSIBLE),
                extension_size: 22,
                valid_bits_per_sample: self.bits_per_sample as u16,
                channel_mask: self.channel_mask,
                sub_format: SUBTYPE_PCM,
            };
            if w64 { chunk.to_w64() } else { chunk.to_riff() }
        } else {
            let chunk = self.base(WAVE_FORMAT_PCM);
            if w64 { chunk.to_w64() } else { chunk.to_riff() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(channels: u32, bits: u32, bytes: u32, mask: u32) -> PcmLayout {
        PcmLayout {
            sample_rate: 44100,
            channels,
            bits_per_sample: bits,
            bytes_per_sample: bytes,
            channel_mask: mask,
        }
    }

    #[test]
    fn plain_stereo_fmt() {
        let chunk = layout(2, 16, 2, 3).fmt_chunk(false);

        assert_eq!(&chunk[..4], b"fmt ");
        assert_eq!(&chunk[4..8], &16u32.to_le_bytes());
        assert_eq!(&chunk[8..10], &WAVE_FORMAT_PCM.to_le_bytes());
        assert_eq!(&chunk[10..12], &2u16.to_le_bytes());
        assert_eq!(&chunk[12..16], &44100u32.to_le_bytes());
        assert_eq!(&chunk[16..20], &176400u32.to_le_bytes());
        assert_eq!(&chunk[20..22], &4u16.to_le_bytes());
        assert_eq!(&chunk[22..24], &16u16.to_le_bytes());
        assert_eq!(chunk.len(), 24);
    }

    #[test]
    fn extensible_when_needed() {
        assert!(!layout(1, 8, 1, 4).needs_extensible());
        assert!(layout(2, 20, 3, 3).needs_extensible());
        assert!(layout(2, 16, 2, 0x30).needs_extensible());
        assert!(layout(6, 16, 2, 0x3f).needs_extensible());

        let chunk = layout(2, 20, 3, 3).fmt_chunk(false);
        assert_eq!(&chunk[4..8], &40u32.to_le_bytes());
        assert_eq!(&chunk[8..10], &WAVE_FORMAT_EXTENSIBLE.to_le_bytes());
        assert_eq!(&chunk[22..24], &24u16.to_le_bytes());
        assert_eq!(&chunk[24..26], &22u16.to_le_bytes());
        assert_eq!(&chunk[26..28], &20u16.to_le_bytes());
        assert_eq!(&chunk[28..32], &3u32.to_le_bytes());
        assert_eq!(&chunk[32..48], &SUBTYPE_PCM);
    }

    #[test]
    fn w64_chunk_framing() {
        let chunk = layout(2, 16, 2, 3).fmt_chunk(true);

        assert_eq!(&chunk[..16], &w64_guid(b"fmt "));
        assert_eq!(&chunk[16..24], &40u64.to_le_bytes());
        assert_eq!(chunk.len(), 40);
    }
}
