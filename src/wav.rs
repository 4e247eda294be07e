use std::io::{self, BufWriter, Seek, SeekFrom, Write};

use crate::riff::{PcmLayout, W64_RIFF_GUID, w64_guid};

/// Container written around the PCM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// RIFF/WAVE, limited to 4 GiB.
    Riff,
    /// Sony Wave64.
    Wave64,
}

/// RIFF/WAVE or Wave64 writer for little-endian PCM. Sizes are written as
/// placeholders by [`write_header`](WavWriter::write_header) and patched by
/// [`finish`](WavWriter::finish).
pub struct WavWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    container: Container,
    layout: PcmLayout,
    file_size_position: u64,
    data_size_position: u64,
    data_start: u64,
    data_written: u64,
}

impl<W: Write + Seek> WavWriter<W> {
    pub fn new(writer: W, container: Container) -> Self {
        Self {
            writer: BufWriter::new(writer),
            container,
            layout: PcmLayout {
                sample_rate: 44100,
                channels: 2,
                bits_per_sample: 16,
                bytes_per_sample: 2,
                channel_mask: 3,
            },
            file_size_position: 0,
            data_size_position: 0,
            data_start: 0,
            data_written: 0,
        }
    }

    pub fn configure_audio_format(&mut self, layout: PcmLayout) -> io::Result<()> {
        if self.data_written > 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot change format after writing data",
            ));
        }

        if !(1..=4).contains(&layout.bytes_per_sample) || layout.channels == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Unsupported PCM layout: {} channels of {} bytes",
                    layout.channels, layout.bytes_per_sample
                ),
            ));
        }

        self.layout = layout;
        Ok(())
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        match self.container {
            Container::Riff => {
                self.writer.write_all(b"RIFF")?;
                self.file_size_position = self.writer.stream_position()?;
                self.writer.write_all(&0u32.to_le_bytes())?;
                self.writer.write_all(b"WAVE")?;

                self.writer.write_all(&self.layout.fmt_chunk(false))?;

                self.writer.write_all(b"data")?;
                self.data_size_position = self.writer.stream_position()?;
                self.writer.write_all(&0u32.to_le_bytes())?;
            }
            Container::Wave64 => {
                self.writer.write_all(&W64_RIFF_GUID)?;
                self.file_size_position = self.writer.stream_position()?;
                self.writer.write_all(&0u64.to_le_bytes())?;
                self.writer.write_all(&w64_guid(b"wave"))?;

                self.writer.write_all(&self.layout.fmt_chunk(true))?;

                self.writer.write_all(&w64_guid(b"data"))?;
                self.data_size_position = self.writer.stream_position()?;
                self.writer.write_all(&0u64.to_le_bytes())?;
            }
        }

        self.data_start = self.writer.stream_position()?;
        Ok(())
    }

    /// Appends interleaved sample bytes as produced by `format_samples`.
    pub fn write_samples(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.container == Container::Riff
            && self.data_start + self.data_written + bytes.len() as u64 > u32::MAX as u64
        {
            return Err(io::Error::other(
                "RIFF size limit exceeded, use the w64 format for this stream",
            ));
        }

        self.writer.write_all(bytes)?;
        self.data_written += bytes.len() as u64;
        Ok(())
    }

    /// Pads the data chunk and writes the final chunk sizes.
    pub fn finish(&mut self) -> io::Result<()> {
        let padding = match self.container {
            Container::Riff => self.data_written % 2,
            Container::Wave64 => self.data_written.next_multiple_of(8) - self.data_written,
        };
        self.writer.write_all(&vec![0u8; padding as usize])?;
        self.writer.flush()?;

        let end = self.writer.stream_position()?;

        match self.container {
            Container::Riff => {
                self.writer.seek(SeekFrom::Start(self.data_size_position))?;
                self.writer.write_all(&(self.data_written as u32).to_le_bytes())?;

                self.writer.seek(SeekFrom::Start(self.file_size_position))?;
                self.writer.write_all(&((end - 8) as u32).to_le_bytes())?;
            }
            Container::Wave64 => {
                // chunk sizes include the 24-byte GUID and size header
                self.writer.seek(SeekFrom::Start(self.data_size_position))?;
                self.writer.write_all(&(self.data_written + 24).to_le_bytes())?;

                self.writer.seek(SeekFrom::Start(self.file_size_position))?;
                self.writer.write_all(&end.to_le_bytes())?;
            }
        }

        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;

        Ok(())
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }

    pub fn stats(&self) -> WavStats {
        WavStats {
            data_written: self.data_written,
            layout: self.layout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WavStats {
    pub data_written: u64,
    pub layout: PcmLayout,
}
