use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use wavpack::structs::config::FileFormat;

use crate::cli::command::{AudioFormat, DecodeArgs};
use crate::riff::PcmLayout;
use crate::wav::{Container, WavWriter};

/// How decoded audio is wrapped on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPlan {
    /// Stored header, samples, stored trailer.
    Passthrough,
    /// Freshly generated RIFF or Wave64 header.
    Container(Container),
    /// Samples only.
    Raw,
}

pub fn choose_output(
    args: &DecodeArgs,
    stored_format: Option<FileFormat>,
    dsd: bool,
) -> Result<OutputPlan> {
    if args.format == AudioFormat::Pcm {
        return Ok(OutputPlan::Raw);
    }

    if dsd {
        bail!("DSD audio can only be written as raw bytes, use --format pcm");
    }

    let passthrough = !args.no_passthrough
        && matches!(
            (args.format, stored_format),
            (AudioFormat::Wav, Some(FileFormat::Wav)) | (AudioFormat::W64, Some(FileFormat::W64))
        );

    Ok(match (passthrough, args.format) {
        (true, _) => OutputPlan::Passthrough,
        (false, AudioFormat::W64) => OutputPlan::Container(Container::Wave64),
        _ => OutputPlan::Container(Container::Riff),
    })
}

/// Output path for `plan`: the explicit path, or the input with the
/// extension of the written format.
pub fn output_path(
    input: &Path,
    explicit: Option<&Path>,
    plan: OutputPlan,
    stored_extension: &str,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if crate::input::is_pipe_path(input) {
        bail!("--output-path is required when reading from stdin");
    }

    let extension = match plan {
        OutputPlan::Passthrough => stored_extension,
        OutputPlan::Container(Container::Riff) => "wav",
        OutputPlan::Container(Container::Wave64) => "w64",
        OutputPlan::Raw => "pcm",
    };

    let path = input.with_extension(extension);
    if path == input {
        bail!(
            "Output would overwrite the input {}, use --output-path",
            input.display()
        );
    }

    Ok(path)
}

pub enum AudioWriter {
    Passthrough(BufWriter<File>),
    Container(WavWriter<File>),
    Raw(BufWriter<File>),
}

impl AudioWriter {
    pub fn create(path: &Path, plan: OutputPlan, layout: PcmLayout, header: &[u8]) -> Result<Self> {
        let file = File::create(path)?;

        Ok(match plan {
            OutputPlan::Passthrough => {
                let mut writer = BufWriter::new(file);
                writer.write_all(header)?;
                AudioWriter::Passthrough(writer)
            }
            OutputPlan::Container(container) => {
                let mut writer = WavWriter::new(file, container);
                writer.configure_audio_format(layout)?;
                writer.write_header()?;
                AudioWriter::Container(writer)
            }
            OutputPlan::Raw => AudioWriter::Raw(BufWriter::new(file)),
        })
    }

    pub fn write_samples(&mut self, pcm: &[u8]) -> Result<()> {
        match self {
            AudioWriter::Passthrough(writer) | AudioWriter::Raw(writer) => writer.write_all(pcm)?,
            AudioWriter::Container(writer) => writer.write_samples(pcm)?,
        }
        Ok(())
    }

    /// Completes the file. The stored trailer is only meaningful after a
    /// stored header.
    pub fn finish(self, trailer: &[u8]) -> Result<()> {
        match self {
            AudioWriter::Passthrough(mut writer) => {
                writer.write_all(trailer)?;
                writer.flush()?;
            }
            AudioWriter::Container(mut writer) => {
                if !trailer.is_empty() {
                    log::debug!("Dropping {} bytes of stored trailer", trailer.len());
                }
                writer.finish()?;
                log::debug!("Wrote {} bytes of sample data", writer.stats().data_written);
                writer.into_inner()?.sync_all()?;
            }
            AudioWriter::Raw(mut writer) => writer.flush()?,
        }
        Ok(())
    }
}
