use std::io::Read;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::Level;
use serde::Serialize;

use super::command::{Cli, InfoArgs, InfoFormat};
use crate::input::InputReader;
use crate::timestamp::time_str;
use wavpack::process::decode::{Decoder, OpenOptions};

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing WavPack stream: {}", args.input.display());

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Reading stream headers...");
            Some(pb)
        }
        None => None,
    };

    let fail_level = if cli.strict { Level::Warn } else { Level::Error };
    let reader = InputReader::new(&args.input)?;
    let options = OpenOptions {
        two_channel_max: true,
    };
    let decoder = Decoder::open_with_fail_level(reader, options, fail_level);

    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    let info = StreamInfo::from_decoder(&decoder?);

    match args.format {
        InfoFormat::Text => display_stream_info(&info),
        InfoFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&info)?),
    }

    Ok(())
}

/// Stream properties reported by `info` and logged when decoding starts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamInfo {
    pub source_format: String,
    pub file_extension: String,
    pub version: String,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsd_rate: Option<u32>,
    pub channels: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded_channels: Option<u32>,
    pub channel_mask: u32,
    pub bits_per_sample: u32,
    pub bytes_per_sample: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_samples: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub mode: String,
    pub compression: String,
    pub float: bool,
    pub dsd: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    pub format_five: bool,
    pub correction_stream: bool,
    pub stored_header_bytes: usize,
}

impl StreamInfo {
    pub fn from_decoder<R: Read>(decoder: &Decoder<R>) -> Self {
        let sample_rate = decoder.sample_rate();
        let total_samples = decoder.total_samples();

        let compression = match decoder.extra_mode() {
            Some(level) => format!("{} Extra-{level}", decoder.compression_level()),
            None => decoder.compression_level().to_string(),
        };

        let mode = if decoder.lossy() {
            "lossy"
        } else {
            "lossless"
        };

        Self {
            source_format: decoder.file_format().to_string(),
            file_extension: decoder.file_extension().to_string(),
            version: format!("0x{:03x}", decoder.version()),
            sample_rate,
            dsd_rate: decoder.is_dsd().then(|| decoder.native_sample_rate()),
            channels: decoder.num_channels(),
            decoded_channels: decoder.reduced_channels(),
            channel_mask: decoder.channel_mask(),
            bits_per_sample: decoder.bits_per_sample(),
            bytes_per_sample: decoder.bytes_per_sample(),
            total_samples,
            duration: total_samples
                .filter(|_| sample_rate > 0)
                .map(|total| time_str(total as f64 / sample_rate as f64)),
            mode: mode.to_string(),
            compression,
            float: decoder.is_float(),
            dsd: decoder.is_dsd(),
            md5: decoder.md5().map(|digest| hex(&digest)),
            format_five: decoder.is_five(),
            correction_stream: decoder.config().correction_stream,
            stored_header_bytes: decoder.header().len(),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn display_stream_info(info: &StreamInfo) {
    println!();
    println!("WavPack Stream Information");
    println!("==========================");
    println!();
    println!("  Source format             {} (.{})", info.source_format, info.file_extension);
    println!("  Stream version            {}", info.version);
    println!("  Sampling rate             {} Hz", info.sample_rate);
    if let Some(rate) = info.dsd_rate {
        println!("  DSD rate                  {rate} Hz");
    }
    println!("  Channels                  {}", info.channels);
    if let Some(decoded) = info.decoded_channels {
        println!("  Decoded channels          {decoded}");
    }
    println!("  Channel mask              0x{:x}", info.channel_mask);
    println!(
        "  Sample size               {} bits ({} bytes)",
        info.bits_per_sample, info.bytes_per_sample
    );
    println!("  Float data                {}", info.float);
    println!("  DSD audio                 {}", info.dsd);
    println!();

    println!("Encoding");
    println!("  Mode                      {}", info.mode);
    println!("  Compression               {}", info.compression);
    println!("  Correction stream         {}", info.correction_stream);
    println!("  Format 5                  {}", info.format_five);
    if let Some(md5) = &info.md5 {
        println!("  MD5                       {md5}");
    }
    println!("  Stored header             {} bytes", info.stored_header_bytes);
    println!();

    println!("Length");
    match (info.total_samples, &info.duration) {
        (Some(total), Some(duration)) => {
            println!("  Samples                   {total}");
            println!("  Duration                  {duration}");
        }
        _ => println!("  Samples                   unknown"),
    }
    println!();
}
