use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::Result;
use log::Level;
use wavpack::process::decode::{Decoder, OpenOptions};
use wavpack::process::format::format_samples;
use wavpack::structs::config::FileFormat;

use crate::cli::info::StreamInfo;
use crate::input::InputReader;
use crate::riff::PcmLayout;

/// Samples per channel decoded per message.
const CHUNK_SAMPLES: usize = 4096;

pub enum DecodeEvent {
    Opened {
        info: Box<StreamInfo>,
        layout: PcmLayout,
        /// Container header that can be written back verbatim, with the
        /// format it belongs to.
        stored_header: Option<(FileFormat, Vec<u8>)>,
    },
    Samples {
        pcm: Vec<u8>,
        samples: usize,
    },
    Finished {
        trailer: Vec<u8>,
        crc_errors: u32,
    },
}

pub struct DecoderThreadConfig {
    pub input_path: PathBuf,
    pub options: OpenOptions,
    pub fail_level: Level,
    pub tx: mpsc::Sender<DecodeEvent>,
}

/// Opens and decodes the input on a worker thread. The decoder is created
/// inside the thread since a locked stdin cannot be moved across threads.
pub fn spawn_decoder_thread(config: DecoderThreadConfig) -> thread::JoinHandle<Result<()>> {
    thread::spawn(move || -> Result<()> {
        let DecoderThreadConfig {
            input_path,
            options,
            fail_level,
            tx,
        } = config;

        let reader = InputReader::new(&input_path)?;
        if reader.is_pipe() {
            log::debug!("Reading WavPack stream from stdin");
        }
        let mut decoder = Decoder::open_with_fail_level(reader, options, fail_level)?;

        let opened = DecodeEvent::Opened {
            info: Box::new(StreamInfo::from_decoder(&decoder)),
            layout: output_layout(&decoder),
            stored_header: stored_header(&decoder),
        };
        if tx.send(opened).is_err() {
            return Ok(());
        }

        let channels = decoder.output_channels() as usize;
        let bytes_per_sample = decoder.bytes_per_sample();
        let dsd = decoder.is_dsd();

        let mut buffer = vec![0i32; CHUNK_SAMPLES * channels];
        let mut total_samples = 0u64;

        loop {
            let count = decoder.unpack(&mut buffer, CHUNK_SAMPLES)?;
            if count == 0 {
                break;
            }

            let mut pcm = Vec::new();
            format_samples(&buffer[..count * channels], bytes_per_sample, dsd, &mut pcm)?;
            total_samples += count as u64;

            if tx.send(DecodeEvent::Samples { pcm, samples: count }).is_err() {
                log::debug!("Output closed, stopping decoder after {total_samples} samples");
                return Ok(());
            }
        }

        decoder.read_trailing_blocks()?;

        log::info!(
            "Processing complete: {total_samples} samples, {} bytes read",
            decoder.get_ref().bytes_read()
        );

        // the receiver may already be gone after a write error
        let _ = tx.send(DecodeEvent::Finished {
            trailer: decoder.trailer().to_vec(),
            crc_errors: decoder.crc_errors(),
        });

        Ok(())
    })
}

fn output_layout<R: std::io::Read>(decoder: &Decoder<R>) -> PcmLayout {
    let channels = decoder.output_channels();

    PcmLayout {
        sample_rate: decoder.sample_rate(),
        channels,
        bits_per_sample: decoder.bits_per_sample(),
        bytes_per_sample: decoder.bytes_per_sample(),
        channel_mask: match decoder.reduced_channels() {
            Some(_) => default_channel_mask(channels),
            None => decoder.channel_mask(),
        },
    }
}

pub fn default_channel_mask(channels: u32) -> u32 {
    match channels {
        1 => 0x4,
        2 => 0x3,
        _ => 0,
    }
}

/// The stored header is only valid for the full stream in its stored
/// sample format.
fn stored_header<R: std::io::Read>(decoder: &Decoder<R>) -> Option<(FileFormat, Vec<u8>)> {
    let usable = !decoder.header().is_empty()
        && !decoder.is_float()
        && !decoder.is_dsd()
        && decoder.reduced_channels().is_none();

    usable.then(|| (decoder.file_format(), decoder.header().to_vec()))
}
