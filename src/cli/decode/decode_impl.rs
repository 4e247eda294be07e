use std::sync::mpsc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use indicatif::{MultiProgress, ProgressBar};
use log::Level;
use wavpack::process::decode::OpenOptions;

use super::decoder_thread::{DecodeEvent, DecoderThreadConfig, spawn_decoder_thread};
use super::output::{AudioWriter, OutputPlan, choose_output, output_path};
use super::progress::{create_progress_bar, finalize_progress_bar, update_progress};
use crate::cli::command::{Cli, DecodeArgs};
use crate::cli::info::StreamInfo;

#[derive(Default)]
struct DecodeProgress {
    writer: Option<AudioWriter>,
    pb: Option<ProgressBar>,
    total_samples: Option<u64>,
    sample_rate: u32,
    decoded_samples: u64,
    finished: Option<(Vec<u8>, u32)>,
}

pub fn cmd_decode(args: &DecodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!(
        "Decoding WavPack stream: {} (strict mode: {})",
        args.input.display(),
        cli.strict
    );

    let fail_level = if cli.strict { Level::Warn } else { Level::Error };

    let (tx, rx) = mpsc::channel();
    let decode_thread = spawn_decoder_thread(DecoderThreadConfig {
        input_path: args.input.clone(),
        options: OpenOptions {
            two_channel_max: args.two_channel_max,
        },
        fail_level,
        tx,
    });

    let start_time = Instant::now();
    let mut state = DecodeProgress::default();

    let handled = receive_events(&rx, args, multi, &mut state);
    // the worker stops at its next send once the receiver is gone
    drop(rx);

    let joined = match decode_thread.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("Decode thread panicked")),
    };

    if let Err(e) = handled.and(joined) {
        if let Some(pb) = &state.pb {
            pb.abandon_with_message("decode failed");
        }
        return Err(e);
    }

    let writer = state.writer.take().context("No audio stream was opened")?;
    let (trailer, crc_errors) = state
        .finished
        .take()
        .context("Decoder stopped before the end of the stream")?;
    writer.finish(&trailer)?;

    if crc_errors > 0 {
        if cli.strict {
            bail!("{crc_errors} blocks failed their CRC check");
        }
        log::warn!("{crc_errors} blocks failed their CRC check and were muted");
    }

    if let Some(total) = state.total_samples {
        if total != state.decoded_samples {
            let message = format!(
                "Decoded {} samples, the stream header promised {total}",
                state.decoded_samples
            );
            if cli.strict {
                bail!(message);
            }
            log::warn!("{message}");
        }
    }

    if let Some(pb) = &state.pb {
        finalize_progress_bar(
            pb,
            state.total_samples,
            state.decoded_samples,
            state.sample_rate,
            start_time,
        );
    }

    log::info!("Decoding completed successfully");
    Ok(())
}

fn receive_events(
    rx: &mpsc::Receiver<DecodeEvent>,
    args: &DecodeArgs,
    multi: Option<&MultiProgress>,
    state: &mut DecodeProgress,
) -> Result<()> {
    while let Ok(event) = rx.recv() {
        match event {
            DecodeEvent::Opened {
                info,
                layout,
                stored_header,
            } => {
                log_stream_info(&info);

                let (stored_format, header) = match stored_header {
                    Some((format, header)) => (Some(format), header),
                    None => (None, Vec::new()),
                };

                let plan = choose_output(args, stored_format, info.dsd)?;
                let path = output_path(
                    &args.input,
                    args.output_path.as_deref(),
                    plan,
                    &info.file_extension,
                )?;

                match plan {
                    OutputPlan::Passthrough => log::info!(
                        "Restoring stored {} header ({} bytes) to {}",
                        info.source_format,
                        header.len(),
                        path.display()
                    ),
                    _ => log::info!("Writing {plan:?} output to {}", path.display()),
                }

                state.writer = Some(AudioWriter::create(&path, plan, layout, &header)?);
                state.total_samples = info.total_samples;
                state.sample_rate = info.sample_rate;
                state.pb = multi
                    .map(|multi| create_progress_bar(multi, info.total_samples))
                    .transpose()?;
            }
            DecodeEvent::Samples { pcm, samples } => {
                state
                    .writer
                    .as_mut()
                    .context("Samples arrived before the stream was opened")?
                    .write_samples(&pcm)?;
                state.decoded_samples += samples as u64;

                if let Some(pb) = &state.pb {
                    update_progress(pb, state.decoded_samples, state.sample_rate);
                }
            }
            DecodeEvent::Finished {
                trailer,
                crc_errors,
            } => state.finished = Some((trailer, crc_errors)),
        }
    }

    Ok(())
}

fn log_stream_info(info: &StreamInfo) {
    log::info!(
        "{} source, {} Hz, {} channels, {} bits, {} ({})",
        info.source_format,
        info.sample_rate,
        info.decoded_channels.unwrap_or(info.channels),
        info.bits_per_sample,
        info.mode,
        info.compression
    );

    if info.correction_stream {
        log::warn!("Correction stream present but not applied");
    }
}
