#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Decoder for WavPack 4 and 5 streams (stream versions 0x402 to 0x410).
//!
//! ### Stream Organization
//!
//! **External Structure**: A sequence of blocks, each framed by a 32-byte
//! header carrying the sample range, format flags and a checksum of the
//! decoded audio.
//! **Internal Structure**: Metadata sub-blocks holding the predictor state,
//! entropy statistics and one or more bitstreams.
//!
//! ### Decode Pipeline
//!
//! - Entropy decoding of residuals with adaptive medians
//! - Up to 16 decorrelation passes, mono or stereo
//! - Joint stereo, extended integer and float reconstruction
//! - DSD audio in raw and fast modes
//!
//! Multichannel streams are split into mono and stereo blocks; only the
//! first of them is decoded, and only when asked to with
//! [`process::decode::OpenOptions::two_channel_max`]. Correction (`.wvc`)
//! streams are detected but not applied.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wavpack::process::{decode::Decoder, format::format_samples};
//!
//! let file = std::fs::File::open("music.wv")?;
//! let mut decoder = Decoder::open(std::io::BufReader::new(file))?;
//!
//! let channels = decoder.output_channels() as usize;
//! let mut samples = vec![0i32; 4096 * channels];
//! let mut pcm = Vec::new();
//!
//! loop {
//!     let count = decoder.unpack(&mut samples, 4096)?;
//!     if count == 0 {
//!         break;
//!     }
//!
//!     format_samples(
//!         &samples[..count * channels],
//!         decoder.bytes_per_sample(),
//!         decoder.is_dsd(),
//!         &mut pcm,
//!     )?;
//! }
//!
//! if decoder.crc_errors() > 0 {
//!     eprintln!("{} blocks failed their checksum", decoder.crc_errors());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Processing of WavPack streams.
///
/// 1. **Scanning** ([`process::scan`]): Finds block headers and reads block
///    bodies, resynchronizing on damaged input.
///
/// 2. **Decoding** ([`process::decode`]): Unpacks blocks into interleaved
///    samples, verifying each block's checksum.
///
/// 3. **Seeking** ([`process::seek`]): Moves to a sample in seekable sources.
///
/// 4. **Formatting** ([`process::format`]): Packs samples into PCM bytes.
pub mod process;

/// Data structures representing WavPack format components.
///
/// - **Block Header** ([`structs::header`]): Sample range, flags and checksum
/// - **Metadata** ([`structs::metadata`]): Sub-block framing and dispatch
/// - **Decorrelation** ([`structs::decorr`]): Predictor terms and state
/// - **Entropy** ([`structs::words`]): Median and bitrate statistics
/// - **Extended Formats** ([`structs::extended`]): 32-bit integer and float info
/// - **Configuration** ([`structs::config`]): Channels, rate and file format
/// - **DSD** ([`structs::dsd`]): DSD block header and probability tables
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading
/// - **Checksums** ([`utils::crc`]): Audio and block checksums
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Log Tables** ([`utils::log2`]): Fixed-point log and exp helpers
pub mod utils;
