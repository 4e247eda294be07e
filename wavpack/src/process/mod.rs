/// Block header scanning and resynchronization.
///
/// Provides the [`BlockScanner`](scan::BlockScanner), which finds block
/// headers in a byte source and reads each [`Block`](scan::Block) body.
pub mod scan;

/// Adaptive entropy decoding of prediction residuals.
pub mod words;

/// Decorrelation passes that rebuild samples from residuals.
pub mod decorr;

/// Float scaling, 32-bit integer widening and final shifts.
pub mod fixup;

/// DSD block decoding.
pub mod dsd;

/// Stream decoding.
///
/// Provides the [`Decoder`](decode::Decoder), which opens a stream, tracks
/// per-block state across calls and unpacks interleaved samples.
pub mod decode;

/// Sample-accurate repositioning for seekable sources.
pub mod seek;

/// Packing of decoded samples into little-endian PCM bytes.
pub mod format;
