//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O, block checksums, fixed-point log helpers and
//! error handling shared by the decoding pipeline.

pub mod bitstream_io;
pub mod crc;
pub mod errors;
pub mod log2;
