//! Data structures representing WavPack format components.
//!
//! Contains the block header, the metadata sub-block framing and the
//! per-kind payload structures that populate the decoder state.

pub mod config;
pub mod decorr;
pub mod dsd;
pub mod extended;
pub mod header;
pub mod metadata;
pub mod words;
