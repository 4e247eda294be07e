#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("No valid block header found after skipping {0} bytes")]
    Desync(u64),

    #[error("Unexpected end of input while reading a block")]
    UnexpectedEof,

    #[error("Block body truncated: expected {expected} bytes, read {actual}")]
    TruncatedBody { expected: usize, actual: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("Sub-block {id:#04x} declares {len} bytes but only {remaining} remain")]
    Truncated { id: u8, len: usize, remaining: usize },

    #[error("Unsupported metadata id {0:#04x}")]
    UnsupportedId(u8),

    #[error("Invalid {name} size: {len} bytes")]
    InvalidSize { name: &'static str, len: usize },

    #[error("Too many decorrelation terms: {0} > 16")]
    TooManyTerms(usize),

    #[error("Invalid decorrelation term {0}")]
    InvalidTerm(i32),

    #[error("Cross-channel term {0} used in a mono block")]
    CrossChannelTermInMono(i32),

    #[error("Decorrelation weight count {count} exceeds term count {terms}")]
    TooManyWeights { count: usize, terms: usize },

    #[error("Decorrelation samples do not match the pass chain")]
    DecorrSamplesMismatch,

    #[error("Hybrid profile has {0} trailing bytes")]
    HybridProfileTrailing(usize),

    #[error("Int32 info out of range: {sent_bits} sent, {zeros} zeros, {ones} ones, {dups} dups")]
    Int32InfoRange { sent_bits: u8, zeros: u8, ones: u8, dups: u8 },

    #[error("DSD rate multiplier shift {0} is out of range")]
    DsdMultiplier(u8),

    #[error("Audio block carries no main bitstream")]
    MissingBitstream,

    #[error("Alternate extension is not valid UTF-8")]
    InvalidExtension,
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("CRC mismatch in block at sample {block_index}: header {expected:#010x}, decoded {actual:#010x}")]
    CrcMismatch {
        block_index: u64,
        expected: u32,
        actual: u32,
    },

    #[error("Extra-bits CRC mismatch in block at sample {block_index}")]
    ExtendedCrcMismatch { block_index: u64 },

    #[error("Block checksum mismatch in block at sample {0}")]
    BlockChecksum(u64),

    #[error("Bitstream exhausted after {decoded} of {requested} samples")]
    EntropyUnderflow { decoded: usize, requested: usize },

    #[error("Sample magnitude exceeds mute limit {limit} at sample {index}")]
    SampleOverflow { limit: u64, index: u64 },

    #[error("Block carries {actual} channels, stream decodes {expected}")]
    ChannelLayout { expected: usize, actual: usize },

    #[error("DSD decode failed: {0}")]
    Dsd(#[from] DsdError),
}

#[derive(thiserror::Error, Debug)]
pub enum DsdError {
    #[error("DSD block too short")]
    Truncated,

    #[error("DSD history bits {0} > 5")]
    HistoryBits(u8),

    #[error("DSD probability table is incomplete")]
    IncompleteTable,

    #[error("DSD summed probabilities {total} exceed {max}")]
    TableOverflow { total: u32, max: u32 },

    #[error("DSD raw payload is {actual} bytes, expected {expected}")]
    RawSize { expected: usize, actual: usize },

    #[error("Unsupported DSD mode {0}")]
    UnsupportedMode(u8),

    #[error("Context bin {0} has zero total probability")]
    ZeroProbability(usize),

    #[error("Range decoder multiplier is zero")]
    ZeroMultiplier,

    #[error("Range decoder index {index} out of range {total}")]
    IndexOutOfRange { index: u32, total: u32 },
}

#[derive(thiserror::Error, Debug)]
pub enum OpenError {
    #[error("Stream contains no audio block")]
    NoAudio,

    #[error("Only two channels are supported, stream has {0}")]
    TooManyChannels(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum SeekError {
    #[error("Stream length is unknown")]
    UnknownLength,

    #[error("Target sample {target} is beyond the stream end {total}")]
    OutOfRange { target: u64, total: u64 },

    #[error("No block containing sample {0} was found")]
    NotFound(u64),
}

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("Unsupported sample width: {0} bytes")]
    UnsupportedWidth(u32),
}
