use crate::structs::header::{BlockHeader, HEADER_SIZE};
use crate::utils::errors::ScanError;
use log::{debug, warn};
use std::io::{self, Read};

/// Bytes that may be skipped while looking for a header.
pub const MAX_SKIP: u64 = 1_048_576;

/// A block header with its body.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub body: Vec<u8>,
}

impl Block {
    /// Header bytes followed by the body, as they appeared in the stream.
    pub fn raw_prefix(&self, len: usize) -> Vec<u8> {
        let header = &self.header;
        let mut raw = Vec::with_capacity(HEADER_SIZE + self.body.len());
        raw.extend_from_slice(b"wvpk");
        raw.extend_from_slice(&header.ck_size.to_le_bytes());
        raw.extend_from_slice(&header.version.to_le_bytes());
        raw.push(header.block_index_u8);
        raw.push(header.total_samples_u8);
        raw.extend_from_slice(&header.total_samples_low.to_le_bytes());
        raw.extend_from_slice(&header.block_index_low.to_le_bytes());
        raw.extend_from_slice(&header.block_samples.to_le_bytes());
        raw.extend_from_slice(&header.flags.to_le_bytes());
        raw.extend_from_slice(&header.crc.to_le_bytes());
        raw.extend_from_slice(&self.body);
        raw.truncate(len);
        raw
    }
}

/// Locates block headers in a byte source.
///
/// Scanning shifts a 32-byte window forward until the window holds a valid
/// header, skipping straight to the next `w` after each miss. At most
/// [`MAX_SKIP`] bytes are skipped before giving up with
/// [`ScanError::Desync`]; no bytes past the header are consumed.
///
/// # Example
///
/// ```rust,no_run
/// use wavpack::process::scan::BlockScanner;
///
/// let file = std::fs::File::open("music.wv")?;
/// let mut scanner = BlockScanner::new(std::io::BufReader::new(file));
///
/// for block in &mut scanner {
///     let block = block?;
///     println!(
///         "block at sample {}: {} samples",
///         block.header.block_index(),
///         block.header.block_samples
///     );
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct BlockScanner<R: Read> {
    reader: R,
    position: u64,
    average_block_size: u32,
    blocks_read: usize,
}

impl<R: Read> BlockScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: 0,
            average_block_size: 0,
            blocks_read: 0,
        }
    }

    /// Byte offset of the next unread byte, relative to where scanning began.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Resets the offset after the underlying source was repositioned.
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    pub fn blocks_read(&self) -> usize {
        self.blocks_read
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Finds and parses the next header.
    pub fn next_header(&mut self) -> Result<BlockHeader, ScanError> {
        let mut window = [0u8; HEADER_SIZE];
        let mut kept = 0;
        let mut skipped = 0u64;

        loop {
            window.copy_within(HEADER_SIZE - kept.., 0);

            let wanted = HEADER_SIZE - kept;
            if self.fill(&mut window[kept..])? != wanted {
                return Err(ScanError::UnexpectedEof);
            }

            if let Some(mut header) = BlockHeader::from_bytes(&window) {
                if skipped > 0 {
                    warn!("Skipped {skipped} bytes of invalid data before block header");
                }

                header.stream_position = self.position - HEADER_SIZE as u64;
                self.average_block_size = if self.average_block_size == 0 {
                    header.ck_size
                } else {
                    ((self.average_block_size as u64 + header.ck_size as u64) / 2) as u32
                };
                header.average_block_size = self.average_block_size;

                return Ok(header);
            }

            let skip = window[1..]
                .iter()
                .position(|&b| b == b'w')
                .map_or(HEADER_SIZE, |i| i + 1);
            kept = HEADER_SIZE - skip;
            skipped += skip as u64;

            if skipped > MAX_SKIP {
                return Err(ScanError::Desync(skipped));
            }
        }
    }

    /// Reads the body that follows `header`.
    pub fn read_body(&mut self, header: &BlockHeader) -> Result<Vec<u8>, ScanError> {
        let expected = header.body_len();
        let mut body = vec![0u8; expected];
        let actual = self.fill(&mut body)?;

        if actual != expected {
            return Err(ScanError::TruncatedBody { expected, actual });
        }

        Ok(body)
    }

    /// Reads the next header and its body.
    pub fn read_block(&mut self) -> Result<Block, ScanError> {
        let header = self.next_header()?;
        let body = self.read_body(&header)?;
        self.blocks_read += 1;

        debug!(
            "Block {}: index {} samples {} flags {:#010x}",
            self.blocks_read,
            header.block_index(),
            header.block_samples,
            header.flags
        );

        Ok(Block { header, body })
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, ScanError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.position += filled as u64;
        Ok(filled)
    }
}

/// Yields blocks until the source ends. A clean or truncated end of input
/// ends iteration; other failures are yielded once, then iteration stops.
impl<R: Read> Iterator for BlockScanner<R> {
    type Item = Result<Block, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_block() {
            Ok(block) => Some(Ok(block)),
            Err(ScanError::UnexpectedEof) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
