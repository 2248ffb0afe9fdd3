use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::{debug, warn};

const LENGTH_PREFIX: usize = 4;

/// A block whose compressed body could not be inflated. The reader has
/// already moved past it using the declared length.
#[derive(Debug, Error)]
#[error("block at offset {offset} ({declared_len} bytes declared) failed to inflate: {cause}")]
pub struct DecodeError {
    pub offset: usize,
    pub declared_len: usize,
    #[source]
    pub cause: io::Error,
}

/// One inflated block and the offset of its length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

/// Lazily walks `(u32 LE length, zlib body)` pairs.
///
/// A trailing fragment shorter than a length prefix, or a final block shorter
/// than its declared length, ends iteration and marks the reader truncated.
pub struct BlockReader<'a> {
    data: &'a [u8],
    offset: usize,
    truncated: bool,
}

impl<'a> BlockReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            truncated: false,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn stop_truncated(&mut self) {
        debug!(
            target: "replay::decode",
            offset = self.offset,
            dropped = self.data.len() - self.offset,
            "container.tail=truncated"
        );
        self.truncated = true;
        self.offset = self.data.len();
    }
}

impl Iterator for BlockReader<'_> {
    type Item = Result<Block, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.data.len() - self.offset;
        if remaining == 0 {
            return None;
        }
        if remaining < LENGTH_PREFIX {
            self.stop_truncated();
            return None;
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&self.data[self.offset..self.offset + LENGTH_PREFIX]);
        let declared_len = u32::from_le_bytes(prefix) as usize;
        if remaining - LENGTH_PREFIX < declared_len {
            self.stop_truncated();
            return None;
        }

        let block_offset = self.offset;
        let body_start = block_offset + LENGTH_PREFIX;
        let body = &self.data[body_start..body_start + declared_len];
        self.offset = body_start + declared_len;

        Some(
            inflate_block(body)
                .map(|bytes| Block {
                    offset: block_offset,
                    bytes,
                })
                .map_err(|cause| DecodeError {
                    offset: block_offset,
                    declared_len,
                    cause,
                }),
        )
    }
}

fn inflate_block(body: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Result of decoding a whole container: the concatenated payload plus what
/// had to be skipped on the way.
#[derive(Debug, Default)]
pub struct InflatedContainer {
    pub bytes: Vec<u8>,
    pub blocks_decoded: usize,
    pub failures: Vec<DecodeError>,
    pub truncated: bool,
}

impl InflatedContainer {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.truncated
    }
}

/// Decodes every block of `raw`, skipping blocks that fail to inflate.
pub fn inflate_container(raw: &[u8]) -> InflatedContainer {
    let mut reader = BlockReader::new(raw);
    let mut inflated = InflatedContainer::default();

    for block in reader.by_ref() {
        match block {
            Ok(block) => {
                inflated.bytes.extend_from_slice(&block.bytes);
                inflated.blocks_decoded += 1;
            }
            Err(err) => {
                warn!(
                    target: "replay::decode",
                    offset = err.offset,
                    declared_len = err.declared_len,
                    error = %err.cause,
                    "container.block=skipped"
                );
                inflated.failures.push(err);
            }
        }
    }
    inflated.truncated = reader.is_truncated();

    debug!(
        target: "replay::decode",
        blocks = inflated.blocks_decoded,
        failures = inflated.failures.len(),
        truncated = inflated.truncated,
        bytes = inflated.bytes.len(),
        "container.decoded"
    );
    inflated
}

/// Compresses `data` into a zlib body suitable for a container block.
pub fn encode_block(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Appends an already compressed body with its length prefix.
pub fn append_raw_block(out: &mut Vec<u8>, body: &[u8]) {
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
}

/// Builds a container holding one compressed block per input slice.
pub fn write_container<B: AsRef<[u8]>>(blocks: &[B]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    for block in blocks {
        let body = encode_block(block.as_ref())?;
        append_raw_block(&mut out, &body);
    }
    Ok(out)
}
