//! Gzip transform plus the timing model used to charge for it.
//!
//! The bytes are really compressed so that sizes on the wire are honest, but the
//! time a node spends doing it is derived from the amount of data handled rather
//! than measured on the host, which keeps runs reproducible.

use std::io::{self, Read, Write};
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionModel {
    pub compress_ns_per_byte: u64,
    pub decompress_ns_per_byte: u64,
}

impl Default for CompressionModel {
    fn default() -> Self {
        Self {
            compress_ns_per_byte: 8,
            decompress_ns_per_byte: 2,
        }
    }
}

impl CompressionModel {
    /// Time to compress `input_len` raw bytes.
    pub fn compress_cost(&self, input_len: usize) -> Duration {
        Duration::from_nanos((input_len as u64).saturating_mul(self.compress_ns_per_byte))
    }

    /// Time to inflate back to `output_len` raw bytes.
    pub fn decompress_cost(&self, output_len: usize) -> Duration {
        Duration::from_nanos((output_len as u64).saturating_mul(self.decompress_ns_per_byte))
    }
}

pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

pub fn compress_and_measure(data: &[u8], model: &CompressionModel) -> io::Result<(Vec<u8>, Duration)> {
    let compressed = compress(data)?;
    Ok((compressed, model.compress_cost(data.len())))
}

pub fn decompress_and_measure(data: &[u8], model: &CompressionModel) -> io::Result<(Vec<u8>, Duration)> {
    let raw = decompress(data)?;
    let cost = model.decompress_cost(raw.len());
    Ok((raw, cost))
}
