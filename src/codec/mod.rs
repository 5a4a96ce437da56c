// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Record-payload compression hook.
//!
//! An opened store optionally pipes record values through a codec before
//! writing and after reading. `None` is a passthrough; `Deflate` uses zlib
//! (flate2) and `Xz` uses LZMA2 at level 6, the same archival settings the
//! backup tooling uses elsewhere in the reed family. Only the value side of
//! a record is compressed: keys stay raw so bucket-chain comparison never
//! has to inflate a payload.

use crate::error::{compression_failed, ReedResult};
use std::io::Write;


/// XZ compression preset (balanced ratio versus speed).
const XZ_LEVEL: u32 = 6;

/// Payload codec selected by the store's option bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Passthrough.
    None,
    /// zlib Deflate.
    Deflate,
    /// XZ (LZMA2).
    Xz,
}

impl Codec {
    /// Compresses a record value.
    ///
    /// ## Input
    /// - `data`: raw value bytes
    ///
    /// ## Output
    /// - `Vec<u8>`: encoded bytes; for `Codec::None` an owned copy of the
    ///   input
    ///
    /// ## Error Conditions
    /// - Returns `ReedError::CompressionFailed` when the encoder reports an
    ///   error (practically only on memory exhaustion)
    pub fn compress(&self, data: &[u8]) -> ReedResult<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Deflate => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(data)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| compression_failed(e.to_string()))
            }
            Self::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), XZ_LEVEL);
                encoder
                    .write_all(data)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| compression_failed(e.to_string()))
            }
        }
    }

    /// Decompresses a record value.
    ///
    /// ## Error Conditions
    /// - Returns `ReedError::CompressionFailed` on malformed input, which a
    ///   store read path reports as corruption of that record
    pub fn decompress(&self, data: &[u8]) -> ReedResult<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Deflate => {
                let mut decoder = flate2::write::ZlibDecoder::new(Vec::new());
                decoder
                    .write_all(data)
                    .and_then(|_| decoder.finish())
                    .map_err(|e| compression_failed(e.to_string()))
            }
            Self::Xz => {
                let mut decoder = xz2::write::XzDecoder::new(Vec::new());
                decoder
                    .write_all(data)
                    .and_then(|_| decoder.finish())
                    .map_err(|e| compression_failed(e.to_string()))
            }
        }
    }

    /// Whether this codec changes the payload bytes.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }
}
