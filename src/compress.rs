//! Certificate compression and decompression per RFC 8879.
//!
//! The server compresses its Certificate message when the client's
//! `compress_certificate` extension names an algorithm we have a
//! [`CertCompressor`] for.  Custom algorithms can be supplied through the
//! traits here.

use alloc::vec::Vec;
use core::fmt::Debug;

use crate::enums::CertificateCompressionAlgorithm;

/// The `CertCompressor` implementations enabled by crate features, in
/// preference order.
pub fn default_cert_compressors() -> &'static [&'static dyn CertCompressor] {
    &[
        #[cfg(feature = "brotli")]
        BROTLI_COMPRESSOR,
        #[cfg(feature = "zlib")]
        ZLIB_COMPRESSOR,
    ]
}

/// An available certificate compression algorithm.
pub trait CertCompressor: Debug + Send + Sync {
    /// Compress `input`, returning the result.
    ///
    /// `Err(CompressionFailed)` may be returned for any reason.
    fn compress(&self, input: Vec<u8>) -> Result<Vec<u8>, CompressionFailed>;

    /// Which algorithm this compressor handles.
    fn algorithm(&self) -> CertificateCompressionAlgorithm;
}

/// An available certificate decompression algorithm.
pub trait CertDecompressor: Debug + Send + Sync {
    /// Decompress `input`, writing the result to `output`.
    ///
    /// `output` is sized to the declared length of the decompressed data;
    /// producing more or fewer bytes is an error.
    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<(), DecompressionFailed>;

    /// Which algorithm this decompressor handles.
    fn algorithm(&self) -> CertificateCompressionAlgorithm;
}

/// A content-less error for when `CertCompressor::compress` fails.
#[derive(Debug)]
pub struct CompressionFailed;

/// A content-less error for when `CertDecompressor::decompress` fails.
#[derive(Debug)]
pub struct DecompressionFailed;

#[cfg(feature = "brotli")]
mod feat_brotli {
    use std::io::{Cursor, Write};

    use super::*;

    /// A certificate compressor for the brotli algorithm.
    pub const BROTLI_COMPRESSOR: &dyn CertCompressor = &BrotliCompressor;

    /// A certificate decompressor for the brotli algorithm.
    pub const BROTLI_DECOMPRESSOR: &dyn CertDecompressor = &BrotliDecompressor;

    /// Brotli buffer size, matching the crate's own example usage.
    const BUFFER_SIZE: usize = 4096;

    /// Default lgwin parameter.
    const LGWIN: u32 = 22;

    /// Handshakes are interactive, so moderate quality.
    const QUALITY: u32 = 4;

    #[derive(Debug)]
    struct BrotliCompressor;

    impl CertCompressor for BrotliCompressor {
        fn compress(&self, input: Vec<u8>) -> Result<Vec<u8>, CompressionFailed> {
            let output = Cursor::new(Vec::with_capacity(input.len() / 2));
            let mut compressor =
                brotli::CompressorWriter::new(output, BUFFER_SIZE, QUALITY, LGWIN);
            compressor
                .write_all(&input)
                .map_err(|_| CompressionFailed)?;
            Ok(compressor.into_inner().into_inner())
        }

        fn algorithm(&self) -> CertificateCompressionAlgorithm {
            CertificateCompressionAlgorithm::Brotli
        }
    }

    #[derive(Debug)]
    struct BrotliDecompressor;

    impl CertDecompressor for BrotliDecompressor {
        fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<(), DecompressionFailed> {
            let mut in_cursor = Cursor::new(input);
            let mut out_cursor = Cursor::new(output);

            brotli::BrotliDecompress(&mut in_cursor, &mut out_cursor)
                .map_err(|_| DecompressionFailed)?;

            if out_cursor.position() as usize != out_cursor.into_inner().len() {
                return Err(DecompressionFailed);
            }

            Ok(())
        }

        fn algorithm(&self) -> CertificateCompressionAlgorithm {
            CertificateCompressionAlgorithm::Brotli
        }
    }
}

#[cfg(feature = "brotli")]
pub use feat_brotli::{BROTLI_COMPRESSOR, BROTLI_DECOMPRESSOR};

#[cfg(feature = "zlib")]
mod feat_zlib {
    use std::io::{Read, Write};

    use super::*;

    /// A certificate compressor for the zlib algorithm.
    pub const ZLIB_COMPRESSOR: &dyn CertCompressor = &ZlibCompressor;

    /// A certificate decompressor for the zlib algorithm.
    pub const ZLIB_DECOMPRESSOR: &dyn CertDecompressor = &ZlibDecompressor;

    #[derive(Debug)]
    struct ZlibCompressor;

    impl CertCompressor for ZlibCompressor {
        fn compress(&self, input: Vec<u8>) -> Result<Vec<u8>, CompressionFailed> {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(&input)
                .map_err(|_| CompressionFailed)?;
            encoder.finish().map_err(|_| CompressionFailed)
        }

        fn algorithm(&self) -> CertificateCompressionAlgorithm {
            CertificateCompressionAlgorithm::Zlib
        }
    }

    #[derive(Debug)]
    struct ZlibDecompressor;

    impl CertDecompressor for ZlibDecompressor {
        fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<(), DecompressionFailed> {
            let mut decoder = flate2::read::ZlibDecoder::new(input);
            decoder
                .read_exact(output)
                .map_err(|_| DecompressionFailed)?;

            // the declared length must be exact
            let mut overrun = [0u8; 1];
            match decoder.read(&mut overrun) {
                Ok(0) => Ok(()),
                _ => Err(DecompressionFailed),
            }
        }

        fn algorithm(&self) -> CertificateCompressionAlgorithm {
            CertificateCompressionAlgorithm::Zlib
        }
    }
}

#[cfg(feature = "zlib")]
pub use feat_zlib::{ZLIB_COMPRESSOR, ZLIB_DECOMPRESSOR};

#[cfg(all(test, feature = "brotli", feature = "zlib"))]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let input = b"hello certificate chain hello certificate chain".to_vec();
        for (compressor, decompressor) in [
            (BROTLI_COMPRESSOR, BROTLI_DECOMPRESSOR),
            (ZLIB_COMPRESSOR, ZLIB_DECOMPRESSOR),
        ] {
            let compressed = compressor.compress(input.clone()).unwrap();
            let mut output = vec![0u8; input.len()];
            decompressor
                .decompress(&compressed, &mut output)
                .unwrap();
            assert_eq!(output, input);
            assert_eq!(compressor.algorithm(), decompressor.algorithm());
        }
    }

    #[test]
    fn wrong_declared_length_fails() {
        let compressed = ZLIB_COMPRESSOR.compress(b"abcdef".to_vec()).unwrap();
        let mut too_short = vec![0u8; 3];
        assert!(ZLIB_DECOMPRESSOR
            .decompress(&compressed, &mut too_short)
            .is_err());
        let mut too_long = vec![0u8; 10];
        assert!(ZLIB_DECOMPRESSOR
            .decompress(&compressed, &mut too_long)
            .is_err());
    }
}
