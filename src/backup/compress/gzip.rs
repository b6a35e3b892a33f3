use bon::Builder;
use flate2::write::GzEncoder;
use flate2::Compression;
use getset::Getters;
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::io::Write;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use validator::Validate;

/// Default compression level, same as the `gzip` command line tool
static DEFAULT_COMPRESSION_LEVEL: u32 = 6;
/// Bytes read from the source per compression round
const CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for gzip compression of the dump stream
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct GzipConfig {
    /// Compression level (0-9)
    ///
    /// - 0: No compression, only gzip framing
    /// - 6: Default
    /// - 9: Slowest, smallest files
    #[validate(range(min = 0, max = 9))]
    level: Option<u32>,
}

impl GzipConfig {
    pub fn compression(&self) -> Compression {
        Compression::new(self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL))
    }

    /// Compresses everything `reader` yields into `writer`.
    ///
    /// The encoder writes into an in-memory buffer that is drained to `writer`
    /// after every chunk, so memory use stays bounded by the chunk size and
    /// no blocking write happens on the async runtime.
    ///
    /// Returns the number of compressed bytes written.
    pub async fn compress<R, W>(&self, mut reader: R, writer: &mut W) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut encoder = GzEncoder::new(Vec::with_capacity(CHUNK_SIZE), self.compression());
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            encoder.write_all(&buf[..n])?;
            let compressed = std::mem::take(encoder.get_mut());
            if !compressed.is_empty() {
                writer.write_all(&compressed).await?;
                written += compressed.len() as u64;
            }
        }

        let tail = encoder.finish()?;
        writer.write_all(&tail).await?;
        writer.flush().await?;
        written += tail.len() as u64;

        tracing::debug!("Compressed stream into {} bytes", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_gzip_config_validation() {
        assert!(GzipConfig::default().validate().is_ok());
        assert!(GzipConfig::builder().level(9).build().validate().is_ok());
        assert!(GzipConfig::builder().level(10).build().validate().is_err());
    }

    #[test]
    fn test_compression_level_default() {
        assert_eq!(GzipConfig::default().compression(), Compression::new(6));
        assert_eq!(
            GzipConfig::builder().level(1).build().compression(),
            Compression::fast()
        );
    }

    #[tokio::test]
    async fn test_compress_spans_multiple_chunks() {
        let input: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();

        let written = GzipConfig::default()
            .compress(input.as_slice(), &mut out)
            .await
            .unwrap();

        assert_eq!(written, out.len() as u64);
        assert_eq!(gunzip(&out), input);
    }

    #[tokio::test]
    async fn test_compress_empty_input_is_valid_gzip() {
        let mut out = Vec::new();
        GzipConfig::default()
            .compress(&b""[..], &mut out)
            .await
            .unwrap();

        assert!(!out.is_empty());
        assert!(gunzip(&out).is_empty());
    }
}
