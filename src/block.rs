use crate::codec::{get_codec, CodecError};
use crate::header::FormatTag;

/// Default plain-storage threshold: keep compressed output only if it is
/// strictly smaller than the original.
pub const DEFAULT_THRESHOLD: u32 = 100;
pub const DEFAULT_LEVEL: u32 = 9;

/// One block as it will be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub payload: Vec<u8>,
    /// Payload is the original bytes, not codec output.
    pub plain: bool,
}

/// Compress one block, falling back to plain storage when
/// `100 * compressed / original >= threshold`.
pub fn compress_block(
    data: Vec<u8>,
    format: FormatTag,
    level: u32,
    threshold: u32,
) -> Result<StoredBlock, CodecError> {
    let compressed = get_codec(format).compress(&data, level)?;
    let ratio = 100 * compressed.len() as u64 / data.len().max(1) as u64;
    if ratio >= threshold as u64 {
        Ok(StoredBlock { payload: data, plain: true })
    } else {
        Ok(StoredBlock { payload: compressed, plain: false })
    }
}

/// Restore one block from its stored bytes.  `raw` may extend past the
/// block into padding.
pub fn decompress_block(
    raw: &[u8],
    plain: bool,
    format: FormatTag,
    decoded_len: usize,
) -> Result<Vec<u8>, CodecError> {
    if plain {
        return raw.get(..decoded_len).map(<[u8]>::to_vec).ok_or_else(|| {
            CodecError::Decompression(format!(
                "plain block holds {} of {decoded_len} bytes",
                raw.len()
            ))
        });
    }
    get_codec(format).decompress(raw, decoded_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    fn random_block(seed: u64) -> Vec<u8> {
        let mut buf = vec![0u8; 2048];
        StdRng::seed_from_u64(seed).fill_bytes(&mut buf);
        buf
    }

    #[test]
    fn random_data_is_stored_plain() {
        for format in [FormatTag::Ciso, FormatTag::Ziso] {
            for level in 1..=9 {
                let data = random_block(level as u64);
                let b = compress_block(data.clone(), format, level, DEFAULT_THRESHOLD).unwrap();
                assert!(b.plain, "{format:?} level {level}");
                assert_eq!(b.payload, data);
            }
        }
    }

    #[test]
    fn repeated_bytes_compress() {
        for format in [FormatTag::Ciso, FormatTag::Ziso] {
            let b = compress_block(vec![0xAA; 2048], format, 9, DEFAULT_THRESHOLD).unwrap();
            assert!(!b.plain);
            assert!(b.payload.len() < 2048);
            assert_eq!(decompress_block(&b.payload, false, format, 2048).unwrap(), vec![0xAA; 2048]);
        }
    }

    #[test]
    fn lowered_threshold_forces_plain() {
        // Mixed data compresses to roughly half; a 10% threshold rejects that.
        let mut data = random_block(7);
        data[1024..].fill(0);
        let kept = compress_block(data.clone(), FormatTag::Ciso, 9, 100).unwrap();
        assert!(!kept.plain);
        let rejected = compress_block(data.clone(), FormatTag::Ciso, 9, 10).unwrap();
        assert!(rejected.plain);
        assert_eq!(rejected.payload, data);
    }

    #[test]
    fn plain_block_is_truncated_to_length() {
        let mut raw = vec![1u8; 100];
        raw.extend_from_slice(b"XXXX");
        assert_eq!(decompress_block(&raw, true, FormatTag::Ciso, 100).unwrap(), vec![1u8; 100]);
        assert!(decompress_block(&raw[..50], true, FormatTag::Ciso, 100).is_err());
    }
}
