//! Block codecs, one per container [`FormatTag`].
//!
//! # CISO
//! A block is raw deflate.  The writer keeps the big-endian Adler-32 that a
//! zlib stream would carry (the stream minus its two-byte header).  The
//! decoder accepts blocks with or without that trailer and rejects a
//! trailer that does not match the decoded block.
//!
//! # ZISO
//! A block is a bare LZ4 block (no size prefix, no frame).  Aligned
//! containers leave pad bytes after the block, so the decoder first walks
//! the sequence stream to find where the block actually ends.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};
use flate2::bufread::DeflateDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::header::FormatTag;

/// Length of the zlib header stripped from each compressed block.
const ZLIB_HEADER_LEN: usize = 2;
const ADLER_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
}

pub trait Codec: Send + Sync {
    fn format(&self) -> FormatTag;
    /// `level` is 1 (fast) to 9 (small).
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError>;
    /// `data` may carry trailing alignment padding.  The result is exactly
    /// `decoded_len` bytes or an error.
    fn decompress(&self, data: &[u8], decoded_len: usize) -> Result<Vec<u8>, CodecError>;
}

pub struct DeflateCodec;
impl Codec for DeflateCodec {
    fn format(&self) -> FormatTag { FormatTag::Ciso }

    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
        let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::new(level.min(9)));
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        let mut out = enc.finish().map_err(|e| CodecError::Compression(e.to_string()))?;
        out.drain(..ZLIB_HEADER_LEN);
        Ok(out)
    }

    fn decompress(&self, data: &[u8], decoded_len: usize) -> Result<Vec<u8>, CodecError> {
        let mut dec = DeflateDecoder::new(data);
        let mut out = Vec::with_capacity(decoded_len);
        // One byte of headroom so an overlong stream shows up as a length mismatch.
        (&mut dec)
            .take(decoded_len as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        let out = check_len(out, decoded_len)?;

        let rest = data.get(dec.total_in() as usize..).unwrap_or_default();
        check_trailer(rest, &out)?;
        Ok(out)
    }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn format(&self) -> FormatTag { FormatTag::Ziso }

    // lz4_flex has no high-compression mode; every level yields the same block.
    fn compress(&self, data: &[u8], _: u32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::block::compress(data))
    }

    fn decompress(&self, data: &[u8], decoded_len: usize) -> Result<Vec<u8>, CodecError> {
        let end = lz4_block_len(data, decoded_len).ok_or_else(|| {
            CodecError::Decompression("LZ4 sequence stream does not end within the block".into())
        })?;
        let out = lz4_flex::block::decompress(&data[..end], decoded_len)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_len(out, decoded_len)
    }
}

fn check_len(out: Vec<u8>, decoded_len: usize) -> Result<Vec<u8>, CodecError> {
    if out.len() != decoded_len {
        return Err(CodecError::Decompression(format!(
            "decoded {} bytes, expected {decoded_len}",
            out.len()
        )));
    }
    Ok(out)
}

/// `rest` is whatever follows the deflate stream: an Adler-32 trailer
/// (possibly followed by padding), bare padding of one repeated byte, or
/// nothing.  Anything else is a damaged trailer.
fn check_trailer(rest: &[u8], out: &[u8]) -> Result<(), CodecError> {
    let Some(trailer) = rest.get(..ADLER_LEN) else {
        return Ok(());
    };
    let stored = BigEndian::read_u32(trailer);
    let computed = adler32(out);
    if stored == computed || rest.iter().all(|&b| b == rest[0]) {
        return Ok(());
    }
    Err(CodecError::Decompression(format!(
        "Adler-32 mismatch: stored 0x{stored:08X}, computed 0x{computed:08X}"
    )))
}

fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65_521;
    // Longest run before `b` can overflow a u32.
    const NMAX: usize = 5_552;
    let (mut a, mut b) = (1u32, 0u32);
    for chunk in data.chunks(NMAX) {
        for &byte in chunk {
            a += byte as u32;
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

/// Length of the LZ4 block at the front of `data` that decodes to
/// `decoded_len` bytes, or `None` if the sequences run past `data` or
/// overshoot the decoded length.
fn lz4_block_len(data: &[u8], decoded_len: usize) -> Option<usize> {
    let mut pos = 0usize;
    let mut produced = 0usize;
    loop {
        let token = *data.get(pos)?;
        pos += 1;

        let mut literals = (token >> 4) as usize;
        if literals == 15 {
            literals += lz4_varlen(data, &mut pos)?;
        }
        pos = pos.checked_add(literals)?;
        produced = produced.checked_add(literals)?;
        if pos > data.len() {
            return None;
        }
        if produced >= decoded_len {
            return (produced == decoded_len).then_some(pos);
        }

        // Two-byte match offset.
        pos += 2;
        if pos > data.len() {
            return None;
        }
        let mut matched = (token & 0x0F) as usize;
        if matched == 15 {
            matched += lz4_varlen(data, &mut pos)?;
        }
        produced = produced.checked_add(matched + 4)?;
        // The final sequence is always literals only.
        if produced >= decoded_len {
            return None;
        }
    }
}

fn lz4_varlen(data: &[u8], pos: &mut usize) -> Option<usize> {
    let mut len = 0usize;
    loop {
        let b = *data.get(*pos)?;
        *pos += 1;
        len = len.checked_add(b as usize)?;
        if b != 0xFF {
            return Some(len);
        }
    }
}

/// Resolve a format tag to its codec.
pub fn get_codec(format: FormatTag) -> Box<dyn Codec> {
    match format {
        FormatTag::Ciso => Box::new(DeflateCodec),
        FormatTag::Ziso => Box::new(Lz4Codec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn sample() -> Vec<u8> {
        let words = ["sector", "track", "umd", "boot", "the", "data", "image", "of"];
        let mut rng = StdRng::seed_from_u64(42);
        let mut out = Vec::new();
        while out.len() < 2048 {
            out.extend_from_slice(words[rng.gen_range(0..words.len())].as_bytes());
            out.push(b' ');
        }
        out.truncate(2048);
        out
    }

    #[test]
    fn deflate_payload_has_no_zlib_header() {
        let data = vec![0u8; 2048];
        let full = {
            let mut e = ZlibEncoder::new(Vec::new(), Compression::new(9));
            e.write_all(&data).unwrap();
            e.finish().unwrap()
        };
        let stripped = DeflateCodec.compress(&data, 9).unwrap();
        assert_eq!(&full[2..], &stripped[..]);
    }

    #[test]
    fn deflate_ignores_trailing_padding() {
        let data = sample();
        let mut c = DeflateCodec.compress(&data, 6).unwrap();
        c.extend_from_slice(b"XXXXXXXXXXXXXXXX");
        assert_eq!(DeflateCodec.decompress(&c, data.len()).unwrap(), data);
    }

    #[test]
    fn deflate_detects_checksum_damage() {
        let data = sample();
        let mut c = DeflateCodec.compress(&data, 9).unwrap();
        let last = c.len() - 1;
        c[last] ^= 0x01;
        assert!(DeflateCodec.decompress(&c, data.len()).is_err());
    }

    #[test]
    fn deflate_damaged_trailer_before_padding() {
        let data = sample();
        let mut c = DeflateCodec.compress(&data, 9).unwrap();
        let trailer = c.len() - ADLER_LEN;
        c[trailer] ^= 0x80;
        c.extend_from_slice(b"XXXXXXX");
        assert!(DeflateCodec.decompress(&c, data.len()).is_err());
    }

    #[test]
    fn trailerless_raw_deflate_is_accepted() {
        let data = sample();
        let raw = {
            let mut e = flate2::write::DeflateEncoder::new(Vec::new(), Compression::new(9));
            e.write_all(&data).unwrap();
            e.finish().unwrap()
        };
        assert_eq!(DeflateCodec.decompress(&raw, data.len()).unwrap(), data);

        let mut padded = raw;
        padded.extend_from_slice(&[b'X'; 13]);
        assert_eq!(DeflateCodec.decompress(&padded, data.len()).unwrap(), data);
    }

    #[test]
    fn adler32_matches_zlib_trailer() {
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(adler32(&[]), 1);

        let data = vec![0xFFu8; 3 * 5_552 + 17];
        let full = {
            let mut e = ZlibEncoder::new(Vec::new(), Compression::new(6));
            e.write_all(&data).unwrap();
            e.finish().unwrap()
        };
        assert_eq!(BigEndian::read_u32(&full[full.len() - ADLER_LEN..]), adler32(&data));
    }

    #[test]
    fn deflate_level_changes_output() {
        let data = sample();
        let fast = DeflateCodec.compress(&data, 1).unwrap();
        let best = DeflateCodec.compress(&data, 9).unwrap();
        assert_ne!(fast, best);
    }

    #[test]
    fn lz4_ignores_trailing_padding() {
        let data = sample();
        let mut c = Lz4Codec.compress(&data, 9).unwrap();
        let exact = c.len();
        c.extend_from_slice(&[b'X'; 61]);
        assert_eq!(lz4_block_len(&c, data.len()), Some(exact));
        assert_eq!(Lz4Codec.decompress(&c, data.len()).unwrap(), data);
    }

    #[test]
    fn lz4_short_block_is_rejected() {
        let data = vec![7u8; 2048];
        let c = Lz4Codec.compress(&data, 9).unwrap();
        assert!(Lz4Codec.decompress(&c[..c.len() - 1], data.len()).is_err());
        assert!(Lz4Codec.decompress(&c, data.len() + 1).is_err());
    }

    #[test]
    fn codec_matches_tag() {
        assert_eq!(get_codec(FormatTag::Ciso).format(), FormatTag::Ciso);
        assert_eq!(get_codec(FormatTag::Ziso).format(), FormatTag::Ziso);
    }
}
