#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Codec for the proprietary payload format used by the intercepted game API.
//!
//! The wire format, outermost first, is: Base64 (standard alphabet, padded) wrapping
//! AES-128-CBC ciphertext (PKCS#7 padded) wrapping an optional zlib deflate stream.
//! The AES key and IV are fixed by the upstream protocol, not a secret of this crate.

use aes::Aes128;
use cbc::cipher::block_padding::{Pkcs7, UnpadError};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::io::{Read, Write};
use thiserror::Error;

type CbcEncryptor = cbc::Encryptor<Aes128>;
type CbcDecryptor = cbc::Decryptor<Aes128>;

/// The fixed 16-byte AES-128 key used by the game's API v2.
const KEY: &[u8; 16] = b"Gr4S2eiNl7zq5MrU";
/// The cipher always runs with an all-zero IV; this is a protocol fact, not a recommendation.
const IV: [u8; 16] = [0u8; 16];

const AES_BLOCK_SIZE: usize = 16;

/// Errors raised while decoding or encoding a payload.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Ciphertext was shorter than a single AES block.
    #[error("ciphertext too short")]
    CiphertextTooShort,
    /// Ciphertext length was not a multiple of the AES block size.
    #[error("ciphertext is not a multiple of the block size")]
    CiphertextNotBlockAligned,
    /// PKCS#7 unpadding rejected the decrypted bytes.
    #[error("invalid padding on input")]
    BadPadding,
    /// The caller supplied zero input bytes to an operation that requires at least one.
    #[error("input must not be empty")]
    EmptyInput,
    /// The input was not valid standard Base64.
    #[error("invalid base64: {0}")]
    BadBase64(#[from] base64::DecodeError),
    /// The input was not a valid zlib stream.
    #[error("invalid zlib stream: {0}")]
    BadZlibStream(#[from] std::io::Error),
}

/// Encrypts `plaintext` with AES-128-CBC under the fixed key and zero IV, after PKCS#7 padding.
///
/// Fails with [`CodecError::EmptyInput`] if `plaintext` is empty, matching the upstream
/// protocol's padding scheme, which has no representation for a zero-length message.
pub fn encrypt_bytes(plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    if plaintext.is_empty() {
        return Err(CodecError::EmptyInput);
    }
    let mut buf = vec![0u8; plaintext.len() + AES_BLOCK_SIZE];
    let ciphertext_len = {
        let cipher = CbcEncryptor::new(KEY.into(), &IV.into());
        cipher
            .encrypt_padded_b2b_mut::<Pkcs7>(plaintext, &mut buf)
            .map_err(|_| CodecError::BadPadding)?
            .len()
    };
    buf.truncate(ciphertext_len);
    Ok(buf)
}

/// Decrypts `ciphertext` with AES-128-CBC under the fixed key and zero IV, then strips PKCS#7 padding.
pub fn decrypt_bytes(ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
    if ciphertext.len() < AES_BLOCK_SIZE {
        return Err(CodecError::CiphertextTooShort);
    }
    if ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(CodecError::CiphertextNotBlockAligned);
    }
    let mut buf = ciphertext.to_vec();
    let cipher = CbcDecryptor::new(KEY.into(), &IV.into());
    let plaintext_len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_: UnpadError| CodecError::BadPadding)?
        .len();
    buf.truncate(plaintext_len);
    Ok(buf)
}

/// Compresses `plaintext` with zlib deflate.
pub fn compress_bytes(plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(plaintext)?;
    Ok(encoder.finish()?)
}

/// Decompresses a zlib deflate stream.
pub fn decompress_bytes(compressed: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = flate2::read::ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Decodes a full wire payload: Base64 -> AES-128-CBC decrypt -> optional zlib inflate.
///
/// `decompress` is false for request bodies (which are not compressed by the client) and
/// true for response bodies.
pub fn decode_payload(encoded: &[u8], decompress: bool) -> Result<Vec<u8>, CodecError> {
    use base64::Engine;
    let ciphertext = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    let plaintext = decrypt_bytes(&ciphertext)?;
    if decompress {
        decompress_bytes(&plaintext)
    } else {
        Ok(plaintext)
    }
}

/// Encodes a full wire payload: optional zlib deflate -> AES-128-CBC encrypt -> Base64.
pub fn encode_payload(plaintext: &[u8], compress: bool) -> Result<Vec<u8>, CodecError> {
    use base64::Engine;
    let staged = if compress {
        compress_bytes(plaintext)?
    } else {
        plaintext.to_vec()
    };
    let ciphertext = encrypt_bytes(&staged)?;
    Ok(base64::engine::general_purpose::STANDARD
        .encode(ciphertext)
        .into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let plaintext = b"{\"command\":\"GetWizardInfo\",\"wizard_id\":1}";
        let ciphertext = encrypt_bytes(plaintext).expect("encrypt");
        assert_eq!(ciphertext.len() % AES_BLOCK_SIZE, 0);
        assert!(ciphertext.len() > plaintext.len());
        let round_tripped = decrypt_bytes(&ciphertext).expect("decrypt");
        assert_eq!(round_tripped, plaintext);
    }

    #[test]
    fn encrypt_rejects_empty_input() {
        assert!(matches!(encrypt_bytes(b""), Err(CodecError::EmptyInput)));
    }

    #[test]
    fn decrypt_rejects_short_ciphertext() {
        let short = vec![0u8; 8];
        assert!(matches!(
            decrypt_bytes(&short),
            Err(CodecError::CiphertextTooShort)
        ));
    }

    #[test]
    fn decrypt_rejects_misaligned_ciphertext() {
        let misaligned = vec![0u8; 20];
        assert!(matches!(
            decrypt_bytes(&misaligned),
            Err(CodecError::CiphertextNotBlockAligned)
        ));
    }

    #[test]
    fn decrypt_rejects_bad_padding() {
        // A block-aligned buffer whose last byte pads past the buffer length is invalid PKCS#7.
        let bogus = vec![0xFFu8; 16];
        assert!(matches!(
            decrypt_bytes(&bogus),
            Err(CodecError::BadPadding)
        ));
    }

    #[test]
    fn deflate_then_inflate_round_trips() {
        let plaintext = b"{\"command\":\"BattleDungeonStart\",\"ret_code\":0}".repeat(8);
        let compressed = compress_bytes(&plaintext).expect("compress");
        let decompressed = decompress_bytes(&compressed).expect("decompress");
        assert_eq!(decompressed, plaintext);
    }

    #[test]
    fn full_payload_round_trips_with_compression() {
        let plaintext = b"{\"command\":\"BattleDungeonStart\",\"wizard_id\":42}";
        let encoded = encode_payload(plaintext, true).expect("encode");
        let decoded = decode_payload(&encoded, true).expect("decode");
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn full_payload_round_trips_without_compression() {
        let plaintext = b"{\"command\":\"GetWizardInfo\",\"wizard_id\":1}";
        let encoded = encode_payload(plaintext, false).expect("encode");
        let decoded = decode_payload(&encoded, false).expect("decode");
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn decode_payload_rejects_invalid_base64() {
        assert!(matches!(
            decode_payload(b"not valid base64!!", false),
            Err(CodecError::BadBase64(_))
        ));
    }
}
