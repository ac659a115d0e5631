//! AES-128-CBC segment decryption
//!
//! Segments are decrypted whole. The IV is the playlist's explicit `IV=`
//! attribute when present, otherwise the segment's media sequence number as a
//! 128-bit big-endian integer.
//!
//! Padding is removed leniently: PKCS7 padding is stripped only when the
//! trailing bytes form a valid pad, otherwise the decrypted bytes are returned
//! as is. Some origins pad inconsistently or not at all.

use crate::error::{Error, Result};
use aes::Aes128;
use bytes::Bytes;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;

/// IV for a segment without an explicit one: `media_sequence_start + index`, big-endian
#[must_use]
pub fn derive_iv(media_sequence_start: u64, index: usize) -> [u8; 16] {
    let sequence = u128::from(media_sequence_start) + index as u128;
    sequence.to_be_bytes()
}

/// Parse a playlist IV (`0x` prefixed or bare hex, 32 digits)
pub fn parse_iv(raw: &str) -> Result<[u8; 16]> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let mut iv = [0u8; 16];
    hex::decode_to_slice(digits, &mut iv)
        .map_err(|e| Error::Decryption(format!("invalid IV '{raw}': {e}")))?;
    Ok(iv)
}

/// Decrypt one segment in place and strip valid PKCS7 padding
pub fn decrypt(ciphertext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Vec<u8>> {
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::Decryption(format!(
            "ciphertext length {} is not a multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }

    let mut buffer = ciphertext.to_vec();
    let cipher = Aes128CbcDec::new(key.into(), iv.into());
    let plain_len = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|e| Error::Decryption(format!("block decryption failed: {e}")))?
        .len();
    buffer.truncate(plain_len);

    let unpadded = unpadded_len(&buffer);
    buffer.truncate(unpadded);
    Ok(buffer)
}

/// Decrypt on the blocking pool so large segments do not stall the runtime
pub async fn decrypt_offloaded(data: Bytes, key: [u8; 16], iv: [u8; 16]) -> Result<Bytes> {
    tokio::task::spawn_blocking(move || decrypt(&data, &key, &iv).map(Bytes::from))
        .await
        .map_err(|e| Error::Join(format!("decryption task failed: {e}")))?
}

fn unpadded_len(data: &[u8]) -> usize {
    let Some(&last) = data.last() else {
        return 0;
    };
    let pad_len = usize::from(last);
    if !(1..=BLOCK_SIZE).contains(&pad_len) || pad_len > data.len() {
        return data.len();
    }
    if data[data.len() - pad_len..].iter().all(|&b| b == last) {
        data.len() - pad_len
    } else {
        data.len()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::{BlockEncryptMut, block_padding::Pkcs7};

    type Aes128CbcEnc = cbc::Encryptor<Aes128>;

    const KEY: [u8; 16] = *b"0123456789abcdef";

    fn encrypt_pkcs7(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let padded_len = (plaintext.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
        let mut buffer = vec![0u8; padded_len];
        buffer[..plaintext.len()].copy_from_slice(plaintext);
        Aes128CbcEnc::new(key.into(), iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
            .unwrap()
            .to_vec()
    }

    fn encrypt_unpadded(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let mut buffer = plaintext.to_vec();
        Aes128CbcEnc::new(key.into(), iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut buffer, plaintext.len())
            .unwrap()
            .to_vec()
    }

    #[test]
    fn round_trip_with_pkcs7_padding() {
        let iv = derive_iv(0, 3);
        for len in [0usize, 1, 15, 16, 17, 188 * 7] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ciphertext = encrypt_pkcs7(&plaintext, &KEY, &iv);

            assert_eq!(decrypt(&ciphertext, &KEY, &iv).unwrap(), plaintext, "len {len}");
        }
    }

    #[test]
    fn derived_iv_is_big_endian_sequence_number() {
        let iv = derive_iv(100, 7);

        let mut expected = [0u8; 16];
        expected[15] = 107;
        assert_eq!(iv, expected);
        assert_eq!(u128::from_be_bytes(iv), 107);
    }

    #[test]
    fn derived_iv_does_not_overflow_u64() {
        let iv = derive_iv(u64::MAX, 1);

        assert_eq!(u128::from_be_bytes(iv), u128::from(u64::MAX) + 1);
    }

    #[test]
    fn parse_iv_accepts_prefixed_and_bare_hex() {
        let expected = {
            let mut iv = [0u8; 16];
            iv[15] = 0x2a;
            iv
        };

        assert_eq!(parse_iv("0x0000000000000000000000000000002a").unwrap(), expected);
        assert_eq!(parse_iv("0X0000000000000000000000000000002A").unwrap(), expected);
        assert_eq!(parse_iv("0000000000000000000000000000002a").unwrap(), expected);
    }

    #[test]
    fn parse_iv_rejects_wrong_length_and_garbage() {
        assert!(matches!(parse_iv("0x1234"), Err(Error::Decryption(_))));
        assert!(matches!(
            parse_iv("0xzz000000000000000000000000000000"),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn explicit_iv_is_used_verbatim() {
        let iv = parse_iv("0x000102030405060708090a0b0c0d0e0f").unwrap();
        let plaintext = b"transport stream payload";
        let ciphertext = encrypt_pkcs7(plaintext, &KEY, &iv);

        assert_eq!(decrypt(&ciphertext, &KEY, &iv).unwrap(), plaintext);
    }

    #[test]
    fn unpadded_stream_is_returned_raw() {
        // 32 bytes ending in 0x00: not a plausible pad length
        let mut plaintext = vec![0x47u8; 31];
        plaintext.push(0x00);
        let iv = derive_iv(5, 0);
        let ciphertext = encrypt_unpadded(&plaintext, &KEY, &iv);

        assert_eq!(decrypt(&ciphertext, &KEY, &iv).unwrap(), plaintext);
    }

    #[test]
    fn inconsistent_padding_is_left_in_place() {
        // Last byte says 4 but the preceding pad bytes disagree
        let mut plaintext = vec![0x47u8; 28];
        plaintext.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        let iv = derive_iv(0, 0);
        let ciphertext = encrypt_unpadded(&plaintext, &KEY, &iv);

        assert_eq!(decrypt(&ciphertext, &KEY, &iv).unwrap(), plaintext);
    }

    #[test]
    fn misaligned_ciphertext_is_an_error() {
        let result = decrypt(&[0u8; 17], &KEY, &[0u8; 16]);

        match result {
            Err(Error::Decryption(msg)) => assert!(msg.contains("multiple of 16")),
            other => panic!("expected Decryption error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offloaded_decryption_matches_inline() {
        let iv = derive_iv(42, 0);
        let plaintext = vec![0x47u8; 188 * 10];
        let ciphertext = Bytes::from(encrypt_pkcs7(&plaintext, &KEY, &iv));

        let decrypted = decrypt_offloaded(ciphertext, KEY, iv).await.unwrap();

        assert_eq!(decrypted.as_ref(), plaintext.as_slice());
    }
}
