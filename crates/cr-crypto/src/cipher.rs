//! AES-256 keystream generation and XOR application.
//!
//! Built on the RustCrypto `aes` crate's block cipher directly rather than
//! a higher-level AEAD/CTR crate, so the counter-alignment algorithm in
//! [`crate::counter`] stays testable end to end instead of living behind
//! an opaque seek implementation.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;

use crate::counter::{counter_at, BLOCK_SIZE};

/// Encrypt one 16-byte counter block under `key`, producing one block of
/// keystream.
fn keystream_block(key: &[u8; 32], counter: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let key = GenericArray::from_slice(key);
    let cipher = Aes256::new(key);
    let mut block = GenericArray::clone_from_slice(&counter);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// XOR `buf` in place with the AES-256-CTR keystream for `key`/`iv`
/// starting at absolute stream position `position`.
///
/// `buf` may start mid-block and may span any number of blocks; the
/// leading `position % 16` keystream bytes of the first block are
/// discarded to align with `position`, per the counter-alignment rule.
pub fn apply_keystream(key: &[u8; 32], iv: [u8; BLOCK_SIZE], position: u64, buf: &mut [u8]) {
    let (first_block_index, offset) = crate::counter::locate(position);
    let mut block_index = first_block_index;
    let mut remaining = buf;
    let mut skip = offset;

    while !remaining.is_empty() {
        let keystream = keystream_block(key, counter_at(iv, block_index));
        let usable = &keystream[skip..];
        let take = usable.len().min(remaining.len());
        for (byte, ks) in remaining[..take].iter_mut().zip(usable) {
            *byte ^= ks;
        }
        remaining = &mut remaining[take..];
        block_index += 1;
        skip = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_is_the_identity() {
        let key = [0x42; 32];
        let iv = [0x11; BLOCK_SIZE];
        let plaintext: Vec<u8> = (0..100u8).collect();

        let mut ciphertext = plaintext.clone();
        apply_keystream(&key, iv, 0, &mut ciphertext);
        assert_ne!(ciphertext, plaintext);

        let mut round_tripped = ciphertext.clone();
        apply_keystream(&key, iv, 0, &mut round_tripped);
        assert_eq!(round_tripped, plaintext);
    }

    #[test]
    fn mid_block_offset_matches_the_corresponding_slice_of_a_whole_run() {
        let key = [0x07; 32];
        let iv = [0x99; BLOCK_SIZE];
        let mut whole = vec![0u8; 64];
        apply_keystream(&key, iv, 0, &mut whole);

        let mut partial = vec![0u8; 20];
        apply_keystream(&key, iv, 30, &mut partial);

        assert_eq!(partial, whole[30..50]);
    }

    #[test]
    fn non_block_aligned_chunks_are_associative() {
        let key = [0xAA; 32];
        let iv = [0x5C; BLOCK_SIZE];
        let mut expected = vec![1u8; 40];
        apply_keystream(&key, iv, 5, &mut expected);

        let mut piecewise = vec![1u8; 40];
        apply_keystream(&key, iv, 5, &mut piecewise[..7]);
        apply_keystream(&key, iv, 12, &mut piecewise[7..]);

        assert_eq!(piecewise, expected);
    }
}
