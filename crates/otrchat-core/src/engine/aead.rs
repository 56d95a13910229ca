//! Authenticated encryption helpers for the reference engine.
//!
//! ChaCha20-Poly1305 with a random nonce prepended to the output, so nonce
//! management is automatic: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use crate::error::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

/// Size of the session key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// Encrypt with a fresh random nonce, prepending it to the output.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| Error::Engine("seal failed".into()))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt data produced by [`seal`].
///
/// Returns a generic error on any failure; callers map it to the session
/// taxonomy without leaking why authentication failed.
pub fn open(
    key: &[u8; KEY_SIZE],
    data: &[u8],
    associated_data: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Engine("sealed box too short".into()));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &data[NONCE_SIZE..],
                aad: associated_data,
            },
        )
        .map_err(|_| Error::Engine("open failed".into()))?;

    Ok(Zeroizing::new(plaintext))
}
