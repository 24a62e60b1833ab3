//! Classic VNC challenge-response.
//!
//! The 16-byte server challenge is DES-encrypted (ECB, two blocks) with a key
//! made from the first 8 password bytes, each bit-reversed and zero-padded.

use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};

/// Length of the VNC authentication challenge and response.
pub const CHALLENGE_LEN: usize = 16;

/// Encrypt `challenge` with `password` the way VNC servers expect.
pub fn vnc_des_response(password: &str, challenge: &[u8; CHALLENGE_LEN]) -> [u8; CHALLENGE_LEN] {
    let mut key = [0u8; 8];
    for (slot, b) in key.iter_mut().zip(password.bytes()) {
        *slot = b.reverse_bits();
    }

    let cipher = Des::new(&GenericArray::from(key));
    let mut response = *challenge;
    for block in response.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    response
}
