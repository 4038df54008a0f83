// Client-side password obfuscation expected by the SSO login form.
//
// The server decrypts with AES-CBC/PKCS#7 using the page salt as key, strips
// a 64 character prefix, and compares the rest. The cipher, mode, padding and
// alphabet are fixed by the server side.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::seq::SliceRandom;
use thiserror::Error;

/// Alphabet for the random prefix and IV.
pub const RANDOM_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTWXYZabcdefhijkmnprstwxyz2345678";

const PREFIX_LEN: usize = 64;
const IV_LEN: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptError {
    #[error("salt length {0} is not a valid AES key length (16, 24 or 32)")]
    InvalidKeyLength(usize),
}

/// Random string of `len` characters drawn from [`RANDOM_ALPHABET`].
pub fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| *RANDOM_ALPHABET.choose(&mut rng).unwrap_or(&b'A') as char)
        .collect()
}

/// Produce the value submitted in the login form's `password` field.
///
/// With an empty (or whitespace-only) salt the portal does not encrypt and
/// the plaintext password is returned unchanged.
pub fn encrypt_password(password: &str, salt: &str) -> Result<String, EncryptError> {
    let key = salt.trim();
    if key.is_empty() {
        return Ok(password.to_string());
    }
    let iv = random_string(IV_LEN);
    let plaintext = format!("{}{}", random_string(PREFIX_LEN), password);
    let ciphertext = encrypt_with_iv(plaintext.as_bytes(), key.as_bytes(), iv.as_bytes())?;
    Ok(STANDARD.encode(ciphertext))
}

fn encrypt_with_iv(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, EncryptError> {
    let invalid = |_| EncryptError::InvalidKeyLength(key.len());
    let ciphertext = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => Aes192CbcEnc::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        other => return Err(EncryptError::InvalidKeyLength(other)),
    };
    Ok(ciphertext)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
