use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

const HKDF_SALT: &[u8] = b"dte-contingency-v1";
const HKDF_INFO: &[u8] = b"company-credentials";
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("ciphertext too short")]
    TooShort,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("plaintext is not UTF-8")]
    Utf8,
}

fn cipher(key: &str) -> Result<Aes256Gcm, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), key.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Aes256Gcm::new_from_slice(&okm).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Encrypt a company secret with AES-256-GCM. Output is nonce (12 bytes) followed by ciphertext.
pub fn encrypt(plaintext: &str, key: &str) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt(data: &[u8], key: &str) -> Result<String, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::TooShort);
    }

    let cipher = cipher(key)?;
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_secret_reads_back() {
        let sealed = encrypt("firmador-pass", "k1").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"firmador-pass");
        assert_eq!(decrypt(&sealed, "k1").unwrap(), "firmador-pass");
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sealed = encrypt("secret", "k1").unwrap();
        assert!(matches!(decrypt(&sealed, "k2"), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn short_input_is_rejected() {
        assert!(matches!(decrypt(&[1, 2, 3], "k1"), Err(CryptoError::TooShort)));
    }
}
