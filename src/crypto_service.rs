use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::encrypt::Encrypter;
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::symm::{Cipher, decrypt_aead, encrypt_aead};

/// AES-256 key length in bytes
pub const AES_KEY_LEN: usize = 32;
/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

// OAEP with SHA-256 spends 2 * 32 + 2 bytes of every RSA block on padding
const OAEP_SHA256_OVERHEAD: usize = 66;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Data too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, usize),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid AES key: {0}")]
    InvalidKey(String),
    #[error("Decryption failed: {0}")]
    Decryption(String),
    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
}

/// A symmetric key owned by one browser identity.
///
/// Carried around as standard base64 text, which is also the form it is
/// persisted in and the form wrapped for the client.
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey(String);

impl AesKey {
    /// Accept an encoded key, checking it decodes to an AES-256 key.
    pub fn from_encoded(encoded: impl Into<String>) -> Result<Self, CryptoError> {
        let encoded = encoded.into();
        let raw = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if raw.len() != AES_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                AES_KEY_LEN,
                raw.len()
            )));
        }
        Ok(Self(encoded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn raw(&self) -> Result<Vec<u8>, CryptoError> {
        STANDARD
            .decode(self.0.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

// Never print key material
impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(..)")
    }
}

/// Thin facade over the OpenSSL primitives the key exchange needs.
///
/// * AES keys are 256-bit, drawn from the OpenSSL CSPRNG.
/// * Keys are wrapped for the client with RSA-OAEP (SHA-256, MGF1-SHA-256).
/// * Payloads are sealed with AES-256-GCM and framed as
///   `base64(nonce || ciphertext || tag)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoService;

impl CryptoService {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_aes_key(&self, browser_id: &str) -> Result<AesKey, CryptoError> {
        let mut raw = [0u8; AES_KEY_LEN];
        openssl::rand::rand_bytes(&mut raw)?;
        tracing::debug!(browser_id, "generated AES key");
        Ok(AesKey(STANDARD.encode(raw)))
    }

    /// Encrypt the key text with the client's RSA public key (PEM).
    pub fn wrap_aes_key(&self, aes_key: &AesKey, public_key_pem: &str) -> Result<String, CryptoError> {
        let public_key = parse_public_key(public_key_pem)?;
        let data = aes_key.as_str().as_bytes();

        let max = public_key.size().saturating_sub(OAEP_SHA256_OVERHEAD);
        if data.len() > max {
            return Err(CryptoError::TooLarge(data.len(), max));
        }

        let mut encrypter = Encrypter::new(&public_key)?;
        encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
        encrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

        let mut buf = vec![0; encrypter.encrypt_len(data)?];
        let encrypted_len = encrypter.encrypt(data, &mut buf)?;
        buf.truncate(encrypted_len);

        Ok(STANDARD.encode(buf))
    }

    pub fn encrypt(&self, plaintext: &str, aes_key: &AesKey) -> Result<String, CryptoError> {
        let key = aes_key.raw()?;

        let mut nonce = [0u8; NONCE_LEN];
        openssl::rand::rand_bytes(&mut nonce)?;

        let mut tag = [0u8; TAG_LEN];
        let ciphertext = encrypt_aead(
            Cipher::aes_256_gcm(),
            &key,
            Some(&nonce[..]),
            &[],
            plaintext.as_bytes(),
            &mut tag,
        )?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);
        framed.extend_from_slice(&tag);

        Ok(STANDARD.encode(framed))
    }

    pub fn decrypt(&self, ciphertext: &str, aes_key: &AesKey) -> Result<String, CryptoError> {
        let key = aes_key.raw()?;
        let framed = STANDARD
            .decode(ciphertext.trim().as_bytes())
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {}", e)))?;

        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decryption(format!(
                "ciphertext too short: {} bytes (minimum {})",
                framed.len(),
                NONCE_LEN + TAG_LEN
            )));
        }

        let (nonce, rest) = framed.split_at(NONCE_LEN);
        let (data, tag) = rest.split_at(rest.len() - TAG_LEN);

        let plaintext = decrypt_aead(Cipher::aes_256_gcm(), &key, Some(nonce), &[], data, tag)
            .map_err(|_| CryptoError::Decryption("authentication failed".into()))?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

// Accepts SPKI ("BEGIN PUBLIC KEY") as well as PKCS#1 ("BEGIN RSA PUBLIC KEY")
fn parse_public_key(pem: &str) -> Result<PKey<Public>, CryptoError> {
    let pem = pem.trim().as_bytes();
    let key = match PKey::public_key_from_pem(pem) {
        Ok(key) => key,
        Err(_) => {
            let rsa = Rsa::public_key_from_pem_pkcs1(pem)
                .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
            PKey::from_rsa(rsa)?
        }
    };

    if key.id() != Id::RSA {
        return Err(CryptoError::InvalidPublicKey("not an RSA key".into()));
    }
    Ok(key)
}
