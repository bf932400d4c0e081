// File: agent/src/crypto.rs
//
// AEAD envelope used for the reporting payload and the widget-log stream.
// Grounded on the AES-256-GCM + PBKDF2-HMAC-SHA256 pairing used for the
// client-side vault in the wider example pack, generalized here to seal as
// well as open and to always draw salts from the OS RNG rather than a fixed
// value.
use crate::errors::CryptoError;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Report,
    WidgetLog,
    ConfigAtRest,
    Speedtest,
}

impl EnvelopeKind {
    pub fn aad(&self) -> &'static [u8] {
        match self {
            EnvelopeKind::Report => b"fleet.report.v1",
            EnvelopeKind::WidgetLog => b"fleet.widget-log.v1",
            EnvelopeKind::ConfigAtRest => b"fleet.config-at-rest.v1",
            EnvelopeKind::Speedtest => b"fleet.speedtest.v1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub nonce: String,
    pub ciphertext: String,
    pub tag: String,
}

/// Seals `plaintext` under `key`, tagging it with `kind`'s purpose string as AAD.
/// The nonce is drawn fresh from the OS RNG on every call; reusing a (key, nonce)
/// pair is the caller's responsibility to avoid by never reusing a key without
/// calling this function to generate a new nonce.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], kind: EnvelopeKind) -> Result<EncryptedPayload, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce_bytes = Aes256Gcm::generate_nonce(&mut OsRng);
    let payload = aes_gcm::aead::Payload {
        msg: plaintext,
        aad: kind.aad(),
    };
    let mut sealed = cipher
        .encrypt(&nonce_bytes, payload)
        .map_err(|_| CryptoError::AuthFailure)?;
    // aes-gcm appends the 16-byte tag to the ciphertext; split it out so the
    // wire shape matches EncryptedPayload's three explicit fields.
    let tag = sealed.split_off(sealed.len() - 16);
    Ok(EncryptedPayload {
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(sealed),
        tag: BASE64.encode(tag),
    })
}

/// Opens a payload sealed by `seal` with the same key and kind. Tag comparison
/// is constant-time by construction of `aes_gcm`'s `decrypt`, which never
/// reveals which byte of the tag failed to match.
pub fn open(key: &[u8; KEY_LEN], payload: &EncryptedPayload, kind: EnvelopeKind) -> Result<Vec<u8>, CryptoError> {
    let nonce_bytes = BASE64
        .decode(&payload.nonce)
        .map_err(|_| CryptoError::AuthFailure)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::BadNonceLength);
    }
    let mut combined = BASE64
        .decode(&payload.ciphertext)
        .map_err(|_| CryptoError::AuthFailure)?;
    let tag = BASE64
        .decode(&payload.tag)
        .map_err(|_| CryptoError::AuthFailure)?;
    combined.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&nonce_bytes);
    let aead_payload = aes_gcm::aead::Payload {
        msg: &combined,
        aad: kind.aad(),
    };
    cipher
        .decrypt(nonce, aead_payload)
        .map_err(|_| CryptoError::AuthFailure)
}

/// Deterministic key derivation for password-unlocked stores (config at rest).
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [7u8; KEY_LEN];
        let sealed = seal(&key, b"hello world", EnvelopeKind::Report).unwrap();
        let opened = open(&key, &sealed, EnvelopeKind::Report).unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn wrong_key_is_auth_failure() {
        let key = [1u8; KEY_LEN];
        let other = [2u8; KEY_LEN];
        let sealed = seal(&key, b"secret", EnvelopeKind::Report).unwrap();
        let err = open(&other, &sealed, EnvelopeKind::Report).unwrap_err();
        assert!(matches!(err, CryptoError::AuthFailure));
    }

    #[test]
    fn wrong_aad_kind_is_auth_failure() {
        let key = [9u8; KEY_LEN];
        let sealed = seal(&key, b"payload", EnvelopeKind::Report).unwrap();
        let err = open(&key, &sealed, EnvelopeKind::WidgetLog).unwrap_err();
        assert!(matches!(err, CryptoError::AuthFailure));
    }

    #[test]
    fn nonces_are_not_reused_across_calls() {
        let key = [3u8; KEY_LEN];
        let a = seal(&key, b"same", EnvelopeKind::Report).unwrap();
        let b = seal(&key, b"same", EnvelopeKind::Report).unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key(b"hunter2", b"saltsalt", 10_000);
        let b = derive_key(b"hunter2", b"saltsalt", 10_000);
        assert_eq!(a, b);
    }
}
