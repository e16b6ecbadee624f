//! Integrity and transport sealing for offline tokens

use super::{OfflineError, OfflineResult};
use crate::payments::types::Currency;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The field set covered by an offline signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub id: String,
    pub amount: f64,
    pub currency: Currency,
    pub merchant: String,
    pub timestamp: i64,
}

impl SignedPayload {
    /// `id|amount|currency|merchant|timestamp`
    pub fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.id,
            self.amount,
            self.currency.as_str(),
            self.merchant,
            self.timestamp
        )
    }
}

pub trait PayloadSigner: Send + Sync {
    fn sign(&self, payload: &SignedPayload) -> String;

    /// Must compare in constant time.
    fn verify(&self, payload: &SignedPayload, signature: &str) -> bool;
}

/// HMAC-SHA256 over the canonical payload, hex encoded.
#[derive(Clone)]
pub struct HmacSigner {
    keyed: HmacSha256,
}

impl HmacSigner {
    pub fn new(key: impl AsRef<[u8]>) -> OfflineResult<Self> {
        let keyed = <HmacSha256 as Mac>::new_from_slice(key.as_ref()).map_err(|e| OfflineError::Sealing {
            message: format!("invalid signing key: {}", e),
        })?;
        Ok(Self { keyed })
    }

    fn mac(&self, payload: &SignedPayload) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(payload.canonical().as_bytes());
        mac
    }
}

impl PayloadSigner for HmacSigner {
    fn sign(&self, payload: &SignedPayload) -> String {
        hex::encode(self.mac(payload).finalize().into_bytes())
    }

    fn verify(&self, payload: &SignedPayload, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        self.mac(payload).verify_slice(&expected).is_ok()
    }
}

/// Seals QR content for transport.
pub trait PayloadCipher: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> OfflineResult<String>;

    fn open(&self, sealed: &str) -> OfflineResult<Vec<u8>>;
}

/// AES-256-GCM envelope: `pgq2.` followed by URL-safe base64 of
/// `nonce || ciphertext || tag`. Every seal draws a fresh random nonce.
#[derive(Clone)]
pub struct AesGcmEnvelope {
    cipher: Aes256Gcm,
}

const ENVELOPE_PREFIX: &str = "pgq2.";
const NONCE_LEN: usize = 12;

impl AesGcmEnvelope {
    pub fn new(key: impl AsRef<[u8]>) -> OfflineResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| OfflineError::Sealing {
            message: "QR key must be exactly 32 bytes".to_string(),
        })?;
        Ok(Self { cipher })
    }

    /// Key given as 64 hex characters.
    pub fn from_hex(key: &str) -> OfflineResult<Self> {
        let bytes = hex::decode(key.trim()).map_err(|e| OfflineError::Sealing {
            message: format!("QR key is not valid hex: {}", e),
        })?;
        Self::new(bytes)
    }
}

impl PayloadCipher for AesGcmEnvelope {
    fn seal(&self, plaintext: &[u8]) -> OfflineResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| OfflineError::Sealing {
                message: "encryption failed".to_string(),
            })?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", ENVELOPE_PREFIX, URL_SAFE_NO_PAD.encode(framed)))
    }

    fn open(&self, sealed: &str) -> OfflineResult<Vec<u8>> {
        let body = sealed
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| OfflineError::Sealing {
                message: "unknown envelope version".to_string(),
            })?;
        let framed = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| OfflineError::Sealing {
                message: e.to_string(),
            })?;
        if framed.len() < NONCE_LEN {
            return Err(OfflineError::Sealing {
                message: "envelope too short".to_string(),
            });
        }

        let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| OfflineError::Sealing {
                message: "envelope failed authentication".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SignedPayload {
        SignedPayload {
            id: "0f8fad5b-d9cb-469f-a165-70867728950e".to_string(),
            amount: 100.0,
            currency: Currency::Kes,
            merchant: "M-1".to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn canonical_form_is_stable() {
        assert_eq!(
            payload().canonical(),
            "0f8fad5b-d9cb-469f-a165-70867728950e|100|KES|M-1|1700000000000"
        );
    }

    #[test]
    fn tampered_fields_fail_verification() {
        let signer = HmacSigner::new("test-signing-key-0001").unwrap();
        let signature = signer.sign(&payload());
        assert!(signer.verify(&payload(), &signature));

        let mut amount = payload();
        amount.amount = 1000.0;
        let mut currency = payload();
        currency.currency = Currency::Usd;
        let mut merchant = payload();
        merchant.merchant = "M-2".to_string();
        let mut timestamp = payload();
        timestamp.timestamp += 1;

        for tampered in [amount, currency, merchant, timestamp] {
            assert!(!signer.verify(&tampered, &signature));
        }
    }

    #[test]
    fn malformed_or_foreign_signatures_are_rejected() {
        let signer = HmacSigner::new("test-signing-key-0001").unwrap();
        let other = HmacSigner::new("another-signing-key-02").unwrap();
        assert!(!signer.verify(&payload(), "not-hex"));
        assert!(!signer.verify(&payload(), &other.sign(&payload())));
    }

    const QR_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn envelope_opens_what_it_sealed() {
        let envelope = AesGcmEnvelope::from_hex(QR_KEY).unwrap();
        let sealed = envelope.seal(b"{\"id\":\"x\"}").unwrap();
        assert!(sealed.starts_with("pgq2."));
        assert_eq!(envelope.open(&sealed).unwrap(), b"{\"id\":\"x\"}");
        assert!(envelope.open("garbage").is_err());
        assert!(envelope.open("pgq2.AAAA").is_err());
    }

    #[test]
    fn sealed_payload_hides_plaintext_and_varies_per_seal() {
        let envelope = AesGcmEnvelope::from_hex(QR_KEY).unwrap();
        let plaintext = br#"{"id":"0f8fad5b","merchant":"M-77","amount":42}"#;
        let first = envelope.seal(plaintext).unwrap();
        let second = envelope.seal(plaintext).unwrap();
        assert_ne!(first, second);

        let body = URL_SAFE_NO_PAD
            .decode(first.trim_start_matches(ENVELOPE_PREFIX))
            .unwrap();
        let visible = String::from_utf8_lossy(&body);
        assert!(!visible.contains("M-77"));
        assert!(!first.contains(&URL_SAFE_NO_PAD.encode(b"M-77")));
    }

    #[test]
    fn wrong_key_or_tampering_fails_to_open() {
        let envelope = AesGcmEnvelope::from_hex(QR_KEY).unwrap();
        let other = AesGcmEnvelope::new([7u8; 32]).unwrap();
        let sealed = envelope.seal(b"payload").unwrap();
        assert!(other.open(&sealed).is_err());

        let mut body = URL_SAFE_NO_PAD
            .decode(sealed.trim_start_matches(ENVELOPE_PREFIX))
            .unwrap();
        let last = body.len() - 1;
        body[last] ^= 0x01;
        let tampered = format!("{}{}", ENVELOPE_PREFIX, URL_SAFE_NO_PAD.encode(body));
        assert!(envelope.open(&tampered).is_err());
    }

    #[test]
    fn keys_of_the_wrong_size_are_rejected() {
        assert!(AesGcmEnvelope::new([0u8; 16]).is_err());
        assert!(AesGcmEnvelope::from_hex("not-hex").is_err());
    }
}
