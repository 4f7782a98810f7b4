//! Cryptographic primitives assumed available as libraries per spec §1: Ed25519
//! signing/verification and base58/base16 codecs. This module only adapts those
//! libraries to the shapes the rest of the crate needs; it does not implement any
//! cryptography itself.

use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use sha3::{Digest, Sha3_256};

/// A base58-encoded Ed25519 public key, the wire representation used throughout
/// `owners_before` / output `public_keys` (spec §3).
pub type PublicKeyString = String;

pub fn encode_public_key(key: &VerifyingKey) -> PublicKeyString {
    bs58::encode(key.as_bytes()).into_string()
}

pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey, String> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| format!("invalid base58 public key `{encoded}`: {e}"))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| format!("public key `{encoded}` is not 32 bytes"))?;
    VerifyingKey::from_bytes(&array).map_err(|e| format!("invalid public key `{encoded}`: {e}"))
}

/// Hex-decode an election id into raw bytes, then base58-encode those bytes —
/// `election_pk(election_id) = base58(hex_decode(election_id))` (spec §4.E, §6).
pub fn election_public_key(election_id: &str) -> Result<PublicKeyString, String> {
    let raw = hex::decode(election_id)
        .map_err(|e| format!("election id `{election_id}` is not valid hex: {e}"))?;
    Ok(bs58::encode(raw).into_string())
}

/// SHA3-256 of `bytes`, lowercase hex-encoded — the transaction id hash function
/// (spec §3, §6).
pub fn sha3_256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn sign(signing_key: &SigningKey, message: &[u8]) -> Signature {
    use ed25519_dalek::Signer;
    signing_key.sign(message)
}

pub fn verify(public_key: &VerifyingKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify(message, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_then_verify_round_trips() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let message = b"hello ledger";
        let signature = sign(&signing_key, message);
        assert!(verify(&signing_key.verifying_key(), message, &signature));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let signature = sign(&signing_key, b"original");
        assert!(!verify(&signing_key.verifying_key(), b"tampered", &signature));
    }

    #[test]
    fn public_key_round_trips_through_base58() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let encoded = encode_public_key(&signing_key.verifying_key());
        let decoded = decode_public_key(&encoded).unwrap();
        assert_eq!(decoded, signing_key.verifying_key());
    }

    #[test]
    fn election_public_key_matches_hex_then_base58() {
        let election_id = "deadbeef";
        let expected = bs58::encode(hex::decode(election_id).unwrap()).into_string();
        assert_eq!(election_public_key(election_id).unwrap(), expected);
    }

    #[test]
    fn sha3_256_hex_is_deterministic() {
        let a = sha3_256_hex(b"payload");
        let b = sha3_256_hex(b"payload");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
