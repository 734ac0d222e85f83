/// Crypto
///
/// Symmetric envelope encryption (AES-256-GCM, base64 transport encoding) and
/// secp256k1 identity keys with EIP-191 personal-message signatures.
///
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use alloy::hex;
use alloy::primitives::{Address, B256, Signature, eip191_hash_message};
use alloy::signers::SignerSync;
use alloy::signers::k256::ecdsa::VerifyingKey;
use alloy::signers::local::PrivateKeySigner;
use base64ct::{Base64, Encoding};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;

use crate::constants::{
    NONCE_LENGTH, SIGNATURE_LENGTH, SYM_KEY_LENGTH, TOPIC_BYTES,
};
use crate::error::{Error, Result};

/// Participant identity key. The address doubles as the client id.
#[derive(Clone, Debug)]
pub struct KeyPair {
    signer: PrivateKeySigner,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    pub fn from_signer(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn public_key(&self) -> VerifyingKey {
        VerifyingKey::from(self.signer.credential())
    }

    /// Uncompressed SEC1 encoding, hex without prefix.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().to_encoded_point(false).as_bytes())
    }

    pub fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        sign_message(message, &self.signer)
    }
}

pub fn random_bytes32() -> [u8; 32] {
    let mut random_value = [0u8; 32];
    OsRng.fill_bytes(&mut random_value);
    random_value
}

pub fn random_hex(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// 64 hex chars.
pub fn random_topic() -> String {
    random_hex(TOPIC_BYTES)
}

pub fn generate_key_pair() -> KeyPair {
    KeyPair::generate()
}

/// 256-bit key, standard base64 (44 chars).
pub fn generate_symmetric_key() -> String {
    Base64::encode_string(&random_bytes32())
}

fn decode_sym_key(sym_key: &str) -> Result<[u8; SYM_KEY_LENGTH]> {
    let bytes = Base64::decode_vec(sym_key)
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    bytes.as_slice().try_into().map_err(|_| {
        Error::InvalidKey(format!(
            "expected {SYM_KEY_LENGTH} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Seals `plaintext` under a fresh random nonce and returns
/// `base64(nonce || ciphertext)`.
pub fn encrypt(plaintext: &[u8], sym_key: &str) -> Result<String> {
    let key = decode_sym_key(sym_key)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut iv = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut iv);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| Error::Encryption)?;

    let mut bytes = Vec::with_capacity(NONCE_LENGTH + sealed.len());
    bytes.extend_from_slice(&iv);
    bytes.extend_from_slice(&sealed);
    Ok(Base64::encode_string(&bytes))
}

pub fn decrypt(cipher_text: &str, sym_key: &str) -> Result<Vec<u8>> {
    let key = decode_sym_key(sym_key)?;
    let bytes =
        Base64::decode_vec(cipher_text).map_err(|_| Error::Decryption)?;

    if bytes.len() < NONCE_LENGTH {
        return Err(Error::Decryption);
    }
    let (iv, sealed) = bytes.split_at(NONCE_LENGTH);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(iv), sealed)
        .map_err(|_| Error::Decryption)
}

pub fn encrypt_str(plaintext: &str, sym_key: &str) -> Result<String> {
    encrypt(plaintext.as_bytes(), sym_key)
}

pub fn decrypt_to_string(cipher_text: &str, sym_key: &str) -> Result<String> {
    Ok(String::from_utf8(decrypt(cipher_text, sym_key)?)?)
}

/// EIP-191 personal-message signature, 65 bytes R || S || V.
pub fn sign_message(
    message: &[u8],
    signer: &PrivateKeySigner,
) -> Result<Signature> {
    Ok(signer.sign_message_sync(message)?)
}

pub fn recover_address(message: &[u8], signature: &[u8]) -> Result<Address> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(Error::MalformedSignature(signature.len()));
    }
    let signature = Signature::from_raw(signature)?;
    Ok(signature.recover_address_from_msg(message)?)
}

pub fn verify_signature(
    message: &[u8],
    signature: &[u8],
    address: Address,
) -> Result<bool> {
    Ok(recover_address(message, signature)? == address)
}

pub fn parse_public_key(public_key_hex: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(public_key_hex)?;
    VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|e| Error::InvalidKey(format!("public key: {e}")))
}

pub fn public_key_to_hex(public_key: &VerifyingKey) -> String {
    hex::encode(public_key.to_encoded_point(false).as_bytes())
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SignatureDetails {
    pub message: String,
    pub signature: String,
    pub r: String,
    pub s: String,
    pub v: String,
    pub recovered_address: Address,
    pub message_hash: B256,
}

pub fn signature_details(
    message: &str,
    signature_hex: &str,
) -> Result<SignatureDetails> {
    let bytes = hex::decode(signature_hex)?;
    let recovered_address = recover_address(message.as_bytes(), &bytes)?;

    Ok(SignatureDetails {
        message: message.to_string(),
        signature: signature_hex.to_string(),
        r: hex::encode_prefixed(&bytes[..32]),
        s: hex::encode_prefixed(&bytes[32..64]),
        v: format!("0x{:x}", bytes[64]),
        recovered_address,
        message_hash: eip191_hash_message(message.as_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = generate_symmetric_key();
        for message in [&b""[..], b"hello", &[0u8, 255, 1, 254][..]] {
            let sealed = encrypt(message, &key).unwrap();
            assert_eq!(decrypt(&sealed, &key).unwrap(), message);
        }
    }

    #[test]
    fn test_symmetric_key_is_44_base64_chars() {
        let key = generate_symmetric_key();
        assert_eq!(key.len(), 44);
        assert_eq!(Base64::decode_vec(&key).unwrap().len(), SYM_KEY_LENGTH);
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = generate_symmetric_key();
        let a = encrypt(b"same", &key).unwrap();
        let b = encrypt(b"same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let sealed = encrypt(b"secret", &generate_symmetric_key()).unwrap();
        let result = decrypt(&sealed, &generate_symmetric_key());
        assert!(matches!(result, Err(Error::Decryption)));
    }

    #[test]
    fn test_decrypt_tampered_payload_fails() {
        let key = generate_symmetric_key();
        let sealed = encrypt(b"secret", &key).unwrap();
        let mut bytes = Base64::decode_vec(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = Base64::encode_string(&bytes);
        assert!(matches!(decrypt(&tampered, &key), Err(Error::Decryption)));
    }

    #[test]
    fn test_decrypt_short_payload_fails() {
        let key = generate_symmetric_key();
        let short = Base64::encode_string(&[1u8; NONCE_LENGTH - 1]);
        assert!(matches!(decrypt(&short, &key), Err(Error::Decryption)));
    }

    #[test]
    fn test_malformed_key_is_rejected() {
        let short_key = Base64::encode_string(&[7u8; 16]);
        assert!(matches!(
            encrypt(b"x", &short_key),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            decrypt("AAAA", "not base64!"),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_sign_and_recover() {
        let key_pair = generate_key_pair();
        let signature = key_pair.sign_message(b"hello world").unwrap();
        let bytes = signature.as_bytes();
        assert_eq!(bytes.len(), SIGNATURE_LENGTH);

        let recovered = recover_address(b"hello world", &bytes).unwrap();
        assert_eq!(recovered, key_pair.address());
        assert!(
            verify_signature(b"hello world", &bytes, key_pair.address())
                .unwrap()
        );
        assert!(
            !verify_signature(b"other message", &bytes, key_pair.address())
                .unwrap()
        );
    }

    #[test]
    fn test_recover_accepts_zero_based_recovery_id() {
        let key_pair = generate_key_pair();
        let mut bytes = key_pair.sign_message(b"v").unwrap().as_bytes();
        bytes[64] -= 27;
        assert_eq!(recover_address(b"v", &bytes).unwrap(), key_pair.address());
    }

    #[test]
    fn test_malformed_signature_length() {
        let result = recover_address(b"hello", &[0u8; 64]);
        assert!(matches!(result, Err(Error::MalformedSignature(64))));
    }

    #[test]
    fn test_public_key_hex_round_trip() {
        let key_pair = generate_key_pair();
        let encoded = key_pair.public_key_hex();
        // 0x04 || X || Y
        assert_eq!(encoded.len(), 130);
        assert!(encoded.starts_with("04"));
        let parsed = parse_public_key(&encoded).unwrap();
        assert_eq!(parsed, key_pair.public_key());
    }

    #[test]
    fn test_signature_details() {
        let key_pair = generate_key_pair();
        let signature = key_pair.sign_message(b"details").unwrap();
        let signature_hex = hex::encode_prefixed(signature.as_bytes());

        let details = signature_details("details", &signature_hex).unwrap();
        assert_eq!(details.recovered_address, key_pair.address());
        assert_eq!(details.r.len(), 66);
        assert_eq!(details.s.len(), 66);
        assert!(details.v == "0x1b" || details.v == "0x1c");
        assert_eq!(details.message_hash, eip191_hash_message(b"details"));
    }

    #[test]
    fn test_random_topic_shape() {
        let topic = random_topic();
        assert_eq!(topic.len(), 64);
        assert!(topic.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(topic, random_topic());
    }
}
