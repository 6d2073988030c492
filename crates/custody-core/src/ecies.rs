//! Asymmetric authenticated encryption to secp256k1 public keys
//!
//! Envelope construction:
//! 1. Fresh ephemeral key pair, ECDH with the recipient key
//! 2. HKDF-SHA256 over the shared x-coordinate (salt = ephemeral public key)
//! 3. AES-256-GCM with a random 12-byte IV and the ephemeral public key as
//!    associated data; the 16-byte tag travels separately as `mac`
//!
//! The tag is verified before any plaintext is produced.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use hkdf::Hkdf;
use k256::ecdh::{diffie_hellman, EphemeralSecret};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::hd::{KeyPath, PurposeKeyNode};
use crate::types::{hex_vec, PublicKey};

/// Length of the AES-GCM IV
pub const IV_LEN: usize = 12;

/// Length of the authentication tag
pub const MAC_LEN: usize = 16;

const HKDF_INFO: &[u8] = b"custody-ecies-v1";

/// Encrypted message as exchanged with callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    #[serde(with = "hex_vec")]
    pub iv: Vec<u8>,
    /// Uncompressed SEC1 ephemeral public key
    #[serde(with = "hex_vec")]
    pub ephem_public_key: Vec<u8>,
    #[serde(with = "hex_vec")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_vec")]
    pub mac: Vec<u8>,
}

/// Encrypt `plaintext` to an arbitrary public key
pub fn encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephem_public_key = ephemeral
        .public_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();

    let shared = ephemeral.diffie_hellman(recipient.as_k256());
    let key = derive_key(shared.raw_secret_bytes(), &ephem_public_key)?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| Error::Crypto(format!("Invalid key length: {}", e)))?;

    let mut ciphertext = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), &ephem_public_key, &mut ciphertext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedEnvelope {
        iv: iv.to_vec(),
        ephem_public_key,
        ciphertext,
        mac: tag.to_vec(),
    })
}

/// Decrypt an envelope addressed to the key at `path`
pub fn decrypt(
    node: &PurposeKeyNode,
    path: &KeyPath,
    envelope: &EncryptedEnvelope,
) -> Result<Vec<u8>> {
    let key = node.signing_key(path)?;
    decrypt_with(&key, envelope)
}

fn decrypt_with(key: &SigningKey, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
    if envelope.iv.len() != IV_LEN || envelope.mac.len() != MAC_LEN {
        return Err(Error::DecryptionFailed);
    }

    let ephemeral = k256::PublicKey::from_sec1_bytes(&envelope.ephem_public_key)
        .map_err(|_| Error::DecryptionFailed)?;

    let shared = diffie_hellman(key.as_nonzero_scalar(), ephemeral.as_affine());
    let sym = derive_key(shared.raw_secret_bytes(), &envelope.ephem_public_key)?;

    let cipher = Aes256Gcm::new_from_slice(&sym[..]).map_err(|_| Error::DecryptionFailed)?;

    let mut buffer = Zeroizing::new(envelope.ciphertext.clone());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&envelope.iv),
            &envelope.ephem_public_key,
            &mut buffer,
            Tag::from_slice(&envelope.mac),
        )
        .map_err(|_| Error::DecryptionFailed)?;

    Ok(buffer.to_vec())
}

fn derive_key(shared: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared);
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(HKDF_INFO, &mut key[..])
        .map_err(|_| Error::Crypto("Failed to derive envelope key".to_string()))?;
    Ok(key)
}
