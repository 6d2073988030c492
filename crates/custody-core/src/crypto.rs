//! Signing and signature recovery over purpose keys

use k256::ecdsa::{
    signature::hazmat::PrehashVerifier, RecoveryId, Signature as K256Signature, SigningKey,
    VerifyingKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::hd::{KeyPath, PurposeKeyNode};
use crate::types::{MessageHash, PublicKey, Signature};

/// Signature plus the recovery id (0 or 1) needed to recover the signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverableSignature {
    pub signature: Signature,
    pub recovery: u8,
}

/// Sign a 32-byte prehash with the key at `path`
pub fn sign(
    node: &PurposeKeyNode,
    path: &KeyPath,
    message_hash: &MessageHash,
) -> Result<RecoverableSignature> {
    let key = node.signing_key(path)?;
    sign_with(&key, message_hash)
}

pub(crate) fn sign_with(
    key: &SigningKey,
    message_hash: &MessageHash,
) -> Result<RecoverableSignature> {
    let (mut sig, mut recovery_id) = key
        .sign_prehash_recoverable(message_hash.as_bytes())
        .map_err(|e| Error::Crypto(format!("Signing failed: {}", e)))?;

    // Low-S form; flipping s flips the parity of R
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    if recovery_id.is_x_reduced() {
        return Err(Error::Crypto(
            "Signature produced an x-reduced recovery id".to_string(),
        ));
    }

    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(&sig.to_bytes());

    Ok(RecoverableSignature {
        signature: Signature::new(bytes),
        recovery: recovery_id.to_byte(),
    })
}

/// Recover the public key that produced `signature` over `message_hash`
pub fn recover_public_key(
    signature: &Signature,
    recovery: u8,
    message_hash: &MessageHash,
) -> Result<PublicKey> {
    if recovery > 1 {
        return Err(Error::InvalidSignatureEncoding(format!(
            "recovery id must be 0 or 1, got {}",
            recovery
        )));
    }
    let recovery_id = RecoveryId::from_byte(recovery).ok_or_else(|| {
        Error::InvalidSignatureEncoding(format!("invalid recovery id {}", recovery))
    })?;

    let sig = K256Signature::from_slice(signature.as_bytes())
        .map_err(|e| Error::InvalidSignatureEncoding(e.to_string()))?;

    // (r, n-s) with the opposite parity names the same key
    let (sig, recovery_id) = match sig.normalize_s() {
        Some(low) => (
            low,
            RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
        ),
        None => (sig, recovery_id),
    };

    let key = VerifyingKey::recover_from_prehash(message_hash.as_bytes(), &sig, recovery_id)
        .map_err(|e| Error::InvalidSignatureEncoding(e.to_string()))?;

    Ok(PublicKey::from(&key))
}

impl PublicKey {
    /// Verify a signature against this public key
    pub fn verify(&self, message_hash: &MessageHash, signature: &Signature) -> Result<()> {
        let sig = K256Signature::from_slice(signature.as_bytes())
            .map_err(|e| Error::InvalidSignatureEncoding(e.to_string()))?;

        self.verifying_key()
            .verify_prehash(message_hash.as_bytes(), &sig)
            .map_err(|e| Error::Crypto(format!("Signature verification failed: {}", e)))
    }
}

/// Hash data using SHA256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{Origin, RootSeed};

    fn node() -> PurposeKeyNode {
        let root = RootSeed::from_entropy(&[9u8; 32]).unwrap();
        let origin = Origin::new("https://app.example").unwrap();
        PurposeKeyNode::setup(&root, &origin, "auto").unwrap()
    }

    #[test]
    fn test_sign_and_recover() {
        let node = node();
        let path: KeyPath = "m/0".parse().unwrap();
        let hash = MessageHash::new(sha256(b"hello vault"));

        let sig = sign(&node, &path, &hash).unwrap();
        assert!(sig.recovery <= 1);

        let recovered = recover_public_key(&sig.signature, sig.recovery, &hash).unwrap();
        let expected = node.derive_key(&path).unwrap().pubkey;
        assert_eq!(recovered, expected);
        expected.verify(&hash, &sig.signature).unwrap();
    }

    #[test]
    fn test_signature_is_low_s() {
        const HALF_ORDER: [u8; 32] = [
            0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFF, 0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46,
            0x68, 0x1B, 0x20, 0xA0,
        ];
        let node = node();
        let path: KeyPath = "m/1".parse().unwrap();
        for i in 0u8..16 {
            let hash = MessageHash::new(sha256(&[i]));
            let sig = sign(&node, &path, &hash).unwrap();
            assert!(sig.signature.s() <= &HALF_ORDER[..]);
        }
    }

    #[test]
    fn test_wrong_hash_recovers_other_key() {
        let node = node();
        let path: KeyPath = "m/0".parse().unwrap();
        let hash = MessageHash::new(sha256(b"one"));
        let sig = sign(&node, &path, &hash).unwrap();

        let other = MessageHash::new(sha256(b"two"));
        let expected = node.derive_key(&path).unwrap().pubkey;
        match recover_public_key(&sig.signature, sig.recovery, &other) {
            Ok(key) => assert_ne!(key, expected),
            Err(e) => assert!(matches!(e, Error::InvalidSignatureEncoding(_))),
        }
    }

    #[test]
    fn test_recover_accepts_high_s_form() {
        let node = node();
        let path: KeyPath = "m/0/1".parse().unwrap();
        let hash = MessageHash::new(sha256(b"high s"));
        let signed = sign(&node, &path, &hash).unwrap();

        let low = K256Signature::from_slice(signed.signature.as_bytes()).unwrap();
        let s: k256::Scalar = *low.s().as_ref();
        let high = K256Signature::from_scalars(low.r(), -s).unwrap();
        assert!(high.normalize_s().is_some());

        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&high.to_bytes());
        let recovered =
            recover_public_key(&Signature::new(bytes), signed.recovery ^ 1, &hash).unwrap();
        assert_eq!(recovered, node.derive_key(&path).unwrap().pubkey);

        // Same high-S form with the original parity names a different key
        match recover_public_key(&Signature::new(bytes), signed.recovery, &hash) {
            Ok(key) => assert_ne!(key, node.derive_key(&path).unwrap().pubkey),
            Err(e) => assert!(matches!(e, Error::InvalidSignatureEncoding(_))),
        }
    }

    #[test]
    fn test_recover_rejects_bad_recovery_id() {
        let hash = MessageHash::new([1u8; 32]);
        let err = recover_public_key(&Signature::new([1u8; 64]), 2, &hash).unwrap_err();
        assert!(matches!(err, Error::InvalidSignatureEncoding(_)));
    }

    #[test]
    fn test_recover_rejects_zero_signature() {
        let hash = MessageHash::new([1u8; 32]);
        let err = recover_public_key(&Signature::new([0u8; 64]), 0, &hash).unwrap_err();
        assert!(matches!(err, Error::InvalidSignatureEncoding(_)));
    }
}
