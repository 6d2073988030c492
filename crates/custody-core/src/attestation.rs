//! Proofs that a key was issued by this vault
//!
//! A proof binds (origin, purpose, path, key) in a canonical JSON statement.
//! The statement is hex-encoded into `message` and signed over
//! SHA-256(message bytes) by the vault attestation key, whose public half any
//! third party can use to check the proof offline.

use std::fmt;
use std::str::FromStr;

use bip32::{ChildNumber, XPrv};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::crypto::{recover_public_key, sha256, sign_with};
use crate::error::{Error, Result};
use crate::hd::{KeyPath, PurposeKeyNode};
use crate::seed::RootSeed;
use crate::types::{decode_hex, MessageHash, PublicKey, Signature};

/// Statement format version
pub const STATEMENT_VERSION: u32 = 1;

/// Which key representation the proof commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofType {
    /// Uncompressed SEC1 public key
    Pub,
    /// Extended public key
    Pubex,
}

impl FromStr for ProofType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pub" => Ok(ProofType::Pub),
            "pubex" => Ok(ProofType::Pubex),
            other => Err(Error::InvalidPathOrPurpose(format!(
                "unknown proof type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofType::Pub => write!(f, "pub"),
            ProofType::Pubex => write!(f, "pubex"),
        }
    }
}

/// The binding a proof attests to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofStatement {
    pub version: u32,
    pub origin: String,
    pub purpose: String,
    pub path: String,
    pub proof_type: ProofType,
    /// Public key hex or xpub, per `proof_type`
    pub key: String,
}

impl ProofStatement {
    /// Canonical bytes of the statement (field order is fixed by the struct)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Hex message carried in a proof
    pub fn encode(&self) -> Result<String> {
        Ok(hex::encode(self.to_bytes()?))
    }

    /// Read the statement back out of a proof message
    pub fn decode(message: &str) -> Result<Self> {
        let bytes = decode_hex(message)
            .map_err(|e| Error::Serialization(format!("proof message: {}", e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Signed attestation as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub message: String,
    pub signature: Signature,
    pub recovery: u8,
}

/// Vault-wide key that signs attestations
pub struct AttestationKey {
    key: SigningKey,
    public: PublicKey,
}

impl AttestationKey {
    /// Derive the attestation key from the root seed
    pub fn derive(root: &RootSeed) -> Result<Self> {
        let seed = root.attestation_seed()?;
        let master = XPrv::new(seed.as_bytes()).map_err(|e| Error::Crypto(e.to_string()))?;
        let child = ChildNumber::new(0, true).map_err(|e| Error::Crypto(e.to_string()))?;
        let xprv = master
            .derive_child(child)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        let key = xprv.private_key().clone();
        let public = PublicKey::from(key.verifying_key());
        Ok(Self { key, public })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl fmt::Debug for AttestationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationKey")
            .field("public", &self.public.to_hex())
            .finish_non_exhaustive()
    }
}

/// Issue a proof for the key at `path` under `node`
pub fn get_proof(
    node: &PurposeKeyNode,
    path: &KeyPath,
    proof_type: ProofType,
    attestation: &AttestationKey,
) -> Result<Proof> {
    let info = node.derive_key(path)?;
    let key = match proof_type {
        ProofType::Pub => info.pubkey.to_hex(),
        ProofType::Pubex => info.pubex,
    };

    let statement = ProofStatement {
        version: STATEMENT_VERSION,
        origin: node.origin().to_string(),
        purpose: node.purpose().to_string(),
        path: path.to_string_path(),
        proof_type,
        key,
    };

    let message = statement.encode()?;
    let hash = MessageHash::new(sha256(message.as_bytes()));
    let signed = sign_with(&attestation.key, &hash)?;

    Ok(Proof {
        message,
        signature: signed.signature,
        recovery: signed.recovery,
    })
}

/// Check that `message` was signed by the holder of `attestation_key`
///
/// Malformed signature hex or recovery ids are errors; a well-formed proof
/// that fails to match yields `Ok(false)`.
pub fn verify_proof(
    signature: &str,
    recovery: u8,
    message: &str,
    attestation_key: &PublicKey,
) -> Result<bool> {
    let signature = Signature::from_hex(signature)
        .map_err(|e| Error::InvalidSignatureEncoding(e.to_string()))?;
    if recovery > 1 {
        return Err(Error::InvalidSignatureEncoding(format!(
            "recovery id must be 0 or 1, got {}",
            recovery
        )));
    }

    let hash = MessageHash::new(sha256(message.as_bytes()));
    match recover_public_key(&signature, recovery, &hash) {
        Ok(signer) => Ok(&signer == attestation_key),
        Err(_) => Ok(false),
    }
}
