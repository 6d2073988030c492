//! Custody Core - Key derivation and cryptographic primitives for the custody vault
//!
//! Everything here is a pure function of the root seed and request
//! parameters. Private key material never leaves this crate: callers see
//! public keys, extended public keys, signatures, envelopes and proofs.

pub mod attestation;
pub mod crypto;
pub mod ecies;
pub mod error;
pub mod hd;
pub mod seed;
pub mod types;

pub use attestation::{get_proof, verify_proof, AttestationKey, Proof, ProofStatement, ProofType};
pub use crypto::{recover_public_key, sha256, sign, RecoverableSignature};
pub use ecies::{decrypt, encrypt, EncryptedEnvelope};
pub use error::{Error, Result};
pub use hd::{derive_from_extended_key, KeyInfo, KeyPath, PathComponent, PurposeKeyNode};
pub use seed::{purpose_passphrase, Origin, PurposeSeed, RootSeed, DEFAULT_PURPOSE};
pub use types::{MessageHash, PublicKey, Signature};
