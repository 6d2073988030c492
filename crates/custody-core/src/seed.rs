//! Root seed and purpose sub-seed derivation
//!
//! The vault holds exactly one [`RootSeed`]: BIP-39 entropy from which every
//! key is stretched. A purpose sub-seed is the BIP-39 seed of that entropy
//! under a passphrase built from the caller origin and the purpose name, so
//! two purposes (or two origins) never share KDF inputs.

use std::fmt;

use bip39::Mnemonic;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Entropy length of a freshly generated root seed (24-word mnemonic)
pub const ROOT_ENTROPY_LEN: usize = 32;

/// Purpose set up implicitly when an origin is bound
pub const DEFAULT_PURPOSE: &str = "auto";

/// Passphrase domain for the vault attestation key; never a valid origin
const ATTESTATION_PASSPHRASE: &str = "custody:attestation";

/// Authenticated identity of the calling context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Origin(String);

impl Origin {
    pub fn new(origin: impl Into<String>) -> Result<Self> {
        let origin = origin.into();
        if origin.trim().is_empty() {
            return Err(Error::InvalidOrigin("origin must not be empty".to_string()));
        }
        if origin.starts_with(ATTESTATION_PASSPHRASE) {
            return Err(Error::InvalidOrigin(format!(
                "origin uses reserved prefix: {}",
                origin
            )));
        }
        Ok(Self(origin))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Origin {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Origin::new(value)
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        origin.0
    }
}

/// Passphrase fed to the seed stretch for a given origin and purpose
///
/// The origin is length-prefixed, so no (origin, purpose) pair can spell
/// another pair's passphrase.
pub fn purpose_passphrase(origin: &Origin, purpose: &str) -> String {
    format!("{}:{}/{}", origin.0.len(), origin.0, purpose)
}

/// The vault's single root of key-generation authority
pub struct RootSeed {
    entropy: Zeroizing<Vec<u8>>,
}

impl RootSeed {
    /// Generate fresh entropy from the OS RNG
    pub fn generate() -> Self {
        let mut entropy = Zeroizing::new(vec![0u8; ROOT_ENTROPY_LEN]);
        OsRng.fill_bytes(&mut entropy);
        Self { entropy }
    }

    /// Rebuild a root seed from persisted entropy
    pub fn from_entropy(entropy: &[u8]) -> Result<Self> {
        Mnemonic::from_entropy(entropy).map_err(|e| Error::Seed(e.to_string()))?;
        Ok(Self {
            entropy: Zeroizing::new(entropy.to_vec()),
        })
    }

    /// Raw entropy, for the seed store only
    pub fn entropy(&self) -> &[u8] {
        &self.entropy
    }

    /// Sub-seed for one (origin, purpose) pair
    pub fn purpose_seed(&self, origin: &Origin, purpose: &str) -> Result<PurposeSeed> {
        self.stretch(&purpose_passphrase(origin, purpose))
    }

    pub(crate) fn attestation_seed(&self) -> Result<PurposeSeed> {
        self.stretch(ATTESTATION_PASSPHRASE)
    }

    fn stretch(&self, passphrase: &str) -> Result<PurposeSeed> {
        let mnemonic =
            Mnemonic::from_entropy(&self.entropy).map_err(|e| Error::Seed(e.to_string()))?;
        Ok(PurposeSeed(Zeroizing::new(mnemonic.to_seed(passphrase))))
    }
}

impl fmt::Debug for RootSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSeed").finish_non_exhaustive()
    }
}

/// 64-byte intermediate seed for one purpose
#[derive(PartialEq, Eq)]
pub struct PurposeSeed(Zeroizing<[u8; 64]>);

impl PurposeSeed {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for PurposeSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PurposeSeed(..)")
    }
}
