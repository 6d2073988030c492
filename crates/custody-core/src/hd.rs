//! Hierarchical Deterministic (HD) key derivation for purpose key nodes
//!
//! This module implements BIP-32 derivation below a per-purpose master key.
//! Only public material leaves a [`PurposeKeyNode`]; private keys at a path
//! are reachable from inside this crate for signing and decryption.

use std::fmt;
use std::str::FromStr;

use bip32::{ChildNumber, Prefix, XPrv, XPub};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::seed::{Origin, PurposeSeed, RootSeed};
use crate::types::PublicKey;

/// Maximum number of path levels accepted from callers
pub const MAX_PATH_DEPTH: usize = 32;

/// HD derivation path component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathComponent {
    /// Index value
    pub index: u32,
    /// Whether this is a hardened derivation
    pub hardened: bool,
}

impl PathComponent {
    /// Create a normal (non-hardened) component
    pub fn normal(index: u32) -> Self {
        Self {
            index,
            hardened: false,
        }
    }

    /// Create a hardened component
    pub fn hardened(index: u32) -> Self {
        Self {
            index,
            hardened: true,
        }
    }

    fn child_number(&self) -> Result<ChildNumber> {
        ChildNumber::new(self.index, self.hardened)
            .map_err(|e| Error::InvalidPathOrPurpose(format!("index {}: {}", self.index, e)))
    }
}

/// HD derivation path (e.g., m/0/1')
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyPath {
    pub components: Vec<PathComponent>,
}

impl KeyPath {
    pub fn new(components: Vec<PathComponent>) -> Self {
        Self { components }
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Convert to string representation (e.g., "m/0/1'")
    pub fn to_string_path(&self) -> String {
        let mut s = String::from("m");
        for component in &self.components {
            s.push('/');
            s.push_str(&component.index.to_string());
            if component.hardened {
                s.push('\'');
            }
        }
        s
    }

    fn child_numbers(&self) -> Result<Vec<ChildNumber>> {
        self.components.iter().map(PathComponent::child_number).collect()
    }
}

impl FromStr for KeyPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidPathOrPurpose(format!("{}: {}", reason, s));

        let mut parts = s.trim().split('/');
        match parts.next() {
            Some("m") | Some("M") => {}
            _ => return Err(invalid("path must start with m")),
        }

        let mut components = Vec::new();
        for part in parts {
            let marker = part
                .strip_suffix('\'')
                .or_else(|| part.strip_suffix('h'));
            let (digits, hardened) = match marker {
                Some(digits) => (digits, true),
                None => (part, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("malformed path component"));
            }
            let index: u32 = digits
                .parse()
                .map_err(|_| invalid("path index out of range"))?;
            if index >= ChildNumber::HARDENED_FLAG {
                return Err(invalid("path index out of range"));
            }
            components.push(PathComponent { index, hardened });
        }

        if components.len() > MAX_PATH_DEPTH {
            return Err(invalid("path too deep"));
        }

        Ok(Self { components })
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_path())
    }
}

impl Serialize for KeyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_path())
    }
}

impl<'de> Deserialize<'de> for KeyPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Public view of a derived key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Uncompressed SEC1 public key
    pub pubkey: PublicKey,
    /// Base58 extended public key (xpub)
    pub pubex: String,
}

impl KeyInfo {
    fn from_xpub(xpub: &XPub) -> Self {
        Self {
            pubkey: PublicKey::from(xpub.public_key()),
            pubex: xpub.to_string(Prefix::XPUB),
        }
    }
}

/// HD subtree root for one (origin, purpose)
pub struct PurposeKeyNode {
    origin: Origin,
    purpose: String,
    master: XPrv,
}

impl PurposeKeyNode {
    /// Derive the node for `purpose` under `origin`
    pub fn setup(root: &RootSeed, origin: &Origin, purpose: &str) -> Result<Self> {
        let seed = root.purpose_seed(origin, purpose)?;
        Self::from_seed(origin.clone(), purpose, &seed)
    }

    pub fn from_seed(origin: Origin, purpose: &str, seed: &PurposeSeed) -> Result<Self> {
        if purpose.is_empty() {
            return Err(Error::InvalidPathOrPurpose(
                "purpose name must not be empty".to_string(),
            ));
        }
        let master = XPrv::new(seed.as_bytes()).map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(Self {
            origin,
            purpose: purpose.to_string(),
            master,
        })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Public key and extended public key at `path`
    pub fn derive_key(&self, path: &KeyPath) -> Result<KeyInfo> {
        let xprv = self.derive_private(path)?;
        Ok(KeyInfo::from_xpub(&xprv.public_key()))
    }

    pub(crate) fn signing_key(&self, path: &KeyPath) -> Result<SigningKey> {
        Ok(self.derive_private(path)?.private_key().clone())
    }

    fn derive_private(&self, path: &KeyPath) -> Result<XPrv> {
        let mut key = self.master.clone();
        for child in path.child_numbers()? {
            key = key
                .derive_child(child)
                .map_err(|e| Error::InvalidPathOrPurpose(e.to_string()))?;
        }
        Ok(key)
    }
}

impl fmt::Debug for PurposeKeyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurposeKeyNode")
            .field("origin", &self.origin)
            .field("purpose", &self.purpose)
            .finish_non_exhaustive()
    }
}

/// Public-only derivation from an extended public key
pub fn derive_from_extended_key(pubex: &str, path: &KeyPath) -> Result<KeyInfo> {
    let mut xpub = XPub::from_str(pubex.trim())
        .map_err(|e| Error::InvalidPublicKey(format!("extended key: {}", e)))?;

    for component in &path.components {
        if component.hardened {
            return Err(Error::InvalidPathOrPurpose(format!(
                "hardened step {}' needs the private key",
                component.index
            )));
        }
        xpub = xpub
            .derive_child(component.child_number()?)
            .map_err(|e| Error::InvalidPathOrPurpose(e.to_string()))?;
    }

    Ok(KeyInfo::from_xpub(&xpub))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(purpose: &str) -> PurposeKeyNode {
        let root = RootSeed::from_entropy(&[3u8; 32]).unwrap();
        let origin = Origin::new("https://app.example").unwrap();
        PurposeKeyNode::setup(&root, &origin, purpose).unwrap()
    }

    #[test]
    fn test_path_parsing() {
        let path: KeyPath = "m/0/1'/2h".parse().unwrap();
        assert_eq!(
            path.components,
            vec![
                PathComponent::normal(0),
                PathComponent::hardened(1),
                PathComponent::hardened(2)
            ]
        );
        assert_eq!(path.to_string_path(), "m/0/1'/2'");

        let root: KeyPath = "m".parse().unwrap();
        assert_eq!(root.depth(), 0);
    }

    #[test]
    fn test_path_rejects_malformed() {
        for bad in ["", "0/1", "m/", "m//1", "m/x", "m/-1", "m/2147483648", "m/1''"] {
            assert!(bad.parse::<KeyPath>().is_err(), "accepted {:?}", bad);
        }
        let deep = format!("m{}", "/0".repeat(MAX_PATH_DEPTH + 1));
        assert!(deep.parse::<KeyPath>().is_err());
    }

    #[test]
    fn test_deterministic_derivation() {
        let path: KeyPath = "m/0/0".parse().unwrap();
        let a = node("auto").derive_key(&path).unwrap();
        let b = node("auto").derive_key(&path).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.pubkey.to_uncompressed().len(), 65);
        assert!(a.pubex.starts_with("xpub"));
    }

    #[test]
    fn test_public_derivation_matches_private() {
        let n = node("auto");
        let parent = n.derive_key(&"m/0".parse().unwrap()).unwrap();
        let child = n.derive_key(&"m/0/7".parse().unwrap()).unwrap();

        let from_xpub = derive_from_extended_key(&parent.pubex, &"m/7".parse().unwrap()).unwrap();
        assert_eq!(from_xpub, child);
    }

    #[test]
    fn test_public_derivation_rejects_hardened() {
        let parent = node("auto").derive_key(&"m/0".parse().unwrap()).unwrap();
        let err = derive_from_extended_key(&parent.pubex, &"m/1'".parse().unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidPathOrPurpose(_)));
    }

    #[test]
    fn test_bad_extended_key() {
        let err = derive_from_extended_key("xpubnotakey", &"m/0".parse().unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidPublicKey(_)));
    }

    #[test]
    fn test_purposes_yield_different_keys() {
        let path: KeyPath = "m/0".parse().unwrap();
        let a = node("auto").derive_key(&path).unwrap();
        let b = node("foo").derive_key(&path).unwrap();
        assert_ne!(a.pubkey, b.pubkey);
        assert_ne!(a.pubex, b.pubex);
    }

    #[test]
    fn test_debug_does_not_leak() {
        let rendered = format!("{:?}", node("auto"));
        assert!(rendered.contains("auto"));
        assert!(!rendered.contains("master"));
    }
}
