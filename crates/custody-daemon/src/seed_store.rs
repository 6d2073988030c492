//! Root seed persistence
//!
//! The seed lives in a single JSON file next to nothing else. It is written
//! once, on first start, and only ever read afterwards. The final file is
//! created with a hard link, which never replaces an existing entry, so two
//! daemons starting together agree on whichever seed landed first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use custody_core::RootSeed;

use crate::error::{DaemonError, Result};

/// On-disk format version
pub const SEED_FILE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SeedFile {
    version: u32,
    entropy: String,
    created_at: DateTime<Utc>,
}

/// File-backed holder of the vault root seed
pub struct SeedStore {
    path: PathBuf,
}

impl SeedStore {
    /// Create a store backed by `path`
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted seed, generating and persisting one on first use
    pub fn get_or_create_root_seed(&self) -> Result<RootSeed> {
        if self.path.exists() {
            let seed = self.load()?;
            debug!("Loaded root seed from {:?}", self.path);
            return Ok(seed);
        }

        let seed = RootSeed::generate();
        if self.persist(&seed)? {
            info!("Generated new root seed at {:?}", self.path);
            Ok(seed)
        } else {
            debug!("Root seed created concurrently at {:?}", self.path);
            self.load()
        }
    }

    fn load(&self) -> Result<RootSeed> {
        let content = Zeroizing::new(std::fs::read_to_string(&self.path).map_err(|e| {
            DaemonError::StorageUnavailable(format!("read {:?}: {}", self.path, e))
        })?);

        let file: SeedFile = serde_json::from_str(&content)
            .map_err(|e| DaemonError::StorageUnavailable(format!("corrupt seed file: {}", e)))?;
        let hex_entropy = Zeroizing::new(file.entropy);

        if file.version != SEED_FILE_VERSION {
            return Err(DaemonError::StorageUnavailable(format!(
                "unsupported seed file version {}",
                file.version
            )));
        }

        let entropy = Zeroizing::new(
            hex::decode(hex_entropy.as_str())
                .map_err(|e| DaemonError::StorageUnavailable(format!("corrupt entropy: {}", e)))?,
        );

        RootSeed::from_entropy(&entropy)
            .map_err(|e| DaemonError::StorageUnavailable(format!("corrupt entropy: {}", e)))
    }

    /// Write `seed` unless a seed file already exists; false if one did
    fn persist(&self, seed: &RootSeed) -> Result<bool> {
        let unavailable =
            |e: std::io::Error| DaemonError::StorageUnavailable(format!("{:?}: {}", self.path, e));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(unavailable)?;
        }

        let file = SeedFile {
            version: SEED_FILE_VERSION,
            entropy: hex::encode(seed.entropy()),
            created_at: Utc::now(),
        };
        let content = Zeroizing::new(serde_json::to_string_pretty(&file)?);
        drop(Zeroizing::new(file.entropy));

        // Fully written temp file first, then linked into place
        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let written = write_private(&temp_path, content.as_bytes())
            .and_then(|()| std::fs::hard_link(&temp_path, &self.path));
        let _ = std::fs::remove_file(&temp_path);

        match written {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(unavailable(e)),
        }
    }
}

fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut out = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600) // Read/write for owner only
        .open(path)?;
    out.write_all(content)?;
    out.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_core::{Origin, PurposeKeyNode};
    use tempfile::TempDir;

    fn auto_pubex(seed: &RootSeed) -> String {
        let origin = Origin::new("unix:uid=1000").unwrap();
        PurposeKeyNode::setup(seed, &origin, "auto")
            .unwrap()
            .derive_key(&"m/0".parse().unwrap())
            .unwrap()
            .pubex
    }

    #[test]
    fn test_seed_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault").join("seed.json");

        let first = SeedStore::new(path.clone()).get_or_create_root_seed().unwrap();
        let second = SeedStore::new(path.clone()).get_or_create_root_seed().unwrap();

        assert_eq!(first.entropy(), second.entropy());
        assert_eq!(auto_pubex(&first), auto_pubex(&second));

        // Only the seed file remains; temp files are cleaned up
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("seed.json")]);
    }

    #[test]
    fn test_existing_seed_is_never_replaced() {
        let dir = TempDir::new().unwrap();
        let store = SeedStore::new(dir.path().join("seed.json"));
        let first = store.get_or_create_root_seed().unwrap();

        // A late writer loses and the original seed survives
        let late = RootSeed::generate();
        assert!(!store.persist(&late).unwrap());
        assert_eq!(store.load().unwrap().entropy(), first.entropy());
    }

    #[test]
    fn test_concurrent_first_start_agrees_on_one_seed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seed.json");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    SeedStore::new(path)
                        .get_or_create_root_seed()
                        .unwrap()
                        .entropy()
                        .to_vec()
                })
            })
            .collect();
        let seeds: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(seeds.iter().all(|seed| seed == &seeds[0]));
        let stored = SeedStore::new(path).get_or_create_root_seed().unwrap();
        assert_eq!(stored.entropy(), &seeds[0][..]);
    }

    #[test]
    fn test_seed_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = SeedStore::new(dir.path().join("seed.json"));
        store.get_or_create_root_seed().unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, "not json").unwrap();

        let err = SeedStore::new(path).get_or_create_root_seed().unwrap_err();
        assert!(matches!(err, DaemonError::StorageUnavailable(_)));
    }

    #[test]
    fn test_unknown_version_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seed.json");
        let file = SeedFile {
            version: 2,
            entropy: hex::encode([1u8; 32]),
            created_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let err = SeedStore::new(path).get_or_create_root_seed().unwrap_err();
        assert!(matches!(err, DaemonError::StorageUnavailable(_)));
    }

    #[test]
    fn test_bad_entropy_length_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seed.json");
        let file = SeedFile {
            version: SEED_FILE_VERSION,
            entropy: hex::encode([1u8; 5]),
            created_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let err = SeedStore::new(path).get_or_create_root_seed().unwrap_err();
        assert!(matches!(err, DaemonError::StorageUnavailable(_)));
    }

    #[test]
    fn test_unwritable_location_is_unavailable() {
        // A regular file where the parent directory should be
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let err = SeedStore::new(blocker.join("seed.json"))
            .get_or_create_root_seed()
            .unwrap_err();
        assert!(matches!(err, DaemonError::StorageUnavailable(_)));
    }
}
