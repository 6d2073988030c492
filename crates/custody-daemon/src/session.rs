//! Per-session purpose store
//!
//! Each session owns the purpose nodes it has set up, keyed by the alias the
//! caller chose. Setups for different aliases run concurrently; setups for
//! the same alias are serialized by a per-alias lock so the first one wins
//! and later identical ones observe it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use custody_core::{Error as CoreError, Origin, PurposeKeyNode, RootSeed, DEFAULT_PURPOSE};

use crate::error::Result;
use crate::vault::blocking;

/// State of one bound vault session
pub struct Session {
    origin: Origin,
    root: Arc<RootSeed>,
    nodes: RwLock<HashMap<String, Arc<PurposeKeyNode>>>,
    setup_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Session {
    /// Open a session for `origin` with the default purpose set up
    pub async fn open(root: Arc<RootSeed>, origin: Origin) -> Result<Self> {
        let session = Self {
            origin,
            root,
            nodes: RwLock::new(HashMap::new()),
            setup_locks: Mutex::new(HashMap::new()),
        };
        session
            .setup_purpose(DEFAULT_PURPOSE, DEFAULT_PURPOSE)
            .await?;
        Ok(session)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Derive the node for `purpose` and store it under `alias`
    pub async fn setup_purpose(&self, purpose: &str, alias: &str) -> Result<Arc<PurposeKeyNode>> {
        if purpose.is_empty() || alias.is_empty() {
            return Err(CoreError::InvalidPathOrPurpose(
                "purpose and alias must not be empty".to_string(),
            )
            .into());
        }

        let lock = {
            let mut locks = self.setup_locks.lock().await;
            Arc::clone(locks.entry(alias.to_string()).or_default())
        };
        let _guard = lock.lock().await;

        if let Some(existing) = self.nodes.read().await.get(alias) {
            if existing.purpose() == purpose {
                debug!(alias, purpose, "Purpose already set up");
                return Ok(Arc::clone(existing));
            }
            return Err(CoreError::AliasConflict {
                alias: alias.to_string(),
                existing: existing.purpose().to_string(),
            }
            .into());
        }

        let root = Arc::clone(&self.root);
        let origin = self.origin.clone();
        let name = purpose.to_string();
        let node = Arc::new(blocking(move || PurposeKeyNode::setup(&root, &origin, &name)).await?);

        self.nodes
            .write()
            .await
            .insert(alias.to_string(), Arc::clone(&node));
        info!(origin = %self.origin, purpose, alias, "Purpose set up");

        Ok(node)
    }

    /// Node stored under `alias`
    pub async fn node(&self, alias: &str) -> Result<Arc<PurposeKeyNode>> {
        self.nodes
            .read()
            .await
            .get(alias)
            .cloned()
            .ok_or_else(|| CoreError::InvalidPurpose(alias.to_string()).into())
    }

    pub async fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.nodes.read().await.keys().cloned().collect();
        aliases.sort();
        aliases
    }
}
