//! Shared vault state and request routing
//!
//! One [`Vault`] serves every connection. It owns the root seed, the
//! attestation key and the cookie jar; per-connection state lives in a
//! [`Session`]. Derivation and crypto run on the blocking pool.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use custody_core::{
    attestation::{get_proof, verify_proof, AttestationKey},
    crypto::{recover_public_key, sign},
    decrypt, derive_from_extended_key, encrypt,
    types::decode_hex,
    EncryptedEnvelope, Error as CoreError, KeyPath, MessageHash, Origin, PublicKey, RootSeed,
    Signature,
};

use crate::config::VaultConfig;
use crate::error::{DaemonError, Result};
use crate::ipc::{Established, InitParams, KeyRef, Request, RequestHandler, SignResult};
use crate::session::Session;
use crate::trust::{bind_origin, Binding, CookieJar};

/// Run a derivation or crypto step off the async executor
pub(crate) async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> custody_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DaemonError::Internal(format!("worker task failed: {}", e)))?
        .map_err(DaemonError::from)
}

/// The custody vault
pub struct Vault {
    root: Arc<RootSeed>,
    attestation: Arc<AttestationKey>,
    cookies: CookieJar,
    cookie_redirect_url: Option<String>,
}

impl Vault {
    /// Build the vault around a loaded root seed
    pub fn new(root: RootSeed, config: &VaultConfig) -> Result<Self> {
        let attestation = AttestationKey::derive(&root)?;
        Ok(Self {
            root: Arc::new(root),
            attestation: Arc::new(attestation),
            cookies: CookieJar::with_ttl(Duration::from_secs(config.cookie_ttl_secs)),
            cookie_redirect_url: config.cookie_redirect_url.clone(),
        })
    }

    /// Public half of the attestation key
    pub fn attestation_key(&self) -> &PublicKey {
        self.attestation.public_key()
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    async fn node_and_path(
        &self,
        session: &Session,
        key: &KeyRef,
    ) -> Result<(Arc<custody_core::PurposeKeyNode>, KeyPath)> {
        let node = session.node(&key.purpose).await?;
        let path: KeyPath = key.derive.parse()?;
        Ok((node, path))
    }
}

fn parse_hash(hash: &str) -> Result<MessageHash> {
    MessageHash::from_hex(hash)
        .map_err(|e| DaemonError::InvalidRequest(format!("hash must be 32 bytes of hex: {}", e)))
}

fn parse_signature(signature: &str) -> Result<Signature> {
    Signature::from_hex(signature)
        .map_err(|e| CoreError::InvalidSignatureEncoding(e.to_string()).into())
}

fn decode_envelope_part(value: &str) -> Result<Vec<u8>> {
    decode_hex(value).map_err(|_| CoreError::DecryptionFailed.into())
}

#[async_trait]
impl RequestHandler for Vault {
    type Session = Session;

    async fn establish(
        &self,
        peer: Option<Origin>,
        init: InitParams,
    ) -> Result<Established<Session>> {
        let binding = bind_origin(
            peer.as_ref(),
            &init,
            &self.cookies,
            self.cookie_redirect_url.as_deref(),
        )
        .await?;

        match binding {
            Binding::Bound(origin) => {
                let session = Session::open(Arc::clone(&self.root), origin).await?;
                Ok(Established::Ready(session))
            }
            Binding::Redirect { url } => Ok(Established::Redirect { url }),
        }
    }

    async fn handle(&self, session: Arc<Session>, request: Request) -> Result<Value> {
        debug!(origin = %session.origin(), op = request.tag(), "Handling request");

        match request {
            Request::SetupPurpose(params) => {
                session
                    .setup_purpose(&params.purpose, &params.alias)
                    .await?;
                Ok(Value::Bool(true))
            }

            Request::KeyInfo(params) => {
                let (node, path) = self.node_and_path(&session, &params.key).await?;
                let info = blocking(move || node.derive_key(&path)).await?;
                Ok(serde_json::to_value(info)?)
            }

            Request::Derive(params) => {
                let path: KeyPath = params.key.derive.parse()?;
                let pubex = params.key.pubex;
                let info = blocking(move || derive_from_extended_key(&pubex, &path)).await?;
                Ok(serde_json::to_value(info)?)
            }

            Request::Sign(params) => {
                let (node, path) = self.node_and_path(&session, &params.key).await?;
                let hash = parse_hash(&params.hash)?;
                let signed = blocking(move || sign(&node, &path, &hash)).await?;
                Ok(serde_json::to_value(SignResult {
                    signature: signed.signature,
                    recovery: signed.recovery,
                    hash,
                })?)
            }

            Request::Recover(params) => {
                let signature = parse_signature(&params.signature)?;
                let hash = parse_hash(&params.hash)?;
                let recovery = params.recovery;
                let pubkey =
                    blocking(move || recover_public_key(&signature, recovery, &hash)).await?;
                Ok(Value::String(pubkey.to_hex()))
            }

            Request::Encrypt(params) => {
                let pubkey = PublicKey::from_hex(&params.pubkey)?;
                let plaintext = decode_hex(&params.plaintext).map_err(|e| {
                    DaemonError::InvalidRequest(format!("plaintext must be hex: {}", e))
                })?;
                let envelope = blocking(move || encrypt(&pubkey, &plaintext)).await?;
                Ok(serde_json::to_value(envelope)?)
            }

            Request::Decrypt(params) => {
                let (node, path) = self.node_and_path(&session, &params.key).await?;
                let envelope = EncryptedEnvelope {
                    iv: decode_envelope_part(&params.iv)?,
                    ephem_public_key: decode_envelope_part(&params.ephem_public_key)?,
                    ciphertext: decode_envelope_part(&params.ciphertext)?,
                    mac: decode_envelope_part(&params.mac)?,
                };
                let plaintext = blocking(move || decrypt(&node, &path, &envelope)).await?;
                Ok(Value::String(hex::encode(plaintext)))
            }

            Request::GetProof(params) => {
                let (node, path) = self.node_and_path(&session, &params.key).await?;
                let attestation = Arc::clone(&self.attestation);
                let proof_type = params.proof_type;
                let proof =
                    blocking(move || get_proof(&node, &path, proof_type, &attestation)).await?;
                Ok(serde_json::to_value(proof)?)
            }

            Request::VerifyProof(params) => {
                let attestation = Arc::clone(&self.attestation);
                let valid = blocking(move || {
                    verify_proof(
                        &params.signature,
                        params.recovery,
                        &params.message,
                        attestation.public_key(),
                    )
                })
                .await?;
                Ok(Value::Bool(valid))
            }

            Request::GetAppId(_) => Ok(Value::String(session.origin().to_string())),

            Request::AttestationKey(_) => Ok(Value::String(self.attestation_key().to_hex())),

            Request::IssueCookie(_) => {
                let cookie = self.cookies.issue(session.origin().clone()).await;
                Ok(Value::String(cookie))
            }

            Request::RevokeCookie(params) => {
                let revoked = self.cookies.revoke(&params.cookie, session.origin()).await;
                Ok(Value::Bool(revoked))
            }
        }
    }
}
