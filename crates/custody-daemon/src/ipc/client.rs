//! Host-side vault client
//!
//! Performs the handshake, then multiplexes requests over one channel. Each
//! request gets a `callback-<n>` id and a oneshot completion handle in the
//! correlation table; the reader task routes replies by id, so the vault may
//! answer in any order.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, ReadHalf,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use custody_core::{
    types::decode_hex, EncryptedEnvelope, KeyInfo, MessageHash, Proof, ProofType, PublicKey,
    Signature,
};

use crate::error::{DaemonError, Result};

use super::connection::{IpcClientTransport, PlatformClient};
use super::types::{
    DecryptParams, DeriveParams, EncryptParams, GetProofParams, InitParams, KeyInfoParams,
    KeyRef, NoParams, Outbound, PubexRef, Ready, RecoverParams, Reply, Request,
    RevokeCookieParams, SetupPurposeParams, SignParams, SignResult, VerifyProofParams,
    RESULT_INITED, RESULT_REDIRECT,
};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

/// Outcome of connecting to the vault
pub enum InitOutcome {
    Inited(VaultClient),
    /// Untrusted caller without a valid cookie; fetch one at `url`
    Redirect { url: String },
}

/// Client side of a vault channel
pub struct VaultClient {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    timeout: Option<Duration>,
    reader: JoinHandle<()>,
}

impl VaultClient {
    /// Connect to the daemon socket and initialize a session
    pub async fn connect(path: &Path, init: InitParams) -> Result<InitOutcome> {
        let stream = PlatformClient::connect(path).await?;
        Self::handshake(stream, init).await
    }

    /// Initialize a session over an already connected stream
    pub async fn handshake<S>(stream: S, init: InitParams) -> Result<InitOutcome>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        loop {
            let Some(line) = lines.next_line().await? else {
                return Err(DaemonError::ChannelClosed);
            };
            match serde_json::from_str::<Outbound>(&line) {
                Ok(Outbound::Ready(Ready { ready: true })) => break,
                _ => debug!("Ignoring message before ready"),
            }
        }

        let next_id = AtomicU64::new(0);
        let init_id = callback_id(&next_id);
        let message = json!({ "init": init, "callback": init_id });
        writer.write_all(message.to_string().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let reply = loop {
            let Some(line) = lines.next_line().await? else {
                return Err(DaemonError::TrustEstablishmentFailed(
                    "vault closed the channel during initialization".to_string(),
                ));
            };
            match serde_json::from_str::<Outbound>(&line) {
                Ok(Outbound::Reply(reply)) if reply.callback == init_id => break reply,
                _ => debug!("Ignoring message while waiting for init reply"),
            }
        };

        let url = reply.url.clone();
        match reply.into_result()? {
            Value::String(result) if result == RESULT_INITED => {}
            Value::String(result) if result == RESULT_REDIRECT => {
                return Ok(InitOutcome::Redirect {
                    url: url.unwrap_or_default(),
                });
            }
            other => {
                return Err(DaemonError::Ipc(format!(
                    "unexpected init reply: {}",
                    other
                )))
            }
        }

        let (outbound, rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(write_loop(writer, rx));

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            lines,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Ok(InitOutcome::Inited(Self {
            outbound,
            pending,
            next_id,
            closed,
            timeout: None,
            reader,
        }))
    }

    /// Fail requests that get no reply within `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the vault side has gone away
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting a reply
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send a request and wait for its reply
    pub async fn request(&self, request: &Request) -> Result<Value> {
        let id = callback_id(&self.next_id);
        let message = request.to_message(&id)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // Checked after registering so a concurrent close drains us or is seen here
        if self.is_closed() || self.outbound.send(message.to_string()).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(DaemonError::ChannelClosed);
        }

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(DaemonError::Timeout);
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(DaemonError::ChannelClosed),
        }
    }

    async fn request_as<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let value = self.request(&request).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn setup_purpose(&self, purpose: &str, alias: &str) -> Result<bool> {
        self.request_as(Request::SetupPurpose(SetupPurposeParams {
            purpose: purpose.to_string(),
            alias: alias.to_string(),
        }))
        .await
    }

    pub async fn key_info(&self, alias: &str, path: &str) -> Result<KeyInfo> {
        self.request_as(Request::KeyInfo(KeyInfoParams {
            key: key_ref(alias, path),
        }))
        .await
    }

    /// Public derivation below an extended public key
    pub async fn derive(&self, pubex: &str, path: &str) -> Result<KeyInfo> {
        self.request_as(Request::Derive(DeriveParams {
            key: PubexRef {
                pubex: pubex.to_string(),
                derive: path.to_string(),
            },
        }))
        .await
    }

    pub async fn sign(&self, alias: &str, path: &str, hash: &MessageHash) -> Result<SignResult> {
        self.request_as(Request::Sign(SignParams {
            key: key_ref(alias, path),
            hash: hash.to_hex(),
        }))
        .await
    }

    pub async fn recover(
        &self,
        signature: &Signature,
        recovery: u8,
        hash: &MessageHash,
    ) -> Result<PublicKey> {
        self.request_as(Request::Recover(RecoverParams {
            signature: signature.to_hex(),
            recovery,
            hash: hash.to_hex(),
        }))
        .await
    }

    pub async fn encrypt(&self, pubkey: &PublicKey, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
        self.request_as(Request::Encrypt(EncryptParams {
            pubkey: pubkey.to_hex(),
            plaintext: hex::encode(plaintext),
        }))
        .await
    }

    pub async fn decrypt(
        &self,
        alias: &str,
        path: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>> {
        let plaintext: String = self
            .request_as(Request::Decrypt(DecryptParams {
                key: key_ref(alias, path),
                iv: hex::encode(&envelope.iv),
                ephem_public_key: hex::encode(&envelope.ephem_public_key),
                ciphertext: hex::encode(&envelope.ciphertext),
                mac: hex::encode(&envelope.mac),
            }))
            .await?;
        decode_hex(&plaintext).map_err(|e| DaemonError::Serialization(e.to_string()))
    }

    pub async fn get_proof(&self, alias: &str, path: &str, proof_type: ProofType) -> Result<Proof> {
        self.request_as(Request::GetProof(GetProofParams {
            key: key_ref(alias, path),
            proof_type,
        }))
        .await
    }

    pub async fn verify_proof(&self, proof: &Proof) -> Result<bool> {
        self.request_as(Request::VerifyProof(VerifyProofParams {
            message: proof.message.clone(),
            signature: proof.signature.to_hex(),
            recovery: proof.recovery,
        }))
        .await
    }

    /// Origin the vault bound this session to
    pub async fn app_id(&self) -> Result<String> {
        self.request_as(Request::GetAppId(NoParams {})).await
    }

    pub async fn attestation_key(&self) -> Result<PublicKey> {
        self.request_as(Request::AttestationKey(NoParams {})).await
    }

    /// Cookie that lets an untrusted channel bind to this session's origin
    pub async fn issue_cookie(&self) -> Result<String> {
        self.request_as(Request::IssueCookie(NoParams {})).await
    }

    pub async fn revoke_cookie(&self, cookie: &str) -> Result<bool> {
        self.request_as(Request::RevokeCookie(RevokeCookieParams {
            cookie: cookie.to_string(),
        }))
        .await
    }
}

impl Drop for VaultClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn callback_id(counter: &AtomicU64) -> String {
    format!("callback-{}", counter.fetch_add(1, Ordering::SeqCst))
}

fn key_ref(alias: &str, path: &str) -> KeyRef {
    KeyRef {
        purpose: alias.to_string(),
        derive: path.to_string(),
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            debug!("Vault channel write failed: {}", e);
            break;
        }
    }
}

async fn read_loop<S>(
    mut lines: Lines<BufReader<ReadHalf<S>>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Vault channel read failed: {}", e);
                break;
            }
        };

        let reply: Reply = match serde_json::from_str::<Outbound>(&line) {
            Ok(Outbound::Reply(reply)) => reply,
            Ok(Outbound::Ready(_)) => continue,
            Err(e) => {
                warn!("Ignoring malformed reply: {}", e);
                continue;
            }
        };

        let waiter = pending.lock().await.remove(&reply.callback);
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply.into_result());
            }
            None => debug!(callback = %reply.callback, "Reply for unknown callback"),
        }
    }

    closed.store(true, Ordering::SeqCst);
    let waiters: Vec<_> = pending.lock().await.drain().collect();
    if !waiters.is_empty() {
        debug!(count = waiters.len(), "Failing pending requests, channel closed");
    }
    for (_, tx) in waiters {
        let _ = tx.send(Err(DaemonError::ChannelClosed));
    }
}
