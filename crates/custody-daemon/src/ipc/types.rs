//! IPC protocol types
//!
//! Every message is one JSON object per line. Requests name their operation
//! by the single key other than `callback`:
//!
//! ```text
//! {"sign": {"key": {"purpose": "auto", "derive": "m/0"}, "hash": "..."}, "callback": "callback-3"}
//! ```
//!
//! Replies echo the callback id with either `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use custody_core::{MessageHash, ProofType, Signature};

use crate::error::DaemonError;

/// Key reserved for the correlation id
pub const CALLBACK_KEY: &str = "callback";

/// Tag of the initialization message
pub const INIT_TAG: &str = "init";

/// Result of a successful initialization
pub const RESULT_INITED: &str = "inited";

/// Result telling an untrusted caller to fetch a session cookie first
pub const RESULT_REDIRECT: &str = "redirectForCookie";

/// Parameters of the `init` message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitParams {
    /// Trust the transport-authenticated peer identity as the origin
    pub use_origin: bool,
    /// Session cookie for untrusted mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

/// Reference to a key under a set-up purpose alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    /// Alias given at `setupPurpose`
    pub purpose: String,
    /// Derivation path, e.g. `m/0/1'`
    pub derive: String,
}

/// Reference to a key below an extended public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubexRef {
    pub pubex: String,
    pub derive: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupPurposeParams {
    pub purpose: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfoParams {
    pub key: KeyRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeriveParams {
    pub key: PubexRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignParams {
    pub key: KeyRef,
    /// 32-byte prehash, hex
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverParams {
    pub signature: String,
    pub recovery: u8,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptParams {
    pub pubkey: String,
    /// Plaintext bytes, hex
    pub plaintext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptParams {
    pub key: KeyRef,
    pub iv: String,
    pub ephem_public_key: String,
    pub ciphertext: String,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProofParams {
    pub key: KeyRef,
    pub proof_type: ProofType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyProofParams {
    pub message: String,
    pub signature: String,
    pub recovery: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeCookieParams {
    pub cookie: String,
}

/// Operation without parameters (`{}` on the wire)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoParams {}

/// Vault operations accepted once a session is ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Request {
    SetupPurpose(SetupPurposeParams),
    KeyInfo(KeyInfoParams),
    Derive(DeriveParams),
    Sign(SignParams),
    Recover(RecoverParams),
    Encrypt(EncryptParams),
    Decrypt(DecryptParams),
    GetProof(GetProofParams),
    VerifyProof(VerifyProofParams),
    GetAppId(NoParams),
    AttestationKey(NoParams),
    IssueCookie(NoParams),
    RevokeCookie(RevokeCookieParams),
}

impl Request {
    /// Wire tags of every operation
    pub const TAGS: &'static [&'static str] = &[
        "setupPurpose",
        "keyInfo",
        "derive",
        "sign",
        "recover",
        "encrypt",
        "decrypt",
        "getProof",
        "verifyProof",
        "getAppId",
        "attestationKey",
        "issueCookie",
        "revokeCookie",
    ];

    /// Wire tag of this request
    pub fn tag(&self) -> &'static str {
        match self {
            Request::SetupPurpose(_) => "setupPurpose",
            Request::KeyInfo(_) => "keyInfo",
            Request::Derive(_) => "derive",
            Request::Sign(_) => "sign",
            Request::Recover(_) => "recover",
            Request::Encrypt(_) => "encrypt",
            Request::Decrypt(_) => "decrypt",
            Request::GetProof(_) => "getProof",
            Request::VerifyProof(_) => "verifyProof",
            Request::GetAppId(_) => "getAppId",
            Request::AttestationKey(_) => "attestationKey",
            Request::IssueCookie(_) => "issueCookie",
            Request::RevokeCookie(_) => "revokeCookie",
        }
    }

    /// Serialize with the given correlation id attached
    pub fn to_message(&self, callback: &str) -> Result<Value, DaemonError> {
        let mut value = serde_json::to_value(self)?;
        match value.as_object_mut() {
            Some(map) => {
                map.insert(CALLBACK_KEY.to_string(), Value::String(callback.to_string()));
                Ok(value)
            }
            None => Err(DaemonError::Serialization(
                "request did not serialize to an object".to_string(),
            )),
        }
    }
}

/// What an inbound message asks for
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Init(InitParams),
    Request(Request),
    /// Tag the vault does not implement
    Unknown(String),
    /// Known tag with unusable parameters, or no single tag at all
    Invalid { tag: Option<String>, reason: String },
}

/// Parsed inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub callback: Option<String>,
    pub body: Body,
}

/// Parse one inbound line
///
/// Fails only when the line is not a JSON object; anything else is
/// classified into a [`Body`] so the dispatcher can reply with the
/// callback id.
pub fn parse_inbound(line: &str) -> Result<Inbound, DaemonError> {
    let mut map: Map<String, Value> = serde_json::from_str(line)?;

    let callback = match map.remove(CALLBACK_KEY) {
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    if map.len() != 1 {
        return Ok(Inbound {
            callback,
            body: Body::Invalid {
                tag: None,
                reason: format!("expected exactly one operation, found {}", map.len()),
            },
        });
    }

    let tag = map.keys().next().cloned().unwrap_or_default();

    let body = if tag == INIT_TAG {
        let params = map.remove(INIT_TAG).unwrap_or(Value::Null);
        match serde_json::from_value::<InitParams>(params) {
            Ok(init) => Body::Init(init),
            Err(e) => Body::Invalid {
                tag: Some(tag),
                reason: e.to_string(),
            },
        }
    } else if !Request::TAGS.contains(&tag.as_str()) {
        Body::Unknown(tag)
    } else {
        match serde_json::from_value::<Request>(Value::Object(map)) {
            Ok(request) => Body::Request(request),
            Err(e) => Body::Invalid {
                tag: Some(tag),
                reason: e.to_string(),
            },
        }
    };

    Ok(Inbound { callback, body })
}

/// First message on every channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    pub ready: bool,
}

/// Error payload of a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<&DaemonError> for ErrorPayload {
    fn from(e: &DaemonError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.message(),
        }
    }
}

impl From<ErrorPayload> for DaemonError {
    fn from(payload: ErrorPayload) -> Self {
        DaemonError::Remote {
            code: payload.code,
            message: payload.message,
        }
    }
}

/// Reply to a request, tagged with its correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub callback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    /// Cookie page, only on `redirectForCookie`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Reply {
    pub fn success(callback: impl Into<String>, result: Value) -> Self {
        Self {
            callback: callback.into(),
            result: Some(result),
            error: None,
            url: None,
        }
    }

    pub fn failure(callback: impl Into<String>, error: &DaemonError) -> Self {
        Self {
            callback: callback.into(),
            result: None,
            error: Some(ErrorPayload::from(error)),
            url: None,
        }
    }

    pub fn redirect(callback: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            callback: callback.into(),
            result: Some(Value::String(RESULT_REDIRECT.to_string())),
            error: None,
            url: Some(url.into()),
        }
    }

    /// Collapse into the caller-facing result
    pub fn into_result(self) -> Result<Value, DaemonError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error.into()),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Any message the vault sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Ready(Ready),
    Reply(Reply),
}

/// Result of a `sign` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResult {
    pub signature: Signature,
    pub recovery: u8,
    pub hash: MessageHash,
}
