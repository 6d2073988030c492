//! Origin binding for new sessions
//!
//! A session learns its origin once, from the `init` message. Trusted
//! callers take the identity the transport authenticated. Untrusted callers
//! present a session cookie previously issued to some origin; without one
//! they are sent to the configured cookie page, or refused.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use custody_core::Origin;

use crate::error::{DaemonError, Result};
use crate::ipc::InitParams;

/// Outcome of origin binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Session origin is established
    Bound(Origin),
    /// Caller must obtain a cookie at `url` and reconnect
    Redirect { url: String },
}

/// Default cookie lifetime
pub const DEFAULT_COOKIE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct IssuedCookie {
    origin: Origin,
    expires_at: Instant,
}

/// Session cookies issued by this vault
///
/// Cookies expire after the jar's TTL. Expired entries are swept whenever a
/// new cookie is issued.
#[derive(Debug)]
pub struct CookieJar {
    cookies: RwLock<HashMap<String, IssuedCookie>>,
    ttl: Duration,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_COOKIE_TTL)
    }
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cookies: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh cookie that resolves to `origin`
    pub async fn issue(&self, origin: Origin) -> String {
        let cookie = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();

        let mut cookies = self.cookies.write().await;
        let before = cookies.len();
        cookies.retain(|_, issued| issued.expires_at > now);
        if cookies.len() < before {
            debug!(expired = before - cookies.len(), "Swept expired cookies");
        }
        cookies.insert(
            cookie.clone(),
            IssuedCookie {
                origin,
                expires_at: now + self.ttl,
            },
        );
        cookie
    }

    /// Origin behind `cookie`, unless unknown or expired
    pub async fn resolve(&self, cookie: &str) -> Option<Origin> {
        let cookies = self.cookies.read().await;
        cookies
            .get(cookie)
            .filter(|issued| issued.expires_at > Instant::now())
            .map(|issued| issued.origin.clone())
    }

    /// Revoke `cookie` if it was issued to `origin`
    pub async fn revoke(&self, cookie: &str, origin: &Origin) -> bool {
        let mut cookies = self.cookies.write().await;
        match cookies.get(cookie) {
            Some(issued) if &issued.origin == origin => {
                cookies.remove(cookie);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.cookies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cookies.read().await.is_empty()
    }
}

/// Resolve the origin for a session from its `init` parameters
pub async fn bind_origin(
    peer: Option<&Origin>,
    init: &InitParams,
    cookies: &CookieJar,
    redirect_url: Option<&str>,
) -> Result<Binding> {
    if init.use_origin {
        return peer.cloned().map(Binding::Bound).ok_or_else(|| {
            DaemonError::TrustEstablishmentFailed(
                "transport did not authenticate the peer".to_string(),
            )
        });
    }

    if let Some(cookie) = init.cookie.as_deref() {
        if let Some(origin) = cookies.resolve(cookie).await {
            return Ok(Binding::Bound(origin));
        }
        debug!("Session cookie not recognized");
    }

    match redirect_url {
        Some(url) => Ok(Binding::Redirect {
            url: url.to_string(),
        }),
        None => Err(DaemonError::TrustEstablishmentFailed(
            "no valid session cookie and no cookie page configured".to_string(),
        )),
    }
}
