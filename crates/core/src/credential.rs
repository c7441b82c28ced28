//! Credential providers.
//!
//! [`CachedCredential`] keeps the last bearer token together with the expiry
//! read from its JWT `exp` claim and only calls its [`TokenRefresher`] when
//! the token is within [`REFRESH_MARGIN`] of expiring.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::provider::{Credential, CredentialProvider};

/// Tokens closer than this to expiry are refreshed before use.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Lifetime assumed for tokens without a readable `exp` claim.
pub const FALLBACK_LIFETIME: Duration = Duration::from_secs(3600);

/// A token that never expires. Useful for development backends.
#[derive(Debug, Clone)]
pub struct StaticCredential(Credential);

impl StaticCredential {
	pub fn new(token: &str) -> Self {
		Self(Credential::new(token))
	}
}

#[async_trait]
impl CredentialProvider for StaticCredential {
	async fn valid_credential(&self) -> Option<Credential> {
		Some(self.0.clone())
	}
}

/// Fetches a fresh bearer token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
	async fn refresh(&self) -> Result<String>;
}

struct CachedToken {
	credential: Credential,
	expires_at: SystemTime,
}

/// Caches a refreshed token until it nears expiry.
pub struct CachedCredential<R> {
	refresher: R,
	cached: Mutex<Option<CachedToken>>,
}

impl<R: TokenRefresher> CachedCredential<R> {
	pub fn new(refresher: R) -> Self {
		Self {
			refresher,
			cached: Mutex::new(None),
		}
	}
}

#[async_trait]
impl<R: TokenRefresher> CredentialProvider for CachedCredential<R> {
	async fn valid_credential(&self) -> Option<Credential> {
		// Held across the refresh so concurrent callers share one request.
		let mut cached = self.cached.lock().await;
		let now = SystemTime::now();
		if let Some(token) = cached.as_ref() {
			if token.expires_at > now + REFRESH_MARGIN {
				return Some(token.credential.clone());
			}
			debug!(target = "warmline.credential", "token near expiry, refreshing");
		}

		match self.refresher.refresh().await {
			Ok(raw) => {
				let expires_at = parse_jwt_expiry(&raw).unwrap_or_else(|| now + FALLBACK_LIFETIME);
				let credential = Credential::new(raw.trim());
				*cached = Some(CachedToken {
					credential: credential.clone(),
					expires_at,
				});
				Some(credential)
			}
			Err(err) => {
				warn!(target = "warmline.credential", error = %err, "token refresh failed");
				None
			}
		}
	}
}

#[derive(Deserialize)]
struct Claims {
	exp: Option<u64>,
}

/// Reads the `exp` claim from a JWT without verifying it.
pub fn parse_jwt_expiry(token: &str) -> Option<SystemTime> {
	let payload = token.trim().split('.').nth(1)?;
	let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
	let claims: Claims = serde_json::from_slice(&bytes).ok()?;
	UNIX_EPOCH.checked_add(Duration::from_secs(claims.exp?))
}
