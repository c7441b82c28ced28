//! Keyed registry of session pools.
//!
//! Uses [`DashMap`] so lookups on different keys never contend. A pool is
//! constructed (and its maintenance task spawned) only inside the map's entry
//! lock, so concurrent first lookups for one key create exactly one pool.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::Result;
use crate::key::PoolKey;
use crate::pool::{PoolStatus, SessionPool};
use crate::provider::Providers;
use crate::session::{Session, SessionInfo};

/// Owns every pool in the process, one per [`PoolKey`].
pub struct PoolRegistry {
	pools: DashMap<PoolKey, SessionPool>,
	providers: Providers,
	template: PoolConfig,
}

impl PoolRegistry {
	/// Creates an empty registry. New pools use production timings.
	pub fn new(providers: Providers) -> Self {
		Self::with_config(providers, PoolConfig::default())
	}

	/// Creates an empty registry whose pools copy `template`'s timings.
	pub fn with_config(providers: Providers, template: PoolConfig) -> Self {
		Self {
			pools: DashMap::new(),
			providers,
			template,
		}
	}

	/// Returns the pool for `key`, starting one with `target_size` sessions if
	/// none exists.
	///
	/// The first caller's target size wins. A later call asking for a
	/// different size gets the existing pool and a warning is logged.
	///
	/// # Errors
	/// Returns `Error::InvalidConfig` if a new pool would be built with an
	/// invalid target size.
	pub fn get_pool(&self, key: &PoolKey, target_size: usize) -> Result<SessionPool> {
		if let Some(pool) = self.existing(key, target_size) {
			return Ok(pool);
		}

		match self.pools.entry(key.clone()) {
			Entry::Occupied(entry) => {
				let pool = entry.get().clone();
				drop(entry);
				warn_on_mismatch(&pool, target_size);
				Ok(pool)
			}
			Entry::Vacant(entry) => {
				let config = self.template.clone().with_target_size(target_size);
				let pool = SessionPool::start(key.clone(), config, self.providers.clone())?;
				entry.insert(pool.clone());
				info!(target = "warmline.registry", key = %key, target_size, "registered pool");
				Ok(pool)
			}
		}
	}

	fn existing(&self, key: &PoolKey, target_size: usize) -> Option<SessionPool> {
		let pool = self.pools.get(key).map(|r| r.value().clone())?;
		warn_on_mismatch(&pool, target_size);
		Some(pool)
	}

	/// The pool for `key`, if one is registered.
	pub fn pool(&self, key: &PoolKey) -> Option<SessionPool> {
		self.pools.get(key).map(|r| r.value().clone())
	}

	/// Registered keys, sorted.
	pub fn list_keys(&self) -> Vec<PoolKey> {
		let mut keys: Vec<PoolKey> = self.pools.iter().map(|r| r.key().clone()).collect();
		keys.sort();
		keys
	}

	pub fn acquire_best_session(&self, key: &PoolKey) -> Option<Arc<Session>> {
		self.pool(key)?.acquire_best_session()
	}

	/// Returns `session` to the pool that created it.
	pub fn return_session(&self, session: &Session) -> bool {
		self.pool(session.key())
			.is_some_and(|pool| pool.return_session(session))
	}

	pub async fn remove_session(&self, session: &Session) -> bool {
		match self.pool(session.key()) {
			Some(pool) => pool.remove_session(session).await,
			None => false,
		}
	}

	pub fn query_progress(&self, key: &PoolKey) -> Option<(f32, bool)> {
		self.pool(key)?.query_progress()
	}

	pub fn query_all_progress(&self, key: &PoolKey) -> Vec<SessionInfo> {
		self.pool(key)
			.map(|pool| pool.query_all_progress())
			.unwrap_or_default()
	}

	pub fn status(&self, key: &PoolKey) -> Option<PoolStatus> {
		self.pool(key).map(|pool| pool.status())
	}

	/// Status of every registered pool, sorted by key.
	pub fn statuses(&self) -> Vec<PoolStatus> {
		self.list_keys()
			.iter()
			.filter_map(|key| self.status(key))
			.collect()
	}

	/// One-line summary for `key`, or `"<key>: Not configured"`.
	pub fn status_summary(&self, key: &PoolKey) -> String {
		match self.pool(key) {
			Some(pool) => pool.status_summary(),
			None => format!("{key}: Not configured"),
		}
	}

	/// Shuts down and unregisters the pool for `key`. No-op if absent.
	pub async fn shutdown(&self, key: &PoolKey) {
		let Some((_, pool)) = self.pools.remove(key) else {
			debug!(target = "warmline.registry", key = %key, "no pool to shut down");
			return;
		};
		pool.shutdown().await;
	}

	/// Shuts down every pool and clears the registry.
	pub async fn shutdown_all(&self) {
		let keys: Vec<PoolKey> = self.pools.iter().map(|r| r.key().clone()).collect();
		let pools: Vec<SessionPool> = keys
			.iter()
			.filter_map(|key| self.pools.remove(key).map(|(_, pool)| pool))
			.collect();
		if pools.is_empty() {
			return;
		}
		info!(target = "warmline.registry", pools = pools.len(), "shutting down all pools");
		for pool in pools {
			pool.shutdown().await;
		}
	}
}

fn warn_on_mismatch(pool: &SessionPool, requested: usize) {
	if pool.target_size() != requested {
		warn!(
			target = "warmline.registry",
			key = %pool.key(),
			existing = pool.target_size(),
			requested,
			"pool already exists with a different target size, keeping existing"
		);
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::key::Language;
	use crate::testing::Harness;

	fn kira() -> PoolKey {
		PoolKey::new("Kira", Language::Fr)
	}

	fn hugo() -> PoolKey {
		PoolKey::new("Hugo", Language::Fr)
	}

	#[tokio::test(start_paused = true)]
	async fn get_pool_is_first_writer_wins() {
		let harness = Harness::new();
		let registry = PoolRegistry::new(harness.providers());

		let first = registry.get_pool(&kira(), 3).unwrap();
		let second = registry.get_pool(&kira(), 6).unwrap();
		assert_eq!(first.target_size(), 3);
		assert_eq!(second.target_size(), 3);
		assert_eq!(registry.list_keys(), vec![kira()]);

		registry.shutdown_all().await;
	}

	#[tokio::test(start_paused = true)]
	async fn get_pool_rejects_invalid_size_without_registering() {
		let harness = Harness::new();
		let registry = PoolRegistry::new(harness.providers());

		assert!(registry.get_pool(&kira(), 0).is_err());
		assert!(registry.list_keys().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn keys_sharing_a_backend_never_share_sessions() {
		let harness = Harness::new();
		let registry = PoolRegistry::new(harness.providers());
		let kira_pool = registry.get_pool(&kira(), 1).unwrap();
		let hugo_pool = registry.get_pool(&hugo(), 1).unwrap();
		assert_eq!(kira_pool.backend(), hugo_pool.backend());

		tokio::time::sleep(Duration::from_secs(6)).await;
		assert_eq!(harness.connector.open_count(), 2);

		let kira_session = registry.acquire_best_session(&kira()).unwrap();
		assert_eq!(kira_session.key(), &kira());
		assert!(registry.acquire_best_session(&kira()).is_none());

		let hugo_session = registry.acquire_best_session(&hugo()).unwrap();
		assert_eq!(hugo_session.key(), &hugo());
		assert!(!Arc::ptr_eq(&kira_session, &hugo_session));
		assert_eq!(registry.query_all_progress(&kira()).len(), 1);

		registry.shutdown_all().await;
	}

	#[tokio::test(start_paused = true)]
	async fn return_and_remove_route_by_session_key() {
		let harness = Harness::new();
		let registry = PoolRegistry::new(harness.providers());
		registry.get_pool(&kira(), 1).unwrap();
		tokio::time::sleep(Duration::from_secs(6)).await;

		let session = registry.acquire_best_session(&kira()).unwrap();
		assert!(registry.return_session(&session));
		let session = registry.acquire_best_session(&kira()).unwrap();
		assert!(registry.remove_session(&session).await);
		assert!(registry.query_all_progress(&kira()).is_empty());
		assert_eq!(registry.query_progress(&kira()), None);

		registry.shutdown_all().await;
		assert!(!registry.return_session(&session));
		assert!(!registry.remove_session(&session).await);
	}

	#[tokio::test(start_paused = true)]
	async fn unknown_key_reports_not_configured() {
		let harness = Harness::new();
		let registry = PoolRegistry::new(harness.providers());

		assert_eq!(registry.status_summary(&kira()), "Kira-FR: Not configured");
		assert!(registry.acquire_best_session(&kira()).is_none());
		assert!(registry.query_all_progress(&kira()).is_empty());
		assert!(registry.status(&kira()).is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_removes_only_that_key() {
		let harness = Harness::new();
		let registry = PoolRegistry::new(harness.providers());
		let kira_pool = registry.get_pool(&kira(), 1).unwrap();
		registry.get_pool(&hugo(), 1).unwrap();

		registry.shutdown(&kira()).await;
		registry.shutdown(&kira()).await;
		assert!(!kira_pool.is_running());
		assert_eq!(registry.list_keys(), vec![hugo()]);

		registry.shutdown_all().await;
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_all_is_idempotent() {
		let harness = Harness::new();
		let registry = PoolRegistry::new(harness.providers());
		let kira_pool = registry.get_pool(&kira(), 2).unwrap();
		let hugo_pool = registry.get_pool(&hugo(), 2).unwrap();
		tokio::time::sleep(Duration::from_secs(6)).await;

		registry.shutdown_all().await;
		registry.shutdown_all().await;

		assert!(registry.list_keys().is_empty());
		assert!(!kira_pool.is_running());
		assert!(!hugo_pool.is_running());
		let opened = harness.connector.opened.lock().clone();
		assert!(opened.iter().all(|conn| conn.is_closed()));

		tokio::time::sleep(Duration::from_secs(120)).await;
		assert_eq!(harness.connector.open_count(), opened.len());
	}

	#[tokio::test(start_paused = true)]
	async fn statuses_follow_key_order() {
		let harness = Harness::new();
		let registry = PoolRegistry::new(harness.providers());
		registry.get_pool(&kira(), 2).unwrap();
		registry.get_pool(&hugo(), 2).unwrap();

		let keys: Vec<String> = registry.statuses().into_iter().map(|s| s.key).collect();
		assert_eq!(keys, vec!["Hugo-FR".to_string(), "Kira-FR".to_string()]);

		registry.shutdown_all().await;
	}
}
