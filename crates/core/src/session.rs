//! Pooled session records.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::key::{BackendIdentity, PoolKey};
use crate::provider::Connection;

/// Per-pool sequence number of a session.
pub type SessionId = u64;

/// Where a registered session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
	/// Priming frames are streaming.
	Priming,
	/// Script finished and settled; ready to hand out.
	Primed,
	/// Primed but unclaimed past the retirement delay; awaiting cleanup.
	Retired,
	/// Priming failed after registration; awaiting cleanup.
	Failed,
}

#[derive(Debug)]
pub(crate) struct SessionStatus {
	pub(crate) progress: f32,
	pub(crate) primed: bool,
	pub(crate) available: bool,
	pub(crate) checked_out: bool,
	pub(crate) phase: SessionPhase,
}

/// Read-only view of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
	pub id: SessionId,
	pub progress: f32,
	pub is_primed: bool,
	pub is_connected: bool,
	pub is_available: bool,
	pub is_checked_out: bool,
	pub phase: SessionPhase,
}

/// A connected backend session owned by one pool.
///
/// The lifecycle driver mutates progress; the pool mutates availability and
/// checkout under its own lock. Consumers get an `Arc<Session>` from
/// acquisition and use [`Session::connection`] for the call.
pub struct Session {
	id: SessionId,
	key: PoolKey,
	backend: BackendIdentity,
	created_at: Instant,
	connection: Arc<dyn Connection>,
	lifecycle: CancellationToken,
	pub(crate) status: Mutex<SessionStatus>,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("key", &self.key)
			.field("backend", &self.backend)
			.field("status", &*self.status.lock())
			.finish()
	}
}

impl Session {
	pub(crate) fn new(
		id: SessionId,
		key: PoolKey,
		backend: BackendIdentity,
		connection: Arc<dyn Connection>,
		lifecycle: CancellationToken,
	) -> Self {
		Self {
			id,
			key,
			backend,
			created_at: Instant::now(),
			connection,
			lifecycle,
			status: Mutex::new(SessionStatus {
				progress: 0.0,
				primed: false,
				available: true,
				checked_out: false,
				phase: SessionPhase::Priming,
			}),
		}
	}

	pub fn id(&self) -> SessionId {
		self.id
	}

	/// Key of the pool that created this session.
	pub fn key(&self) -> &PoolKey {
		&self.key
	}

	pub fn backend(&self) -> &BackendIdentity {
		&self.backend
	}

	pub fn created_at(&self) -> Instant {
		self.created_at
	}

	pub fn age(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.created_at)
	}

	pub fn connection(&self) -> &Arc<dyn Connection> {
		&self.connection
	}

	pub fn is_connected(&self) -> bool {
		self.connection.is_connected()
	}

	pub fn progress(&self) -> f32 {
		self.status.lock().progress
	}

	pub fn is_primed(&self) -> bool {
		self.status.lock().primed
	}

	pub fn is_available(&self) -> bool {
		self.status.lock().available
	}

	pub fn is_checked_out(&self) -> bool {
		self.status.lock().checked_out
	}

	pub fn phase(&self) -> SessionPhase {
		self.status.lock().phase
	}

	pub fn info(&self) -> SessionInfo {
		let status = self.status.lock();
		SessionInfo {
			id: self.id,
			progress: status.progress,
			is_primed: status.primed,
			is_connected: self.connection.is_connected(),
			is_available: status.available,
			is_checked_out: status.checked_out,
			phase: status.phase,
		}
	}

	pub(crate) fn lifecycle(&self) -> &CancellationToken {
		&self.lifecycle
	}

	/// Records `sent` of `total` frames. Never moves progress backwards.
	pub(crate) fn record_progress(&self, sent: usize, total: usize) {
		if total == 0 {
			return;
		}
		let fraction = (sent.min(total) as f32) / (total as f32);
		let mut status = self.status.lock();
		if fraction > status.progress && !status.primed {
			status.progress = fraction;
		}
	}

	/// Sets full progress and the primed flag in one step.
	pub(crate) fn mark_primed(&self) {
		let mut status = self.status.lock();
		status.progress = 1.0;
		status.primed = true;
		status.phase = SessionPhase::Primed;
	}

	pub(crate) fn mark_failed(&self) {
		let mut status = self.status.lock();
		status.available = false;
		status.phase = SessionPhase::Failed;
	}

	/// Whether cleanup may reclaim this session once past the grace period.
	pub(crate) fn is_dead(&self) -> bool {
		if !self.connection.is_connected() || self.lifecycle.is_cancelled() {
			return true;
		}
		matches!(self.phase(), SessionPhase::Retired | SessionPhase::Failed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::Language;
	use crate::testing::FakeConnection;

	fn session() -> Session {
		Session::new(
			1,
			PoolKey::new("Kira", Language::Fr),
			BackendIdentity::new("Maya"),
			FakeConnection::connected(),
			CancellationToken::new(),
		)
	}

	#[test]
	fn new_session_is_available_and_unprimed() {
		let info = session().info();
		assert_eq!(info.progress, 0.0);
		assert!(info.is_available);
		assert!(!info.is_checked_out);
		assert!(!info.is_primed);
		assert_eq!(info.phase, SessionPhase::Priming);
	}

	#[test]
	fn progress_never_decreases() {
		let session = session();
		session.record_progress(5, 10);
		session.record_progress(3, 10);
		assert_eq!(session.progress(), 0.5);
		session.record_progress(7, 10);
		assert_eq!(session.progress(), 0.7);
	}

	#[test]
	fn mark_primed_sets_progress_and_flag_together() {
		let session = session();
		session.record_progress(9, 10);
		session.mark_primed();
		let info = session.info();
		assert_eq!(info.progress, 1.0);
		assert!(info.is_primed);
		assert_eq!(info.phase, SessionPhase::Primed);

		session.record_progress(1, 10);
		assert_eq!(session.progress(), 1.0);
	}

	#[test]
	fn disconnected_or_cancelled_sessions_are_dead() {
		let session = session();
		assert!(!session.is_dead());
		session.lifecycle().cancel();
		assert!(session.is_dead());

		let conn = FakeConnection::connected();
		let other = Session::new(
			2,
			PoolKey::new("Kira", Language::Fr),
			BackendIdentity::new("Maya"),
			conn.clone(),
			CancellationToken::new(),
		);
		conn.drop_link();
		assert!(other.is_dead());
	}

	#[test]
	fn failed_session_is_unavailable_and_dead() {
		let session = session();
		session.mark_failed();
		assert!(!session.is_available());
		assert!(session.is_dead());
	}
}
