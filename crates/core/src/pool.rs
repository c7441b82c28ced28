//! One pool of primed sessions for a single [`PoolKey`].
//!
//! All cardinality-affecting mutations (reserving a creation slot, inserting
//! a session, removing one, flipping checkout, retiring) go through the
//! pool's single `parking_lot::Mutex`. That lock is never held across an
//! `.await`.
//!
//! # Maintenance
//!
//! A background task ticks every `cycle_period / target_size`. Each tick
//! either reserves a creation slot (check and reserve happen under one lock,
//! so two ticks cannot both claim the last free slot) or runs dead-session
//! cleanup. Errors are logged and followed by a longer back-off; the loop
//! only exits on shutdown.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::driver;
use crate::error::Result;
use crate::key::{BackendIdentity, PoolKey};
use crate::provider::{Connection, Providers};
use crate::session::{Session, SessionInfo, SessionPhase};

/// Progress at which an un-primed session counts as near completion.
const NEAR_COMPLETE_PROGRESS: f32 = 0.75;
/// Near-complete sessions needed before buffer creations are scheduled.
const CYCLE_BUFFER_TRIGGER: usize = 3;
/// Buffer creations scheduled per cycle.
const CYCLE_BUFFER_SIZE: usize = 2;

/// Mutex-guarded pool state: the session collection and every counter that
/// is reasoned about together with it.
#[derive(Default)]
pub(crate) struct PoolState {
	sessions: Vec<Arc<Session>>,
	pending_creations: usize,
	session_sequence: u64,
	creation_in_flight: bool,
	cycle_buffer_armed: bool,
	shut_down: bool,
}

impl PoolState {
	fn has_room(&self, target: usize) -> bool {
		self.sessions.len() + self.pending_creations < target
	}
}

pub(crate) struct PoolInner {
	pub(crate) key: PoolKey,
	pub(crate) backend: BackendIdentity,
	pub(crate) config: PoolConfig,
	pub(crate) providers: Providers,
	state: Mutex<PoolState>,
	cancel: CancellationToken,
}

/// Aggregate status of one pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatus {
	pub key: String,
	pub backend: String,
	pub target_size: usize,
	pub total: usize,
	/// Sessions that are available and not checked out.
	pub available: usize,
	pub connected: usize,
	/// Sessions that finished priming.
	pub ready: usize,
	pub checked_out: usize,
	pub pending: usize,
	/// Progress of the most advanced connected session, 0.0 when none.
	pub best_progress: f32,
	pub running: bool,
}

impl PoolStatus {
	/// One-line summary: `[Kira-FR] Pool: 3 total, 2 available, 1 ready`.
	pub fn summary(&self) -> String {
		format!(
			"[{}] Pool: {} total, {} available, {} ready",
			self.key, self.total, self.available, self.ready
		)
	}
}

/// Handle to a running (or shut down) session pool. Cheap to clone.
#[derive(Clone)]
pub struct SessionPool {
	inner: Arc<PoolInner>,
}

impl std::fmt::Debug for SessionPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionPool")
			.field("key", &self.inner.key)
			.field("status", &self.status())
			.finish()
	}
}

impl SessionPool {
	/// Builds a pool and spawns its maintenance loop.
	///
	/// Must be called from within a Tokio runtime. The first tick runs
	/// immediately.
	///
	/// # Errors
	/// Returns `Error::InvalidConfig` if `config` fails validation.
	pub fn start(key: PoolKey, config: PoolConfig, providers: Providers) -> Result<Self> {
		let pool = Self::build(key, config, providers)?;
		info!(
			target = "warmline.pool",
			key = %pool.inner.key,
			backend = %pool.inner.backend,
			target_size = pool.inner.config.target_size,
			interval_ms = pool.inner.config.tick_interval().as_millis() as u64,
			"starting session pool"
		);
		tokio::spawn(maintain(pool.clone()));
		Ok(pool)
	}

	/// Builds a pool without a maintenance loop. Ticks are driven by hand.
	pub(crate) fn build(key: PoolKey, config: PoolConfig, providers: Providers) -> Result<Self> {
		config.validate()?;
		let backend = providers.backends.resolve(&key);
		Ok(Self {
			inner: Arc::new(PoolInner {
				key,
				backend,
				config,
				providers,
				state: Mutex::new(PoolState::default()),
				cancel: CancellationToken::new(),
			}),
		})
	}

	pub fn key(&self) -> &PoolKey {
		&self.inner.key
	}

	pub fn backend(&self) -> &BackendIdentity {
		&self.inner.backend
	}

	pub fn target_size(&self) -> usize {
		self.inner.config.target_size
	}

	pub fn config(&self) -> &PoolConfig {
		&self.inner.config
	}

	pub fn is_running(&self) -> bool {
		!self.inner.state.lock().shut_down
	}

	/// Claims the best eligible session.
	///
	/// Eligible means: same backend identity, connected, available, and not
	/// checked out. Primed sessions outrank partial ones; then higher
	/// progress; ties go to the earliest created. Returns `None` when nothing
	/// qualifies; callers retry later.
	pub fn acquire_best_session(&self) -> Option<Arc<Session>> {
		let state = self.inner.state.lock();
		let best = state
			.sessions
			.iter()
			.filter(|s| s.backend() == &self.inner.backend && s.is_connected())
			.filter_map(|s| {
				let status = s.status.lock();
				if !status.available || status.checked_out {
					return None;
				}
				Some(Candidate {
					primed: status.primed,
					progress: status.progress,
					session: s,
				})
			})
			.max_by(Candidate::rank)?
			.session
			.clone();

		{
			let mut status = best.status.lock();
			status.checked_out = true;
			debug!(
				target = "warmline.pool",
				key = %self.inner.key,
				session = best.id(),
				progress = status.progress,
				primed = status.primed,
				"checked out session"
			);
		}
		drop(state);
		Some(best)
	}

	/// Puts a checked-out session back into rotation on the same connection.
	///
	/// Returns false if the session does not belong to this pool (anymore).
	pub fn return_session(&self, session: &Session) -> bool {
		let state = self.inner.state.lock();
		let Some(owned) = state.sessions.iter().find(|s| std::ptr::eq(s.as_ref(), session)) else {
			return false;
		};
		owned.status.lock().checked_out = false;
		debug!(target = "warmline.pool", key = %self.inner.key, session = session.id(), "returned session");
		true
	}

	/// Drops a session whose connection failed or ended.
	///
	/// Cancels its driver and closes its connection. No replacement is
	/// spawned here; the next tick sees the shortfall.
	pub async fn remove_session(&self, session: &Session) -> bool {
		let removed = {
			let mut state = self.inner.state.lock();
			let index = state.sessions.iter().position(|s| std::ptr::eq(s.as_ref(), session));
			index.map(|i| state.sessions.remove(i))
		};
		let Some(removed) = removed else {
			return false;
		};
		removed.lifecycle().cancel();
		if let Err(err) = removed.connection().close().await {
			warn!(target = "warmline.pool", key = %self.inner.key, session = removed.id(), error = %err, "close failed on remove");
		}
		debug!(target = "warmline.pool", key = %self.inner.key, session = removed.id(), "removed session");
		true
	}

	/// `(progress, is_primed)` of the most advanced connected session,
	/// without claiming it.
	pub fn query_progress(&self) -> Option<(f32, bool)> {
		let state = self.inner.state.lock();
		state
			.sessions
			.iter()
			.filter(|s| s.backend() == &self.inner.backend && s.is_connected())
			.map(|s| {
				let status = s.status.lock();
				(status.progress, status.primed)
			})
			.max_by(|a, b| a.1.cmp(&b.1).then(a.0.total_cmp(&b.0)))
	}

	/// Snapshot of every session for this key, oldest first.
	pub fn query_all_progress(&self) -> Vec<SessionInfo> {
		let mut sessions: Vec<Arc<Session>> = {
			let state = self.inner.state.lock();
			state
				.sessions
				.iter()
				.filter(|s| s.backend() == &self.inner.backend)
				.cloned()
				.collect()
		};
		sessions.sort_by_key(|s| (s.created_at(), s.id()));
		sessions.iter().map(|s| s.info()).collect()
	}

	pub fn status(&self) -> PoolStatus {
		let state = self.inner.state.lock();
		let mut status = PoolStatus {
			key: self.inner.key.to_string(),
			backend: self.inner.backend.to_string(),
			target_size: self.inner.config.target_size,
			total: state.sessions.len(),
			available: 0,
			connected: 0,
			ready: 0,
			checked_out: 0,
			pending: state.pending_creations,
			best_progress: 0.0,
			running: !state.shut_down,
		};
		for session in &state.sessions {
			let connected = session.is_connected();
			let s = session.status.lock();
			if s.available && !s.checked_out {
				status.available += 1;
			}
			if s.checked_out {
				status.checked_out += 1;
			}
			if s.primed {
				status.ready += 1;
			}
			if connected {
				status.connected += 1;
				status.best_progress = status.best_progress.max(s.progress);
			}
		}
		status
	}

	pub fn status_summary(&self) -> String {
		self.status().summary()
	}

	/// Stops maintenance, cancels every driver, and closes every session.
	///
	/// Idempotent: later calls return immediately.
	pub async fn shutdown(&self) {
		let sessions = {
			let mut state = self.inner.state.lock();
			if state.shut_down {
				return;
			}
			state.shut_down = true;
			std::mem::take(&mut state.sessions)
		};
		info!(
			target = "warmline.pool",
			key = %self.inner.key,
			sessions = sessions.len(),
			"shutting down session pool"
		);
		self.inner.cancel.cancel();
		for session in sessions {
			if let Err(err) = session.connection().close().await {
				warn!(target = "warmline.pool", key = %self.inner.key, session = session.id(), error = %err, "close failed during shutdown");
			}
		}
	}

	/// Runs one maintenance step.
	pub(crate) async fn tick(&self) -> Result<()> {
		let slots = self.plan_creations();
		if slots.is_empty() {
			return self.cleanup_dead_sessions().await;
		}
		let stagger = self.inner.config.cycle_buffer_stagger;
		for (index, slot) in slots.into_iter().enumerate() {
			tokio::spawn(driver::drive(slot, stagger * index as u32));
		}
		Ok(())
	}

	/// Decides, under the pool lock, which creations this tick starts.
	fn plan_creations(&self) -> Vec<CreationSlot> {
		let target = self.inner.config.target_size;
		let mut state = self.inner.state.lock();
		if state.shut_down {
			return Vec::new();
		}

		let mut slots = Vec::new();
		if state.has_room(target) && !state.creation_in_flight {
			debug!(
				target = "warmline.pool",
				key = %self.inner.key,
				sessions = state.sessions.len(),
				pending = state.pending_creations,
				target_size = target,
				"reserving creation slot"
			);
			slots.push(self.reserve(&mut state, true));
		}

		if self.inner.config.cycle_buffer {
			slots.extend(self.plan_cycle_buffer(&mut state));
		}
		slots
	}

	/// Extra staggered creations when several sessions near the end of
	/// their script at once. Still bounded by the target size.
	fn plan_cycle_buffer(&self, state: &mut PoolState) -> Vec<CreationSlot> {
		let target = self.inner.config.target_size;
		let mut near_complete = 0;
		let mut primed = 0;
		for session in &state.sessions {
			let s = session.status.lock();
			if s.primed {
				primed += 1;
			} else if s.progress >= NEAR_COMPLETE_PROGRESS {
				near_complete += 1;
			}
		}

		if state.cycle_buffer_armed && primed >= target / 2 {
			debug!(target = "warmline.pool", key = %self.inner.key, primed, "cycle restarting, clearing buffer flag");
			state.cycle_buffer_armed = false;
		}

		let mut slots = Vec::new();
		if near_complete >= CYCLE_BUFFER_TRIGGER && !state.cycle_buffer_armed {
			state.cycle_buffer_armed = true;
			while slots.len() < CYCLE_BUFFER_SIZE && state.has_room(target) {
				slots.push(self.reserve(state, false));
			}
			info!(
				target = "warmline.pool",
				key = %self.inner.key,
				near_complete,
				buffered = slots.len(),
				"scheduling cycle buffer sessions"
			);
		}
		slots
	}

	fn reserve(&self, state: &mut PoolState, in_flight: bool) -> CreationSlot {
		state.pending_creations += 1;
		state.session_sequence += 1;
		if in_flight {
			state.creation_in_flight = true;
		}
		CreationSlot {
			pool: Arc::clone(&self.inner),
			seq: state.session_sequence,
			holds_flight: in_flight,
			lifecycle: self.inner.cancel.child_token(),
			released: false,
		}
	}

	/// Removes sessions past the grace period that are disconnected, whose
	/// lifecycle ended, or that were retired.
	async fn cleanup_dead_sessions(&self) -> Result<()> {
		let now = Instant::now();
		let grace = self.inner.config.grace_period;
		let (dead, remaining) = {
			let mut state = self.inner.state.lock();
			let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(&mut state.sessions)
				.into_iter()
				.partition(|s| s.age(now) > grace && s.is_dead());
			state.sessions = live;
			(dead, state.sessions.len())
		};

		let mut first_error = None;
		for session in &dead {
			debug!(
				target = "warmline.pool",
				key = %self.inner.key,
				session = session.id(),
				age_s = session.age(now).as_secs(),
				phase = ?session.phase(),
				"removing dead session"
			);
			session.lifecycle().cancel();
			if let Err(err) = session.connection().close().await {
				first_error.get_or_insert(err);
			}
		}
		debug!(
			target = "warmline.pool",
			key = %self.inner.key,
			sessions = remaining,
			target_size = self.inner.config.target_size,
			"pool status"
		);
		first_error.map_or(Ok(()), Err)
	}

	#[cfg(test)]
	pub(crate) fn reserve_for_test(&self) -> Option<CreationSlot> {
		let mut state = self.inner.state.lock();
		state
			.has_room(self.inner.config.target_size)
			.then(|| self.reserve(&mut state, false))
	}
}

impl PoolInner {
	/// Retires `session` unless it is checked out at this instant.
	pub(crate) fn retire_if_idle(&self, session: &Session) -> bool {
		let state = self.state.lock();
		if !state.sessions.iter().any(|s| std::ptr::eq(s.as_ref(), session)) {
			return false;
		}
		let mut status = session.status.lock();
		if status.checked_out {
			return false;
		}
		status.available = false;
		status.phase = SessionPhase::Retired;
		true
	}
}

struct Candidate<'a> {
	primed: bool,
	progress: f32,
	session: &'a Arc<Session>,
}

impl Candidate<'_> {
	/// Greater is better: primed, then progress, then older, then lower id.
	fn rank(a: &Self, b: &Self) -> Ordering {
		a.primed
			.cmp(&b.primed)
			.then(a.progress.total_cmp(&b.progress))
			.then(b.session.created_at().cmp(&a.session.created_at()))
			.then(b.session.id().cmp(&a.session.id()))
	}
}

/// A reserved creation. Counts toward `pending_creations` until committed
/// or dropped, so the counter is released on every exit path.
pub(crate) struct CreationSlot {
	pool: Arc<PoolInner>,
	seq: u64,
	holds_flight: bool,
	lifecycle: CancellationToken,
	released: bool,
}

impl CreationSlot {
	pub(crate) fn pool(&self) -> &Arc<PoolInner> {
		&self.pool
	}

	pub(crate) fn seq(&self) -> u64 {
		self.seq
	}

	pub(crate) fn lifecycle(&self) -> &CancellationToken {
		&self.lifecycle
	}

	/// Lets the next tick start another creation while this one connects.
	pub(crate) fn end_flight(&mut self) {
		if self.holds_flight {
			self.pool.state.lock().creation_in_flight = false;
			self.holds_flight = false;
		}
	}

	/// Registers the session and releases the slot in one critical section.
	///
	/// Returns `None` (and releases the slot on drop) if the pool shut down.
	pub(crate) fn commit(mut self, connection: Arc<dyn Connection>) -> Option<Arc<Session>> {
		let session = Arc::new(Session::new(
			self.seq,
			self.pool.key.clone(),
			self.pool.backend.clone(),
			connection,
			self.lifecycle.clone(),
		));
		let mut state = self.pool.state.lock();
		if state.shut_down {
			return None;
		}
		state.sessions.push(Arc::clone(&session));
		state.pending_creations = state.pending_creations.saturating_sub(1);
		if self.holds_flight {
			state.creation_in_flight = false;
		}
		self.released = true;
		info!(
			target = "warmline.pool",
			key = %self.pool.key,
			session = self.seq,
			sessions = state.sessions.len(),
			target_size = self.pool.config.target_size,
			"added session to pool"
		);
		Some(session)
	}
}

impl Drop for CreationSlot {
	fn drop(&mut self) {
		if self.released {
			return;
		}
		let mut state = self.pool.state.lock();
		state.pending_creations = state.pending_creations.saturating_sub(1);
		if self.holds_flight {
			state.creation_in_flight = false;
		}
	}
}

async fn maintain(pool: SessionPool) {
	let interval = pool.inner.config.tick_interval();
	let backoff = pool.inner.config.error_backoff;
	let cancel = pool.inner.cancel.clone();
	loop {
		let delay = match pool.tick().await {
			Ok(()) => interval,
			Err(err) => {
				warn!(target = "warmline.pool", key = %pool.inner.key, error = %err, "pool maintenance error");
				backoff
			}
		};
		tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			_ = tokio::time::sleep(delay) => {}
		}
	}
	debug!(target = "warmline.pool", key = %pool.inner.key, "maintenance loop stopped");
}
