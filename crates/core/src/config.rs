use std::time::Duration;

use crate::error::{Error, Result};

/// Largest pool the engine accepts.
pub const MAX_TARGET_SIZE: usize = 12;

/// Timing and sizing for one session pool.
///
/// Every delay the pool and its lifecycle drivers wait on lives here so
/// callers (and tests) can compress the schedule without touching the logic.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
	/// Number of sessions the pool maintains.
	pub target_size: usize,
	/// Minimum session age before cleanup may judge it dead.
	pub grace_period: Duration,
	/// Fixed wait before a driver opens its connection.
	pub connect_delay: Duration,
	/// Upper bound of the random jitter added to `connect_delay`.
	pub connect_jitter: Duration,
	/// Deadline for the connection's readiness notification.
	pub ready_timeout: Duration,
	/// Wait after the end-of-utterance frame before marking a session primed.
	pub settle_delay: Duration,
	/// How long a primed session may sit unclaimed before it is retired.
	pub retirement_delay: Duration,
	/// Tick delay after a maintenance failure.
	pub error_backoff: Duration,
	/// Length of the zeroed end-of-utterance frame.
	pub silence_frame_len: usize,
	/// Whether near-complete cycles trigger staggered buffer creations.
	pub cycle_buffer: bool,
	/// Stagger between buffer creations.
	pub cycle_buffer_stagger: Duration,
	/// Period for the whole creation cycle; the tick is this divided by
	/// `target_size`.
	pub cycle_period: Duration,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self::new(8)
	}
}

impl PoolConfig {
	/// Creates a config with production timings for `target_size` sessions.
	pub fn new(target_size: usize) -> Self {
		Self {
			target_size,
			grace_period: Duration::from_secs(15),
			connect_delay: Duration::from_secs(2),
			connect_jitter: Duration::from_millis(500),
			ready_timeout: Duration::from_secs(10),
			settle_delay: Duration::from_secs(2),
			retirement_delay: Duration::from_secs(5),
			error_backoff: Duration::from_secs(10),
			silence_frame_len: 2048,
			cycle_buffer: true,
			cycle_buffer_stagger: Duration::from_secs(1),
			cycle_period: Duration::from_secs(60),
		}
	}

	/// Returns a copy with a different target size and the same timings.
	pub fn with_target_size(mut self, target_size: usize) -> Self {
		self.target_size = target_size;
		self
	}

	/// Maintenance cadence: `cycle_period / target_size`.
	pub fn tick_interval(&self) -> Duration {
		self.cycle_period / self.target_size.max(1) as u32
	}

	pub fn validate(&self) -> Result<()> {
		if self.target_size == 0 {
			return Err(Error::InvalidConfig("target_size must be at least 1".to_string()));
		}
		if self.target_size > MAX_TARGET_SIZE {
			return Err(Error::InvalidConfig(format!(
				"target_size {} exceeds maximum of {MAX_TARGET_SIZE}",
				self.target_size
			)));
		}
		if self.cycle_period.is_zero() {
			return Err(Error::InvalidConfig("cycle_period must be non-zero".to_string()));
		}
		Ok(())
	}
}
