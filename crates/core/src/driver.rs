//! Session lifecycle driver.
//!
//! One task per creation slot, moving through
//! `CREATING -> CONNECTING -> PRIMING -> PRIMED -> RETIRED`:
//!
//! 1. Fetch a credential (none: give up, the slot is released).
//! 2. Wait the connect delay plus jitter so simultaneous creations spread out.
//! 3. Open the connection and await its readiness notification under a
//!    deadline. Only a ready connection becomes a [`Session`].
//! 4. Stream the priming script frame by frame, then one silence frame, then
//!    settle and mark the session primed.
//! 5. After the retirement delay, retire the session if nobody claimed it.
//!    The pool's cleanup reclaims it and the next tick replaces it; the
//!    driver never creates sessions itself.
//!
//! Every failure stays inside this task: it is logged and the slot (or the
//! registered session) is left for the pool to reclaim.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pool::{CreationSlot, PoolInner};
use crate::provider::Connection;
use crate::session::Session;

/// Runs one session lifecycle to completion and logs the outcome.
pub(crate) async fn drive(slot: CreationSlot, stagger: Duration) {
	let pool = Arc::clone(slot.pool());
	let seq = slot.seq();
	match run(slot, stagger).await {
		Ok(()) => debug!(target = "warmline.driver", key = %pool.key, session = seq, "lifecycle finished"),
		Err(Error::Shutdown) => {
			debug!(target = "warmline.driver", key = %pool.key, session = seq, "lifecycle cancelled")
		}
		Err(Error::CredentialUnavailable) => {
			warn!(target = "warmline.driver", key = %pool.key, session = seq, "cannot create session: no valid credential")
		}
		Err(err) => warn!(target = "warmline.driver", key = %pool.key, session = seq, error = %err, "session lifecycle failed"),
	}
}

async fn run(mut slot: CreationSlot, stagger: Duration) -> Result<()> {
	let pool = Arc::clone(slot.pool());
	let token = slot.lifecycle().clone();
	let config = &pool.config;

	if !stagger.is_zero() {
		pause(&token, stagger).await?;
	}

	let credential = until_cancelled(&token, pool.providers.credentials.valid_credential())
		.await?
		.ok_or(Error::CredentialUnavailable)?;

	let delay = config.connect_delay + jitter(config.connect_jitter);
	info!(
		target = "warmline.driver",
		key = %pool.key,
		session = slot.seq(),
		delay_ms = delay.as_millis() as u64,
		"starting session"
	);
	pause(&token, delay).await?;
	slot.end_flight();

	let connection = until_cancelled(&token, pool.providers.connections.open(&credential, &pool.backend)).await??;
	if let Err(err) = await_ready(&pool, &token, connection.as_ref()).await {
		close_quietly(&pool, connection.as_ref()).await;
		return Err(err);
	}

	let Some(session) = slot.commit(Arc::clone(&connection)) else {
		close_quietly(&pool, connection.as_ref()).await;
		return Err(Error::Shutdown);
	};

	if let Err(err) = prime(&pool, &session, &token).await {
		if !err.is_shutdown() && !err.is_connection_lost() {
			session.mark_failed();
		}
		return Err(err);
	}

	pause(&token, config.retirement_delay).await?;
	if pool.retire_if_idle(&session) {
		info!(target = "warmline.driver", key = %pool.key, session = session.id(), "primed session unused, retiring");
	} else {
		debug!(target = "warmline.driver", key = %pool.key, session = session.id(), "primed session in use, keeping");
	}
	Ok(())
}

async fn await_ready(pool: &PoolInner, token: &CancellationToken, connection: &dyn Connection) -> Result<()> {
	let started = tokio::time::Instant::now();
	let deadline = pool.config.ready_timeout;
	let ready = tokio::select! {
		biased;
		_ = token.cancelled() => return Err(Error::Shutdown),
		ready = tokio::time::timeout(deadline, connection.ready()) => ready,
	};
	match ready {
		Ok(Ok(())) => {
			debug!(
				target = "warmline.driver",
				key = %pool.key,
				backend = %pool.backend,
				after_ms = started.elapsed().as_millis() as u64,
				"connection ready"
			);
			Ok(())
		}
		Ok(Err(err)) => Err(err),
		Err(_) => Err(Error::ConnectionTimeout {
			backend: pool.backend.to_string(),
			after: deadline,
		}),
	}
}

/// Streams the priming script, the silence frame, and the settle delay.
async fn prime(pool: &PoolInner, session: &Session, token: &CancellationToken) -> Result<()> {
	let script = until_cancelled(token, pool.providers.priming.frames_for(&pool.key)).await??;
	let connection = session.connection();
	let total = script.len();
	debug!(
		target = "warmline.driver",
		key = %pool.key,
		session = session.id(),
		frames = total,
		duration_ms = script.duration().as_millis() as u64,
		"priming session"
	);

	for (sent, frame) in script.frames().iter().enumerate() {
		if !connection.is_connected() {
			return Err(Error::ConnectionLost { sent, total });
		}
		let result = until_cancelled(token, connection.send(&frame.data)).await?;
		if let Err(err) = result {
			if !connection.is_connected() {
				return Err(Error::ConnectionLost { sent, total });
			}
			return Err(err);
		}
		session.record_progress(sent + 1, total);
		pause(token, frame.delay).await?;
	}

	let silence = vec![0u8; pool.config.silence_frame_len];
	until_cancelled(token, connection.send(&silence)).await??;
	pause(token, pool.config.settle_delay).await?;
	session.mark_primed();
	info!(target = "warmline.driver", key = %pool.key, session = session.id(), "session primed");
	Ok(())
}

async fn close_quietly(pool: &PoolInner, connection: &dyn Connection) {
	if let Err(err) = connection.close().await {
		debug!(target = "warmline.driver", key = %pool.key, error = %err, "close failed");
	}
}

fn jitter(max: Duration) -> Duration {
	let max_ms = max.as_millis() as u64;
	Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Sleeps unless `token` fires first.
pub(crate) async fn pause(token: &CancellationToken, duration: Duration) -> Result<()> {
	tokio::select! {
		biased;
		_ = token.cancelled() => Err(Error::Shutdown),
		_ = tokio::time::sleep(duration) => Ok(()),
	}
}

async fn until_cancelled<F: std::future::Future>(token: &CancellationToken, fut: F) -> Result<F::Output> {
	tokio::select! {
		biased;
		_ = token.cancelled() => Err(Error::Shutdown),
		output = fut => Ok(output),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn jitter_stays_within_bound() {
		for _ in 0..100 {
			assert!(jitter(Duration::from_millis(500)) <= Duration::from_millis(500));
		}
		assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
	}

	#[tokio::test(start_paused = true)]
	async fn pause_returns_shutdown_when_cancelled() {
		let token = CancellationToken::new();
		token.cancel();
		let err = pause(&token, Duration::from_secs(60)).await.unwrap_err();
		assert!(err.is_shutdown());
	}

	#[tokio::test(start_paused = true)]
	async fn pause_sleeps_full_duration() {
		let token = CancellationToken::new();
		let started = tokio::time::Instant::now();
		pause(&token, Duration::from_secs(2)).await.unwrap();
		assert!(started.elapsed() >= Duration::from_secs(2));
	}
}
