//! Scripted stand-ins for the external collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::key::{BackendIdentity, PoolKey};
use crate::provider::{
	Connection, ConnectionProvider, Credential, CredentialProvider, Frame, PrimingScript, PrimingSource,
	Providers,
};

/// Hands out a fixed token until switched off.
pub struct FakeCredentials {
	available: AtomicBool,
	pub calls: AtomicUsize,
}

impl FakeCredentials {
	pub fn new(available: bool) -> Arc<Self> {
		Arc::new(Self {
			available: AtomicBool::new(available),
			calls: AtomicUsize::new(0),
		})
	}

	pub fn set_available(&self, available: bool) {
		self.available.store(available, Ordering::SeqCst);
	}
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
	async fn valid_credential(&self) -> Option<Credential> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.available
			.load(Ordering::SeqCst)
			.then(|| Credential::new("test-token"))
	}
}

/// In-memory connection that can be told to drop mid-stream.
pub struct FakeConnection {
	connected: AtomicBool,
	ready: bool,
	/// Drop the link after this many sends.
	drop_after: Option<usize>,
	pub sent: Mutex<Vec<usize>>,
	pub closed: AtomicBool,
	pub fail_close: AtomicBool,
	pub backend: Option<BackendIdentity>,
}

impl FakeConnection {
	fn build(ready: bool, drop_after: Option<usize>, backend: Option<BackendIdentity>) -> Arc<Self> {
		Arc::new(Self {
			connected: AtomicBool::new(ready),
			ready,
			drop_after,
			sent: Mutex::new(Vec::new()),
			closed: AtomicBool::new(false),
			fail_close: AtomicBool::new(false),
			backend,
		})
	}

	/// A connection that is already up.
	pub fn connected() -> Arc<Self> {
		Self::build(true, None, None)
	}

	/// Simulates the remote end going away.
	pub fn drop_link(&self) {
		self.connected.store(false, Ordering::SeqCst);
	}

	pub fn sent_count(&self) -> usize {
		self.sent.lock().len()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Connection for FakeConnection {
	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	async fn ready(&self) -> Result<()> {
		if self.ready {
			return Ok(());
		}
		std::future::pending::<()>().await;
		Ok(())
	}

	async fn send(&self, frame: &[u8]) -> Result<()> {
		if !self.is_connected() {
			return Err(Error::Transport("not connected".to_string()));
		}
		let mut sent = self.sent.lock();
		sent.push(frame.len());
		if self.drop_after.is_some_and(|n| sent.len() >= n) {
			self.connected.store(false, Ordering::SeqCst);
		}
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		self.closed.store(true, Ordering::SeqCst);
		self.connected.store(false, Ordering::SeqCst);
		if self.fail_close.load(Ordering::SeqCst) {
			return Err(Error::Transport("close failed".to_string()));
		}
		Ok(())
	}
}

/// How connections opened by [`FakeConnector`] behave.
#[derive(Clone, Copy, Debug, Default)]
pub enum LinkBehavior {
	#[default]
	Healthy,
	/// Readiness never fires.
	NeverReady,
	/// Link drops after this many sends.
	DropAfter(usize),
}

#[derive(Default)]
pub struct FakeConnector {
	behavior: LinkBehavior,
	pub opened: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeConnector {
	pub fn new(behavior: LinkBehavior) -> Arc<Self> {
		Arc::new(Self {
			behavior,
			opened: Mutex::new(Vec::new()),
		})
	}

	pub fn open_count(&self) -> usize {
		self.opened.lock().len()
	}

	pub fn last(&self) -> Option<Arc<FakeConnection>> {
		self.opened.lock().last().cloned()
	}
}

#[async_trait]
impl ConnectionProvider for FakeConnector {
	async fn open(&self, _credential: &Credential, backend: &BackendIdentity) -> Result<Arc<dyn Connection>> {
		let conn = match self.behavior {
			LinkBehavior::Healthy => FakeConnection::build(true, None, Some(backend.clone())),
			LinkBehavior::NeverReady => FakeConnection::build(false, None, Some(backend.clone())),
			LinkBehavior::DropAfter(n) => FakeConnection::build(true, Some(n), Some(backend.clone())),
		};
		self.opened.lock().push(Arc::clone(&conn));
		Ok(conn)
	}
}

/// Same script for every key: `frames` chunks of 4 bytes, `delay` apart.
pub struct FakeScript {
	script: Arc<PrimingScript>,
}

impl FakeScript {
	pub fn new(frames: usize, delay: Duration) -> Arc<Self> {
		let frames = (0..frames).map(|i| Frame::new(vec![i as u8; 4], delay)).collect();
		Arc::new(Self {
			script: Arc::new(PrimingScript::new(frames)),
		})
	}
}

#[async_trait]
impl PrimingSource for FakeScript {
	async fn frames_for(&self, _key: &PoolKey) -> Result<Arc<PrimingScript>> {
		Ok(Arc::clone(&self.script))
	}
}

/// Fakes bundled together, keeping typed handles for assertions.
pub struct Harness {
	pub credentials: Arc<FakeCredentials>,
	pub connector: Arc<FakeConnector>,
	pub script: Arc<FakeScript>,
}

impl Harness {
	/// Healthy link, 10 frames of 100ms.
	pub fn new() -> Self {
		Self::with(LinkBehavior::Healthy, 10, Duration::from_millis(100))
	}

	pub fn with(behavior: LinkBehavior, frames: usize, delay: Duration) -> Self {
		Self {
			credentials: FakeCredentials::new(true),
			connector: FakeConnector::new(behavior),
			script: FakeScript::new(frames, delay),
		}
	}

	pub fn providers(&self) -> Providers {
		Providers::new(
			self.credentials.clone(),
			self.connector.clone(),
			self.script.clone(),
		)
	}
}
