//! Seams to the external collaborators a pool depends on.
//!
//! The engine never talks to a network, token service, or audio file
//! directly. It goes through these three traits, bundled in [`Providers`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::key::{BackendIdentity, BackendMap, PoolKey};

/// Bearer token handed to the connection provider.
///
/// `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
	pub fn new(token: &str) -> Self {
		Self(Arc::from(token))
	}

	/// Raw token value.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Debug for Credential {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("Credential(<redacted>)")
	}
}

/// Supplies a currently valid bearer token, refreshing it as needed.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
	/// Returns `None` when no valid token can be produced right now.
	async fn valid_credential(&self) -> Option<Credential>;
}

/// A bidirectional streaming connection to the backend.
#[async_trait]
pub trait Connection: Send + Sync {
	/// Point-in-time connectivity.
	fn is_connected(&self) -> bool;

	/// Resolves once the handshake completes, or with an error if it fails.
	///
	/// Callers bound this with their own deadline.
	async fn ready(&self) -> Result<()>;

	/// Sends one binary frame.
	async fn send(&self, frame: &[u8]) -> Result<()>;

	/// Closes the connection. Closing twice is a no-op.
	async fn close(&self) -> Result<()>;
}

/// Opens connections to the backend.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
	/// Starts opening a connection. The returned handle may not be ready yet.
	async fn open(
		&self,
		credential: &Credential,
		backend: &BackendIdentity,
	) -> Result<Arc<dyn Connection>>;
}

/// One chunk of priming audio and the pause that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	pub data: Vec<u8>,
	pub delay: Duration,
}

impl Frame {
	pub fn new(data: Vec<u8>, delay: Duration) -> Self {
		Self { data, delay }
	}
}

/// Ordered, finite frame sequence streamed into a fresh session.
///
/// Scripts are shared behind `Arc` and replayed from the start for every
/// session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimingScript {
	frames: Vec<Frame>,
}

impl PrimingScript {
	pub fn new(frames: Vec<Frame>) -> Self {
		Self { frames }
	}

	pub fn frames(&self) -> &[Frame] {
		&self.frames
	}

	pub fn len(&self) -> usize {
		self.frames.len()
	}

	pub fn is_empty(&self) -> bool {
		self.frames.is_empty()
	}

	/// Sum of inter-frame delays: the real-time length of the monologue.
	pub fn duration(&self) -> Duration {
		self.frames.iter().map(|f| f.delay).sum()
	}
}

/// Supplies the priming script for a pool key.
#[async_trait]
pub trait PrimingSource: Send + Sync {
	async fn frames_for(&self, key: &PoolKey) -> Result<Arc<PrimingScript>>;
}

/// Everything a pool needs from the outside world.
#[derive(Clone)]
pub struct Providers {
	pub credentials: Arc<dyn CredentialProvider>,
	pub connections: Arc<dyn ConnectionProvider>,
	pub priming: Arc<dyn PrimingSource>,
	pub backends: BackendMap,
}

impl Providers {
	pub fn new(
		credentials: Arc<dyn CredentialProvider>,
		connections: Arc<dyn ConnectionProvider>,
		priming: Arc<dyn PrimingSource>,
	) -> Self {
		Self {
			credentials,
			connections,
			priming,
			backends: BackendMap::default(),
		}
	}

	/// Replaces the persona -> backend mapping.
	pub fn with_backends(mut self, backends: BackendMap) -> Self {
		self.backends = backends;
		self
	}
}
