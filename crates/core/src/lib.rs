//! warmline: pools of pre-warmed, primed streaming sessions.
//!
//! A [`PoolRegistry`] holds one [`SessionPool`] per [`PoolKey`] (persona x
//! language). Each pool keeps up to its target size of connections open to
//! the conversational backend and primes every new one by streaming a
//! scripted monologue into it, so a caller can be handed a session whose
//! context is already loaded.
//!
//! The engine reaches the outside world only through the traits in
//! [`provider`]. [`credential`], [`pcm`] and [`ws`] hold the stock
//! implementations.
//!
//! ```ignore
//! use warmline::{PoolKey, PoolRegistry, Language, Providers};
//!
//! let registry = PoolRegistry::new(providers);
//! let key = PoolKey::new("Kira", Language::Fr);
//! registry.get_pool(&key, 4)?;
//!
//! if let Some(session) = registry.acquire_best_session(&key) {
//!     // hand session.connection() to the call ...
//!     registry.return_session(&session);
//! }
//! registry.shutdown_all().await;
//! ```

pub mod config;
pub mod credential;
mod driver;
pub mod error;
pub mod key;
pub mod pcm;
pub mod pool;
pub mod provider;
pub mod registry;
pub mod session;
pub mod ws;

#[cfg(test)]
mod testing;

pub use config::{MAX_TARGET_SIZE, PoolConfig};
pub use credential::{CachedCredential, StaticCredential, TokenRefresher};
pub use error::{Error, Result};
pub use key::{BackendIdentity, BackendMap, Language, PoolKey};
pub use pcm::{PcmFileSource, PcmFormat};
pub use pool::{PoolStatus, SessionPool};
pub use provider::{
	Connection, ConnectionProvider, Credential, CredentialProvider, Frame, PrimingScript, PrimingSource, Providers,
};
pub use registry::PoolRegistry;
pub use session::{Session, SessionId, SessionInfo, SessionPhase};
pub use ws::{LinkState, WsConnection, WsConnectionProvider};
