//! WebSocket connection provider.
//!
//! Each connection is a background task that owns the socket. The handle
//! talks to it through an mpsc queue of outgoing binary frames and observes
//! it through a `watch` channel carrying the [`LinkState`]. Readiness is the
//! first transition out of `Connecting`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::key::BackendIdentity;
use crate::provider::{Connection, ConnectionProvider, Credential};

/// Outgoing frames buffered per connection.
const FRAME_QUEUE: usize = 64;
/// How long `close` waits for the socket task to finish.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// State of one socket as seen by its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
	Connecting,
	Connected,
	Closed,
	Failed,
}

/// Opens `endpoint?character=<identity>` with a bearer token.
#[derive(Debug, Clone)]
pub struct WsConnectionProvider {
	endpoint: String,
}

impl WsConnectionProvider {
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self {
			endpoint: endpoint.into(),
		}
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	/// URL for a session speaking as `backend`.
	pub fn url_for(&self, backend: &BackendIdentity) -> String {
		let separator = if self.endpoint.contains('?') { '&' } else { '?' };
		format!("{}{separator}character={backend}", self.endpoint)
	}

	fn request(&self, credential: &Credential, backend: &BackendIdentity) -> Result<Request> {
		let mut request = self
			.url_for(backend)
			.into_client_request()
			.map_err(|e| Error::ConnectionFailed(format!("invalid endpoint: {e}")))?;
		let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
			.map_err(|e| Error::ConnectionFailed(format!("invalid credential header: {e}")))?;
		request.headers_mut().insert(AUTHORIZATION, bearer);
		Ok(request)
	}
}

#[async_trait]
impl ConnectionProvider for WsConnectionProvider {
	async fn open(&self, credential: &Credential, backend: &BackendIdentity) -> Result<Arc<dyn Connection>> {
		let request = self.request(credential, backend)?;
		let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
		let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
		let shutdown = CancellationToken::new();

		tokio::spawn(run_link(
			request,
			backend.clone(),
			state_tx,
			frames_rx,
			shutdown.clone(),
		));

		Ok(Arc::new(WsConnection {
			state: state_rx,
			frames: frames_tx,
			shutdown,
		}))
	}
}

/// Handle to a socket owned by its link task.
pub struct WsConnection {
	state: watch::Receiver<LinkState>,
	frames: mpsc::Sender<Vec<u8>>,
	shutdown: CancellationToken,
}

impl WsConnection {
	pub fn state(&self) -> LinkState {
		*self.state.borrow()
	}
}

#[async_trait]
impl Connection for WsConnection {
	fn is_connected(&self) -> bool {
		self.state() == LinkState::Connected
	}

	async fn ready(&self) -> Result<()> {
		let mut state = self.state.clone();
		let settled = *state
			.wait_for(|s| *s != LinkState::Connecting)
			.await
			.map_err(|_| Error::ConnectionFailed("link task ended".to_string()))?;
		match settled {
			LinkState::Connected => Ok(()),
			other => Err(Error::ConnectionFailed(format!("link {other:?} before ready"))),
		}
	}

	async fn send(&self, frame: &[u8]) -> Result<()> {
		if !self.is_connected() {
			return Err(Error::Transport("not connected".to_string()));
		}
		self.frames
			.send(frame.to_vec())
			.await
			.map_err(|_| Error::Transport("link closed".to_string()))
	}

	async fn close(&self) -> Result<()> {
		self.shutdown.cancel();
		let mut state = self.state.clone();
		let _ = tokio::time::timeout(
			CLOSE_TIMEOUT,
			state.wait_for(|s| matches!(s, LinkState::Closed | LinkState::Failed)),
		)
		.await;
		Ok(())
	}
}

async fn run_link(
	request: Request,
	backend: BackendIdentity,
	state: watch::Sender<LinkState>,
	mut frames: mpsc::Receiver<Vec<u8>>,
	shutdown: CancellationToken,
) {
	let socket = tokio::select! {
		biased;
		_ = shutdown.cancelled() => {
			state.send_replace(LinkState::Closed);
			return;
		}
		result = tokio_tungstenite::connect_async(request) => match result {
			Ok((socket, _)) => socket,
			Err(err) => {
				warn!(target = "warmline.ws", backend = %backend, error = %err, "websocket connect failed");
				state.send_replace(LinkState::Failed);
				return;
			}
		},
	};
	debug!(target = "warmline.ws", backend = %backend, "websocket connected");
	state.send_replace(LinkState::Connected);

	let (mut sink, mut stream) = socket.split();
	let outcome = loop {
		tokio::select! {
			biased;
			_ = shutdown.cancelled() => {
				let _ = sink.send(Message::Close(None)).await;
				break LinkState::Closed;
			}
			frame = frames.recv() => {
				let Some(data) = frame else {
					break LinkState::Closed;
				};
				if let Err(err) = sink.send(Message::Binary(data)).await {
					warn!(target = "warmline.ws", backend = %backend, error = %err, "websocket send failed");
					break LinkState::Failed;
				}
			}
			incoming = stream.next() => match incoming {
				Some(Ok(Message::Close(frame))) => {
					debug!(target = "warmline.ws", backend = %backend, ?frame, "closed by peer");
					break LinkState::Closed;
				}
				// Responses are for the eventual caller, not the pool.
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					warn!(target = "warmline.ws", backend = %backend, error = %err, "websocket read failed");
					break LinkState::Failed;
				}
				None => break LinkState::Closed,
			},
		}
	};
	state.send_replace(outcome);
}
