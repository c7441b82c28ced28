//! Priming scripts read from raw PCM files.
//!
//! Files are headerless little-endian PCM named `<persona>_<lang>.pcm`, with
//! `<persona>.pcm` as a fallback. Names are matched lowercase. Each file is
//! cut into fixed-size chunks paced at real time and cached per key.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::key::PoolKey;
use crate::provider::{Frame, PrimingScript, PrimingSource};

/// Layout of the PCM files and the chunk size streamed per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcmFormat {
	pub sample_rate: u32,
	pub channels: u16,
	pub bytes_per_sample: u16,
	pub chunk_bytes: usize,
}

impl Default for PcmFormat {
	/// 16 kHz mono 16-bit, 2048-byte chunks (64ms each).
	fn default() -> Self {
		Self {
			sample_rate: 16_000,
			channels: 1,
			bytes_per_sample: 2,
			chunk_bytes: 2048,
		}
	}
}

impl PcmFormat {
	pub fn byte_rate(&self) -> u64 {
		u64::from(self.sample_rate) * u64::from(self.channels) * u64::from(self.bytes_per_sample)
	}

	/// Playback time of `bytes` bytes.
	pub fn duration_of(&self, bytes: usize) -> Duration {
		let rate = self.byte_rate();
		if rate == 0 {
			return Duration::ZERO;
		}
		Duration::from_micros(bytes as u64 * 1_000_000 / rate)
	}

	pub fn validate(&self) -> Result<()> {
		if self.byte_rate() == 0 {
			return Err(Error::InvalidConfig("audio format has a zero byte rate".to_string()));
		}
		if self.chunk_bytes == 0 {
			return Err(Error::InvalidConfig("chunk_bytes must be non-zero".to_string()));
		}
		Ok(())
	}

	/// Splits `pcm` into frames, each followed by its own playback time.
	pub fn script(&self, pcm: &[u8]) -> PrimingScript {
		let chunk = self.chunk_bytes.max(1);
		let frames = pcm
			.chunks(chunk)
			.map(|c| Frame::new(c.to_vec(), self.duration_of(c.len())))
			.collect();
		PrimingScript::new(frames)
	}
}

/// Reads priming audio from a directory of PCM files.
pub struct PcmFileSource {
	dir: PathBuf,
	format: PcmFormat,
	cache: DashMap<PoolKey, Arc<PrimingScript>>,
}

impl PcmFileSource {
	pub fn new(dir: impl Into<PathBuf>, format: PcmFormat) -> Self {
		Self {
			dir: dir.into(),
			format,
			cache: DashMap::new(),
		}
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Candidate paths for `key`, most specific first.
	pub fn candidates(&self, key: &PoolKey) -> [PathBuf; 2] {
		let persona = key.persona.to_ascii_lowercase();
		[
			self.dir.join(format!("{persona}_{}.pcm", key.language.code())),
			self.dir.join(format!("{persona}.pcm")),
		]
	}

	async fn load(&self, key: &PoolKey) -> Result<PrimingScript> {
		for path in self.candidates(key) {
			match tokio::fs::read(&path).await {
				Ok(bytes) if bytes.is_empty() => {
					return Err(Error::PrimingSource(format!("{} is empty", path.display())));
				}
				Ok(bytes) => {
					let script = self.format.script(&bytes);
					debug!(
						target = "warmline.pcm",
						key = %key,
						path = %path.display(),
						frames = script.len(),
						duration_ms = script.duration().as_millis() as u64,
						"loaded priming audio"
					);
					return Ok(script);
				}
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
				Err(err) => return Err(err.into()),
			}
		}
		Err(Error::PrimingSource(format!(
			"no priming audio for {key} in {}",
			self.dir.display()
		)))
	}
}

#[async_trait]
impl PrimingSource for PcmFileSource {
	async fn frames_for(&self, key: &PoolKey) -> Result<Arc<PrimingScript>> {
		if let Some(script) = self.cache.get(key) {
			return Ok(Arc::clone(script.value()));
		}
		let script = Arc::new(self.load(key).await?);
		let script = self
			.cache
			.entry(key.clone())
			.or_insert(script)
			.value()
			.clone();
		Ok(script)
	}
}
