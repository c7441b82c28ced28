//! Operator config file (`warmline.json`).
//!
//! Relative paths inside the file resolve against the file's own directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use warmline::{
	BackendMap, CachedCredential, CredentialProvider, Language, PcmFileSource, PcmFormat, PoolKey, Providers,
	StaticCredential, WsConnectionProvider,
};

use crate::token::FileTokenRefresher;

/// Pool sizes the operator may choose.
pub const POOL_SIZE_RANGE: std::ops::RangeInclusive<usize> = 2..=12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarmlineConfig {
	/// WebSocket endpoint, `ws://` or `wss://`.
	pub endpoint: String,
	/// Inline bearer token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	/// File holding the bearer token, re-read when the token nears expiry.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_file: Option<PathBuf>,
	/// Directory of `<persona>_<lang>.pcm` priming files.
	pub audio_dir: PathBuf,
	#[serde(default = "default_pool_size")]
	pub pool_size: usize,
	#[serde(default = "default_personas")]
	pub personas: Vec<String>,
	#[serde(default = "default_languages")]
	pub languages: Vec<Language>,
	#[serde(default)]
	pub audio: PcmFormat,
	/// Persona -> backend identity overrides, on top of the built-in map.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub backends: BTreeMap<String, String>,
}

fn default_pool_size() -> usize {
	8
}

fn default_personas() -> Vec<String> {
	vec!["Kira".to_string(), "Hugo".to_string()]
}

fn default_languages() -> Vec<Language> {
	vec![Language::En, Language::Fr]
}

/// `$XDG_CONFIG_HOME/warmline/warmline.json` or the platform equivalent.
pub fn default_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("warmline").join("warmline.json"))
}

impl WarmlineConfig {
	/// Loads `path`, or the default location when `None`.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let path = match path {
			Some(path) => path.to_path_buf(),
			None => default_path().context("No config directory on this platform; pass --config")?,
		};
		let text = std::fs::read_to_string(&path)
			.with_context(|| format!("Failed to read config {}", path.display()))?;
		let mut config: Self = serde_json::from_str(&text)
			.with_context(|| format!("Failed to parse config {}", path.display()))?;
		if let Some(base) = path.parent() {
			config.resolve_paths(base);
		}
		config.validate()?;
		Ok(config)
	}

	fn resolve_paths(&mut self, base: &Path) {
		if self.audio_dir.is_relative() {
			self.audio_dir = base.join(&self.audio_dir);
		}
		if let Some(file) = self.token_file.as_mut().filter(|f| f.is_relative()) {
			*file = base.join(&*file);
		}
	}

	pub fn validate(&self) -> Result<()> {
		if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
			bail!("endpoint must be a ws:// or wss:// URL, got '{}'", self.endpoint);
		}
		match (&self.token, &self.token_file) {
			(Some(_), Some(_)) => bail!("set either token or token_file, not both"),
			(None, None) => bail!("one of token or token_file is required"),
			_ => {}
		}
		if !POOL_SIZE_RANGE.contains(&self.pool_size) {
			bail!(
				"pool_size {} is outside {}..={}",
				self.pool_size,
				POOL_SIZE_RANGE.start(),
				POOL_SIZE_RANGE.end()
			);
		}
		if self.personas.is_empty() || self.personas.iter().any(|p| p.trim().is_empty()) {
			bail!("personas must be a non-empty list of names");
		}
		if self.languages.is_empty() {
			bail!("languages must not be empty");
		}
		self.audio.validate().context("Invalid audio format")?;
		Ok(())
	}

	/// Every persona x language pair, in config order.
	pub fn keys(&self) -> Vec<PoolKey> {
		self.personas
			.iter()
			.flat_map(|persona| {
				self.languages
					.iter()
					.map(move |language| PoolKey::new(persona.trim(), *language))
			})
			.collect()
	}

	pub fn backend_map(&self) -> BackendMap {
		let mut map = BackendMap::default();
		for (persona, backend) in &self.backends {
			map.insert(persona, backend);
		}
		map
	}

	pub fn priming_source(&self) -> PcmFileSource {
		PcmFileSource::new(&self.audio_dir, self.audio)
	}

	fn credentials(&self) -> Result<Arc<dyn CredentialProvider>> {
		match (&self.token, &self.token_file) {
			(Some(token), _) => Ok(Arc::new(StaticCredential::new(token))),
			(None, Some(file)) => Ok(Arc::new(CachedCredential::new(FileTokenRefresher::new(file)))),
			(None, None) => bail!("one of token or token_file is required"),
		}
	}

	/// Wires the WebSocket, PCM and credential providers from this config.
	pub fn providers(&self) -> Result<Providers> {
		Ok(Providers::new(
			self.credentials()?,
			Arc::new(WsConnectionProvider::new(&self.endpoint)),
			Arc::new(self.priming_source()),
		)
		.with_backends(self.backend_map()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write(dir: &Path, json: &str) -> PathBuf {
		let path = dir.join("warmline.json");
		std::fs::write(&path, json).unwrap();
		path
	}

	#[test]
	fn minimal_config_uses_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(
			dir.path(),
			r#"{"endpoint": "wss://voice.example/session", "token": "t", "audio_dir": "audio"}"#,
		);
		let config = WarmlineConfig::load(Some(&path)).unwrap();
		assert_eq!(config.pool_size, 8);
		assert_eq!(config.audio_dir, dir.path().join("audio"));
		assert_eq!(config.audio, PcmFormat::default());

		let keys: Vec<String> = config.keys().iter().map(ToString::to_string).collect();
		assert_eq!(keys, vec!["Kira-EN", "Kira-FR", "Hugo-EN", "Hugo-FR"]);
	}

	#[test]
	fn backend_overrides_extend_builtin_map() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(
			dir.path(),
			r#"{
				"endpoint": "ws://localhost:9000",
				"token_file": "token.txt",
				"audio_dir": "/srv/audio",
				"pool_size": 4,
				"personas": ["Kira", "Nova"],
				"languages": ["FR"],
				"backends": {"nova": "Orion"}
			}"#,
		);
		let config = WarmlineConfig::load(Some(&path)).unwrap();
		assert_eq!(config.token_file, Some(dir.path().join("token.txt")));
		assert_eq!(config.audio_dir, PathBuf::from("/srv/audio"));

		let map = config.backend_map();
		assert_eq!(map.resolve(&PoolKey::new("Kira", Language::Fr)).as_str(), "Maya");
		assert_eq!(map.resolve(&PoolKey::new("Nova", Language::Fr)).as_str(), "Orion");
	}

	#[test]
	fn rejects_out_of_range_pool_size() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(
			dir.path(),
			r#"{"endpoint": "wss://x", "token": "t", "audio_dir": "a", "pool_size": 1}"#,
		);
		let err = WarmlineConfig::load(Some(&path)).unwrap_err();
		assert!(err.to_string().contains("pool_size 1"));
	}

	#[test]
	fn rejects_ambiguous_or_missing_token() {
		let dir = tempfile::tempdir().unwrap();
		let both = write(
			dir.path(),
			r#"{"endpoint": "wss://x", "token": "t", "token_file": "f", "audio_dir": "a"}"#,
		);
		assert!(WarmlineConfig::load(Some(&both)).is_err());

		let neither = write(dir.path(), r#"{"endpoint": "wss://x", "audio_dir": "a"}"#);
		assert!(WarmlineConfig::load(Some(&neither)).is_err());
	}

	#[test]
	fn rejects_non_websocket_endpoint_and_unknown_fields() {
		let dir = tempfile::tempdir().unwrap();
		let http = write(dir.path(), r#"{"endpoint": "https://x", "token": "t", "audio_dir": "a"}"#);
		assert!(WarmlineConfig::load(Some(&http)).is_err());

		let typo = write(
			dir.path(),
			r#"{"endpoint": "wss://x", "token": "t", "audio_dir": "a", "poolsize": 4}"#,
		);
		assert!(WarmlineConfig::load(Some(&typo)).is_err());
	}

	#[test]
	fn missing_file_names_the_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("absent.json");
		let err = WarmlineConfig::load(Some(&path)).unwrap_err();
		assert!(format!("{err:#}").contains("absent.json"));
	}
}
