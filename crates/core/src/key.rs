//! Pool keys and the persona -> backend identity mapping.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Language a pool's priming script is recorded in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
	/// English
	#[default]
	En,
	/// French
	Fr,
}

impl Language {
	/// Lowercase code used in file names (`en`, `fr`).
	pub fn code(self) -> &'static str {
		match self {
			Language::En => "en",
			Language::Fr => "fr",
		}
	}
}

impl std::fmt::Display for Language {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Language::En => write!(f, "EN"),
			Language::Fr => write!(f, "FR"),
		}
	}
}

impl FromStr for Language {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"en" => Ok(Language::En),
			"fr" => Ok(Language::Fr),
			_ => Err(Error::InvalidConfig(format!("unknown language '{s}'"))),
		}
	}
}

/// Identifies one pool: a persona speaking one language.
///
/// Two keys are equal only if both fields match, so `Kira-FR` and `Kira-EN`
/// get separate pools even though they share a backend identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey {
	pub persona: String,
	pub language: Language,
}

impl PoolKey {
	pub fn new(persona: impl Into<String>, language: Language) -> Self {
		Self {
			persona: persona.into(),
			language,
		}
	}
}

impl std::fmt::Display for PoolKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}-{}", self.persona, self.language)
	}
}

impl FromStr for PoolKey {
	type Err = Error;

	/// Parses the display form `Persona-LANG`.
	fn from_str(s: &str) -> Result<Self> {
		let (persona, language) = s.rsplit_once('-').ok_or_else(|| Error::InvalidKey(s.to_string()))?;
		if persona.is_empty() {
			return Err(Error::InvalidKey(s.to_string()));
		}
		let language = language.parse().map_err(|_| Error::InvalidKey(s.to_string()))?;
		Ok(Self::new(persona, language))
	}
}

/// Persona name understood by the backend. Serializes as a plain string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BackendIdentity(Arc<str>);

impl Serialize for BackendIdentity {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for BackendIdentity {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		let name = String::deserialize(deserializer)?;
		Ok(Self(Arc::from(name)))
	}
}

impl BackendIdentity {
	pub fn new(name: &str) -> Self {
		Self(Arc::from(name))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for BackendIdentity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// Fixed mapping from app personas to backend identities.
///
/// Lookup is case-insensitive on the persona. Personas without an entry map
/// to their own name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendMap {
	entries: HashMap<String, BackendIdentity>,
}

impl Default for BackendMap {
	fn default() -> Self {
		let mut map = Self::empty();
		map.insert("kira", "Maya");
		map.insert("hugo", "Maya");
		map
	}
}

impl BackendMap {
	/// A map with no entries: every persona is its own backend identity.
	pub fn empty() -> Self {
		Self {
			entries: HashMap::new(),
		}
	}

	/// Adds or replaces the identity for `persona`.
	pub fn insert(&mut self, persona: &str, backend: &str) {
		self.entries
			.insert(persona.to_ascii_lowercase(), BackendIdentity::new(backend));
	}

	pub fn resolve(&self, key: &PoolKey) -> BackendIdentity {
		self.entries
			.get(&key.persona.to_ascii_lowercase())
			.cloned()
			.unwrap_or_else(|| BackendIdentity::new(&key.persona))
	}
}
