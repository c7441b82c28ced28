use std::path::{Path, PathBuf};

use async_trait::async_trait;
use warmline::{Error, TokenRefresher};

/// Re-reads a bearer token from a file kept fresh by an external agent.
#[derive(Debug, Clone)]
pub struct FileTokenRefresher {
	path: PathBuf,
}

impl FileTokenRefresher {
	pub fn new(path: impl AsRef<Path>) -> Self {
		Self {
			path: path.as_ref().to_path_buf(),
		}
	}
}

#[async_trait]
impl TokenRefresher for FileTokenRefresher {
	async fn refresh(&self) -> warmline::Result<String> {
		let raw = tokio::fs::read_to_string(&self.path).await?;
		let token = raw.trim();
		if token.is_empty() {
			return Err(Error::InvalidConfig(format!("token file {} is empty", self.path.display())));
		}
		Ok(token.to_string())
	}
}
