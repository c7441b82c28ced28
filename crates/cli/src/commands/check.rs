//! `warmline check`: show the pools a config would start without connecting.

use anyhow::{Result, bail};
use serde::Serialize;
use warmline::{BackendIdentity, PoolConfig};

use crate::cli::OutputFormat;
use crate::config::WarmlineConfig;

#[derive(Debug, Serialize)]
struct PlannedPool {
	key: String,
	backend: BackendIdentity,
	target_size: usize,
	tick_ms: u64,
	audio: Option<String>,
}

fn plan(config: &WarmlineConfig) -> Vec<PlannedPool> {
	let backends = config.backend_map();
	let source = config.priming_source();
	let pool_config = PoolConfig::new(config.pool_size);
	config
		.keys()
		.into_iter()
		.map(|key| PlannedPool {
			backend: backends.resolve(&key),
			target_size: pool_config.target_size,
			tick_ms: pool_config.tick_interval().as_millis() as u64,
			audio: source
				.candidates(&key)
				.into_iter()
				.find(|path| path.is_file())
				.map(|path| path.display().to_string()),
			key: key.to_string(),
		})
		.collect()
}

pub fn execute(config: &WarmlineConfig, format: OutputFormat) -> Result<()> {
	let pools = plan(config);
	for pool in &pools {
		match format {
			OutputFormat::Text => println!(
				"{} -> {} (target {}, tick {}ms, audio {})",
				pool.key,
				pool.backend,
				pool.target_size,
				pool.tick_ms,
				pool.audio.as_deref().unwrap_or("MISSING")
			),
			OutputFormat::Json => println!("{}", serde_json::to_string(pool)?),
		}
	}

	let missing = pools.iter().filter(|p| p.audio.is_none()).count();
	if missing > 0 {
		bail!(
			"{missing} pool(s) have no priming audio in {}",
			config.audio_dir.display()
		);
	}
	Ok(())
}
