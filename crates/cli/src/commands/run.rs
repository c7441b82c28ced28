//! `warmline run`: keep every configured pool warm until interrupted.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tracing::info;
use warmline::PoolRegistry;

use crate::cli::OutputFormat;
use crate::config::WarmlineConfig;
use crate::output;

pub async fn execute(config: &WarmlineConfig, status_interval: Duration, format: OutputFormat) -> Result<()> {
	let registry = PoolRegistry::new(config.providers()?);
	let keys = config.keys();
	for key in &keys {
		registry
			.get_pool(key, config.pool_size)
			.with_context(|| format!("Failed to start pool {key}"))?;
	}
	info!(
		target = "warmline.cli",
		pools = keys.len(),
		pool_size = config.pool_size,
		endpoint = %config.endpoint,
		"pools started"
	);

	let mut ticker = tokio::time::interval(status_interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	let shutdown = tokio::signal::ctrl_c();
	tokio::pin!(shutdown);

	let result = loop {
		tokio::select! {
			signal = &mut shutdown => {
				info!(target = "warmline.cli", "received Ctrl+C, shutting down");
				break signal.context("Failed to listen for Ctrl+C");
			}
			_ = ticker.tick() => {
				for status in registry.statuses() {
					println!("{}", output::render(&status, format));
				}
			}
		}
	};

	registry.shutdown_all().await;
	result
}
