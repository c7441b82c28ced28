mod check;
mod run;

use std::time::Duration;

use anyhow::Result;

use crate::cli::{Cli, Commands};
use crate::config::WarmlineConfig;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let mut config = WarmlineConfig::load(cli.config.as_deref())?;

	match cli.command {
		Commands::Run {
			status_interval,
			pool_size,
		} => {
			if let Some(size) = pool_size {
				config.pool_size = size;
				config.validate()?;
			}
			run::execute(&config, Duration::from_millis(status_interval.max(1)), cli.format).await
		}
		Commands::Check => check::execute(&config, cli.format),
	}
}
