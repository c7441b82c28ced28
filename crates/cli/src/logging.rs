//! Diagnostic logging on stderr. Status lines own stdout.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Event targets emitted by the pool engine and this binary.
const POOL: &str = "warmline.pool";
const REGISTRY: &str = "warmline.registry";
const DRIVER: &str = "warmline.driver";
const CREDENTIAL: &str = "warmline.credential";
const WS: &str = "warmline.ws";
const PCM: &str = "warmline.pcm";
const CLI: &str = "warmline.cli";

/// Builds the default filter for a `-v` count.
///
/// Quiet runs keep warnings only. `-v` adds pool and session lifecycle,
/// `-vv` adds per-tick pool detail and socket handshakes, `-vvv` traces
/// everything warmline emits. The tungstenite stack stays at `warn` until
/// `-vvv` since its debug output is per frame.
pub fn filter_for(verbosity: u8) -> String {
	let (lifecycle, detail, wire) = match verbosity {
		0 => ("warn", "warn", "warn"),
		1 => ("info", "warn", "warn"),
		2 => ("debug", "info", "warn"),
		_ => ("trace", "debug", "info"),
	};
	let mut directives = vec!["warn".to_string()];
	for target in [POOL, REGISTRY, DRIVER, CLI] {
		directives.push(format!("{target}={lifecycle}"));
	}
	for target in [CREDENTIAL, WS, PCM] {
		directives.push(format!("{target}={detail}"));
	}
	for target in ["tungstenite", "tokio_tungstenite"] {
		directives.push(format!("{target}={wire}"));
	}
	directives.join(",")
}

/// Installs the global subscriber. `RUST_LOG` overrides the `-v` count.
pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity)));
	let stderr = std::io::stderr();
	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_ansi(stderr.is_terminal())
		.with_writer(std::io::stderr)
		.with_target(verbosity > 0)
		.compact()
		.init();
}
