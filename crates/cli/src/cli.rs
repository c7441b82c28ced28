use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// How status lines are printed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// `Kira-FR: 2 available, 1 ready, 100% progress`
	#[default]
	Text,
	/// One JSON object per pool per line
	Json,
}

#[derive(Parser, Debug)]
#[command(name = "warmline")]
#[command(about = "Keep pools of primed voice sessions warm")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format for status lines
	#[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
	pub format: OutputFormat,

	/// Config file (default: $XDG_CONFIG_HOME/warmline/warmline.json)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start one pool per persona and language and report their status
	Run {
		/// Milliseconds between status reports
		#[arg(long, value_name = "MS", default_value_t = 1000)]
		status_interval: u64,

		/// Override the configured pool size
		#[arg(long, value_name = "N")]
		pool_size: Option<usize>,
	},

	/// Validate the config and show the pools it would start
	Check,
}
