//! Status line rendering.

use warmline::PoolStatus;

use crate::cli::OutputFormat;

/// `Kira-FR: 2 available, 1 ready, 75% progress`
pub fn status_line(status: &PoolStatus) -> String {
	format!(
		"{}: {} available, {} ready, {}% progress",
		status.key,
		status.available,
		status.ready,
		(status.best_progress * 100.0).round() as u32
	)
}

pub fn render(status: &PoolStatus, format: OutputFormat) -> String {
	match format {
		OutputFormat::Text => status_line(status),
		OutputFormat::Json => serde_json::to_string(status).unwrap_or_else(|err| {
			tracing::warn!(target = "warmline.cli", error = %err, "failed to serialize status");
			status_line(status)
		}),
	}
}
