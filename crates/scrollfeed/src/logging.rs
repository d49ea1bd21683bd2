use std::io;
use std::path::Path;

use chrono::Local;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "warn";

/// Installs the global subscriber. The filter comes from `RUST_LOG`, falling
/// back to `warn`. With a log directory, output goes to a timestamp-named
/// file there instead of stderr.
pub fn init_tracing(log_dir: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        let file_name = format!("{}.log", Local::now().format("%Y%m%d_%H%M%S"));
        let appender = tracing_appender::rolling::never(dir, &file_name);

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::Layer::new()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(fmt::Layer::default().with_writer(io::stderr).with_target(true))
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)
    };

    result.map_err(io::Error::other)?;
    tracing::debug!(target: "scrollfeed::logging", "Tracing initialized");
    Ok(())
}
