use std::str::FromStr;

use tracing::Subscriber;
use tracing_subscriber::{filter::Directive, prelude::*, EnvFilter, Registry};

use crate::LogLevel;

/// This does all the startup things for the logging pipeline. The returned
/// subscriber is handed to `tracing::subscriber::set_global_default` by the
/// synchronization session that owns the process.
pub fn start_logging_pipeline(
    log_filter: LogLevel,
) -> Result<Box<dyn Subscriber + Send + Sync>, String> {
    let mut logging_filter = EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::from(log_filter).into())
        .parse("")
        .map_err(|err| format!("Failed to create logging filter: {}", err))?;

    // Extraction logs every attribute it moves.
    if log_filter != LogLevel::Trace {
        logging_filter = logging_filter.add_directive(
            Directive::from_str("dirsync_lib::repl::extract=info").map_err(|err| {
                format!("Failed to set dirsync_lib::repl::extract logging to info: {}", err)
            })?,
        );
    }

    eprintln!(
        "Logging filter initialized: {:?}",
        logging_filter.to_string()
    );

    let forest_layer = tracing_forest::ForestLayer::default().with_filter(logging_filter);
    Ok(Box::new(Registry::default().with(forest_layer)))
}
