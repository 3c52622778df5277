//! Process-wide log output.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber and routes `log` records into it.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling this
/// more than once keeps the first subscriber.
pub fn init_logging(format: LogFormat) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge already installed: {}", e);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let layer = match format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };
    let subscriber = tracing_subscriber::registry().with(layer.with_filter(filter));

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        log::debug!("Global subscriber already set, keeping it");
    }
}
