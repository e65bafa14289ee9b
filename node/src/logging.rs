//! Log output for the `tally` daemon.
//!
//! Everything goes to stderr; stdout belongs to command output such as
//! `tally status` and `tally init`. `RUST_LOG`, when set, replaces the
//! directives passed to [`init_logging`].

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored, one event per line with file and line.
    Pretty,
    /// JSON lines.
    Json,
}

impl LogFormat {
    /// `json` in any case selects [`LogFormat::Json`]; anything else is
    /// pretty.
    pub fn from_str_lossy(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer(format: LogFormat) -> OutputLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    }
}

/// Installs the global subscriber. Call once, before the wallet starts.
pub fn init_logging(default_directives: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(output_layer(format))
        .with(filter)
        .init();

    tracing::debug!(?format, "logging initialized");
}
