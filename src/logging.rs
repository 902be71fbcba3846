use tracing_subscriber::{fmt::format::FmtSpan, prelude::*, EnvFilter};

/// What gets logged when `RUST_LOG` is unset or empty.
const DEFAULT_FILTER: &str = "cpptags=warn";

/// Initialize logging to stderr; standard output is reserved for the tagfile.
///
/// If the environment variable `RUST_LOG` is set to a non-empty value it is
/// interpreted as an `EnvFilter` directive, otherwise only warnings and errors
/// are shown.  Calling this more than once is harmless.
pub fn init_logging() {
    let env_filter = match std::env::var("RUST_LOG") {
        // We frequently set RUST_LOG unconditionally from scripts, but
        // potentially with an empty value, which should mean the default.
        Ok(rustlog) if !rustlog.is_empty() => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
        _ => EnvFilter::new(DEFAULT_FILTER),
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .compact()
        // Usually ends up in build logs where ANSI isn't helpful.
        .with_ansi(false)
        .without_time()
        .with_filter(env_filter);

    let _ = tracing_subscriber::registry().with(layer).try_init();
}
