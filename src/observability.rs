//! Structured logging configuration.
//!
//! Sets up the `tracing` subscriber with:
//! - Plain text or JSON output
//! - A level taken from `RUST_LOG` when set, the configured level otherwise
//! - Spans for per-repository work

use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Initialize tracing.
///
/// Logs go to stderr so stdout stays free for the event stream.
///
/// # Panics
///
/// Panics if a tracing subscriber has already been initialized in this process.
pub fn init_tracing(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let json_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true);

        Registry::default().with(env_filter).with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    }

    tracing::debug!("Tracing initialized: level={}, json={}", level, json);
}

/// Span helpers.
pub mod spans {
    use std::path::Path;

    use tracing::{debug_span, info_span, Span};

    /// Span covering one watch session's lifetime.
    #[must_use]
    pub fn session_span(repo: &Path) -> Span {
        info_span!("watch_session", repo = %repo.display())
    }

    /// Span covering one status computation.
    #[must_use]
    pub fn compute_span(repo: &Path) -> Span {
        debug_span!("compute_status", repo = %repo.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_span_creation() {
        let span = spans::session_span(Path::new("/work/app"));
        let _guard = span.enter();
        let inner = spans::compute_span(Path::new("/work/app"));
        let _inner_guard = inner.enter();
    }
}
