//! Tracing subscriber setup for binaries, demos, and tests.

use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directives used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "warn,planloom=info";

/// Installs the global tracing subscriber: an env-filtered fmt layer plus
/// [`ErrorLayer`] so error reports carry their span trace.
///
/// The filter honors `RUST_LOG`, falling back to [`DEFAULT_DIRECTIVES`].
/// Span open/close events are logged, which makes planner phases and layer
/// boundaries visible at `debug` level. Calling this more than once is a
/// no-op; the first subscriber wins.
pub fn init() {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init();
}
