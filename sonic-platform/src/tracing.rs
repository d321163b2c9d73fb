//! Provide tracing, tailored to this program.
//!
//! Binaries call one of the init_* functions at startup to install a tracing
//! subscriber. Library code only emits events, through
//! `use crate::tracing::prelude::*`.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Initialize logging.
///
/// Under systemd (pmon runs the plugins as a service) events go to journald;
/// otherwise they go to stderr so they don't mix with command output.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry().with(layer).init();
        } else {
            use_stderr(LevelFilter::INFO);
            error!("Failed to initialize journald logging, using stderr.");
        }
    } else {
        use_stderr(LevelFilter::INFO);
    }
}

/// Initialize logging at DEBUG unless RUST_LOG says otherwise.
pub fn init_verbose() {
    use_stderr(LevelFilter::DEBUG);
}

// Filter according to RUST_LOG, falling back to `default` when it is unset.
fn use_stderr(default: LevelFilter) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(LocalTimer),
        )
        .init();
}

// Timestamps in local time to the nearest second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
