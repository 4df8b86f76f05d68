/* src/logging.rs */

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Build the filter for `level`. A valid `RUST_LOG` takes precedence.
pub fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Install a fmt subscriber at `level`.
///
/// Returns `false` when the host already installed a global subscriber, in
/// which case that subscriber keeps deciding what is recorded.
pub fn init(level: LevelFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// Install a subscriber at the level named by `config.log_level`.
///
/// An unknown level is reported after the subscriber is in place.
pub fn init_from_config(config: &Config) -> bool {
    let installed = init(config.level().unwrap_or(LevelFilter::INFO));
    let level = config.log_filter();
    tracing::debug!(%level, installed, "Logging initialised");
    installed
}

/// Event capture for tests that assert on emitted log lines.
#[cfg(test)]
pub(crate) mod capture {
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub(crate) struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A plain-text fmt subscriber writing into the returned buffer.
    pub(crate) fn subscriber() -> (impl tracing::Subscriber + Send + Sync, Captured) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        (subscriber, captured)
    }
}
