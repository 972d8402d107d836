//! Diagnostics output for the bridge.
//!
//! The library is loaded into a host process that has no `tracing`
//! subscriber of its own, so the first boundary call installs a stderr
//! `fmt` subscriber. An already-installed global subscriber wins.

use std::sync::Once;

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

static INIT: Once = Once::new();

/// Install the stderr subscriber once per process
pub fn init(settings: &LoggingSettings) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.filter));

        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_timer(ChronoLocal::rfc_3339())
            .with_target(true)
            .with_thread_ids(true)
            .try_init()
            .is_ok();

        if installed {
            tracing::debug!(filter = %settings.filter, "bridge logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let settings = LoggingSettings::default();
        init(&settings);
        init(&settings);
        tracing::info!("still logging after a second init");
    }
}
