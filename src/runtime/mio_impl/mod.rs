//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! Thread-per-core: every worker owns a listener bound with `SO_REUSEPORT`
//! and multiplexes its connections cooperatively on one thread.

mod event_loop;

use crate::config::Config;
use crate::runtime::Settings;
use std::sync::Arc;

/// Run the server using mio backend.
pub fn run(config: Config, settings: Arc<Settings>) -> std::io::Result<()> {
    event_loop::run(config, settings)
}
