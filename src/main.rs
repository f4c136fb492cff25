//! delim-echo: a delimiter-framed command server
//!
//! Clients send frames terminated by a single delimiter byte (default `;`),
//! each holding a command and optional `key=value` arguments:
//!
//! ```text
//! SET?key=val&ttl=10;
//! ```
//!
//! Every frame is decoded, logged, and echoed back as `Echo:<frame><delim>`.
//!
//! Features:
//! - Reassembly of frames split across arbitrary reads
//! - Permissive argument parsing that never rejects a frame
//! - Per-connection buffer limit and idle timeout
//! - tokio (task per connection) or mio (event loop per core) runtime
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        runtime = ?config.runtime,
        delimiter = ?(config.delimiter as char),
        max_buffer_size = config.max_buffer_size,
        idle_timeout = config.idle_timeout,
        "Starting delim-echo server"
    );

    runtime::run(config)?;
    Ok(())
}
