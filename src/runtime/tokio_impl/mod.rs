//! tokio runtime: one task per connection.
//!
//! Each connection's loop is strictly sequential: read a chunk, answer every
//! complete frame in it, write the responses, then read again.

mod server;

pub(crate) use server::Server;

use crate::config::Config;
use crate::runtime::{num_workers, Settings};
use std::io;
use std::sync::Arc;
use tracing::info;

/// Run the server on a multi-threaded tokio runtime.
pub fn run(config: Config, settings: Arc<Settings>) -> io::Result<()> {
    let workers = num_workers(&config);
    info!(workers, "Starting tokio runtime");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;

    runtime.block_on(async move { Server::new(config, settings).run().await })
}
