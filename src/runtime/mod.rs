//! Connection runtimes.
//!
//! Two interchangeable ways to drive the delimited protocol:
//! - `tokio_impl`: one tokio task per connection
//! - `mio_impl`: readiness-based event loop per worker thread (epoll/kqueue)
//!
//! Both share common abstractions:
//! - `Connection`: per-connection framing state and response generation
//! - `Settings`: per-connection limits derived from the configuration
//! - `create_listener`: listener setup via socket2

mod connection;
mod mio_impl;
mod tokio_impl;

pub(crate) use connection::{Connection, ConnectionError, ProcessResult, Settings};

use crate::config::{Config, RuntimeType};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

/// Listen backlog for accepted-but-unserved connections.
const LISTEN_BACKLOG: i32 = 1024;

/// Run the server with the configured runtime.
pub fn run(config: Config) -> io::Result<()> {
    let settings = Arc::new(Settings::from_config(&config));

    match config.runtime {
        RuntimeType::Tokio => tokio_impl::run(config, settings),
        RuntimeType::Mio => mio_impl::run(config, settings),
    }
}

/// Resolve the configured `host:port` to a socket address.
pub(crate) fn resolve_addr(config: &Config) -> io::Result<SocketAddr> {
    config
        .listen_addr()
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no address for {}", config.listen_addr()),
            )
        })
}

/// Create a non-blocking TCP listener with `SO_REUSEADDR`.
///
/// With `reuse_port`, several workers can bind the same address and let
/// the kernel balance accepted connections between them.
pub(crate) fn create_listener(
    addr: SocketAddr,
    reuse_port: bool,
) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    set_reuse_port(&socket, reuse_port)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

#[cfg(unix)]
fn set_reuse_port(socket: &socket2::Socket, enable: bool) -> io::Result<()> {
    if enable {
        socket.set_reuse_port(true)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_reuse_port(_socket: &socket2::Socket, _enable: bool) -> io::Result<()> {
    Ok(())
}

/// Worker thread count: configured value, or one per CPU core.
pub(crate) fn num_workers(config: &Config) -> usize {
    if config.workers == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        config.workers
    }
}
