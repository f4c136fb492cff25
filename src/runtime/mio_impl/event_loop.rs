//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! A connection is either reading or flushing. While responses from the
//! last chunk are still queued, the socket is registered for writability
//! only and no further input is read.

use crate::config::Config;
use crate::runtime::{
    create_listener, num_workers, resolve_addr, Connection, ConnectionError, ProcessResult,
    Settings,
};
use bytes::{Buf, BytesMut};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

/// Longest poll wait while idle connections are being tracked.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Per-worker connection state for mio backend.
struct MioConnection {
    stream: TcpStream,
    conn: Connection,
    /// Responses the socket has not accepted yet.
    pending: BytesMut,
    last_active: Instant,
}

/// What to do with a connection after handling its event.
enum Next {
    Keep,
    Close,
}

/// Run the mio-based server.
pub fn run(config: Config, settings: Arc<Settings>) -> io::Result<()> {
    let addr = resolve_addr(&config)?;
    // Bind here so address errors surface before any worker starts
    let listeners = bind_listeners(addr, worker_count(&config))?;
    let local_addr = listeners[0].local_addr()?;

    info!(
        workers = listeners.len(),
        addr = %local_addr,
        "Starting mio runtime"
    );

    let mut handles = Vec::with_capacity(listeners.len());

    for (worker_id, listener) in listeners.into_iter().enumerate() {
        let settings = Arc::clone(&settings);
        let max_connections = config.max_connections;

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = worker_loop(worker_id, listener, &settings, max_connections) {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        handles.push(handle);
    }

    // Wait for all workers
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

/// Workers sharing one port need `SO_REUSEPORT`; without it there is one.
fn worker_count(config: &Config) -> usize {
    if cfg!(unix) {
        num_workers(config)
    } else {
        1
    }
}

/// Bind `count` listeners on one address.
///
/// The first bind fixes the port, so an ephemeral port (0) is shared by
/// every worker.
fn bind_listeners(addr: SocketAddr, count: usize) -> io::Result<Vec<std::net::TcpListener>> {
    let first = create_listener(addr, true)?;
    let addr = first.local_addr()?;

    let mut listeners = Vec::with_capacity(count.max(1));
    listeners.push(first);
    for _ in 1..count {
        listeners.push(create_listener(addr, true)?);
    }
    Ok(listeners)
}

fn worker_loop(
    worker_id: usize,
    listener: std::net::TcpListener,
    settings: &Settings,
    max_connections: usize,
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections: Slab<MioConnection> = Slab::new();
    let mut read_buf = vec![0u8; settings.read_buffer_size];
    let poll_timeout = settings.idle_timeout.map(|idle| idle.min(SWEEP_INTERVAL));

    info!(worker = worker_id, max_connections, "Worker started");

    loop {
        if let Err(e) = poll.poll(&mut events, poll_timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        let registry = poll.registry();

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(
                        &listener,
                        registry,
                        &mut connections,
                        settings,
                        max_connections,
                        worker_id,
                    );
                }
                Token(conn_id) => {
                    match handle_connection_event(
                        conn_id,
                        event,
                        registry,
                        &mut connections,
                        &mut read_buf,
                    ) {
                        Ok(Next::Keep) => {}
                        Ok(Next::Close) => close_connection(registry, &mut connections, conn_id),
                        Err(e) => {
                            debug!(conn_id, error = %e, "Connection error");
                            close_connection(registry, &mut connections, conn_id);
                        }
                    }
                }
            }
        }

        if let Some(idle) = settings.idle_timeout {
            close_idle_connections(registry, &mut connections, idle);
        }
    }
}

fn accept_connections(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut Slab<MioConnection>,
    settings: &Settings,
    max_connections: usize,
    worker_id: usize,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                if connections.len() >= max_connections {
                    warn!(peer = %peer, "Connection limit reached");
                    continue;
                }

                let entry = connections.vacant_entry();
                let conn_id = entry.key();
                if let Err(e) = registry.register(&mut stream, Token(conn_id), Interest::READABLE)
                {
                    warn!(peer = %peer, error = %e, "Failed to register connection");
                    continue;
                }

                entry.insert(MioConnection {
                    stream,
                    conn: Connection::new(peer, settings),
                    pending: BytesMut::new(),
                    last_active: Instant::now(),
                });

                debug!(
                    worker = worker_id,
                    conn_id,
                    peer = %peer,
                    "Accepted connection"
                );
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("Accept error: {}", e);
                break;
            }
        }
    }
}

fn handle_connection_event(
    conn_id: usize,
    event: &Event,
    registry: &Registry,
    connections: &mut Slab<MioConnection>,
    read_buf: &mut [u8],
) -> Result<Next, ConnectionError> {
    let Some(entry) = connections.get_mut(conn_id) else {
        return Ok(Next::Keep);
    };

    if !entry.pending.is_empty() {
        if !event.is_writable() {
            return Ok(Next::Keep);
        }

        flush_pending(&mut entry.stream, &mut entry.pending)?;
        if !entry.pending.is_empty() {
            return Ok(Next::Keep);
        }

        // Flushed: resume reading, input may already be waiting
        registry.reregister(&mut entry.stream, Token(conn_id), Interest::READABLE)?;
    }

    handle_readable(conn_id, entry, registry, read_buf)
}

fn handle_readable(
    conn_id: usize,
    entry: &mut MioConnection,
    registry: &Registry,
    read_buf: &mut [u8],
) -> Result<Next, ConnectionError> {
    loop {
        let n = match entry.stream.read(read_buf) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Next::Keep),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        entry.last_active = Instant::now();

        let result = match entry.conn.receive(&read_buf[..n], &mut entry.pending) {
            Ok(result) => result,
            Err(e) => {
                // Best effort: answer frames completed before the limit was hit
                if let Err(flush_err) = flush_pending(&mut entry.stream, &mut entry.pending) {
                    trace!(conn_id, error = %flush_err, "Failed to flush before close");
                }
                return Err(e.into());
            }
        };

        match result {
            ProcessResult::Closed => return Ok(Next::Close),
            ProcessResult::Responses { frames: 0 } => continue,
            ProcessResult::Responses { frames } => {
                trace!(conn_id, frames, bytes = entry.pending.len(), "response_sent");
            }
        }

        flush_pending(&mut entry.stream, &mut entry.pending)?;
        if !entry.pending.is_empty() {
            // Peer is slow to drain; stop reading until it catches up
            registry.reregister(&mut entry.stream, Token(conn_id), Interest::WRITABLE)?;
            return Ok(Next::Keep);
        }
    }
}

/// Write queued responses until done or the socket would block.
fn flush_pending(stream: &mut TcpStream, pending: &mut BytesMut) -> io::Result<()> {
    while !pending.is_empty() {
        match stream.write(&pending[..]) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => pending.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn close_connection(registry: &Registry, connections: &mut Slab<MioConnection>, conn_id: usize) {
    if let Some(mut entry) = connections.try_remove(conn_id) {
        if let Err(e) = registry.deregister(&mut entry.stream) {
            trace!(conn_id, error = %e, "Failed to deregister connection");
        }
        entry.conn.close();
    }
}

fn close_idle_connections(
    registry: &Registry,
    connections: &mut Slab<MioConnection>,
    idle: Duration,
) {
    let now = Instant::now();
    let expired: Vec<usize> = connections
        .iter()
        .filter(|(_, entry)| now.duration_since(entry.last_active) >= idle)
        .map(|(conn_id, _)| conn_id)
        .collect();

    for conn_id in expired {
        debug!(
            conn_id,
            peer = %connections[conn_id].conn.peer(),
            error = %ConnectionError::IdleTimeout(idle),
            "Closing connection"
        );
        close_connection(registry, connections, conn_id);
    }
}
