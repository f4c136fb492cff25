//! TCP server for handling delimited-protocol connections.
//!
//! Accepts connections and spawns one task per connection. Connections
//! share nothing; each owns its framing buffer.

use crate::config::Config;
use crate::runtime::{
    create_listener, resolve_addr, Connection, ConnectionError, ProcessResult, Settings,
};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace};

/// Server instance
pub struct Server {
    config: Config,
    settings: Arc<Settings>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, settings: Arc<Settings>) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            settings,
            connection_limit,
        }
    }

    /// Bind the configured address and begin accepting connections
    pub async fn run(&self) -> io::Result<()> {
        let addr = resolve_addr(&self.config)?;
        let listener = TcpListener::from_std(create_listener(addr, false)?)?;
        info!(address = %addr, "Server listening");

        self.serve(listener).await
    }

    /// Accept connections from `listener` until an unrecoverable error.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            // Wait for a connection slot
            let permit = self
                .connection_limit
                .clone()
                .acquire_owned()
                .await
                .map_err(io::Error::other)?;

            match listener.accept().await {
                Ok((stream, peer)) => {
                    let settings = Arc::clone(&self.settings);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, settings).await {
                            debug!(peer = %peer, error = %e, "Connection error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// Returns `Ok(())` when the peer closes the stream; any transport error,
/// idle timeout or buffer-limit violation ends the connection with an error.
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    settings: Arc<Settings>,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(peer, &settings);
    let result = serve_connection(&mut stream, &mut conn, &settings).await;
    conn.close();
    result
}

async fn serve_connection<S>(
    stream: &mut S,
    conn: &mut Connection,
    settings: &Settings,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut read_buf = vec![0u8; settings.read_buffer_size];
    let mut output = BytesMut::with_capacity(settings.read_buffer_size);

    loop {
        let n = match settings.idle_timeout {
            Some(idle) => tokio::time::timeout(idle, stream.read(&mut read_buf))
                .await
                .map_err(|_| ConnectionError::IdleTimeout(idle))??,
            None => stream.read(&mut read_buf).await?,
        };

        let result = conn.receive(&read_buf[..n], &mut output);

        // All responses for this chunk go out before the next read, even
        // when the chunk also ended the connection
        if !output.is_empty() {
            stream.write_all(&output).await?;
            trace!(peer = %conn.peer(), bytes = output.len(), "response_sent");
            output.clear();
        }

        if result? == ProcessResult::Closed {
            trace!(peer = %conn.peer(), "Connection closed by client");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeType;
    use crate::protocols::delimited::FrameError;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            runtime: RuntimeType::Tokio,
            workers: 1,
            max_connections: 16,
            delimiter: b';',
            max_buffer_size: 1024,
            read_buffer_size: 1024,
            idle_timeout: 0,
            log_level: "info".to_string(),
        }
    }

    #[tokio::test]
    async fn test_concatenated_frames_answered_in_order() {
        let stream = Builder::new()
            .read(b"PING;SET?key=val;")
            .write(b"Echo:PING;")
            .write(b"Echo:SET?key=val;")
            .build();

        handle_connection(stream, peer(), Arc::new(Settings::default()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fragmented_reads() {
        let stream = Builder::new()
            .read(b"PI")
            .read(b"NG;SET?k")
            .write(b"Echo:PING;")
            .read(b"ey=val;;")
            .write(b"Echo:SET?key=val;Echo:;")
            .build();

        handle_connection(stream, peer(), Arc::new(Settings::default()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_trailing_partial_frame_is_dropped_on_close() {
        let stream = Builder::new()
            .read(b"PING;unterminated")
            .write(b"Echo:PING;")
            .build();

        handle_connection(stream, peer(), Arc::new(Settings::default()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_error_ends_connection() {
        let stream = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let result = handle_connection(stream, peer(), Arc::new(Settings::default())).await;
        assert!(matches!(result, Err(ConnectionError::Io(_))));
    }

    #[tokio::test]
    async fn test_buffer_limit_ends_connection() {
        let settings = Settings {
            max_buffer_size: 4,
            ..Settings::default()
        };
        // One good frame, then an unterminated one over the limit
        let stream = Builder::new().read(b"ok;").write(b"Echo:ok;").read(b"toolong").build();

        let result = handle_connection(stream, peer(), Arc::new(settings)).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Frame(FrameError::BufferLimit { .. }))
        ));
    }

    #[tokio::test]
    async fn test_buffer_limit_answers_frames_in_same_read() {
        let settings = Settings {
            max_buffer_size: 4,
            ..Settings::default()
        };
        let stream = Builder::new().read(b"ok;toolong").write(b"Echo:ok;").build();

        let result = handle_connection(stream, peer(), Arc::new(settings)).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Frame(FrameError::BufferLimit { buffered: 7, max: 4 }))
        ));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let settings = Settings {
            idle_timeout: Some(Duration::from_millis(50)),
            ..Settings::default()
        };
        let stream = Builder::new()
            .read(b"PING;")
            .write(b"Echo:PING;")
            .wait(Duration::from_secs(30))
            .build();

        let result = handle_connection(stream, peer(), Arc::new(settings)).await;
        assert!(matches!(result, Err(ConnectionError::IdleTimeout(_))));
    }

    #[tokio::test]
    async fn test_server_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(test_config(), Arc::new(Settings::default()));
        tokio::spawn(async move { server.serve(listener).await });

        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"PING;SET?key=val;").await.unwrap();
        let expected = b"Echo:PING;Echo:SET?key=val;";
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], expected);

        // Split write still produces one response
        client.write_all(b"CMD?a=").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"1;").await.unwrap();
        let expected = b"Echo:CMD?a=1;";
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], expected);

        // Server closes after our end-of-stream
        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        let n = client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(n, 0);
    }
}
