//! TCP server for chat sessions.
//!
//! Accepts connections serially and hands each one to its own task. Tasks
//! never talk to each other; the credential table is the only thing they
//! share.

use crate::auth::AuthService;
use crate::config::Config;
use crate::session;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, Instrument};

/// Listen backlog passed to the kernel
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    listener: TcpListener,
    auth: Arc<AuthService>,
    connection_limit: Arc<Semaphore>,
    max_message_size: usize,
}

impl Server {
    /// Bind the listener and open the credential table.
    pub fn bind(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let auth = AuthService::open(&config.credentials)?;
        let listener = create_listener(config.listen)?;
        Ok(Self::new(listener, auth, config))
    }

    /// Create a server from an already bound listener.
    pub fn new(listener: TcpListener, auth: Arc<AuthService>, config: &Config) -> Self {
        Server {
            listener,
            auth,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_message_size: config.max_message_size,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// The listener is closed on return. Sessions already running are left to
    /// finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(address = %self.local_addr()?, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&self.connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "New connection");
                    let auth = Arc::clone(&self.auth);
                    let max_message_size = self.max_message_size;

                    tokio::spawn(
                        async move {
                            handle_connection(stream, auth, max_message_size).await;
                            drop(permit);
                        }
                        .instrument(info_span!("session", %peer)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        info!("Server shutting down");
        Ok(())
    }

    /// Accept connections until Ctrl-C.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Get a reference to the auth service for testing
    #[cfg(test)]
    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }
}

/// Handle a single client connection
async fn handle_connection(stream: TcpStream, auth: Arc<AuthService>, max_message_size: usize) {
    match session::run(stream, auth, max_message_size).await {
        Ok(()) => info!("Terminating connection"),
        Err(e) => debug!(error = %e, "Connection error"),
    }
}

/// Bind a non-blocking listener with address reuse enabled.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            listen: "127.0.0.1:0".parse().unwrap(),
            credentials: dir.path().join("users.txt"),
            max_connections: 4,
            max_message_size: 1024,
            log_level: "info".to_string(),
        }
    }

    #[tokio::test]
    async fn test_server_creation() {
        let dir = TempDir::new().unwrap();
        let server = Server::bind(&test_config(&dir)).unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.auth().user_count().unwrap(), 0);
        assert!(dir.path().join("users.txt").exists());
    }

    async fn exchange(stream: &mut TcpStream, request: &str) -> String {
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = [0u8; 256];
        let n = timeout(Duration::from_secs(3), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn test_shutdown_keeps_serving_accepted_sessions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("users.txt"), "(bob, secret1)").unwrap();
        let server = Server::bind(&test_config(&dir)).unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let accept_loop = tokio::spawn(server.run_until(async move {
            let _ = rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(exchange(&mut client, "login bob secret1").await, "1");

        tx.send(()).unwrap();
        accept_loop.await.unwrap().unwrap();

        // The listener is closed, but the running session is not.
        assert!(TcpStream::connect(addr).await.is_err());
        assert_eq!(
            exchange(&mut client, "send still here").await,
            "bob: still here"
        );
        client.write_all(b"logout").await.unwrap();
        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(3), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
