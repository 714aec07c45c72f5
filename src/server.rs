use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::time::{error::Elapsed, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{CodecError, FrameCodec};
use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::config::Config;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::store::Store;
use crate::Result;

/// Binds the configured address and serves clients until Ctrl+C is received.
pub async fn run(config: Config) -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;

    Server::new(listener, config)
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for the shutdown signal: {}", e);
            }
        })
        .await
}

/// Accepts connections and spawns one task per client. All tasks share a single [`Store`].
pub struct Server {
    listener: TcpListener,
    store: Store,
    limits: ConnectionLimits,
    // Bounds the number of clients served at once. A permit is held by every connection task.
    limit_connections: Arc<Semaphore>,
    shutdown_tolerance: Duration,
}

#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    keep_alive: Option<Duration>,
    max_frame_size: usize,
}

impl Server {
    pub fn new(listener: TcpListener, config: Config) -> Server {
        Server {
            listener,
            store: Store::new(),
            limits: ConnectionLimits {
                keep_alive: config.keep_alive(),
                max_frame_size: config.max_frame_size,
            },
            limit_connections: Arc::new(Semaphore::new(config.max_connections.max(1))),
            shutdown_tolerance: config.shutdown_tolerance(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the store shared by every connection.
    pub fn store(&self) -> Store {
        self.store.clone()
    }

    /// Serves clients until `shutdown` completes. Then it stops accepting, tells open connections
    /// to close after their current command and waits up to the shutdown tolerance for them.
    pub async fn run(self, shutdown: impl Future) -> Result<()> {
        info!("Server listening on {}", self.listener.local_addr()?);

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.limit_connections.clone().acquire_owned() => permit?,
            };

            let (socket, client_address) = tokio::select! {
                _ = &mut shutdown => break,
                res = self.listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        // Failing to accept one client must not stop the server.
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            info!("Accepted connection from {:?}", client_address);

            let store = self.store.clone();
            let limits = self.limits;
            let token = token.clone();

            tracker.spawn(async move {
                if let Err(e) = handle_connection(socket, client_address, store, limits, token).await
                {
                    warn!("Connection from {} failed: {}", client_address, e);
                }
                drop(permit);
            });
        }

        info!(
            "Shutting down, waiting for {} open connections",
            tracker.len()
        );

        token.cancel();
        tracker.close();

        match timeout(self.shutdown_tolerance, tracker.wait()).await {
            Ok(()) => info!("All connections closed"),
            Err(_) => warn!(
                "Connections still open after {:?}, shutting down anyway",
                self.shutdown_tolerance
            ),
        }

        Ok(())
    }
}

#[instrument(
    name = "connection",
    skip(stream, store, limits, shutdown),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    store: Store,
    limits: ConnectionLimits,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut conn = Connection::with_codec(stream, FrameCodec::new(limits.max_frame_size));

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Server is shutting down");
                break;
            }
            read = read_frame(&mut conn, limits.keep_alive) => read,
        };

        let frame = match read {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break,
            Ok(Err(e)) if e.is_protocol_error() => {
                warn!("Protocol error: {}", e);
                conn.write_frame(Frame::Error(format!("ERR Protocol error: {}", e)))
                    .await?;
                break;
            }
            Ok(Err(e)) => {
                debug!("Failed to read from socket: {}", e);
                break;
            }
            Err(_) => {
                info!("Connection idle for longer than {:?}", limits.keep_alive);
                break;
            }
        };

        debug!("Received frame from client: {}", frame);

        let res = match Command::try_from(frame) {
            Ok(cmd) => {
                debug!("Executing {}", cmd.as_ref());
                cmd.exec(store.clone())?
            }
            Err(e) if e.is_protocol_error() => {
                warn!("{}", e);
                conn.write_frame(e.to_frame()).await?;
                break;
            }
            Err(e) => e.to_frame(),
        };

        debug!("Sending response to client: {}", res);
        conn.write_frame(res).await?;
    }

    info!("Connection closed");
    Ok(())
}

async fn read_frame(
    conn: &mut Connection,
    keep_alive: Option<Duration>,
) -> std::result::Result<std::result::Result<Option<Frame>, CodecError>, Elapsed> {
    match keep_alive {
        Some(keep_alive) => timeout(keep_alive, conn.read_frame()).await,
        None => Ok(conn.read_frame().await),
    }
}
