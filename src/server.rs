//! TCP server: accepts connections and runs one worker per client.
//!
//! Each worker owns its session, frames lines off the socket, hands them to
//! the dispatcher, and writes the reply back on the same socket. Workers are
//! tracked in a `JoinSet` so the supervisor can reap them; a semaphore caps
//! the number of concurrent connections.

use crate::accounts::AccountDirectory;
use crate::config::Config;
use crate::framing::{FrameError, LineReader};
use crate::handlers::Dispatcher;
use crate::protocol::Reply;
use crate::session::Session;
use crate::store::Store;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Server instance
pub struct Server {
    config: Config,
    accounts: Arc<AccountDirectory>,
    dispatcher: Arc<Dispatcher>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance over a store and a loaded directory.
    pub fn new(config: Config, store: Arc<dyn Store>, accounts: Arc<AccountDirectory>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(store, Arc::clone(&accounts)));
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            accounts,
            dispatcher,
            connection_limit,
        }
    }

    /// Bind the configured address and accept connections indefinitely.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        info!(address = %listener.local_addr()?, "Server listening");

        let mut workers: JoinSet<()> = JoinSet::new();

        loop {
            // Reap finished workers without blocking the accept path.
            while workers.try_join_next().is_some() {}

            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let accounts = Arc::clone(&self.accounts);
                    let max_line = self.config.max_line;
                    let idle_timeout = self.config.idle_timeout;

                    workers.spawn(async move {
                        let mut session = Session::new(addr);
                        if let Err(e) = handle_connection(
                            stream,
                            &mut session,
                            &dispatcher,
                            max_line,
                            idle_timeout,
                        )
                        .await
                        {
                            debug!(peer = %addr, error = %e, "Connection error");
                        }

                        // A dropped connection must never leave its account
                        // stuck logged in.
                        if let Some(username) = session.clear() {
                            accounts.logout(&username);
                        }
                        trace!(peer = %addr, "Worker finished");
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
/// Commands are processed strictly in arrival order, one in flight at a
/// time. Every non-blank line gets exactly one terminated reply; only a
/// transport failure, an oversized line, or the idle timeout ends the loop.
async fn handle_connection(
    stream: TcpStream,
    session: &mut Session,
    dispatcher: &Dispatcher,
    max_line: usize,
    idle_timeout: u64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = LineReader::new(read_half, max_line);

    write_half.write_all(&Reply::welcome().to_bytes()).await?;

    loop {
        let line = match next_line(&mut reader, idle_timeout).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                trace!("Connection closed by client");
                return Ok(());
            }
            Err(FrameError::LineTooLong(max)) => {
                // The stream offset is unrecoverable past this point;
                // answer once and drop the connection.
                warn!(peer = %session.peer(), max, "Oversized line");
                let reply = Reply::status(400, format!("Line exceeds {} bytes", max));
                let _ = write_half.write_all(&reply.to_bytes()).await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(reply) = dispatcher.dispatch(session, &line) {
            trace!(peer = %session.peer(), code = reply.code(), "Command handled");
            write_half.write_all(&reply.to_bytes()).await?;
        }
    }
}

/// Read the next line, bounded by the idle timeout when one is configured.
/// An expired timer is treated as a normal disconnect.
async fn next_line(
    reader: &mut LineReader<OwnedReadHalf>,
    idle_timeout: u64,
) -> Result<Option<Bytes>, FrameError> {
    if idle_timeout == 0 {
        return reader.next_line().await;
    }
    match tokio::time::timeout(Duration::from_secs(idle_timeout), reader.next_line()).await {
        Ok(result) => result,
        Err(_) => {
            debug!("Idle timeout expired");
            Ok(None)
        }
    }
}
