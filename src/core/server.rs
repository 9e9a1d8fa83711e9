//! WebSocket echo server

use crate::error::{EchoError, Result};
use crate::scheduler::{EchoScheduler, SchedulerConfig};
use crate::session::{ConnectionHandle, ServerSession};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,
    /// WebSocket endpoint path
    pub endpoint: String,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Shared delivery pool configuration
    pub scheduler: SchedulerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            endpoint: "/echo".to_string(),
            max_connections: 1000,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new<S: Into<String>>(bind_address: S) -> Self {
        Self {
            bind_address: bind_address.into(),
            ..Default::default()
        }
    }

    /// Set maximum connections
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the WebSocket endpoint path
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set scheduler configuration
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}

/// WebSocket echo server
pub struct EchoServer {
    config: ServerConfig,
    running: Arc<AtomicBool>,
    connection_count: Arc<AtomicU64>,
    /// Semaphore for atomic connection limiting
    connection_semaphore: Arc<Semaphore>,
    session_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
    /// Handles of live connections, registered by the sessions themselves
    sessions: Arc<RwLock<Vec<ConnectionHandle>>>,
    server_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

/// Decrements the live-connection count when a session task ends,
/// including when the task is aborted mid-session
struct ConnectionCountGuard {
    count: Arc<AtomicU64>,
}

impl Drop for ConnectionCountGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Release);
    }
}

impl EchoServer {
    /// Create a new server
    #[must_use]
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self::with_config(ServerConfig::new(bind_address))
    }

    /// Create a new server with custom configuration
    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            connection_count: Arc::new(AtomicU64::new(0)),
            connection_semaphore,
            session_tasks: Arc::new(RwLock::new(Vec::new())),
            sessions: Arc::new(RwLock::new(Vec::new())),
            server_task: None,
            shutdown_tx: None,
        }
    }

    /// Start the server
    pub async fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(EchoError::invalid_state("Server is already running"));
        }

        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .map_err(|e| EchoError::invalid_address(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| EchoError::connection(format!("Failed to bind: {}", e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| EchoError::connection(format!("Failed to read bound address: {}", e)))?;
        tracing::info!(
            "echo server listening on ws://{}{}",
            local_addr,
            self.config.endpoint
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let scheduler = Arc::new(EchoScheduler::new(self.config.scheduler.clone()));
        let running = Arc::clone(&self.running);
        let connection_count = Arc::clone(&self.connection_count);
        let connection_semaphore = Arc::clone(&self.connection_semaphore);
        let session_tasks = Arc::clone(&self.session_tasks);
        let sessions = Arc::clone(&self.sessions);
        let max_connections = self.config.max_connections;
        let endpoint = self.config.endpoint.clone();

        // Set before spawning so is_running() is true once start() returns
        self.running.store(true, Ordering::Release);

        let server_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let permit = match connection_semaphore.clone().try_acquire_owned() {
                                    Ok(permit) => {
                                        connection_count.fetch_add(1, Ordering::Relaxed);
                                        permit
                                    }
                                    Err(_) => {
                                        tracing::warn!(
                                            "Connection limit reached ({}), rejecting {}",
                                            max_connections,
                                            peer_addr
                                        );
                                        drop(stream);
                                        continue;
                                    }
                                };

                                let scheduler = Arc::clone(&scheduler);
                                let endpoint = endpoint.clone();
                                let registry = Arc::clone(&sessions);
                                let guard = ConnectionCountGuard {
                                    count: Arc::clone(&connection_count),
                                };
                                let task = tokio::spawn(async move {
                                    // Dropped when the task ends or is
                                    // aborted: guard decrements the count,
                                    // permit frees the connection slot
                                    let _guard = guard;
                                    let _permit = permit;
                                    if let Err(e) = ServerSession::serve(
                                        stream,
                                        peer_addr,
                                        scheduler,
                                        &endpoint,
                                        registry,
                                    )
                                    .await
                                    {
                                        tracing::debug!("session from {} ended: {}", peer_addr, e);
                                    }
                                });

                                session_tasks.write().push(task);
                                session_tasks.write().retain(|task| !task.is_finished());
                            }
                            Err(e) => {
                                tracing::error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server received shutdown signal");
                        break;
                    }
                }
            }

            running.store(false, Ordering::Release);
        });

        self.server_task = Some(server_task);

        Ok(())
    }

    /// Stop the server
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }

        self.running.store(false, Ordering::Release);

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(task) = self.server_task.take() {
            let _ = task.await;
        }

        // Close live connection handles first so pending scheduled
        // sends see the closed flag and drop, then abort the session
        // tasks themselves
        let handles = {
            let mut handles = self.sessions.write();
            std::mem::take(&mut *handles)
        };
        for handle in &handles {
            handle.close();
        }

        let tasks = {
            let mut tasks = self.session_tasks.write();
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            if !task.is_finished() {
                task.abort();
            }
        }

        Ok(())
    }

    /// Check if server is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get active connection count
    #[must_use]
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

/// Emergency cleanup when the server is dropped without `stop()`
impl Drop for EchoServer {
    fn drop(&mut self) {
        if self.running.load(Ordering::Acquire) {
            tracing::warn!("EchoServer dropped while still running - performing emergency cleanup");

            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.try_send(());
            }

            if let Some(task) = self.server_task.take() {
                task.abort();
            }

            let handles = {
                let mut handles = self.sessions.write();
                std::mem::take(&mut *handles)
            };
            for handle in &handles {
                handle.close();
            }

            let tasks = {
                let mut tasks = self.session_tasks.write();
                std::mem::take(&mut *tasks)
            };
            for task in tasks {
                if !task.is_finished() {
                    task.abort();
                }
            }

            self.running.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config() {
        let config = ServerConfig::new("0.0.0.0:9000")
            .with_max_connections(500)
            .with_endpoint("/echo");

        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert_eq!(config.max_connections, 500);
        assert_eq!(config.endpoint, "/echo");
    }

    #[test]
    fn test_server_creation() {
        let server = EchoServer::new("127.0.0.1:8080");
        assert!(!server.is_running());
        assert_eq!(server.connection_count(), 0);
    }
}
