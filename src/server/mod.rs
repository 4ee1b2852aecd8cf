//! TCP serving for a [`Router`].
//!
//! Every connection goes through the same async pipeline,
//! [`Router::handle_connection`]. The configured [`ConcurrencyMode`] only
//! decides how that future is driven: on a thread of its own, as a task on a
//! shared cooperative runtime, or inline before the next `accept`.

use std::future::Future;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use crate::config::{ConcurrencyMode, ConfigError};
use crate::http::{BoxFuture, ByteStream, IoStream};
use crate::router::Router;

mod cooperative;
mod shutdown;
mod synchronous;
mod threaded;

pub use cooperative::ConnectionOutcome;
pub use shutdown::Shutdown;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Wraps each accepted TCP stream before the request is read, e.g. to perform
/// a TLS handshake.
pub type Transport =
    Arc<dyn Fn(tokio::net::TcpStream) -> BoxFuture<'static, io::Result<Box<dyn ByteStream>>> + Send + Sync>;

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves a [`Router`] over TCP.
///
/// # Examples
///
/// ```rust,no_run
/// use picodot::{Config, Router, Server};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::with_config(Config::default().port(8080));
///     router.get("/", |_req| async { "Hello, World!" })?;
///     Server::new(router).run()?;
///     Ok(())
/// }
/// ```
pub struct Server {
    router: Arc<Router>,
    transport: Option<Transport>,
}

impl Server {
    pub fn new(router: Router) -> Self {
        Self {
            router: Arc::new(router),
            transport: None,
        }
    }

    /// Wraps every accepted connection with `wrap` before it is served.
    ///
    /// A failing wrapper drops the connection.
    pub fn with_transport<F, Fut, S>(mut self, wrap: F) -> Self
    where
        F: Fn(tokio::net::TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<S>> + Send + 'static,
        S: ByteStream + 'static,
    {
        self.transport = Some(Arc::new(move |tcp| {
            let fut = wrap(tcp);
            Box::pin(async move { Ok(Box::new(fut.await?) as Box<dyn ByteStream>) })
        }));
        self
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Binds the configured `host:port` and serves until shutdown.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Config`] if the configuration is invalid.
    /// - [`ServerError::Bind`] if the address cannot be bound.
    pub fn run(self) -> Result<(), ServerError> {
        let config = self.router.config();
        config.validate()?;
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        self.run_on(listener)
    }

    /// Serves on an already bound listener until [`Router::shutdown`] is
    /// called. Returns once in-flight connections have finished.
    pub fn run_on(self, listener: TcpListener) -> Result<(), ServerError> {
        let mode = self.router.config().concurrency;
        let local_addr = listener.local_addr()?;
        let shutdown = self.router.shutdown_handle();
        shutdown.reset();
        info!(address = %local_addr, ?mode, "picodot listening");

        match mode {
            ConcurrencyMode::Threaded => threaded::serve(self, listener)?,
            ConcurrencyMode::Cooperative => cooperative::serve(self, listener)?,
            ConcurrencyMode::Synchronous => synchronous::serve(self, listener)?,
        }

        info!(address = %local_addr, "picodot stopped");
        Ok(())
    }

    /// Serves one accepted connection on the current runtime.
    async fn serve_connection(
        router: Arc<Router>,
        transport: Option<Transport>,
        tcp: tokio::net::TcpStream,
        peer: SocketAddr,
    ) -> io::Result<()> {
        match transport {
            Some(wrap) => {
                let stream = wrap(tcp).await?;
                router.handle_connection(stream, Some(peer)).await
            }
            None => router.handle_connection(IoStream::new(tcp), Some(peer)).await,
        }
    }
}

/// Waits for the next connection. Returns `None` as soon as shutdown is
/// requested, without waiting for another client.
async fn next_connection(
    listener: &tokio::net::TcpListener,
    shutdown: &Shutdown,
) -> Option<(tokio::net::TcpStream, SocketAddr)> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => return None,
            accepted = listener.accept() => match accepted {
                Ok(connection) => return Some(connection),
                Err(err) => {
                    error!(error = %err, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
}

/// Registers a bound std listener with the current runtime.
fn async_listener(listener: TcpListener) -> io::Result<tokio::net::TcpListener> {
    listener.set_nonblocking(true)?;
    tokio::net::TcpListener::from_std(listener)
}

fn current_thread_runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_wakes_on_shutdown() {
        let listener = async_listener(TcpListener::bind("127.0.0.1:0").unwrap()).unwrap();
        let shutdown = Arc::new(Shutdown::new());
        let trigger = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                shutdown.trigger();
            })
        };
        let next = tokio::time::timeout(Duration::from_secs(1), next_connection(&listener, &shutdown))
            .await
            .unwrap();
        assert!(next.is_none());
        trigger.await.unwrap();
    }

    #[tokio::test]
    async fn accept_returns_the_client() {
        let listener = async_listener(TcpListener::bind("127.0.0.1:0").unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let client = tokio::spawn(tokio::net::TcpStream::connect(addr));
        let (_tcp, peer) = next_connection(&listener, &shutdown).await.unwrap();
        let client = client.await.unwrap().unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }
}
