//! All connections as tasks on a single current-thread runtime.

use std::io;
use std::net::TcpListener;
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use super::{Server, async_listener, current_thread_runtime};

/// How a connection task ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    Completed,
    Failed(io::Error),
    Cancelled,
    Panicked,
}

impl ConnectionOutcome {
    /// Classifies the result of joining a connection task.
    pub fn classify(joined: Result<io::Result<()>, JoinError>) -> Self {
        match joined {
            Ok(Ok(())) => Self::Completed,
            Ok(Err(err)) => Self::Failed(err),
            Err(err) if err.is_cancelled() => Self::Cancelled,
            Err(_) => Self::Panicked,
        }
    }

    fn log(&self) {
        match self {
            Self::Completed => {}
            Self::Failed(err) => warn!(error = %err, "connection closed with error"),
            Self::Cancelled => debug!("connection task cancelled"),
            Self::Panicked => error!("connection task panicked"),
        }
    }
}

pub(super) fn serve(server: Server, listener: TcpListener) -> io::Result<()> {
    let runtime = current_thread_runtime()?;
    let shutdown = server.router.shutdown_handle();

    runtime.block_on(async move {
        let listener = async_listener(listener)?;
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((tcp, peer)) => {
                        debug!(peer = %peer, "connection accepted");
                        let router = Arc::clone(&server.router);
                        let transport = server.transport.clone();
                        tasks.spawn(Server::serve_connection(router, transport, tcp, peer));
                    }
                    Err(err) => error!(error = %err, "failed to accept connection"),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    ConnectionOutcome::classify(joined).log();
                }
            }
        }

        drop(listener);
        while let Some(joined) = tasks.join_next().await {
            ConnectionOutcome::classify(joined).log();
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn outcomes_are_told_apart() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async { Ok(()) });
        tasks.spawn(async { Err(io::Error::other("boom")) });
        tasks.spawn(async {
            if true {
                panic!("connection bug");
            }
            Ok(())
        });
        let stuck = tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        stuck.abort();

        let (mut completed, mut failed, mut cancelled, mut panicked) = (0, 0, 0, 0);
        while let Some(joined) = tasks.join_next().await {
            match ConnectionOutcome::classify(joined) {
                ConnectionOutcome::Completed => completed += 1,
                ConnectionOutcome::Failed(_) => failed += 1,
                ConnectionOutcome::Cancelled => cancelled += 1,
                ConnectionOutcome::Panicked => panicked += 1,
            }
        }
        assert_eq!((completed, failed, cancelled, panicked), (1, 1, 1, 1));
    }
}
