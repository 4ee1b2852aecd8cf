//! One OS thread per connection, each with its own current-thread runtime.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use super::{Server, async_listener, current_thread_runtime, next_connection};

pub(super) fn serve(server: Server, listener: TcpListener) -> std::io::Result<()> {
    let runtime = current_thread_runtime()?;
    let shutdown = server.router.shutdown_handle();
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    runtime.block_on(async {
        let listener = async_listener(listener)?;
        while let Some((tcp, peer)) = next_connection(&listener, &shutdown).await {
            workers.retain(|worker| !worker.is_finished());
            debug!(peer = %peer, "connection accepted");

            // Handed over in non-blocking mode, ready for the worker's runtime.
            let stream = match tcp.into_std() {
                Ok(stream) => stream,
                Err(err) => {
                    error!(peer = %peer, error = %err, "failed to detach connection");
                    continue;
                }
            };
            let router = Arc::clone(&server.router);
            let transport = server.transport.clone();
            let spawned = thread::Builder::new()
                .name(format!("picodot-{peer}"))
                .spawn(move || {
                    let runtime = match current_thread_runtime() {
                        Ok(runtime) => runtime,
                        Err(err) => {
                            error!(peer = %peer, error = %err, "failed to start connection runtime");
                            return;
                        }
                    };
                    let result = runtime.block_on(async move {
                        let tcp = tokio::net::TcpStream::from_std(stream)?;
                        Server::serve_connection(router, transport, tcp, peer).await
                    });
                    if let Err(err) = result {
                        warn!(peer = %peer, error = %err, "connection closed with error");
                    }
                });
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(err) => error!(peer = %peer, error = %err, "failed to spawn connection thread"),
            }
        }
        Ok::<_, std::io::Error>(())
    })?;

    for worker in workers {
        if worker.join().is_err() {
            error!("connection thread panicked");
        }
    }
    Ok(())
}
