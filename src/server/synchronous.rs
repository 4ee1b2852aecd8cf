//! One connection at a time, driven to completion on the accepting thread.

use std::net::TcpListener;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Server, async_listener, current_thread_runtime, next_connection};

pub(super) fn serve(server: Server, listener: TcpListener) -> std::io::Result<()> {
    let runtime = current_thread_runtime()?;
    let shutdown = server.router.shutdown_handle();

    runtime.block_on(async move {
        let listener = async_listener(listener)?;
        while let Some((tcp, peer)) = next_connection(&listener, &shutdown).await {
            debug!(peer = %peer, "connection accepted");
            let router = Arc::clone(&server.router);
            let result = Server::serve_connection(router, server.transport.clone(), tcp, peer).await;
            if let Err(err) = result {
                warn!(peer = %peer, error = %err, "connection closed with error");
            }
        }
        Ok(())
    })
}
