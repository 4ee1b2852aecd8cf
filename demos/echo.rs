//! WebSocket echo server, served by one thread per connection.
//!
//! ```sh
//! cargo run --example echo
//! ```

use picodot::realtime::with_websocket;
use picodot::{ConcurrencyMode, Config, Router, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::default()
        .host("127.0.0.1")
        .concurrency(ConcurrencyMode::Threaded);
    let mut router = Router::with_config(config);
    router.get(
        "/echo",
        with_websocket(|req, ws| async move {
            info!(client = ?req.client_addr(), "websocket session started");
            loop {
                let message = ws.receive().await?;
                ws.send(message).await?;
            }
        }),
    )?;

    Server::new(router).run()?;
    Ok(())
}
