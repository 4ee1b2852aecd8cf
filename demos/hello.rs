//! Minimal application: a greeting, typed URL arguments, JSON, and custom
//! error handlers.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example hello
//! curl http://127.0.0.1:5000/users/42
//! ```

use picodot::{Config, Error, Json, Request, Router, Server, abort};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct User {
    id: i64,
    name: String,
}

async fn show_user(req: Request) -> Result<Json<User>, Error> {
    let id = req.url_args().int("id").unwrap_or_default();
    if id <= 0 {
        return Err(abort(404));
    }
    Ok(Json(User {
        id,
        name: format!("user-{id}"),
    }))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut router = Router::with_config(Config::default().host("127.0.0.1"));
    router.get("/", |_req| async { "Hello, World!" })?;
    router.get("/users/<int:id>", show_user)?;
    router.get("/shutdown", |req| async move {
        req.app().shutdown();
        "The server is shutting down..."
    })?;
    router.error_handler(404, |_req| async { ("Nothing to see here", 404) });

    Server::new(router).run()?;
    Ok(())
}
