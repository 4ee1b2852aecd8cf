//! # picodot
//!
//! A small embeddable HTTP/1.0 server engine: URL-pattern routing, hook
//! chains, error handlers, and WebSockets over an abstract byte stream,
//! served in threaded, cooperative or synchronous mode.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use picodot::{Config, Router, Server, abort};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::with_config(Config::default().port(8080));
//!
//!     router.get("/", |_req| async { "Hello, World!" })?;
//!     router.get("/users/<int:id>", |req| async move {
//!         match req.url_args().int("id") {
//!             Some(id) if id > 0 => Ok(format!("user {id}")),
//!             _ => Err(abort(404)),
//!         }
//!     })?;
//!     router.error_handler(404, |_req| async { ("nothing here", 404) });
//!
//!     Server::new(router).run()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod realtime;
pub mod router;
pub mod server;
pub mod testing;

pub use config::{ConcurrencyMode, Config, ConfigError};
pub use error::{Error, ErrorClass, HttpException, abort, abort_with};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{IntoResponse, Json, Router};
pub use server::{Server, ServerError};
