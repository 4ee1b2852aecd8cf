//! In-process test client.
//!
//! [`TestClient`] renders each request as wire bytes, serves it through
//! [`Router::handle_connection`] over a [`MemoryStream`], and parses what the
//! router wrote back. No sockets are involved.
//!
//! ```
//! use picodot::Router;
//! use picodot::testing::TestClient;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let mut router = Router::new();
//! router.get("/", |_req| async { "Hello, World!" }).unwrap();
//!
//! let mut client = TestClient::new(router);
//! let res = client.get("/").await.unwrap();
//! assert_eq!(res.status, 200);
//! assert_eq!(res.text(), Some("Hello, World!"));
//! # });
//! ```

use std::collections::BTreeMap;
use std::io;
use std::str;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::http::{Headers, MemoryStream, Method, StatusCode};
use crate::router::Router;

const MAX_RESPONSE_HEADERS: usize = 64;

/// Errors produced by the test client.
#[derive(Debug, Error)]
pub enum TestClientError {
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),

    #[error("the router wrote no response")]
    NoResponse,

    #[error("incomplete response head")]
    Incomplete,

    #[error("malformed response: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A parsed response.
#[derive(Debug, Clone)]
pub struct TestResponse {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    /// Everything after the blank line. Frames follow a 101 handshake here.
    pub body: Bytes,
}

impl TestResponse {
    fn parse(raw: &[u8]) -> Result<Self, TestClientError> {
        if raw.is_empty() {
            return Err(TestClientError::NoResponse);
        }
        let mut slots = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
        let mut parsed = httparse::Response::new(&mut slots);
        let offset = match parsed.parse(raw)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(TestClientError::Incomplete),
        };

        let mut headers = Headers::with_capacity(parsed.headers.len());
        for header in parsed.headers.iter() {
            headers.insert(header.name, String::from_utf8_lossy(header.value));
        }
        Ok(Self {
            status: StatusCode::from(parsed.code.unwrap_or_default()),
            reason: parsed.reason.unwrap_or_default().to_owned(),
            headers,
            body: Bytes::copy_from_slice(&raw[offset..]),
        })
    }

    /// The body as UTF-8, if it is valid.
    pub fn text(&self) -> Option<&str> {
        str::from_utf8(&self.body).ok()
    }

    /// Decodes a JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TestClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Sends requests to a [`Router`] in memory and keeps cookies between them.
pub struct TestClient {
    router: Arc<Router>,
    cookies: BTreeMap<String, String>,
}

impl TestClient {
    pub fn new(router: Router) -> Self {
        Self::from_shared(Arc::new(router))
    }

    pub fn from_shared(router: Arc<Router>) -> Self {
        Self {
            router,
            cookies: BTreeMap::new(),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Cookies currently held by the client.
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub async fn get(&mut self, path: &str) -> Result<TestResponse, TestClientError> {
        self.request(Method::Get, path, &[], b"").await
    }

    pub async fn head(&mut self, path: &str) -> Result<TestResponse, TestClientError> {
        self.request(Method::Head, path, &[], b"").await
    }

    pub async fn options(&mut self, path: &str) -> Result<TestResponse, TestClientError> {
        self.request(Method::Options, path, &[], b"").await
    }

    pub async fn delete(&mut self, path: &str) -> Result<TestResponse, TestClientError> {
        self.request(Method::Delete, path, &[], b"").await
    }

    pub async fn post(&mut self, path: &str, body: &[u8]) -> Result<TestResponse, TestClientError> {
        self.request(Method::Post, path, &[], body).await
    }

    pub async fn put(&mut self, path: &str, body: &[u8]) -> Result<TestResponse, TestClientError> {
        self.request(Method::Put, path, &[], body).await
    }

    pub async fn patch(&mut self, path: &str, body: &[u8]) -> Result<TestResponse, TestClientError> {
        self.request(Method::Patch, path, &[], body).await
    }

    /// Sends `value` as a JSON body.
    pub async fn post_json<T: Serialize + ?Sized>(
        &mut self,
        path: &str,
        value: &T,
    ) -> Result<TestResponse, TestClientError> {
        let body = serde_json::to_vec(value)?;
        self.request(
            Method::Post,
            path,
            &[("Content-Type", "application/json")],
            &body,
        )
        .await
    }

    /// Sends a request. `Host`, `Content-Length` and `Cookie` are added
    /// unless given in `headers`.
    pub async fn request(
        &mut self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<TestResponse, TestClientError> {
        let raw = self.render(&method, path, headers, body);
        let response = self.send_raw(raw).await?;
        self.update_cookies(&response.headers);
        Ok(response)
    }

    /// Serves arbitrary request bytes and parses the result.
    pub async fn send_raw(&self, raw: Vec<u8>) -> Result<TestResponse, TestClientError> {
        let stream = MemoryStream::new(raw);
        let output = stream.output();
        Arc::clone(&self.router)
            .handle_connection(stream, None)
            .await?;
        TestResponse::parse(&output.contents())
    }

    fn render(&self, method: &Method, path: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
        let mut all = Headers::new();
        for (name, value) in headers {
            all.insert(*name, *value);
        }
        if !all.contains("host") {
            all.insert("Host", "example.com:1234");
        }
        if !body.is_empty() && !all.contains("content-length") {
            all.insert("Content-Length", body.len().to_string());
        }
        if !self.cookies.is_empty() {
            let jar = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            match all.get("cookie") {
                Some(existing) => {
                    let merged = format!("{existing}; {jar}");
                    all.set("Cookie", merged);
                }
                None => all.insert("Cookie", jar),
            }
        }

        let mut raw = format!("{method} {path} HTTP/1.0\r\n");
        for (name, value) in all.iter() {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str("\r\n");
        let mut raw = raw.into_bytes();
        raw.extend_from_slice(body);
        raw
    }

    fn update_cookies(&mut self, headers: &Headers) {
        for cookie in headers.get_all("set-cookie") {
            let mut parts = cookie.split(';');
            let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
                continue;
            };
            let expired = parts.any(|option| {
                let option = option.trim().to_ascii_lowercase();
                option == "max-age=0"
                    || option
                        .strip_prefix("expires=")
                        .is_some_and(|date| date.contains("01 jan 1970"))
            });
            if expired {
                self.cookies.remove(name.trim());
            } else {
                self.cookies
                    .insert(name.trim().to_owned(), value.trim().to_owned());
            }
        }
    }
}
