//! HTTP/1.0 response builder and serializer.
//!
//! Provides a fluent builder API for constructing responses and writes them
//! to a [`ByteWrite`] as a status line, one line per header value, a blank
//! line, and the body.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;

use super::body::Body;
use super::stream::ByteWrite;
use super::{Headers, StatusCode};
use crate::config::Config;
use crate::error::ErrorClass;

const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";
const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const EPOCH_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:01 GMT";

/// Errors raised by the response helpers.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("invalid redirect URL")]
    InvalidRedirect,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErrorClass for ResponseError {}

/// An HTTP response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use picodot::http::{Response, StatusCode};
///
/// let mut response = Response::new(StatusCode::OK)
///     .header("X-Request-Id", "abc")
///     .body("Hello, world!");
/// response.complete();
///
/// assert_eq!(response.headers().get("Content-Length"), Some("13"));
/// assert_eq!(response.headers().get("Content-Type"), Some("text/plain; charset=UTF-8"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    body: Body,
    is_head: bool,
    already_handled: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: impl Into<StatusCode>) -> Self {
        Self {
            status: status.into(),
            reason: None,
            headers: Headers::new(),
            body: Body::Empty,
            is_head: false,
            already_handled: false,
        }
    }

    /// A 200 response with a text or byte body.
    pub fn ok(body: impl Into<Body>) -> Self {
        Self::new(StatusCode::OK).body(body)
    }

    /// A 200 response whose body is `value` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::Json`] if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ResponseError> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(StatusCode::OK)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .body(body))
    }

    /// The marker response that tells the dispatcher the connection was
    /// already answered, for instance by a WebSocket handshake. It is never
    /// written.
    pub fn already_handled() -> Self {
        let mut response = Self::new(StatusCode::OK);
        response.already_handled = true;
        response
    }

    /// Returns `true` for the [`already_handled`](Self::already_handled) marker.
    pub fn is_already_handled(&self) -> bool {
        self.already_handled
    }

    /// A redirect to `location` with a 3xx `status`.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidRedirect`] if `location` contains a
    /// carriage return or a line feed.
    pub fn redirect(
        location: impl Into<String>,
        status: impl Into<StatusCode>,
    ) -> Result<Self, ResponseError> {
        let location = location.into();
        if location.contains(['\r', '\n']) {
            return Err(ResponseError::InvalidRedirect);
        }
        Ok(Self::new(status).header("Location", location))
    }

    /// Serves a file from disk, streamed in `send_file_buffer_size` chunks.
    ///
    /// The path is assumed to be trusted; never pass user-supplied names
    /// without validating them first.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::Io`] if the file cannot be opened.
    pub async fn send_file(
        path: impl AsRef<Path>,
        options: SendFileOptions,
    ) -> Result<Self, ResponseError> {
        let path = path.as_ref();
        let content_type = match options.content_type {
            Some(content_type) => content_type,
            None => guess_content_type(path).to_owned(),
        };

        let mut open_path = path.as_os_str().to_owned();
        open_path.push(&options.file_extension);
        let file = tokio::fs::File::open(&open_path).await?;

        let mut response = Self::new(options.status)
            .header("Content-Type", content_type)
            .body(Body::from_reader(file));
        if let Some(max_age) = options.max_age {
            response.set_header("Cache-Control", format!("max-age={max_age}"));
        }
        if let Some(encoding) = options.compressed {
            response.set_header("Content-Encoding", encoding);
        }
        Ok(response)
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for hooks that receive a
    /// `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Replaces every value of a header in-place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a custom reason phrase for the status line.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: impl Into<StatusCode>) {
        self.status = status.into();
    }

    /// The reason phrase written on the status line.
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.default_reason())
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Marks the response as answering a HEAD request: headers are written,
    /// the body is not.
    pub fn set_head(&mut self, is_head: bool) {
        self.is_head = is_head;
    }

    /// Adds a `Set-Cookie` header.
    ///
    /// # Examples
    ///
    /// ```
    /// use picodot::http::{CookieOptions, Response};
    ///
    /// let mut response = Response::ok("hi");
    /// response.set_cookie("session", "abc", CookieOptions::new().path("/").http_only(true));
    /// assert_eq!(
    ///     response.headers().get("Set-Cookie"),
    ///     Some("session=abc; Path=/; HttpOnly")
    /// );
    /// ```
    pub fn set_cookie(&mut self, name: &str, value: &str, options: CookieOptions) {
        let cookie = options.render(name, value);
        self.headers.insert("Set-Cookie", cookie);
    }

    /// Expires a cookie on the client.
    pub fn delete_cookie(&mut self, name: &str, options: CookieOptions) {
        let mut options = options;
        options.expires = Some(EPOCH_EXPIRES.to_owned());
        self.set_cookie(name, "", options);
    }

    /// Fills in `Content-Length` for in-memory bodies and a default
    /// `Content-Type`, each only if absent. Calling it again changes nothing.
    pub fn complete(&mut self) {
        if let Some(len) = self.body.len() {
            if !self.headers.contains("content-length") {
                self.headers.insert("Content-Length", len.to_string());
            }
        }
        if !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", DEFAULT_CONTENT_TYPE);
        }
    }

    /// Serializes the status line and headers.
    fn head_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64 + self.headers.len() * 48);
        buf.put(
            format!(
                "HTTP/1.0 {} {}\r\n",
                self.status.as_u16(),
                self.reason_phrase()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);
        buf
    }

    /// Completes the response and writes it to `stream`. Streaming bodies are
    /// sent `chunk_size` bytes at a time and closed afterwards, even when a
    /// write fails.
    pub async fn write(mut self, stream: &mut dyn ByteWrite, chunk_size: usize) -> io::Result<()> {
        self.complete();
        let head = self.head_bytes();
        match stream.write(&head).await {
            Ok(()) if !self.is_head => self.body.pump(stream, chunk_size).await,
            result => {
                self.body.release().await;
                result
            }
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

/// Options for [`Response::send_file`].
#[derive(Debug, Clone)]
pub struct SendFileOptions {
    status: StatusCode,
    content_type: Option<String>,
    max_age: Option<u64>,
    compressed: Option<String>,
    file_extension: String,
}

impl Default for SendFileOptions {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            content_type: None,
            max_age: None,
            compressed: None,
            file_extension: String::new(),
        }
    }
}

impl SendFileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options seeded with the configured default `Cache-Control` max age.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_age: config.send_file_max_age,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn status(mut self, status: impl Into<StatusCode>) -> Self {
        self.status = status.into();
        self
    }

    /// Overrides the type guessed from the file extension.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Marks the file as already gzip-compressed.
    #[must_use]
    pub fn compressed(self) -> Self {
        self.content_encoding("gzip")
    }

    #[must_use]
    pub fn content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.compressed = Some(encoding.into());
        self
    }

    /// A suffix appended to the path when opening the file, such as `.gz`.
    /// Not used for content type detection.
    #[must_use]
    pub fn file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }
}

fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("css") => "text/css",
        Some("gif") => "image/gif",
        Some("html") => "text/html",
        Some("jpg") => "image/jpeg",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Attributes for a `Set-Cookie` header.
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    path: Option<String>,
    domain: Option<String>,
    expires: Option<String>,
    max_age: Option<u64>,
    secure: bool,
    http_only: bool,
    partitioned: bool,
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets `Expires`, formatted as an HTTP date.
    #[must_use]
    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(httpdate::fmt_http_date(at));
        self
    }

    #[must_use]
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    #[must_use]
    pub fn partitioned(mut self, partitioned: bool) -> Self {
        self.partitioned = partitioned;
        self
    }

    fn render(&self, name: &str, value: &str) -> String {
        let mut cookie = format!("{name}={value}");
        if let Some(path) = &self.path {
            cookie.push_str("; Path=");
            cookie.push_str(path);
        }
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if let Some(expires) = &self.expires {
            cookie.push_str("; Expires=");
            cookie.push_str(expires);
        }
        if let Some(max_age) = self.max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.partitioned {
            cookie.push_str("; Partitioned");
        }
        cookie
    }
}

impl From<Bytes> for Response {
    fn from(bytes: Bytes) -> Self {
        Response::ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::http::MemoryStream;

    async fn render(response: Response) -> String {
        let mut sink = MemoryStream::new(Vec::new());
        let out = sink.output();
        response.write(&mut sink, 1024).await.unwrap();
        String::from_utf8(out.contents()).unwrap()
    }

    #[tokio::test]
    async fn simple_ok_response() {
        let s = render(Response::ok("Hello")).await;
        assert_eq!(
            s,
            "HTTP/1.0 200 OK\r\nContent-Length: 5\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\nHello"
        );
    }

    #[tokio::test]
    async fn unknown_status_and_custom_reason() {
        let s = render(Response::new(299)).await;
        assert!(s.starts_with("HTTP/1.0 299 N/A\r\n"));
        let s = render(Response::new(StatusCode::NOT_FOUND).reason("Gone Fishing")).await;
        assert!(s.starts_with("HTTP/1.0 404 Gone Fishing\r\n"));
    }

    #[test]
    fn complete_is_idempotent_and_respects_existing_headers() {
        let mut r = Response::ok("abc").header("Content-Type", "text/html");
        r.complete();
        r.complete();
        assert_eq!(r.headers().get_all("content-length").count(), 1);
        assert_eq!(r.headers().get("content-length"), Some("3"));
        assert_eq!(r.headers().get("content-type"), Some("text/html"));
    }

    #[test]
    fn streaming_body_has_no_content_length() {
        let mut r = Response::ok(Body::from_chunks(vec!["a"]));
        r.complete();
        assert!(!r.headers().contains("content-length"));
    }

    #[tokio::test]
    async fn head_keeps_length_but_skips_body() {
        let mut r = Response::ok("Hello");
        r.set_head(true);
        let s = render(r).await;
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn repeated_headers_one_line_each() {
        let mut r = Response::ok("x");
        r.set_cookie("a", "1", CookieOptions::new());
        r.set_cookie("b", "2", CookieOptions::new().secure(true));
        let s = render(r).await;
        assert!(s.contains("Set-Cookie: a=1\r\nSet-Cookie: b=2; Secure\r\n"));
    }

    #[test]
    fn json_body_is_serialized_once() {
        let r = Response::json(&serde_json::json!({"ok": true})).unwrap();
        assert_eq!(r.headers().get("content-type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(r.body_ref().as_bytes(), Some(&b"{\"ok\":true}"[..]));
    }

    #[test]
    fn redirect_rejects_line_breaks() {
        let r = Response::redirect("/home", 302).unwrap();
        assert_eq!(r.headers().get("location"), Some("/home"));
        assert!(matches!(
            Response::redirect("/x\r\nSet-Cookie: evil=1", 302),
            Err(ResponseError::InvalidRedirect)
        ));
    }

    #[test]
    fn cookie_attributes() {
        let mut r = Response::ok("");
        let at = UNIX_EPOCH + Duration::from_secs(784_111_777);
        r.set_cookie(
            "id",
            "42",
            CookieOptions::new()
                .path("/app")
                .domain("example.com")
                .expires(at)
                .max_age(60)
                .http_only(true)
                .partitioned(true),
        );
        assert_eq!(
            r.headers().get("set-cookie"),
            Some(
                "id=42; Path=/app; Domain=example.com; Expires=Sun, 06 Nov 1994 08:49:37 GMT; Max-Age=60; HttpOnly; Partitioned"
            )
        );
        r.delete_cookie("old", CookieOptions::new());
        assert_eq!(
            r.headers().get_all("set-cookie").nth(1),
            Some("old=; Expires=Thu, 01 Jan 1970 00:00:01 GMT")
        );
    }

    #[tokio::test]
    async fn send_file_streams_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        let contents = "<h1>hi</h1>".repeat(300);
        std::fs::write(&path, &contents).unwrap();

        let r = Response::send_file(&path, SendFileOptions::new().max_age(60))
            .await
            .unwrap();
        assert_eq!(r.headers().get("content-type"), Some("text/html"));
        assert_eq!(r.headers().get("cache-control"), Some("max-age=60"));
        let s = render(r).await;
        assert!(s.ends_with(&contents));
    }

    #[tokio::test]
    async fn send_file_precompressed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js.gz"), b"\x1f\x8b").unwrap();

        let r = Response::send_file(
            dir.path().join("app.js"),
            SendFileOptions::new().compressed().file_extension(".gz"),
        )
        .await
        .unwrap();
        assert_eq!(r.headers().get("content-type"), Some("application/javascript"));
        assert_eq!(r.headers().get("content-encoding"), Some("gzip"));
    }

    #[tokio::test]
    async fn send_file_missing() {
        let err = Response::send_file("/definitely/not/here.bin", SendFileOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResponseError::Io(_)));
    }
}
