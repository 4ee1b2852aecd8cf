//! HTTP/1.0 request parsing over a [`ByteStream`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::str;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::stream::{ByteRead, SharedStream, is_line_too_long};
use super::{Headers, Method, MultiDict, Response};
use crate::context::{Extensions, PathArgs};
use crate::error::ErrorClass;
use crate::router::Router;
use crate::router::handler::{AfterHook, after_hook};

/// Errors that make a request unparseable. All of them produce a 400 response.
#[derive(Debug)]
pub enum ParseError {
    /// The request line is not `METHOD URL HTTP/x.y`
    InvalidRequestLine,

    /// The protocol token is not `HTTP/1.0` or `HTTP/1.1`
    InvalidVersion,

    /// A header line is not `name: value`
    InvalidHeader,

    /// More than [`MAX_HEADERS`] header lines
    TooManyHeaders,

    /// The connection ended before the blank line closing the head
    Incomplete,

    /// `Content-Length` is not a non-negative integer
    InvalidContentLength,

    /// A line exceeded `max_readline`
    LineTooLong { limit: usize },

    /// IO error
    IoError(io::Error),
}

/// Header lines accepted per request.
pub const MAX_HEADERS: usize = 64;

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidRequestLine => write!(f, "Invalid HTTP request line"),
            ParseError::InvalidVersion => write!(f, "Invalid HTTP version"),
            ParseError::InvalidHeader => write!(f, "Invalid HTTP header"),
            ParseError::TooManyHeaders => write!(f, "More than {} headers", MAX_HEADERS),
            ParseError::Incomplete => write!(f, "Incomplete request head"),
            ParseError::InvalidContentLength => write!(f, "Invalid Content-Length"),
            ParseError::LineTooLong { limit } => write!(f, "Line exceeds {} bytes", limit),
            ParseError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<httparse::Error> for ParseError {
    fn from(err: httparse::Error) -> Self {
        match err {
            httparse::Error::Version => ParseError::InvalidVersion,
            httparse::Error::HeaderName | httparse::Error::HeaderValue => ParseError::InvalidHeader,
            httparse::Error::TooManyHeaders => ParseError::TooManyHeaders,
            _ => ParseError::InvalidRequestLine,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        if is_line_too_long(&err) {
            let limit = err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<super::stream::LineTooLong>())
                .map_or(0, |too_long| too_long.limit);
            ParseError::LineTooLong { limit }
        } else {
            ParseError::IoError(err)
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while a handler reads the request body.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request body was already consumed through stream()")]
    StreamInUse,

    #[error("request body was already read through body()")]
    BodyInUse,

    #[error("request stream can only be taken once")]
    StreamTaken,

    #[error("request body of {content_length} bytes exceeds the buffered limit; use stream()")]
    BodyNotBuffered { content_length: usize },

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErrorClass for RequestError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyAccess {
    Unused,
    Body,
    Stream,
}

/// A parsed HTTP request.
///
/// Cloning is cheap: every clone refers to the same request, so hooks,
/// handlers and the dispatcher all observe the same `g` bag and body state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use picodot::Router;
/// use picodot::http::{MemoryStream, Request, shared};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let raw = b"GET /hello?name=world HTTP/1.0\r\nHost: localhost\r\n\r\n";
/// let stream = shared(MemoryStream::new(raw.to_vec()));
/// let request = Request::create(Arc::new(Router::new()), stream, None)
///     .await
///     .unwrap()
///     .unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.args().get("name"), Some("world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// # });
/// ```
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    app: Arc<Router>,
    client_addr: Option<SocketAddr>,
    method: Method,
    url: String,
    path: String,
    query_string: Option<String>,
    args: MultiDict,
    http_version: String,
    headers: Headers,
    cookies: HashMap<String, String>,
    content_length: usize,
    content_type: Option<String>,
    body: Option<Bytes>,
    access: Mutex<BodyAccess>,
    stream: SharedStream,
    url_args: OnceLock<PathArgs>,
    url_prefix: OnceLock<String>,
    g: Mutex<Extensions>,
    after_request: Mutex<Vec<AfterHook>>,
}

impl Request {
    /// Reads one request from `stream`.
    ///
    /// Returns `Ok(None)` when the client closed the connection before
    /// sending a request line. Bodies within both `max_body_length` and
    /// `max_content_length` are read eagerly; larger ones are left on the
    /// wire for [`stream`](Self::stream).
    pub async fn create(
        app: Arc<Router>,
        stream: SharedStream,
        client_addr: Option<SocketAddr>,
    ) -> ParseResult<Option<Request>> {
        let config = app.config();
        let max_readline = config.max_readline;

        let mut conn = stream.reader().await;

        // Collect the head line by line so every read stays bounded.
        let line = conn.read_line(max_readline).await?;
        if line.trim_ascii().is_empty() {
            return Ok(None);
        }
        let mut head = BytesMut::from(&line[..]);
        let mut header_lines = 0;
        loop {
            let line = conn.read_line(max_readline).await?;
            head.extend_from_slice(&line);
            if line.is_empty() || line.trim_ascii().is_empty() {
                break;
            }
            header_lines += 1;
            if header_lines > MAX_HEADERS {
                return Err(ParseError::TooManyHeaders);
            }
        }

        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut slots);
        if raw.parse(&head)?.is_partial() {
            return Err(ParseError::Incomplete);
        }
        let method = Method::from(raw.method.ok_or(ParseError::InvalidRequestLine)?);
        let url = raw.path.ok_or(ParseError::InvalidRequestLine)?.to_owned();
        let http_version = format!("1.{}", raw.version.ok_or(ParseError::InvalidVersion)?);

        let mut headers = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            let value = str::from_utf8(header.value).map_err(|_| ParseError::InvalidHeader)?;
            headers.insert(header.name, value.trim());
        }

        let content_length = match headers.get("content-length") {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength)?,
            None => 0,
        };

        // Oversized bodies stay on the wire: either the router answers 413
        // without reading them, or the handler streams them.
        let buffered = content_length <= config.max_body_length
            && content_length <= config.max_content_length;
        let body = if content_length == 0 {
            Some(Bytes::new())
        } else if buffered {
            Some(conn.read_exact(content_length).await?)
        } else {
            None
        };
        drop(conn);

        let (path, query_string) = match url.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (url.clone(), None),
        };
        let args = query_string
            .as_deref()
            .map(MultiDict::parse_urlencoded)
            .unwrap_or_default();
        let content_type = headers.get("content-type").map(str::to_owned);
        let cookies = headers
            .get_all("cookie")
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect();

        Ok(Some(Request {
            inner: Arc::new(RequestInner {
                app,
                client_addr,
                method,
                url,
                path,
                query_string,
                args,
                http_version,
                headers,
                cookies,
                content_length,
                content_type,
                body,
                access: Mutex::new(BodyAccess::Unused),
                stream,
                url_args: OnceLock::new(),
                url_prefix: OnceLock::new(),
                g: Mutex::new(Extensions::new()),
                after_request: Mutex::new(Vec::new()),
            }),
        }))
    }

    /// The router serving this request.
    pub fn app(&self) -> &Arc<Router> {
        &self.inner.app
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.inner.client_addr
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// The request target, including the query string.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// The request path (without the query string).
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.inner.query_string.as_deref()
    }

    /// The decoded query string arguments.
    pub fn args(&self) -> &MultiDict {
        &self.inner.args
    }

    /// The protocol version after `HTTP/`, e.g. `"1.0"`.
    pub fn http_version(&self) -> &str {
        &self.inner.http_version
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.inner.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.inner.cookies.get(name).map(String::as_str)
    }

    /// The parsed `Content-Length`, or 0 when absent.
    pub fn content_length(&self) -> usize {
        self.inner.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.inner.content_type.as_deref()
    }

    /// The arguments bound by the matched route.
    pub fn url_args(&self) -> &PathArgs {
        self.inner.url_args.get_or_init(PathArgs::new)
    }

    /// The prefix of the mount the matched route came from, or `""`.
    pub fn url_prefix(&self) -> &str {
        self.inner.url_prefix.get().map_or("", String::as_str)
    }

    pub(crate) fn bind_route(&self, args: PathArgs, url_prefix: &str) {
        let _ = self.inner.url_args.set(args);
        let _ = self.inner.url_prefix.set(url_prefix.to_owned());
    }

    /// The per-request general purpose bag.
    pub fn g(&self) -> MutexGuard<'_, Extensions> {
        self.inner.g.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The buffered request body.
    ///
    /// # Errors
    ///
    /// - [`RequestError::StreamInUse`] if [`stream`](Self::stream) was used.
    /// - [`RequestError::BodyNotBuffered`] if the body was larger than
    ///   `max_body_length` and was left on the wire.
    pub fn body(&self) -> Result<Bytes, RequestError> {
        let mut access = self.lock_access();
        if *access == BodyAccess::Stream {
            return Err(RequestError::StreamInUse);
        }
        match &self.inner.body {
            Some(body) => {
                *access = BodyAccess::Body;
                Ok(body.clone())
            }
            None => Err(RequestError::BodyNotBuffered {
                content_length: self.inner.content_length,
            }),
        }
    }

    /// Takes the body as a stream, limited to `Content-Length` bytes.
    ///
    /// Can be taken once, and never after [`body`](Self::body) was used.
    pub fn stream(&self) -> Result<BodyStream, RequestError> {
        let mut access = self.lock_access();
        match *access {
            BodyAccess::Body => return Err(RequestError::BodyInUse),
            BodyAccess::Stream => return Err(RequestError::StreamTaken),
            BodyAccess::Unused => {}
        }
        *access = BodyAccess::Stream;
        Ok(match &self.inner.body {
            Some(body) => BodyStream::Buffered(body.clone()),
            None => BodyStream::Wire {
                stream: Arc::clone(&self.inner.stream),
                remaining: self.inner.content_length,
            },
        })
    }

    /// Parses a JSON body. `Ok(None)` if the content type is not
    /// `application/json`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<Option<T>, RequestError> {
        if self.mime_type() != Some("application/json") {
            return Ok(None);
        }
        let body = self.body()?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Parses an `application/x-www-form-urlencoded` body. `Ok(None)` for any
    /// other content type.
    pub fn form(&self) -> Result<Option<MultiDict>, RequestError> {
        if self.mime_type() != Some("application/x-www-form-urlencoded") {
            return Ok(None);
        }
        let body = self.body()?;
        Ok(Some(MultiDict::parse_urlencoded(&String::from_utf8_lossy(
            &body,
        ))))
    }

    /// Registers a hook that runs after the application's own after-request
    /// hooks, for this request only. Skipped when the request ends on the
    /// error path.
    pub fn after_request<F, Fut>(&self, hook: F)
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.inner
            .after_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(after_hook(hook));
    }

    pub(crate) fn after_request_hooks(&self) -> Vec<AfterHook> {
        self.inner
            .after_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The connection this request arrived on.
    pub(crate) fn connection(&self) -> &SharedStream {
        &self.inner.stream
    }

    fn mime_type(&self) -> Option<&str> {
        self.content_type()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
    }

    fn lock_access(&self) -> MutexGuard<'_, BodyAccess> {
        self.inner
            .access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.inner.method)
            .field("url", &self.inner.url)
            .field("client_addr", &self.inner.client_addr)
            .finish_non_exhaustive()
    }
}

/// The request body as a readable stream.
pub enum BodyStream {
    /// A body that was already buffered.
    Buffered(Bytes),
    /// A body still on the connection.
    Wire {
        stream: SharedStream,
        remaining: usize,
    },
}

impl BodyStream {
    /// Reads up to `max` bytes. An empty buffer means the body is exhausted.
    pub async fn read(&mut self, max: usize) -> io::Result<Bytes> {
        match self {
            BodyStream::Buffered(bytes) => {
                let n = max.min(bytes.len());
                Ok(bytes.split_to(n))
            }
            BodyStream::Wire { stream, remaining } => {
                if *remaining == 0 || max == 0 {
                    return Ok(Bytes::new());
                }
                let chunk = stream
                    .reader()
                    .await
                    .read_up_to(max.min(*remaining))
                    .await?;
                if chunk.is_empty() {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
                }
                *remaining -= chunk.len();
                Ok(chunk)
            }
        }
    }

    /// Reads the rest of the body into memory.
    pub async fn read_to_end(&mut self) -> io::Result<Bytes> {
        let mut buf = BytesMut::new();
        loop {
            let chunk = self.read(8192).await?;
            if chunk.is_empty() {
                return Ok(buf.freeze());
            }
            buf.extend_from_slice(&chunk);
        }
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyStream::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            BodyStream::Wire { remaining, .. } => {
                f.debug_struct("Wire").field("remaining", remaining).finish()
            }
        }
    }
}
