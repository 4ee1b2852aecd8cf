//! The byte-stream capability every transport provides to the engine.
//!
//! The request parser, the response serializer, and the WebSocket codec only
//! ever talk to the [`ByteRead`] and [`ByteWrite`] halves of a [`ByteStream`].
//! Plain TCP sockets, TLS sockets, and any other tokio I/O object are adapted
//! with [`IoStream`]; tests and in-process clients use [`MemoryStream`].

use std::fmt;
use std::future::{Future, ready};
use std::io::{self, BufRead, Cursor, Read};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

/// A boxed, `Send` future. Used wherever a trait or a stored callable returns
/// an async result.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A connection shared between the dispatcher, the request body reader,
/// and an upgraded WebSocket.
pub type SharedStream = Arc<Connection>;

/// Read side of a transport: line reads, exact reads and partial reads.
///
/// Every suspension point of a connection happens inside one of these calls
/// or a [`ByteWrite`] call.
pub trait ByteRead: Send {
    /// Reads one line, including its `\n` terminator when present.
    ///
    /// Returns an empty buffer at end of stream. Fails with
    /// [`io::ErrorKind::InvalidData`] wrapping [`LineTooLong`] if the line would
    /// exceed `limit` bytes; the line is never truncated.
    fn read_line(&mut self, limit: usize) -> BoxFuture<'_, io::Result<Bytes>>;

    /// Reads exactly `n` bytes, failing with `UnexpectedEof` if the stream ends first.
    fn read_exact(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>>;

    /// Reads at most `n` bytes. An empty buffer means end of stream.
    fn read_up_to(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>>;
}

/// Write side of a transport.
pub trait ByteWrite: Send {
    /// Writes and flushes `data`.
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Closes the write side of the stream.
    fn close(&mut self) -> BoxFuture<'_, io::Result<()>>;
}

/// Minimal duplex transport that can be taken apart into independently
/// usable halves, so a pending read never holds up a write.
pub trait ByteStream: ByteRead + ByteWrite {
    fn split(self: Box<Self>) -> (Box<dyn ByteRead>, Box<dyn ByteWrite>);
}

impl<T: ByteRead + ?Sized> ByteRead for Box<T> {
    fn read_line(&mut self, limit: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        (**self).read_line(limit)
    }

    fn read_exact(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        (**self).read_exact(n)
    }

    fn read_up_to(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        (**self).read_up_to(n)
    }
}

impl<T: ByteWrite + ?Sized> ByteWrite for Box<T> {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        (**self).write(data)
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        (**self).close()
    }
}

impl<T: ByteStream + ?Sized> ByteStream for Box<T> {
    fn split(self: Box<Self>) -> (Box<dyn ByteRead>, Box<dyn ByteWrite>) {
        T::split(*self)
    }
}

/// Both halves of a connection, each behind its own lock.
pub struct Connection {
    reader: tokio::sync::Mutex<Box<dyn ByteRead>>,
    writer: tokio::sync::Mutex<Box<dyn ByteWrite>>,
}

impl Connection {
    pub async fn reader(&self) -> tokio::sync::MutexGuard<'_, Box<dyn ByteRead>> {
        self.reader.lock().await
    }

    pub async fn writer(&self) -> tokio::sync::MutexGuard<'_, Box<dyn ByteWrite>> {
        self.writer.lock().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Splits a [`ByteStream`] so it can be shared by the request and the dispatcher.
pub fn shared(stream: impl ByteStream + 'static) -> SharedStream {
    let (reader, writer) = Box::new(stream).split();
    Arc::new(Connection {
        reader: tokio::sync::Mutex::new(reader),
        writer: tokio::sync::Mutex::new(writer),
    })
}

/// Error payload for a line that exceeded the configured maximum length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTooLong {
    pub limit: usize,
}

impl fmt::Display for LineTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line exceeds {} bytes", self.limit)
    }
}

impl std::error::Error for LineTooLong {}

fn line_too_long(limit: usize) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, LineTooLong { limit })
}

/// Returns `true` if `err` carries a [`LineTooLong`] payload.
pub fn is_line_too_long(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<LineTooLong>())
}

/// Returns `true` for the I/O failures that mean the peer has already gone
/// away. These are swallowed when writing responses and frames.
pub fn is_peer_gone(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// [`ByteStream`] over any tokio I/O object, with read buffering.
///
/// # Examples
///
/// ```rust,no_run
/// use picodot::http::IoStream;
///
/// # async fn example() -> std::io::Result<()> {
/// let socket = tokio::net::TcpStream::connect("127.0.0.1:5000").await?;
/// let stream = IoStream::new(socket);
/// # Ok(())
/// # }
/// ```
pub struct IoStream<S> {
    reader: IoReader<S>,
    writer: IoWriter<S>,
}

struct IoReader<S> {
    inner: BufReader<ReadHalf<S>>,
}

struct IoWriter<S> {
    inner: WriteHalf<S>,
}

impl<S> IoStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S) -> Self {
        let (read, write) = tokio::io::split(io);
        Self {
            reader: IoReader {
                inner: BufReader::new(read),
            },
            writer: IoWriter { inner: write },
        }
    }
}

impl<S> ByteRead for IoReader<S>
where
    S: AsyncRead + Send,
{
    fn read_line(&mut self, limit: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(async move {
            let mut line = BytesMut::new();
            loop {
                let available = self.inner.fill_buf().await?;
                if available.is_empty() {
                    break;
                }
                let (take, done) = match available.iter().position(|&b| b == b'\n') {
                    Some(pos) => (pos + 1, true),
                    None => (available.len(), false),
                };
                if line.len() + take > limit {
                    return Err(line_too_long(limit));
                }
                line.extend_from_slice(&available[..take]);
                self.inner.consume(take);
                if done {
                    break;
                }
            }
            Ok(line.freeze())
        })
    }

    fn read_exact(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(async move {
            let mut buf = vec![0u8; n];
            self.inner.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
    }

    fn read_up_to(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(async move {
            let mut buf = vec![0u8; n];
            let read = self.inner.read(&mut buf).await?;
            buf.truncate(read);
            Ok(Bytes::from(buf))
        })
    }
}

impl<S> ByteWrite for IoWriter<S>
where
    S: AsyncWrite + Send,
{
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.inner.write_all(data).await?;
            self.inner.flush().await
        })
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move { self.inner.shutdown().await })
    }
}

impl<S> ByteRead for IoStream<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    fn read_line(&mut self, limit: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        self.reader.read_line(limit)
    }

    fn read_exact(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        self.reader.read_exact(n)
    }

    fn read_up_to(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        self.reader.read_up_to(n)
    }
}

impl<S> ByteWrite for IoStream<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        self.writer.write(data)
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        self.writer.close()
    }
}

impl<S> ByteStream for IoStream<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn split(self: Box<Self>) -> (Box<dyn ByteRead>, Box<dyn ByteWrite>) {
        let IoStream { reader, writer } = *self;
        (Box::new(reader), Box::new(writer))
    }
}

/// In-memory [`ByteStream`]: reads from a fixed input buffer and records every
/// write into an output buffer that stays readable after the stream is moved.
///
/// # Examples
///
/// ```
/// use picodot::http::{ByteRead, ByteWrite, MemoryStream};
///
/// # tokio_test_block_on(async {
/// let mut stream = MemoryStream::new(b"GET / HTTP/1.0\r\n\r\n".to_vec());
/// let output = stream.output();
/// let line = stream.read_line(1024).await.unwrap();
/// assert_eq!(&line[..], b"GET / HTTP/1.0\r\n");
/// stream.write(b"hi").await.unwrap();
/// assert_eq!(output.contents(), b"hi");
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct MemoryStream {
    reader: MemoryReader,
    writer: MemoryWriter,
}

struct MemoryReader {
    input: Cursor<Vec<u8>>,
}

struct MemoryWriter {
    output: OutputBuffer,
    closed: bool,
}

/// Handle to everything written into a [`MemoryStream`].
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    /// Returns a copy of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn extend(&self, data: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
    }
}

impl MemoryStream {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            reader: MemoryReader {
                input: Cursor::new(input.into()),
            },
            writer: MemoryWriter {
                output: OutputBuffer::default(),
                closed: false,
            },
        }
    }

    /// Returns a handle to the output buffer.
    pub fn output(&self) -> OutputBuffer {
        self.writer.output.clone()
    }
}

impl MemoryReader {
    fn read_line_sync(&mut self, limit: usize) -> io::Result<Bytes> {
        let mut line = Vec::new();
        loop {
            let available = BufRead::fill_buf(&mut self.input)?;
            if available.is_empty() {
                break;
            }
            let (take, done) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            };
            if line.len() + take > limit {
                return Err(line_too_long(limit));
            }
            line.extend_from_slice(&available[..take]);
            BufRead::consume(&mut self.input, take);
            if done {
                break;
            }
        }
        Ok(Bytes::from(line))
    }

    fn read_exact_sync(&mut self, n: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; n];
        Read::read_exact(&mut self.input, &mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn read_up_to_sync(&mut self, n: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; n];
        let read = Read::read(&mut self.input, &mut buf)?;
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }
}

impl ByteRead for MemoryReader {
    fn read_line(&mut self, limit: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(ready(self.read_line_sync(limit)))
    }

    fn read_exact(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(ready(self.read_exact_sync(n)))
    }

    fn read_up_to(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(ready(self.read_up_to_sync(n)))
    }
}

impl ByteWrite for MemoryWriter {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        let result = if self.closed {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        } else {
            self.output.extend(data);
            Ok(())
        };
        Box::pin(ready(result))
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        self.closed = true;
        Box::pin(ready(Ok(())))
    }
}

impl ByteRead for MemoryStream {
    fn read_line(&mut self, limit: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        self.reader.read_line(limit)
    }

    fn read_exact(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        self.reader.read_exact(n)
    }

    fn read_up_to(&mut self, n: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        self.reader.read_up_to(n)
    }
}

impl ByteWrite for MemoryStream {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        self.writer.write(data)
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        self.writer.close()
    }
}

impl ByteStream for MemoryStream {
    fn split(self: Box<Self>) -> (Box<dyn ByteRead>, Box<dyn ByteWrite>) {
        let MemoryStream { reader, writer } = *self;
        (Box::new(reader), Box::new(writer))
    }
}
