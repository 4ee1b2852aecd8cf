//! Response body kinds and the chunk pump used to serialize them.

use std::fmt;
use std::future::ready;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::stream::{BoxFuture, ByteWrite};

/// A lazy, finite, non-restartable sequence of byte chunks.
///
/// [`close`](Self::close) runs once after the sequence is exhausted, or after a
/// write failure cut it short.
pub trait ChunkSource: Send {
    /// Produces the next chunk, or `None` when the sequence is exhausted.
    ///
    /// `max_len` is the serializer's chunk size; sources that produce
    /// naturally sized chunks may ignore it.
    fn next_chunk(&mut self, max_len: usize) -> BoxFuture<'_, io::Result<Option<Bytes>>>;

    /// Releases whatever the source holds.
    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(ready(()))
    }
}

/// The body of a [`Response`](super::Response).
pub enum Body {
    /// No body at all.
    Empty,
    /// An in-memory body; JSON bodies are serialized into this variant when
    /// the response is built.
    Bytes(Bytes),
    /// A file-like reader pumped in fixed-size chunks.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// A lazy chunk sequence.
    Stream(Box<dyn ChunkSource>),
}

impl Body {
    /// Builds a streaming body from any `Stream` of byte-like chunks.
    ///
    /// # Examples
    ///
    /// ```
    /// use picodot::http::Body;
    ///
    /// let body = Body::from_stream(futures_util::stream::iter(vec!["a", "b", "c"]));
    /// assert!(body.is_streaming());
    /// ```
    pub fn from_stream<S, B>(stream: S) -> Self
    where
        S: Stream<Item = B> + Send + 'static,
        B: Into<Bytes> + 'static,
    {
        Body::Stream(Box::new(StreamSource {
            inner: Box::pin(stream.map(Into::into)),
        }))
    }

    /// Builds a streaming body from a plain iterator of chunks.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        I::IntoIter: Send + 'static,
        B: Into<Bytes> + 'static,
    {
        Self::from_stream(futures_util::stream::iter(chunks))
    }

    /// Builds a file-like body from an async reader.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Body::Reader(Box::new(reader))
    }

    /// Returns the length of an in-memory body; `None` for streaming bodies.
    pub fn len(&self) -> Option<usize> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(bytes) => Some(bytes.len()),
            Body::Reader(_) | Body::Stream(_) => None,
        }
    }

    /// Returns `true` for an in-memory body with no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Returns `true` for reader and stream bodies.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Body::Reader(_) | Body::Stream(_))
    }

    /// Returns the in-memory bytes, if any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Empty => Some(&[]),
            Body::Bytes(bytes) => Some(bytes),
            Body::Reader(_) | Body::Stream(_) => None,
        }
    }

    /// Writes the body to `stream`, `chunk_size` bytes at a time for streaming
    /// kinds. A streaming source is closed afterwards even if a write failed.
    pub(crate) async fn pump(
        &mut self,
        stream: &mut dyn ByteWrite,
        chunk_size: usize,
    ) -> io::Result<()> {
        let chunk_size = chunk_size.max(1);
        match self {
            Body::Empty => Ok(()),
            Body::Bytes(bytes) => {
                if bytes.is_empty() {
                    Ok(())
                } else {
                    stream.write(bytes).await
                }
            }
            Body::Reader(reader) => {
                let mut buf = vec![0u8; chunk_size];
                loop {
                    let read = reader.read(&mut buf).await?;
                    if read == 0 {
                        return Ok(());
                    }
                    stream.write(&buf[..read]).await?;
                }
            }
            Body::Stream(source) => {
                let result = pump_source(source.as_mut(), stream, chunk_size).await;
                source.close().await;
                result
            }
        }
    }

    /// Closes a streaming source that will not be pumped.
    pub(crate) async fn release(&mut self) {
        if let Body::Stream(source) = self {
            source.close().await;
        }
    }

    /// Drains the body into memory. Used by the test client.
    pub async fn collect(self, chunk_size: usize) -> io::Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Bytes(bytes) => Ok(bytes),
            mut streaming => {
                let mut sink = super::stream::MemoryStream::new(Vec::new());
                let output = sink.output();
                streaming.pump(&mut sink, chunk_size).await?;
                Ok(Bytes::from(output.contents()))
            }
        }
    }
}

async fn pump_source(
    source: &mut dyn ChunkSource,
    stream: &mut dyn ByteWrite,
    chunk_size: usize,
) -> io::Result<()> {
    while let Some(chunk) = source.next_chunk(chunk_size).await? {
        if !chunk.is_empty() {
            stream.write(&chunk).await?;
        }
    }
    Ok(())
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Bytes(bytes) => f.debug_tuple("Body::Bytes").field(bytes).finish(),
            Body::Reader(_) => f.write_str("Body::Reader(..)"),
            Body::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Bytes(bytes)
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

struct StreamSource {
    inner: Pin<Box<dyn Stream<Item = Bytes> + Send>>,
}

impl ChunkSource for StreamSource {
    fn next_chunk(&mut self, _max_len: usize) -> BoxFuture<'_, io::Result<Option<Bytes>>> {
        Box::pin(async move { Ok(self.inner.next().await) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::http::MemoryStream;

    struct Counting {
        left: usize,
        closed: Arc<AtomicBool>,
    }

    impl ChunkSource for Counting {
        fn next_chunk(&mut self, max_len: usize) -> BoxFuture<'_, io::Result<Option<Bytes>>> {
            let chunk = if self.left == 0 {
                None
            } else {
                let n = self.left.min(max_len);
                self.left -= n;
                Some(Bytes::from(vec![b'z'; n]))
            };
            Box::pin(ready(Ok(chunk)))
        }

        fn close(&mut self) -> BoxFuture<'_, ()> {
            self.closed.store(true, Ordering::SeqCst);
            Box::pin(ready(()))
        }
    }

    #[tokio::test]
    async fn stream_body_is_pumped_and_closed() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut body = Body::Stream(Box::new(Counting {
            left: 10,
            closed: Arc::clone(&closed),
        }));
        let mut sink = MemoryStream::new(Vec::new());
        let out = sink.output();
        body.pump(&mut sink, 4).await.unwrap();
        assert_eq!(out.contents(), vec![b'z'; 10]);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn source_is_closed_when_write_fails() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut body = Body::Stream(Box::new(Counting {
            left: 3,
            closed: Arc::clone(&closed),
        }));
        let mut sink = MemoryStream::new(Vec::new());
        sink.close().await.unwrap();
        assert!(body.pump(&mut sink, 4).await.is_err());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reader_body_chunks() {
        let data: Vec<u8> = (0..=255).collect();
        let body = Body::from_reader(std::io::Cursor::new(data.clone()));
        assert_eq!(body.collect(7).await.unwrap(), Bytes::from(data));
    }

    #[tokio::test]
    async fn chunks_body() {
        let body = Body::from_chunks(vec!["ab", "", "cd"]);
        assert_eq!(&body.collect(1024).await.unwrap()[..], b"abcd");
    }

    #[tokio::test]
    async fn stream_body_from_owned_items() {
        let items = vec![String::from("ab"), String::from("cd")];
        let body = Body::from_stream(futures_util::stream::iter(items));
        assert!(body.is_streaming());
        assert_eq!(&body.collect(1024).await.unwrap()[..], b"abcd");
    }
}
