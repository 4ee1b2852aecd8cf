use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures_util::FutureExt;
use sha1::{Digest, Sha1};
use tracing::{debug, error};

use super::WebSocketError;
use super::frame::{self, Opcode};
use crate::error::{Error, HandlerPanic, abort};
use crate::http::{BoxFuture, ByteWrite, Request, Response, SharedStream, is_peer_gone};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` for a client key.
///
/// # Examples
///
/// ```
/// use picodot::realtime::accept_key;
///
/// assert_eq!(
///     accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn accept_key(client_key: &str) -> String {
    let mut digest = Sha1::new();
    digest.update(client_key.as_bytes());
    digest.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(digest.finalize())
}

/// A complete WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(bytes) => bytes,
        }
    }

    fn opcode(&self) -> Opcode {
        match self {
            Message::Text(_) => Opcode::Text,
            Message::Binary(_) => Opcode::Binary,
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_owned())
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Message::Binary(bytes)
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message::Binary(bytes.into())
    }
}

/// An open WebSocket connection on the request's stream.
pub struct WebSocket {
    stream: SharedStream,
    closed: Arc<AtomicBool>,
    max_message_length: usize,
}

impl WebSocket {
    fn new(stream: SharedStream, max_message_length: usize) -> Self {
        Self {
            stream,
            closed: Arc::new(AtomicBool::new(false)),
            max_message_length,
        }
    }

    /// A second handle on the same connection and closed state.
    fn share(&self) -> Self {
        Self {
            stream: Arc::clone(&self.stream),
            closed: Arc::clone(&self.closed),
            max_message_length: self.max_message_length,
        }
    }

    /// Waits for the next text or binary message. Pings are answered and
    /// pongs dropped while waiting.
    ///
    /// # Errors
    ///
    /// [`WebSocketError::ConnectionClosed`] once the client sent a close frame
    /// or the connection was closed locally.
    pub async fn receive(&self) -> Result<Message, WebSocketError> {
        loop {
            if self.is_closed() {
                return Err(WebSocketError::ConnectionClosed);
            }
            let (opcode, payload) = {
                let mut reader = self.stream.reader().await;
                frame::read_frame(&mut **reader, self.max_message_length).await?
            };
            match opcode {
                Opcode::Text => return Ok(Message::Text(String::from_utf8(payload.to_vec())?)),
                Opcode::Binary => return Ok(Message::Binary(payload)),
                Opcode::Close => {
                    // Echo the close frame before giving up the connection.
                    if !self.closed.swap(true, Ordering::SeqCst) {
                        if let Err(err) = self.write_frame(Opcode::Close, &payload).await {
                            debug!(error = %err, "failed to answer websocket close");
                        }
                    }
                    return Err(WebSocketError::ConnectionClosed);
                }
                Opcode::Ping => self.write_frame(Opcode::Pong, &payload).await?,
                Opcode::Pong => {}
                Opcode::Continuation => return Err(WebSocketError::Fragmented),
            }
        }
    }

    /// Sends a message as a single frame.
    pub async fn send(&self, message: impl Into<Message>) -> Result<(), WebSocketError> {
        if self.is_closed() {
            return Err(WebSocketError::ConnectionClosed);
        }
        let message = message.into();
        self.write_frame(message.opcode(), message.as_bytes()).await?;
        Ok(())
    }

    /// Sends a close frame. Only the first call does anything.
    pub async fn close(&self) -> Result<(), WebSocketError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.write_frame(Opcode::Close, &[]).await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn write_frame(&self, opcode: Opcode, payload: &[u8]) -> io::Result<()> {
        let frame = frame::encode_frame(opcode, payload);
        self.stream.writer().await.write(&frame).await
    }
}

/// Completes the WebSocket handshake for `req` and returns the connection.
///
/// The `101 Switching Protocols` response is written immediately, and the
/// request's final response is marked as already handled.
///
/// # Errors
///
/// A 400 [`HttpException`](crate::error::HttpException) if the request is not
/// a valid upgrade, or the I/O error from writing the handshake.
pub async fn websocket_upgrade(req: &Request) -> Result<WebSocket, Error> {
    let headers = req.headers();
    let connection = headers
        .get("connection")
        .is_some_and(|value| value.to_ascii_lowercase().contains("upgrade"));
    let upgrade = headers
        .get("upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    let key = match headers.get("sec-websocket-key") {
        Some(key) if connection && upgrade => key,
        _ => return Err(abort(400)),
    };

    let handshake = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    );
    req.connection()
        .writer()
        .await
        .write(handshake.as_bytes())
        .await?;
    req.after_request(|_req, _res| async { Response::already_handled() });

    Ok(WebSocket::new(
        Arc::clone(req.connection()),
        req.app().config().ws_max_message_length(),
    ))
}

/// Turns a WebSocket session function into a route handler.
///
/// The handler upgrades the connection, runs `session`, then closes the
/// socket. Protocol errors and vanished peers end the session quietly; other
/// I/O errors are returned to the router, anything else is logged.
pub fn with_websocket<F, Fut>(
    session: F,
) -> impl Fn(Request) -> BoxFuture<'static, Result<Response, Error>> + Send + Sync + 'static
where
    F: Fn(Request, WebSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    let session = Arc::new(session);
    move |req: Request| -> BoxFuture<'static, Result<Response, Error>> {
        let session = Arc::clone(&session);
        Box::pin(async move {
            let ws = websocket_upgrade(&req).await?;
            let outcome = AssertUnwindSafe(session(req, ws.share()))
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(result) => settle(result),
                Err(payload) => {
                    let panic = HandlerPanic::from_payload(payload);
                    error!(message = %panic.message, "websocket session panicked");
                    Ok(())
                }
            };
            if let Err(err) = ws.close().await {
                debug!(error = %err, "failed to close websocket");
            }
            result.map(|()| Response::already_handled())
        })
    }
}

/// Decides which session errors reach the router.
fn settle(result: Result<(), Error>) -> Result<(), Error> {
    let Err(err) = result else {
        return Ok(());
    };
    let peer_gone = err
        .downcast_ref::<io::Error>()
        .or_else(|| match err.downcast_ref::<WebSocketError>() {
            Some(WebSocketError::Io(io_error)) => Some(io_error),
            _ => None,
        })
        .map(is_peer_gone);
    match peer_gone {
        Some(true) => Ok(()),
        Some(false) => Err(err),
        None if err.is::<WebSocketError>() => Ok(()),
        None => {
            error!(error = %err, "websocket session failed");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::http::{IoStream, MemoryStream};
    use crate::realtime::frame::{apply_mask, encode_frame};
    use crate::router::Router;

    fn client_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let mask = [1, 2, 3, 4];
        let mut frame = vec![0x80 | opcode.as_u8(), 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        let mut body = payload.to_vec();
        apply_mask(&mut body, mask);
        frame.extend(body);
        frame
    }

    fn upgrade_request() -> Vec<u8> {
        b"GET /ws HTTP/1.1\r\n\
          Connection: keep-alive, Upgrade\r\n\
          Upgrade: WebSocket\r\n\
          Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
            .to_vec()
    }

    fn echo_router() -> Router {
        let mut router = Router::new();
        router
            .get(
                "/ws",
                with_websocket(|_req, ws| async move {
                    loop {
                        let message = ws.receive().await?;
                        ws.send(message).await?;
                    }
                }),
            )
            .unwrap();
        router
    }

    #[tokio::test]
    async fn echo_session_over_memory_stream() {
        let mut input = upgrade_request();
        input.extend(client_frame(Opcode::Ping, b"p"));
        input.extend(client_frame(Opcode::Text, b"hello"));
        input.extend(client_frame(Opcode::Close, b""));
        let stream = MemoryStream::new(input);
        let output = stream.output();

        Arc::new(echo_router())
            .handle_connection(stream, None)
            .await
            .unwrap();

        let mut expected = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            accept_key("dGhlIHNhbXBsZSBub25jZQ==")
        )
        .into_bytes();
        expected.extend_from_slice(&encode_frame(Opcode::Pong, b"p"));
        expected.extend_from_slice(&encode_frame(Opcode::Text, b"hello"));
        expected.extend_from_slice(&encode_frame(Opcode::Close, b""));
        assert_eq!(output.contents(), expected);
    }

    fn handshake() -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            accept_key("dGhlIHNhbXBsZSBub25jZQ==")
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn send_is_not_blocked_by_a_pending_receive() {
        let mut router = Router::new();
        router
            .get(
                "/ws",
                with_websocket(|_req, ws| async move {
                    let (received, pushed) = tokio::join!(ws.receive(), async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        ws.send("pushed").await
                    });
                    pushed?;
                    ws.send(received?).await?;
                    Ok(())
                }),
            )
            .unwrap();
        let (mut client, server) = tokio::io::duplex(4096);
        let serving = tokio::spawn(Arc::new(router).handle_connection(IoStream::new(server), None));

        client.write_all(&upgrade_request()).await.unwrap();
        let mut expected = handshake();
        expected.extend_from_slice(&encode_frame(Opcode::Text, b"pushed"));
        let mut head = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut head))
            .await
            .expect("server push arrived before the client spoke")
            .unwrap();
        assert_eq!(head, expected);

        client.write_all(&client_frame(Opcode::Text, b"hi")).await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        let mut expected = encode_frame(Opcode::Text, b"hi").to_vec();
        expected.extend_from_slice(&encode_frame(Opcode::Close, b""));
        assert_eq!(rest, expected);
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_key_is_400() {
        let raw = b"GET /ws HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n";
        let stream = MemoryStream::new(raw.to_vec());
        let output = stream.output();
        Arc::new(echo_router())
            .handle_connection(stream, None)
            .await
            .unwrap();
        let out = String::from_utf8(output.contents()).unwrap();
        assert!(out.starts_with("HTTP/1.0 400 Bad Request\r\n"), "{out}");
    }

    #[test]
    fn peer_gone_and_protocol_errors_are_quiet() {
        let gone: Error = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(settle(Err(gone)).is_ok());
        let closed: Error = WebSocketError::ConnectionClosed.into();
        assert!(settle(Err(closed)).is_ok());
        let other: Error = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(settle(Err(other)).is_err());
    }
}
