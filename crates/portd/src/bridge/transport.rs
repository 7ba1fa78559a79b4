//! Control connection transport.
//!
//! Supported endpoints:
//! - **ws://, wss://**: WebSocket text messages
//! - **tcp://host:port**: length-prefixed text frames over TCP
//! - **unix:///path**: length-prefixed text frames over a Unix socket
//!
//! Every transport yields the same [`Connection`]: a stream of inbound text
//! records and a sink for outbound ones. The stream ending is the close event.

use std::io;
use std::pin::Pin;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::Framed;

use super::codec::FrameCodec;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("unsupported endpoint '{0}' (expected ws://, wss://, tcp:// or unix://)")]
    UnsupportedEndpoint(String),
    #[error("received a frame that is not valid UTF-8")]
    InvalidUtf8,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// An open control connection.
pub struct Connection {
    pub frames: FrameStream,
    pub sink: FrameSink,
}

impl Connection {
    /// Wrap a byte stream with length-prefixed text framing.
    pub fn framed<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sink, stream) = Framed::new(io, FrameCodec::new()).split();
        let frames = stream.map(|frame| match frame {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(_)) => Err(TransportError::InvalidUtf8),
            Err(e) => Err(TransportError::from(e)),
        });
        Self {
            frames: Box::pin(frames),
            sink: Box::pin(sink.sink_map_err(TransportError::from)),
        }
    }

    fn websocket<S>(ws: tokio_tungstenite::WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();

        let frames = stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    Some(String::from_utf8(bytes.to_vec()).map_err(|_| TransportError::InvalidUtf8))
                }
                // Ping/pong are answered by tungstenite; close ends the stream.
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            }
        });

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|text: String| async move { Ok::<_, TransportError>(Message::Text(text.into())) });

        Self {
            frames: Box::pin(frames),
            sink: Box::pin(sink),
        }
    }
}

/// Open a control connection to `url`.
pub async fn connect(url: &str) -> Result<Connection, TransportError> {
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(TransportError::UnsupportedEndpoint(url.to_string()));
    };

    match scheme {
        "ws" | "wss" => {
            tracing::debug!(%url, "Opening websocket");
            let (ws, response) = tokio_tungstenite::connect_async(url).await?;
            tracing::trace!(status = %response.status(), "Websocket handshake complete");
            Ok(Connection::websocket(ws))
        }
        "tcp" => {
            tracing::debug!(addr = %rest, "Opening TCP connection");
            let stream = tokio::net::TcpStream::connect(rest).await?;
            Ok(Connection::framed(stream))
        }
        #[cfg(unix)]
        "unix" => {
            tracing::debug!(path = %rest, "Opening unix socket");
            let stream = tokio::net::UnixStream::connect(rest).await?;
            Ok(Connection::framed(stream))
        }
        _ => Err(TransportError::UnsupportedEndpoint(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn framed_connection_exchanges_text() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = Connection::framed(a);
        let mut right = Connection::framed(b);

        left.sink.send("hello".to_string()).await.unwrap();
        let got = right.frames.next().await.unwrap().unwrap();
        assert_eq!(got, "hello");

        drop(left);
        assert!(right.frames.next().await.is_none());
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let err = connect("http://localhost:8082/").await.err().unwrap();
        assert!(matches!(err, TransportError::UnsupportedEndpoint(_)));

        let err = connect("localhost:8082").await.err().unwrap();
        assert!(matches!(err, TransportError::UnsupportedEndpoint(_)));
    }

    #[tokio::test]
    async fn tcp_endpoint_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::framed(stream);
            conn.frames.next().await.unwrap().unwrap()
        });

        let mut client = connect(&format!("tcp://{addr}")).await.unwrap();
        client.sink.send("ping".to_string()).await.unwrap();

        assert_eq!(server.await.unwrap(), "ping");
    }
}
