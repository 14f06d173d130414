//! WebSocket transport.
//!
//! The upgrade request must target `/ws?pageId=<id>`. Binding happens in the
//! handshake callback, so an unbound request is answered with an HTTP error
//! and never reaches the relay.
//!
//! Inbound text and binary frames are both accepted as opaque bytes.
//! Outbound payloads go out as text frames when they are valid UTF-8 (editors
//! speak text) and as binary frames otherwise.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::WebSocketStream;

use super::{MessageSink, MessageSource, TransportError};
use crate::protocol::{page_from_request, BindError, PageId};

/// Read half of a WebSocket connection.
pub struct WsSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

/// Write half of a WebSocket connection.
pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

/// Split an established WebSocket into its two halves.
pub fn split<S>(stream: WebSocketStream<S>) -> (WsSource<S>, WsSink<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, source) = stream.split();
    (WsSource { inner: source }, WsSink { inner: sink })
}

/// Upgrade an incoming stream and bind it to the page named in the request.
pub async fn accept<S>(stream: S) -> Result<(PageId, WsSource<S>, WsSink<S>), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut binding: Option<Result<PageId, BindError>> = None;
    let callback = |request: &Request, response: Response| {
        let bound = page_from_request(request.uri().path(), request.uri().query());
        let outcome = match &bound {
            Ok(_) => Ok(response),
            Err(e) => Err(rejection(e)),
        };
        binding = Some(bound);
        outcome
    };

    let upgraded = tokio_tungstenite::accept_hdr_async(stream, callback).await;
    let page = match binding {
        Some(Ok(page)) => page,
        Some(Err(bind_error)) => return Err(bind_error.into()),
        // The handshake failed before the request was even parsed.
        None => {
            return Err(match upgraded {
                Err(e) => e.into(),
                Ok(_) => BindError::MissingPageId.into(),
            })
        }
    };
    let (source, sink) = split(upgraded?);
    Ok((page, source, sink))
}

fn rejection(error: &BindError) -> ErrorResponse {
    let status = match error {
        BindError::UnknownPath(_) => StatusCode::NOT_FOUND,
        BindError::MissingPageId => StatusCode::BAD_REQUEST,
    };
    let mut response = ErrorResponse::new(Some(error.to_string()));
    *response.status_mut() = status;
    response
}

#[async_trait]
impl<S> MessageSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        while let Some(frame) = self.inner.next().await {
            let frame = frame?;
            match frame {
                Message::Text(_) | Message::Binary(_) => return Ok(Some(frame.into_data())),
                Message::Close(_) => return Ok(None),
                // Pings are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<S> MessageSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let frame = match Utf8Bytes::try_from(payload.clone()) {
            Ok(text) => Message::Text(text),
            Err(_) => Message::Binary(payload),
        };
        self.inner.send(frame).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.inner.close().await;
    }
}
