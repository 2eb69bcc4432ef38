//! Mapping between `WebSocket` messages and hub frames.
//!
//! Text and binary messages both carry data. Outbound data goes out as text
//! when it is valid UTF-8 so browser clients receive strings.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use beacon_core::TransportError;
use beacon_hub::transport::{Frame, FrameReader, FrameWriter};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::debug;

/// Split an upgraded socket into hub frame halves.
pub fn split(socket: WebSocket) -> (WsFrameReader, WsFrameWriter) {
    let (sink, stream) = socket.split();
    (WsFrameReader { stream }, WsFrameWriter { sink })
}

/// Inbound half of a `WebSocket`.
pub struct WsFrameReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for WsFrameReader {
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(message)) => Ok(inbound(message)),
            Some(Err(e)) => Err(TransportError::Io(std::io::Error::other(e))),
            None => Ok(None),
        }
    }
}

fn inbound(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Data(Bytes::copy_from_slice(text.as_str().as_bytes()))),
        Message::Binary(data) => Some(Frame::Data(data)),
        Message::Ping(_) => Some(Frame::Probe),
        Message::Pong(_) => Some(Frame::ProbeReply),
        Message::Close(frame) => {
            debug!(?frame, "peer sent close");
            None
        }
    }
}

/// Outbound half of a `WebSocket`.
pub struct WsFrameWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameWriter for WsFrameWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.sink
            .send(outbound(frame))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))
    }
}

fn outbound(frame: Frame) -> Message {
    match frame {
        Frame::Data(payload) => match std::str::from_utf8(&payload) {
            Ok(text) => Message::Text(text.into()),
            Err(_) => Message::Binary(payload),
        },
        Frame::Probe => Message::Ping(Bytes::new()),
        Frame::ProbeReply => Message::Pong(Bytes::new()),
    }
}
