//! The abstract byte-frame duplex boundary, and the concrete WebSocket
//! implementation of it.
//!
//! The pipeline above this module (`RxProducer`, `TxProducer`) never touches
//! a concrete socket type; it only knows [`WsSink`] and [`WsSource`]. This
//! keeps the reassembly and dispatch logic transport-agnostic and lets tests
//! drive the pipeline with an in-memory mock instead of a real socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{ClientError, Result};

/// One outbound frame's worth of payload plus its framing kind.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A text frame, expected to carry one full JSON document.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

/// One inbound read from the transport.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// A chunk of message payload, tagged with whether this chunk completes
    /// its logical message.
    Frame {
        /// Payload bytes for this frame.
        data: Vec<u8>,
        /// Whether this frame is the last one of its message.
        end_of_message: bool,
    },
    /// The peer closed the connection cleanly.
    Closed,
}

/// The send half of the duplex boundary. Implementors own the only handle
/// capable of writing to the transport — `RxProducer` is its single caller.
#[async_trait]
pub trait WsSink: Send {
    /// Write one frame to the transport.
    async fn send(&mut self, frame: OutboundFrame) -> Result<()>;

    /// Send a close frame with the given reason and flush.
    async fn close(&mut self, reason: &str) -> Result<()>;
}

/// The receive half of the duplex boundary. Implementors own the only handle
/// capable of reading from the transport — `TxProducer` is its single
/// caller.
#[async_trait]
pub trait WsSource: Send {
    /// Read the next frame, or report that the peer closed the stream.
    async fn read(&mut self) -> Result<ReadOutcome>;
}

type TungsteniteStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A [`WsSink`] backed by a real `tokio-tungstenite` WebSocket write half.
pub struct TungsteniteSink {
    inner: futures::stream::SplitSink<TungsteniteStream, WsMessage>,
}

/// A [`WsSource`] backed by a real `tokio-tungstenite` WebSocket read half.
///
/// `tokio-tungstenite` reassembles fragmented WebSocket frames into complete
/// `Message`s internally, so every successful read here is already a
/// complete logical message: `end_of_message` is always `true`. Tests that
/// need to exercise genuine multi-frame reassembly use a mock `WsSource`
/// that can yield partial frames directly.
pub struct TungsteniteSource {
    inner: futures::stream::SplitStream<TungsteniteStream>,
}

/// Connect to `url` and split the resulting WebSocket into its sink and
/// source halves.
pub async fn connect(url: &str) -> Result<(TungsteniteSink, TungsteniteSource)> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|err| ClientError::Transport(err.to_string()))?;
    let (write, read) = stream.split();
    Ok((
        TungsteniteSink { inner: write },
        TungsteniteSource { inner: read },
    ))
}

#[async_trait]
impl WsSink for TungsteniteSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        let message = match frame {
            OutboundFrame::Text(text) => WsMessage::Text(text.into()),
            OutboundFrame::Binary(data) => WsMessage::Binary(data.into()),
        };
        self.inner
            .send(message)
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))
    }

    async fn close(&mut self, reason: &str) -> Result<()> {
        let close_frame = tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
            reason: reason.to_string().into(),
        };
        self.inner
            .send(WsMessage::Close(Some(close_frame)))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))
    }
}

#[async_trait]
impl WsSource for TungsteniteSource {
    async fn read(&mut self) -> Result<ReadOutcome> {
        loop {
            match self.inner.next().await {
                None => return Ok(ReadOutcome::Closed),
                Some(Err(err)) => return Err(ClientError::Transport(err.to_string())),
                Some(Ok(WsMessage::Close(_))) => return Ok(ReadOutcome::Closed),
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(ReadOutcome::Frame {
                        data: text.as_bytes().to_vec(),
                        end_of_message: true,
                    });
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    return Ok(ReadOutcome::Frame {
                        data: data.to_vec(),
                        end_of_message: true,
                    });
                }
                Some(Ok(WsMessage::Frame(_))) => continue,
            }
        }
    }
}

/// An in-memory duplex transport for exercising the pipeline without a real
/// socket, including genuine multi-frame reassembly.
///
/// Compiled for the crate's own unit tests and also exposed to downstream
/// integration tests (`tests/`) under the `test-util` feature, mirroring how
/// `tokio` itself gates its `time::pause`/`time::advance` helpers behind a
/// `test-util` feature instead of `#[cfg(test)]`.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use tokio::sync::mpsc;

    /// The sink half of a mock transport: forwards every frame sent through
    /// it onto a channel the test can inspect.
    pub struct MockWsSink {
        pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    }

    #[async_trait]
    impl WsSink for MockWsSink {
        async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
            self.outbound
                .send(frame)
                .map_err(|_| ClientError::Transport("mock sink closed".into()))
        }

        async fn close(&mut self, _reason: &str) -> Result<()> {
            Ok(())
        }
    }

    /// The source half of a mock transport: yields whatever [`ReadOutcome`]s
    /// the test pushes onto its channel, in order.
    pub struct MockWsSource {
        pub inbound: mpsc::UnboundedReceiver<ReadOutcome>,
    }

    #[async_trait]
    impl WsSource for MockWsSource {
        async fn read(&mut self) -> Result<ReadOutcome> {
            match self.inbound.recv().await {
                Some(outcome) => Ok(outcome),
                None => Ok(ReadOutcome::Closed),
            }
        }
    }

    /// Build a connected pair of mock sink/source channels plus the test's
    /// handles for driving them.
    pub fn mock_pair() -> (
        MockWsSink,
        MockWsSource,
        mpsc::UnboundedReceiver<OutboundFrame>,
        mpsc::UnboundedSender<ReadOutcome>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            MockWsSink { outbound: out_tx },
            MockWsSource { inbound: in_rx },
            out_rx,
            in_tx,
        )
    }

    #[cfg(test)]
    #[tokio::test]
    async fn mock_sink_forwards_frames() {
        let (mut sink, _source, mut out_rx, _in_tx) = mock_pair();
        sink.send(OutboundFrame::Text("hi".into())).await.unwrap();
        match out_rx.recv().await.unwrap() {
            OutboundFrame::Text(text) => assert_eq!(text, "hi"),
            OutboundFrame::Binary(_) => panic!("expected text frame"),
        }
    }

    #[cfg(test)]
    #[tokio::test]
    async fn mock_source_yields_pushed_frames_in_order() {
        let (_sink, mut source, _out_rx, in_tx) = mock_pair();
        in_tx
            .send(ReadOutcome::Frame {
                data: b"part-a".to_vec(),
                end_of_message: false,
            })
            .unwrap();
        in_tx
            .send(ReadOutcome::Frame {
                data: b"part-b".to_vec(),
                end_of_message: true,
            })
            .unwrap();

        match source.read().await.unwrap() {
            ReadOutcome::Frame { data, end_of_message } => {
                assert_eq!(data, b"part-a");
                assert!(!end_of_message);
            }
            ReadOutcome::Closed => panic!("expected a frame"),
        }
        match source.read().await.unwrap() {
            ReadOutcome::Frame { end_of_message, .. } => assert!(end_of_message),
            ReadOutcome::Closed => panic!("expected a frame"),
        }
    }

    #[cfg(test)]
    #[tokio::test]
    async fn mock_source_reports_closed_when_channel_drops() {
        let (_sink, mut source, _out_rx, in_tx) = mock_pair();
        drop(in_tx);
        assert!(matches!(source.read().await.unwrap(), ReadOutcome::Closed));
    }
}
