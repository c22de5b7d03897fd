//! The public façade: `open`, `close`, and `send`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::WaiterCache;
use crate::config::ClientConfig;
use crate::envelope::{Notify, RequestId, Response, WsHeader};
use crate::error::{ClientError, Result};
use crate::frame::FrameReader;
use crate::pool::BufferPool;
use crate::rx_producer::{RxProducer, SendOutcome};
use crate::transport::{WsSink, WsSource, connect};
use crate::{tx_consumer, tx_producer};

/// Number of pre-allocated receive blocks kept in the per-connection pool.
const POOL_BLOCKS: usize = 32;

/// Interval at which a pending reply is polled for termination once its
/// `FrameReader` has been handed to the caller.
const TERMINAL_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct Inner {
    rx_producer: RxProducer,
    cancel: CancellationToken,
    producer_task: JoinHandle<()>,
    consumer_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
}

/// A duplex JSON-RPC-over-WebSocket client.
///
/// Connect with [`Client::open`], issue calls with [`Client::send`], and
/// release the connection's background tasks with [`Client::close`]. A
/// `Client` is cheap to share: clone it (or wrap in `Arc`) and call `send`
/// concurrently from multiple tasks — the pipeline multiplexes every
/// in-flight call over the single underlying socket.
pub struct Client {
    config: ClientConfig,
    inner: Mutex<Option<Inner>>,
}

impl Client {
    /// Build a client with the given configuration. The client holds no
    /// connection until [`Client::open`] succeeds.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(None),
        }
    }

    /// Build a client using [`ClientConfig::default`].
    pub fn with_defaults() -> Self {
        Self::new(ClientConfig::default())
    }

    /// Connect to `url` and start the background producer, consumer, and
    /// cache-sweep tasks. Fails with [`ClientError::AlreadyOpen`] if already
    /// connected.
    pub async fn open(&self, url: &str) -> Result<()> {
        let (sink, source) = connect(url).await?;
        self.open_with_transport(Box::new(sink), Box::new(source))
            .await?;
        info!(target: crate::config::TRACE_TARGET, url, "client opened");
        Ok(())
    }

    /// Start the pipeline over an already-established transport. This is the
    /// crate's own test boundary, letting unit tests drive the pipeline
    /// against a mock transport instead of a real socket.
    pub(crate) async fn open_with_transport(
        &self,
        sink: Box<dyn WsSink>,
        source: Box<dyn WsSource>,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return Err(ClientError::AlreadyOpen);
        }

        let cache = Arc::new(WaiterCache::new(self.config.cache_sliding_expiration));
        let pool = Arc::new(BufferPool::new(POOL_BLOCKS, self.config.block_size));
        let (queue_tx, queue_rx) = tokio::sync::mpsc::channel(self.config.channel_tx_max);
        let cancel = CancellationToken::new();

        let producer_task = tokio::spawn(tx_producer::run(
            source,
            queue_tx,
            pool,
            self.config.message_size,
            cancel.clone(),
        ));
        let consumer_task = tokio::spawn(tx_consumer::run(
            queue_rx,
            cache.clone(),
            self.config.header_bytes_max,
            cancel.clone(),
        ));
        let sweep_task = tokio::spawn(tx_consumer::run_sweep(
            cache.clone(),
            self.config.cache_eviction_interval,
            cancel.clone(),
        ));

        let rx_producer = RxProducer::new(sink, cache, self.config.id_bytes);

        *guard = Some(Inner {
            rx_producer,
            cancel,
            producer_task,
            consumer_task,
            sweep_task,
        });

        Ok(())
    }

    /// Start the pipeline over a caller-supplied mock transport, for
    /// end-to-end tests that exercise the pipeline without a real socket.
    #[cfg(feature = "test-util")]
    pub async fn open_with_mock_transport(
        &self,
        sink: Box<dyn WsSink>,
        source: Box<dyn WsSource>,
    ) -> Result<()> {
        self.open_with_transport(sink, source).await
    }

    /// Send `method` with `params` and await its reply.
    ///
    /// A generated correlation id that collides with an already-registered
    /// waiter never reaches the transport: it succeeds immediately with
    /// [`Response::empty`] rather than failing, since nothing was sent under
    /// that id to wait for.
    pub async fn send(&self, method: impl Into<String>, params: Vec<Value>) -> Result<Response> {
        let rx_producer = self.rx_producer().await?;
        let (request, mut rx) = match rx_producer.send(method, params, false).await? {
            SendOutcome::Sent(request, rx) => (request, rx),
            SendOutcome::Collision(id) => return Ok(Response::empty(id)),
        };
        let reader = rx.recv().await.ok_or(ClientError::Closed)?;
        decode_response(&reader, &request.id, self.config.header_bytes_max).await
    }

    /// Send `method` with `params`, racing the reply against `cancel`. If
    /// `cancel` fires first, the waiter is unregistered and
    /// [`ClientError::Canceled`] is returned. A correlation-id collision is
    /// handled the same way as in [`Client::send`].
    pub async fn send_cancelable(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<Response> {
        let rx_producer = self.rx_producer().await?;
        let (request, mut rx) = match rx_producer.send(method, params, false).await? {
            SendOutcome::Sent(request, rx) => (request, rx),
            SendOutcome::Collision(id) => return Ok(Response::empty(id)),
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                rx_producer.unregister(&request.id);
                Err(ClientError::Canceled)
            }
            reader = rx.recv() => {
                let reader = reader.ok_or(ClientError::Closed)?;
                decode_response(&reader, &request.id, self.config.header_bytes_max).await
            }
        }
    }

    /// Register a persistent, subscription-style waiter for `method` and
    /// return its id plus the raw stream of dispatched readers. Use
    /// [`decode_notify`] to turn each reader into a [`Notify`] envelope.
    ///
    /// A generated id collision retries with a fresh id rather than handing
    /// back an empty one-shot response, since a subscription has no single
    /// reply to stand in for.
    pub async fn subscribe(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<(RequestId, tokio::sync::mpsc::Receiver<Arc<FrameReader>>)> {
        let rx_producer = self.rx_producer().await?;
        let method = method.into();
        loop {
            match rx_producer.send(method.clone(), params.clone(), true).await? {
                SendOutcome::Sent(request, rx) => return Ok((request.id, rx)),
                SendOutcome::Collision(_) => continue,
            }
        }
    }

    /// Cancel the background tasks, send a close frame, and release the
    /// connection. Fails with [`ClientError::NotOpen`] if not connected.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let Some(inner) = guard.take() else {
            return Err(ClientError::NotOpen);
        };

        let close_result = inner.rx_producer.close().await;
        inner.cancel.cancel();
        let _ = inner.producer_task.await;
        let _ = inner.consumer_task.await;
        let _ = inner.sweep_task.await;
        info!(target: crate::config::TRACE_TARGET, "client closed");
        close_result
    }

    async fn rx_producer(&self) -> Result<RxProducer> {
        let guard = self.inner.lock().await;
        guard
            .as_ref()
            .map(|inner| inner.rx_producer.clone())
            .ok_or(ClientError::NotOpen)
    }
}

/// Wait for `reader` to reach its terminal frame.
async fn wait_terminal(reader: &FrameReader) {
    while !reader.is_terminal() {
        tokio::time::sleep(TERMINAL_POLL_INTERVAL).await;
    }
}

/// Decode a terminal `FrameReader` into a [`Response`], then release its
/// backing blocks.
///
/// Peeks the header first: a notify-shaped header fails with
/// [`ClientError::ExpectedResponseGotNotify`] and an empty one (neither `id`
/// nor `method`) fails with [`ClientError::InvalidResponse`] — in both cases
/// before the full body is ever parsed as a `Response`.
async fn decode_response(
    reader: &FrameReader,
    expected_id: &RequestId,
    header_bytes_max: usize,
) -> Result<Response> {
    wait_terminal(reader).await;

    let window_len = reader.length().min(header_bytes_max);
    let mut window = vec![0u8; window_len];
    reader.read_at(0, &mut window).await?;
    let header = WsHeader::parse(&window);

    if header.is_notify_shape() {
        reader.close().await?;
        return Err(ClientError::ExpectedResponseGotNotify);
    }
    if header.is_malformed() {
        reader.close().await?;
        return Err(ClientError::InvalidResponse(
            "header has neither a response nor a notify shape".to_string(),
        ));
    }

    let mut buf = vec![0u8; reader.length()];
    reader.read_at(0, &mut buf).await?;
    reader.close().await?;

    let response: Response = serde_json::from_slice(&buf).map_err(|err| {
        ClientError::InvalidResponse(format!("body could not be decoded: {err}"))
    })?;
    if &response.id != expected_id {
        debug!(
            target: crate::config::TRACE_TARGET,
            expected = %expected_id,
            got = %response.id,
            "dispatched response id mismatch"
        );
    }
    Ok(response)
}

/// Decode a dispatched `FrameReader` into a [`Notify`] envelope without
/// requiring it to be terminal — notify payloads are expected to arrive as a
/// single frame, but this also tolerates fragmented ones by waiting. Releases
/// the reader's backing blocks before returning, same as [`decode_response`].
pub async fn decode_notify(reader: &FrameReader) -> Result<Notify> {
    wait_terminal(reader).await;
    let mut buf = vec![0u8; reader.length()];
    reader.read_at(0, &mut buf).await?;
    reader.close().await?;
    let notify: Notify = serde_json::from_slice(&buf)?;
    Ok(notify)
}
