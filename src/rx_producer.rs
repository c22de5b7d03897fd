//! The send side of the duplex pipeline: the only component holding the
//! transport's write half.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::cache::{Waiter, WaiterCache};
use crate::config::CLOSE_REASON;
use crate::envelope::{Request, RequestId, generate_id};
use crate::error::Result;
use crate::frame::FrameReader;
use crate::transport::{OutboundFrame, WsSink};

/// Outcome of [`RxProducer::send`]: either the request was registered and
/// written to the transport, or its generated correlation id collided with
/// an already-registered waiter and nothing was sent.
pub enum SendOutcome {
    /// The request went out; its waiter is registered under `Request::id`.
    Sent(Request, mpsc::Receiver<Arc<FrameReader>>),
    /// `try_add` found the generated id already present. Callers build a
    /// default/empty response for this id rather than treating it as a
    /// failure.
    Collision(RequestId),
}

/// Serializes and writes outbound requests, registering a waiter for each
/// one before it goes out so a response can never race ahead of its
/// registration.
#[derive(Clone)]
pub struct RxProducer {
    sink: Arc<Mutex<Box<dyn WsSink>>>,
    cache: Arc<WaiterCache>,
    id_bytes: usize,
}

impl RxProducer {
    /// Wrap `sink` for exclusive, serialized writes.
    pub fn new(sink: Box<dyn WsSink>, cache: Arc<WaiterCache>, id_bytes: usize) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            cache,
            id_bytes,
        }
    }

    /// Send `request`, assigning it a fresh correlation id and registering a
    /// waiter for its eventual reply.
    ///
    /// `persistent` registers a subscription-style waiter that survives past
    /// its first dispatch, for methods whose replies are an ongoing stream
    /// of notifications under one id.
    pub async fn send(
        &self,
        method: impl Into<String>,
        params: Vec<serde_json::Value>,
        persistent: bool,
    ) -> Result<SendOutcome> {
        let mut request = Request::new(method, params);
        request.id = generate_id(self.id_bytes);

        let (waiter, rx) = if persistent {
            Waiter::persistent(request.id.clone())
        } else {
            Waiter::one_shot(request.id.clone())
        };

        if !self.cache.try_add(waiter) {
            return Ok(SendOutcome::Collision(request.id));
        }

        let encoded = serde_json::to_string(&request)?;
        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.send(OutboundFrame::Text(encoded)).await {
            drop(sink);
            self.cache.try_remove(&request.id);
            return Err(err);
        }

        Ok(SendOutcome::Sent(request, rx))
    }

    /// Unregister a waiter without waiting for its reply; used when a
    /// caller-supplied cancellation fires while a `send` is still pending.
    pub fn unregister(&self, id: &crate::envelope::RequestId) {
        self.cache.try_remove(id);
    }

    /// Send a close frame and flush the transport.
    pub async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.close(CLOSE_REASON).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::mock_pair;
    use std::time::Duration;

    fn producer() -> (RxProducer, Arc<WaiterCache>) {
        let (sink, _source, _out_rx, _in_tx) = mock_pair();
        let cache = Arc::new(WaiterCache::new(Duration::from_secs(30)));
        // `id_bytes` of 0 generates the empty-string id every time, forcing a
        // collision on the second `send` without racing real randomness.
        (RxProducer::new(Box::new(sink), cache.clone(), 0), cache)
    }

    #[tokio::test]
    async fn first_send_with_a_fixed_id_succeeds() {
        let (producer, cache) = producer();
        match producer.send("ping", vec![], false).await.unwrap() {
            SendOutcome::Sent(request, _rx) => assert!(request.id.is_empty()),
            SendOutcome::Collision(_) => panic!("expected Sent on first send"),
        }
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn colliding_id_reports_collision_without_touching_the_transport() {
        let (producer, cache) = producer();
        let _first = producer.send("ping", vec![], false).await.unwrap();

        match producer.send("pong", vec![], false).await.unwrap() {
            SendOutcome::Collision(id) => assert!(id.is_empty()),
            SendOutcome::Sent(..) => panic!("expected a collision on the second send"),
        }
        // The colliding send must not have displaced the original waiter.
        assert_eq!(cache.len(), 1);
    }
}
