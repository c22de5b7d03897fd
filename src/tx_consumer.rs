//! Background task that drains reassembled messages and dispatches each to
//! its registered waiter by correlation id.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cache::WaiterCache;
use crate::config::TRACE_TARGET;
use crate::envelope::WsHeader;
use crate::frame::FrameReader;

/// Poll interval while waiting for more bytes to resolve a header that
/// straddles a frame boundary.
const HEADER_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Peek at `reader`'s leading bytes until a complete header is found or the
/// message reaches its terminal frame. A header split across frames simply
/// means the first peek is malformed and a later one, after more data has
/// arrived, succeeds.
async fn peek_header(reader: &FrameReader, header_bytes_max: usize) -> WsHeader {
    loop {
        let window_len = reader.length().min(header_bytes_max);
        let mut window = vec![0u8; window_len];
        let _ = reader.read_at(0, &mut window).await;
        let header = WsHeader::parse(&window);
        if !header.is_malformed() || reader.is_terminal() {
            return header;
        }
        tokio::time::sleep(HEADER_RETRY_INTERVAL).await;
    }
}

/// Dispatch one reassembled message: peek its header, find the registered
/// waiter (if any), and hand the reader across. Orphaned and malformed
/// messages are logged and their reader is released.
async fn dispatch_one(reader: Arc<FrameReader>, cache: &WaiterCache, header_bytes_max: usize) {
    let header = peek_header(&reader, header_bytes_max).await;

    if header.is_malformed() {
        warn!(target: TRACE_TARGET, "dropping message with unparseable header");
        let _ = reader.close().await;
        return;
    }

    let id = header.id.clone().unwrap_or_default();
    let request_id = crate::envelope::RequestId::from(id.as_str());

    let Some(waiter) = cache.try_get(&request_id) else {
        trace!(target: TRACE_TARGET, id = %request_id, "no waiter registered for dispatched message");
        let _ = reader.close().await;
        return;
    };

    // Removal is keyed on the waiter's own persistence, not the message's
    // shape: a one-shot waiter is unregistered after its first dispatch
    // whether that dispatch turns out to be a response or (erroneously) a
    // notify, per the dispatch contract.
    if !waiter.is_persistent() {
        cache.try_remove(&request_id);
    }

    if !waiter.dispatch(reader.clone()).await {
        debug!(target: TRACE_TARGET, id = %request_id, "waiter receiver dropped, releasing dispatched reader");
        cache.try_remove(&request_id);
        let _ = reader.close().await;
    }
}

/// Drain `queue` until it closes or `cancel` fires, dispatching each
/// reassembled reader through `cache`.
pub async fn run(
    mut queue: mpsc::Receiver<Arc<FrameReader>>,
    cache: Arc<WaiterCache>,
    header_bytes_max: usize,
    cancel: CancellationToken,
) {
    loop {
        let reader = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: TRACE_TARGET, "tx consumer canceled");
                break;
            }
            reader = queue.recv() => reader,
        };

        match reader {
            Some(reader) => dispatch_one(reader, &cache, header_bytes_max).await,
            None => {
                debug!(target: TRACE_TARGET, "tx producer queue closed, stopping tx consumer");
                break;
            }
        }
    }
}

/// Periodically sweep `cache` for entries past their sliding expiration,
/// until `cancel` fires.
pub async fn run_sweep(cache: Arc<WaiterCache>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: TRACE_TARGET, "waiter cache sweep task canceled");
                break;
            }
            _ = ticker.tick() => {
                cache.sweep();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Waiter;
    use crate::envelope::RequestId;
    use crate::pool::BufferPool;

    fn cache() -> Arc<WaiterCache> {
        Arc::new(WaiterCache::new(Duration::from_secs(30)))
    }

    async fn reader_with(payload: &[u8]) -> Arc<FrameReader> {
        let pool = Arc::new(BufferPool::new(2, 64));
        let reader = Arc::new(FrameReader::new(pool));
        reader.append(payload, true).await.unwrap();
        reader
    }

    #[tokio::test]
    async fn unsolicited_notify_is_discarded_without_a_waiter() {
        let cache = cache();
        let reader = reader_with(br#"{"id":"zzz","method":"live.update","params":[]}"#).await;

        dispatch_one(reader, &cache, 512).await;

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn response_dispatched_to_one_shot_waiter_unregisters_it() {
        let cache = cache();
        let (waiter, mut rx) = Waiter::one_shot(RequestId::from("abc123"));
        cache.try_add(waiter);

        let reader = reader_with(br#"{"id":"abc123","result":42}"#).await;
        dispatch_one(reader, &cache, 512).await;

        assert!(rx.recv().await.is_some());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn persistent_waiter_survives_multiple_dispatches() {
        let cache = cache();
        let (waiter, mut rx) = Waiter::persistent(RequestId::from("sub-1"));
        cache.try_add(waiter);

        let first = reader_with(br#"{"id":"sub-1","method":"live.update","params":[1]}"#).await;
        dispatch_one(first, &cache, 512).await;
        assert_eq!(cache.len(), 1);

        let second = reader_with(br#"{"id":"sub-1","method":"live.update","params":[2]}"#).await;
        dispatch_one(second, &cache, 512).await;

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn one_shot_waiter_is_unregistered_even_when_dispatch_is_notify_shaped() {
        let cache = cache();
        let (waiter, mut rx) = Waiter::one_shot(RequestId::from("g"));
        cache.try_add(waiter);

        let reader = reader_with(br#"{"id":"g","method":"live.update","params":[]}"#).await;
        dispatch_one(reader, &cache, 512).await;

        assert!(rx.recv().await.is_some());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn malformed_header_is_discarded() {
        let cache = cache();
        let reader = reader_with(br#"{"result":42}"#).await;

        dispatch_one(reader, &cache, 512).await;

        assert!(cache.is_empty());
    }
}
