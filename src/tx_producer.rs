//! Background task that reads raw frames off the transport and reassembles
//! them into [`FrameReader`]s, handing each off to the consumer as soon as
//! its first frame lands.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::TRACE_TARGET;
use crate::frame::FrameReader;
use crate::pool::BufferPool;
use crate::transport::{ReadOutcome, WsSource};

/// Drive `source` until it closes or `cancel` fires, publishing one
/// [`FrameReader`] per logical message onto `queue`.
///
/// A reader is pushed to `queue` the moment its first frame is appended —
/// well before the message is complete — so a slow or multi-frame message
/// never blocks consumers from starting their header peek. Subsequent
/// frames for the same message are appended to the reader already held by
/// the consumer; the producer never re-sends it.
pub async fn run(
    mut source: Box<dyn WsSource>,
    queue: mpsc::Sender<Arc<FrameReader>>,
    pool: Arc<BufferPool>,
    message_size: usize,
    cancel: CancellationToken,
) {
    let mut current: Option<Arc<FrameReader>> = None;

    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: TRACE_TARGET, "tx producer canceled");
                break;
            }
            outcome = source.read() => outcome,
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(target: TRACE_TARGET, error = %err, "tx producer transport read failed");
                break;
            }
        };

        match outcome {
            ReadOutcome::Closed => {
                debug!(target: TRACE_TARGET, "tx producer observed transport close");
                break;
            }
            ReadOutcome::Frame { data, end_of_message } => {
                let reader = match current.take() {
                    Some(reader) => reader,
                    None => {
                        let reader = Arc::new(FrameReader::with_capacity_hint(pool.clone(), message_size));
                        if queue.send(reader.clone()).await.is_err() {
                            debug!(target: TRACE_TARGET, "tx consumer queue closed, stopping tx producer");
                            break;
                        }
                        reader
                    }
                };

                if let Err(err) = reader.append(&data, end_of_message).await {
                    warn!(target: TRACE_TARGET, error = %err, "failed to append frame to reader");
                    continue;
                }

                if end_of_message {
                    trace!(target: TRACE_TARGET, len = reader.length(), "message reassembly complete");
                } else {
                    current = Some(reader);
                }
            }
        }
    }

    if let Some(reader) = current.take() {
        let _ = reader.close().await;
    }
}
