//! Client construction options.

use std::time::Duration;

/// Reason string sent on the close frame for an orderly shutdown.
pub const CLOSE_REASON: &str = "Orderly connection close";

/// Tracing target used for this crate's spans and events.
pub(crate) const TRACE_TARGET: &str = "surreal_ws_rpc";

/// Tunables for the duplex pipeline.
///
/// Every field mirrors a knob from the wire-level design: queue depths,
/// header-peek window, id length, receive block size, and the TTL cache's
/// sliding expiration and sweep interval.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of the outbound (send-side) bound, informational only today
    /// since `RxProducer` has no internal queue; reserved for callers that
    /// want to size their own submission buffering.
    pub channel_rx_max: usize,

    /// Capacity of the bounded queue between `TxProducer` and `TxConsumer`.
    pub channel_tx_max: usize,

    /// Maximum number of bytes peeked from a message's start when locating
    /// the JSON-RPC header.
    pub header_bytes_max: usize,

    /// Number of random bytes used to generate a correlation id (rendered as
    /// `2 * id_bytes` lowercase hex characters).
    pub id_bytes: usize,

    /// Size, in bytes, of each buffer rented from the pool to read one
    /// WebSocket frame.
    pub block_size: usize,

    /// Initial capacity hint for pooled message memory.
    pub message_size: usize,

    /// Sliding expiration window for registered waiters.
    pub cache_sliding_expiration: Duration,

    /// Interval between TTL cache sweeps.
    pub cache_eviction_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channel_rx_max: 16,
            channel_tx_max: 16,
            header_bytes_max: 512,
            id_bytes: 9,
            block_size: 16 * 1024,
            message_size: 64 * 1024,
            cache_sliding_expiration: Duration::from_secs(30),
            cache_eviction_interval: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Set the outbound queue capacity hint.
    pub fn with_channel_rx_max(mut self, value: usize) -> Self {
        self.channel_rx_max = value;
        self
    }

    /// Set the inbound (producer-to-consumer) queue capacity.
    pub fn with_channel_tx_max(mut self, value: usize) -> Self {
        self.channel_tx_max = value;
        self
    }

    /// Set the maximum header peek window, in bytes.
    pub fn with_header_bytes_max(mut self, value: usize) -> Self {
        self.header_bytes_max = value;
        self
    }

    /// Set the number of random bytes used for generated correlation ids.
    pub fn with_id_bytes(mut self, value: usize) -> Self {
        self.id_bytes = value;
        self
    }

    /// Set the per-frame receive block size.
    pub fn with_block_size(mut self, value: usize) -> Self {
        self.block_size = value;
        self
    }

    /// Set the initial capacity hint for pooled message memory.
    pub fn with_message_size(mut self, value: usize) -> Self {
        self.message_size = value;
        self
    }

    /// Set the TTL cache's sliding expiration window.
    pub fn with_cache_sliding_expiration(mut self, value: Duration) -> Self {
        self.cache_sliding_expiration = value;
        self
    }

    /// Set the TTL cache's sweep interval.
    pub fn with_cache_eviction_interval(mut self, value: Duration) -> Self {
        self.cache_eviction_interval = value;
        self
    }
}
