//! An asynchronous JSON-RPC-over-WebSocket client for a document/graph
//! database server.
//!
//! The pipeline is split into five pieces that mirror the wire protocol's
//! two directions:
//!
//! - [`frame::FrameReader`] reassembles one logical message's frames into a
//!   seekable byte buffer, backed by [`pool::BufferPool`].
//! - [`rx_producer::RxProducer`] is the send side: it serializes requests,
//!   registers a waiter for each one, and owns the transport's write half.
//! - [`tx_producer`] is the background task that reads raw frames off the
//!   transport's read half and publishes a `FrameReader` per message as soon
//!   as its first frame arrives.
//! - [`tx_consumer`] drains those readers, peeks each one's header without a
//!   full JSON parse, and dispatches it to the waiter registered under its
//!   correlation id — held in [`cache::WaiterCache`], a sliding-TTL map.
//! - [`client::Client`] is the public façade tying the above together behind
//!   `open`/`close`/`send`.
//!
//! ```no_run
//! use surreal_ws_rpc::client::Client;
//!
//! # async fn example() -> surreal_ws_rpc::error::Result<()> {
//! let client = Client::with_defaults();
//! client.open("ws://127.0.0.1:8000/rpc").await?;
//! let response = client.send("ping", vec![]).await?;
//! println!("{:?}", response.result);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod pool;
pub mod rx_producer;
pub mod transport;
pub mod tx_consumer;
pub mod tx_producer;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
