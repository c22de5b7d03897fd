//! Append-only, seekable reassembly buffer for one logical WebSocket message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify};

use crate::error::{ClientError, Result};
use crate::pool::BufferPool;

/// Reassembles the frames of one WebSocket message into a seekable byte
/// stream.
///
/// Append-only from the producer side: [`FrameReader::append`] grows the
/// logical length monotonically until an end-of-message frame arrives, after
/// which the reader is immutable until [`FrameReader::close`] returns its
/// backing blocks to the pool. Readers never advance a cursor — every read is
/// an explicit `(offset, buf)` pair — so a header peek at offset zero never
/// disturbs a later full-body read from offset zero.
#[derive(Debug)]
pub struct FrameReader {
    pool: Arc<BufferPool>,
    blocks: Mutex<Vec<bytes::BytesMut>>,
    length: AtomicUsize,
    terminal: AtomicBool,
    closed: AtomicBool,
    first_frame: Notify,
}

impl FrameReader {
    /// Create an empty reader backed by the given block pool.
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self::with_capacity_hint(pool, 0)
    }

    /// Create an empty reader, reserving room in the block list up front for
    /// a message of roughly `message_size` bytes. This only pre-sizes the
    /// `Vec` holding block handles, saving reallocation as frames arrive for
    /// a large message; it does not change the pool's per-block capacity.
    pub fn with_capacity_hint(pool: Arc<BufferPool>, message_size: usize) -> Self {
        let block_capacity = pool.block_capacity().max(1);
        let blocks_hint = message_size.div_ceil(block_capacity);
        Self {
            pool,
            blocks: Mutex::new(Vec::with_capacity(blocks_hint)),
            length: AtomicUsize::new(0),
            terminal: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            first_frame: Notify::new(),
        }
    }

    /// Append one frame's payload, rented from the reader's pool and copied
    /// in. Transitions to the terminal state when `end_of_message` is true.
    pub async fn append(&self, data: &[u8], end_of_message: bool) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        if self.terminal.load(Ordering::Acquire) {
            return Err(ClientError::AlreadyTerminal);
        }

        let mut block = self.pool.acquire();
        block.clear();
        block.extend_from_slice(data);
        let appended = block.len();

        {
            let mut blocks = self.blocks.lock().await;
            blocks.push(block);
        }
        self.length.fetch_add(appended, Ordering::AcqRel);
        if end_of_message {
            self.terminal.store(true, Ordering::Release);
        }
        // A stored permit is enough: whichever task calls `wait_first_frame`
        // next (before or after this call) observes readable data.
        self.first_frame.notify_one();
        Ok(())
    }

    /// Suspend until the first `append` has occurred, or return immediately
    /// if data (or end-of-message with zero frames) is already present.
    pub async fn wait_first_frame(&self) {
        if self.length.load(Ordering::Acquire) > 0 || self.terminal.load(Ordering::Acquire) {
            return;
        }
        self.first_frame.notified().await;
    }

    /// Current accumulated byte count.
    pub fn length(&self) -> usize {
        self.length.load(Ordering::Acquire)
    }

    /// Whether an end-of-message frame has been appended.
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    /// Random-access read that never advances any cursor. Returns the number
    /// of bytes written into `buf` (short if the reader has fewer bytes than
    /// `offset + buf.len()`).
    pub async fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let blocks = self.blocks.lock().await;
        let mut skip = offset;
        let mut written = 0usize;

        for block in blocks.iter() {
            if written >= buf.len() {
                break;
            }
            let block_len = block.len();
            if skip >= block_len {
                skip -= block_len;
                continue;
            }
            let start = skip;
            skip = 0;
            let available = block_len - start;
            let to_copy = available.min(buf.len() - written);
            buf[written..written + to_copy].copy_from_slice(&block[start..start + to_copy]);
            written += to_copy;
        }

        Ok(written)
    }

    /// Return every backing block to the pool. Idempotent; subsequent reads
    /// or appends fail with [`ClientError::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut blocks = self.blocks.lock().await;
        for block in blocks.drain(..) {
            self.pool.release(block);
        }
        Ok(())
    }
}
