//! Background block decoding.
//!
//! A worker thread walks the block stream from a starting offset, decoding
//! each block and pushing it into a bounded channel. The producer blocks when
//! the queue is full and the consumer blocks when it is empty. Dropping the
//! [`ReadAhead`] closes the channel, which stops the worker at its next send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};

use super::BlockSource;
use crate::error::Result;

type Decoded = Result<(Vec<u8>, u64)>;

pub(crate) struct ReadAhead {
    rx: Option<Receiver<Decoded>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReadAhead {
    pub(crate) fn spawn(blocks: BlockSource, from: u64, depth: usize) -> Result<Self> {
        let (tx, rx) = bounded::<Decoded>(depth);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("spacelog-read-ahead".into())
            .spawn(move || {
                let mut offset = from;
                while !worker_stop.load(Ordering::Relaxed) {
                    match blocks.decode_at(offset) {
                        Ok(Some((data, next))) => {
                            offset = next;
                            if tx.send(Ok((data, next))).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(offset, error = %e, "Read-ahead failed to decode block");
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            rx: Some(rx),
            stop,
            handle: Some(handle),
        })
    }

    /// Next decoded block, or `None` once the worker has reached the end.
    pub(crate) fn recv(&self) -> Option<Decoded> {
        self.rx.as_ref().and_then(|rx| rx.recv().ok())
    }
}

impl Drop for ReadAhead {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Disconnect first so a worker blocked on a full queue wakes up.
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
