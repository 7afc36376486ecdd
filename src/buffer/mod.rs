//! Rolling sample storage for the consumer side
//!
//! - [`RingBuffer`] - fixed-capacity circular window, oldest samples overwritten
//! - [`XyBuffers`] - the x/y buffer pair a pump writes into, plus an update counter
//! - [`SharedXyBuffers`] - the single mutex both the pump and any renderer lock
//!
//! # Locking
//!
//! The pump holds the lock only while applying one decoded message. A renderer
//! should lock, call [`XyBuffers::take_updates`] / [`XyBuffers::snapshot`], and
//! release before drawing.
//!
//! ```ignore
//! let shared = XyBuffers::shared(10_000)?;
//! let (xs, ys) = {
//!     let mut bufs = lock_buffers(&shared)?;
//!     if bufs.take_updates() == 0 {
//!         return;
//!     }
//!     bufs.snapshot()
//! };
//! draw(&xs, &ys);
//! ```

mod ring;

pub use ring::RingBuffer;

use crate::error::{Result, RtPlotError};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to a consumer's x/y pair
pub type SharedXyBuffers = Arc<Mutex<XyBuffers>>;

/// Paired x and y windows that always hold the same number of samples
#[derive(Debug, Clone)]
pub struct XyBuffers {
    x: RingBuffer<f64>,
    y: RingBuffer<f64>,
    /// Samples applied since the last `take_updates`
    updates: usize,
}

impl XyBuffers {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            x: RingBuffer::new(capacity)?,
            y: RingBuffer::new(capacity)?,
            updates: 0,
        })
    }

    /// Create a buffer pair already wrapped for sharing
    pub fn shared(capacity: usize) -> Result<SharedXyBuffers> {
        Ok(Arc::new(Mutex::new(Self::new(capacity)?)))
    }

    pub fn put_xy(&mut self, x: f64, y: f64) {
        self.x.put(x);
        self.y.put(y);
        self.updates += 1;
    }

    /// Append pairs; a batch longer than the capacity keeps only its tail
    pub fn put_pairs(&mut self, pairs: &[(f64, f64)]) {
        let start = pairs.len().saturating_sub(self.capacity());
        for &(x, y) in &pairs[start..] {
            self.x.put(x);
            self.y.put(y);
        }
        self.updates += pairs.len();
    }

    /// Append parallel x and y slices.
    ///
    /// Lengths must match. A batch longer than the capacity keeps only its
    /// trailing `capacity` samples, which is what element-wise puts would leave.
    pub fn extend_xy(&mut self, xs: &[f64], ys: &[f64]) -> Result<()> {
        if xs.len() != ys.len() {
            return Err(RtPlotError::Protocol(format!(
                "x/y length mismatch: {} != {}",
                xs.len(),
                ys.len()
            )));
        }
        let start = xs.len().saturating_sub(self.capacity());
        self.x.put_list(&xs[start..])?;
        self.y.put_list(&ys[start..])?;
        self.updates += xs.len();
        Ok(())
    }

    /// Oldest-first copies of both windows
    pub fn snapshot(&self) -> (Vec<f64>, Vec<f64>) {
        (self.x.get(), self.y.get())
    }

    /// Snapshot into reusable vectors
    pub fn snapshot_into(&self, xs: &mut Vec<f64>, ys: &mut Vec<f64>) {
        self.x.copy_into(xs);
        self.y.copy_into(ys);
    }

    /// Return and reset the number of samples received since the last call
    pub fn take_updates(&mut self) -> usize {
        std::mem::take(&mut self.updates)
    }

    pub fn pending_updates(&self) -> usize {
        self.updates
    }

    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.updates = 0;
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.x.capacity()
    }

    pub fn x(&self) -> &RingBuffer<f64> {
        &self.x
    }

    pub fn y(&self) -> &RingBuffer<f64> {
        &self.y
    }
}

/// Lock a shared buffer pair, mapping poisoning to [`RtPlotError::Lock`]
pub fn lock_buffers(shared: &SharedXyBuffers) -> Result<MutexGuard<'_, XyBuffers>> {
    shared
        .lock()
        .map_err(|e| RtPlotError::Lock(format!("Failed to acquire buffer lock: {}", e)))
}
