//! Fixed-capacity circular buffer
//!
//! `RingBuffer` keeps the last `capacity` values pushed into it. Once full,
//! every new value overwrites the oldest one. Reads never consume: [`RingBuffer::get`]
//! returns an oldest-first copy and leaves the buffer untouched.
//!
//! The buffer does no locking of its own. The consumer pump serializes access
//! through the mutex in [`super::SharedXyBuffers`].

use crate::error::{Result, RtPlotError};

/// Fixed-capacity rolling window of samples
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: Box<[T]>,
    /// Next write position, always in `0..capacity`
    end: usize,
    /// Number of valid elements, `min(total_puts, capacity)`
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` values
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RtPlotError::Config(
                "RingBuffer requires a capacity greater than zero".to_string(),
            ));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).map_err(|e| {
            RtPlotError::Config(format!(
                "Cannot allocate RingBuffer of capacity {}: {}",
                capacity, e
            ))
        })?;
        data.resize(capacity, T::default());
        Ok(Self {
            data: data.into_boxed_slice(),
            end: 0,
            len: 0,
        })
    }

    /// Push one value, overwriting the oldest when full
    #[inline]
    pub fn put(&mut self, value: T) {
        self.data[self.end] = value;
        self.end += 1;
        if self.end == self.data.len() {
            self.end = 0;
        }
        if self.len < self.data.len() {
            self.len += 1;
        }
    }

    /// Push a slice of values with at most two contiguous copies.
    ///
    /// Rejects slices longer than the capacity and leaves the buffer unchanged.
    pub fn put_list(&mut self, values: &[T]) -> Result<()> {
        let capacity = self.data.len();
        let count = values.len();
        if count > capacity {
            return Err(RtPlotError::Capacity {
                requested: count,
                capacity,
            });
        }

        let room = capacity - self.end;
        if count <= room {
            self.data[self.end..self.end + count].copy_from_slice(values);
            self.end += count;
        } else {
            let (head, tail) = values.split_at(room);
            self.data[self.end..].copy_from_slice(head);
            self.data[..tail.len()].copy_from_slice(tail);
            self.end = tail.len();
        }
        if self.end == capacity {
            self.end = 0;
        }

        self.len = (self.len + count).min(capacity);
        Ok(())
    }

    /// Drain an arbitrary iterator once, then push it as a list
    pub fn extend<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let values: Vec<T> = values.into_iter().collect();
        self.put_list(&values)
    }

    /// Oldest-first copy of the current contents
    pub fn get(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        self.copy_into(&mut out);
        out
    }

    /// Like [`get`](Self::get) but reuses the caller's allocation
    pub fn copy_into(&self, out: &mut Vec<T>) {
        out.clear();
        let (older, newer) = self.as_slices();
        out.extend_from_slice(older);
        out.extend_from_slice(newer);
    }

    /// The contents as two slices, oldest part first
    pub fn as_slices(&self) -> (&[T], &[T]) {
        if self.len < self.data.len() {
            (&self.data[..self.end], &[])
        } else {
            (&self.data[self.end..], &self.data[..self.end])
        }
    }

    /// Most recently pushed value
    pub fn last(&self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let idx = if self.end == 0 {
            self.data.len() - 1
        } else {
            self.end - 1
        };
        Some(self.data[idx])
    }

    /// Forget every value; capacity is kept
    pub fn clear(&mut self) {
        self.end = 0;
        self.len = 0;
    }
}

impl<T> RingBuffer<T> {
    /// Number of valid values
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }
}
