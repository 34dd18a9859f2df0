//! # Window Buffer
//!
//! Accumulates canonical PCM bytes and hands them out in fixed-size,
//! non-overlapping detection windows.
//!
//! ## Guarantees:
//! - Bytes leave the buffer in exactly the order they arrived
//! - Every drained window is exactly `window_bytes` long
//! - After `drain_windows` fewer than `window_bytes` bytes remain
//!
//! The buffer is owned by a single session, so no locking is needed.

/// Rolling byte buffer cut into detector windows.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    pending: Vec<u8>,
    window_bytes: usize,
}

impl WindowBuffer {
    /// `window_bytes` must be non-zero; configuration validation enforces it.
    pub fn new(window_bytes: usize) -> Self {
        Self {
            pending: Vec::with_capacity(window_bytes * 2),
            window_bytes: window_bytes.max(1),
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Remove and return every complete window, oldest first.
    pub fn drain_windows(&mut self) -> Vec<Vec<u8>> {
        let complete = self.pending.len() / self.window_bytes;
        if complete == 0 {
            return Vec::new();
        }

        let consumed = complete * self.window_bytes;
        let windows = self.pending[..consumed]
            .chunks_exact(self.window_bytes)
            .map(<[u8]>::to_vec)
            .collect();
        self.pending.drain(..consumed);
        windows
    }

    /// Bytes waiting for the next window.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
