//! Thread-safe FIFO of completed lines.
//!
//! The reader thread pushes lines as they are terminated; the caller thread
//! blocks on [`LineQueue::wait_for_line`] with a wall-clock deadline. This is
//! the only hand-off point between the two threads for line-oriented
//! traffic.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

// =============================================================================
// Public Interface
// =============================================================================

/// An ordered queue of completed lines, multi-producer safe, consumed by a
/// single waiting caller. Lines keep their terminating newline.
pub struct LineQueue {
    lines: Mutex<VecDeque<String>>,
    available: Condvar,
}

impl LineQueue {
    pub fn new() -> Self {
        LineQueue {
            lines: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append a line. Never blocks beyond the internal lock and is safe to
    /// call concurrently with a waiting reader.
    pub fn add_line(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        lines.push_back(line);
        self.available.notify_one();
    }

    /// Remove and return the oldest line without waiting.
    pub fn get_line(&self) -> Option<String> {
        self.lines.lock().unwrap().pop_front()
    }

    /// Block until a line is available and return it, removed from the
    /// queue. The deadline is measured from call entry; a line queued before
    /// the call returns immediately. Fails with [`Error::Timeout`] once the
    /// deadline passes with the queue still empty.
    pub fn wait_for_line(&self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut lines = self.lines.lock().unwrap();
        loop {
            if let Some(line) = lines.pop_front() {
                return Ok(line);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout {
                    operation: "wait_for_line",
                    timeout,
                });
            }
            let (guard, _) = self.available.wait_timeout(lines, deadline - now).unwrap();
            lines = guard;
        }
    }
}

impl Default for LineQueue {
    fn default() -> Self {
        LineQueue::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
