//! Mode-switchable reception dispatcher.
//!
//! All bytes coming from the device flow through a single dispatcher driven
//! by a dedicated reader thread. The active [`RxMode`] decides what happens
//! to them: accumulation into complete lines, raw pass-through to the
//! operator's terminal, or scanning for the REPL prompt marker during the
//! detection handshake. Exactly one behavior observes any given byte; in
//! [`RxMode::None`] the bytes are left in the port's input buffer untouched.
//!
//! The pending-line buffer is owned by the reader thread and survives mode
//! switches, so a partially received line is not lost when the mode flips
//! away from [`RxMode::Line`] and back.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::info;
use serialport::SerialPort;

use super::line_queue::LineQueue;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// The prompt marker an idle NodeMCU REPL emits when it is ready for input.
pub(crate) const PROMPT_MARKER: &str = "\r\n> ";

/// Sleep between polls of the port input buffer when there is nothing to do.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on the bytes consumed by a single notification.
const MAX_READ: usize = 4096;

/// Reception mode, selected by the protocol engine before each class of
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RxMode {
    /// Ignore arriving bytes, leaving them buffered in the port.
    None,
    /// Accumulate bytes into newline-terminated lines for the line queue.
    Line,
    /// Pass every byte straight through to the operator's terminal.
    All,
    /// Scan for the REPL prompt marker and raise the detection flag.
    Detect,
}

impl RxMode {
    fn from_u8(value: u8) -> RxMode {
        match value {
            1 => RxMode::Line,
            2 => RxMode::All,
            3 => RxMode::Detect,
            _ => RxMode::None,
        }
    }
}

/// Shared state of the reception pipeline: the active mode, the one-shot
/// detection flag and the queue of completed lines. The engine owns an
/// `Arc<Receiver>` and the reader thread another.
pub(crate) struct Receiver {
    mode: AtomicU8,
    detected: AtomicBool,
    queue: LineQueue,
}

impl Receiver {
    pub(crate) fn new() -> Self {
        Receiver {
            mode: AtomicU8::new(RxMode::None as u8),
            detected: AtomicBool::new(false),
            queue: LineQueue::new(),
        }
    }

    /// Select the behavior applied to bytes received from now on. Bytes
    /// already handed to the previous behavior are not reprocessed.
    pub(crate) fn set_mode(&self, mode: RxMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub(crate) fn mode(&self) -> RxMode {
        RxMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Whether the prompt marker has been seen since the last reset.
    pub(crate) fn detected(&self) -> bool {
        self.detected.load(Ordering::SeqCst)
    }

    /// Arm a new detection attempt. Only the protocol engine clears the
    /// flag; the detector itself never does.
    pub(crate) fn reset_detected(&self) {
        self.detected.store(false, Ordering::SeqCst);
    }

    pub(crate) fn queue(&self) -> &LineQueue {
        &self.queue
    }

    /// One transport notification: read what is available (bounded) and
    /// route it to the behavior selected by the current mode. Read failures
    /// are logged and the notification silently ends; they are expected
    /// under normal idle conditions.
    pub(crate) fn on_bytes_available(
        &self,
        port: &mut Box<dyn SerialPort>,
        pending: &mut Vec<u8>,
        available: usize,
    ) {
        let mode = self.mode();
        if mode == RxMode::None {
            return;
        }
        let mut buffer = vec![0u8; available.min(MAX_READ)];
        let received = match port.read(&mut buffer) {
            Ok(0) => return,
            Ok(n) => n,
            Err(ref e) => {
                info!("error: {:?}", e.to_string());
                thread::sleep(POLL_INTERVAL);
                return;
            }
        };
        self.accept(mode, &buffer[..received], pending);
    }

    /// Route a batch of received bytes to one behavior. Split out from the
    /// port read so the line accumulation is independent of how the
    /// transport fragments its deliveries.
    pub(crate) fn accept(&self, mode: RxMode, bytes: &[u8], pending: &mut Vec<u8>) {
        match mode {
            RxMode::None => {}
            RxMode::Line => {
                for &b in bytes {
                    pending.push(b);
                    if b == b'\n' {
                        let line = String::from_utf8_lossy(pending).into_owned();
                        self.queue.add_line(line);
                        pending.clear();
                    }
                }
            }
            RxMode::All => {
                let mut stdout = io::stdout();
                stdout.write_all(bytes).unwrap();
                stdout.flush().unwrap();
            }
            RxMode::Detect => {
                let text = String::from_utf8_lossy(bytes);
                if text.contains(PROMPT_MARKER) {
                    self.detected.store(true, Ordering::SeqCst);
                }
                // Echo the handshake traffic for operator visibility.
                let mut stdout = io::stdout();
                stdout.write_all(bytes).unwrap();
                stdout.flush().unwrap();
            }
        }
    }
}

/// Start the reader thread: poll the port input buffer and invoke the
/// dispatcher with the reported byte count, until `stop` is raised. This is
/// the transport's notification thread; it must never block beyond brief,
/// bounded I/O.
pub(crate) fn spawn_reader(
    mut port: Box<dyn SerialPort>,
    receiver: Arc<Receiver>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut pending: Vec<u8> = Vec::new();
        while !stop.load(Ordering::Relaxed) {
            if receiver.mode() == RxMode::None {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            match port.bytes_to_read() {
                Ok(0) => thread::sleep(POLL_INTERVAL),
                Ok(available) => {
                    receiver.on_bytes_available(&mut port, &mut pending, available as usize)
                }
                Err(ref e) => {
                    info!("error: {:?}", e.to_string());
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn drain(receiver: &Receiver) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = receiver.queue().get_line() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn accumulates_lines_across_arbitrary_splits() {
        let bytes = b"first\nsecond\npartial";
        // Feed the same stream at every possible single split point and
        // compare against the one-shot delivery.
        let whole = Receiver::new();
        let mut pending = Vec::new();
        whole.accept(RxMode::Line, bytes, &mut pending);
        let expected = drain(&whole);
        assert_eq!(expected, vec!["first\n".to_string(), "second\n".to_string()]);

        for split in 0..=bytes.len() {
            let receiver = Receiver::new();
            let mut pending = Vec::new();
            receiver.accept(RxMode::Line, &bytes[..split], &mut pending);
            receiver.accept(RxMode::Line, &bytes[split..], &mut pending);
            assert_eq!(drain(&receiver), expected, "split at {}", split);
            assert_eq!(pending, b"partial".to_vec());
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_delivery() {
        let bytes = b"a\nbb\nccc\n";
        let receiver = Receiver::new();
        let mut pending = Vec::new();
        for b in bytes.iter() {
            receiver.accept(RxMode::Line, &[*b], &mut pending);
        }
        assert_eq!(
            drain(&receiver),
            vec!["a\n".to_string(), "bb\n".to_string(), "ccc\n".to_string()]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn none_mode_produces_nothing() {
        let receiver = Receiver::new();
        let mut pending = Vec::new();
        receiver.accept(RxMode::None, b"dropped\n\r\n> ", &mut pending);
        assert!(receiver.queue().get_line().is_none());
        assert!(!receiver.detected());
        assert!(pending.is_empty());
    }

    #[test]
    fn pending_line_survives_mode_switch() {
        let receiver = Receiver::new();
        let mut pending = Vec::new();
        receiver.accept(RxMode::Line, b"par", &mut pending);
        // Bytes observed by another behavior never reach the accumulator.
        receiver.accept(RxMode::Detect, b"\r\n> ", &mut pending);
        receiver.accept(RxMode::Line, b"tial\n", &mut pending);
        assert_eq!(drain(&receiver), vec!["partial\n".to_string()]);
    }

    #[test]
    fn detector_raises_flag_on_marker() {
        let receiver = Receiver::new();
        let mut pending = Vec::new();
        receiver.accept(RxMode::Detect, b"boot garbage", &mut pending);
        assert!(!receiver.detected());
        receiver.accept(RxMode::Detect, b"NodeMCU 1.5.4\r\n> ", &mut pending);
        assert!(receiver.detected());
        // The detector never clears the flag on its own.
        receiver.accept(RxMode::Detect, b"more output", &mut pending);
        assert!(receiver.detected());
        receiver.reset_detected();
        assert!(!receiver.detected());
    }

    #[test]
    fn detect_mode_does_not_queue_lines() {
        let receiver = Receiver::new();
        let mut pending = Vec::new();
        receiver.accept(RxMode::Detect, b"line-shaped\ntraffic\n", &mut pending);
        assert!(receiver.queue().get_line().is_none());
    }

    #[test]
    fn mode_defaults_to_none_and_round_trips() {
        let receiver = Receiver::new();
        assert_eq!(receiver.mode(), RxMode::None);
        for mode in [RxMode::Line, RxMode::All, RxMode::Detect, RxMode::None].iter() {
            receiver.set_mode(*mode);
            assert_eq!(receiver.mode(), *mode);
        }
    }

    #[test]
    fn queued_lines_reach_a_waiting_consumer() {
        let receiver = Receiver::new();
        let mut pending = Vec::new();
        receiver.accept(RxMode::Line, b"> print(1)\r\n", &mut pending);
        let line = receiver
            .queue()
            .wait_for_line(Duration::from_millis(100))
            .unwrap();
        assert_eq!(line, "> print(1)\r\n");
    }
}
