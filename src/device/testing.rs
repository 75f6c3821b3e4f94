//! In-memory serial link used by the protocol tests.
//!
//! `mock_port` returns a handle pair sharing one link: the port half
//! implements [`serialport::SerialPort`] well enough for the engine and its
//! reader thread, while the [`MockHandle`] lets a test inspect everything
//! the engine wrote and inject unsolicited device output. A scripted
//! responder maps each write to the bytes the fake device answers with.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

struct MockLink {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    responder: Responder,
}

#[derive(Clone)]
pub(crate) struct MockHandle {
    link: Arc<Mutex<MockLink>>,
}

impl MockHandle {
    /// Everything the engine has written since the last call, raw.
    pub(crate) fn take_written(&self) -> Vec<u8> {
        mem::take(&mut self.link.lock().unwrap().written)
    }

    /// Inject device output that was not a response to a write.
    #[allow(dead_code)]
    pub(crate) fn push_rx(&self, bytes: &[u8]) {
        self.link.lock().unwrap().rx.extend(bytes.iter().cloned());
    }
}

pub(crate) struct MockPort {
    link: Arc<Mutex<MockLink>>,
    timeout: Duration,
}

/// Build a mock link with the given responder.
pub(crate) fn mock_port(
    responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static,
) -> (Box<dyn SerialPort>, MockHandle) {
    let link = Arc::new(Mutex::new(MockLink {
        rx: VecDeque::new(),
        written: Vec::new(),
        responder: Box::new(responder),
    }));
    let handle = MockHandle {
        link: Arc::clone(&link),
    };
    let port = MockPort {
        link,
        timeout: Duration::from_millis(100),
    };
    (Box::new(port), handle)
}

/// A scripted NodeMCU: echoes every command behind a prompt, answers the
/// empty detection line with the prompt marker, reports a firmware version
/// after the introspection print, and acknowledges raw blocks announced by
/// `uart.on("data", <len>, ...)` installs with `ack_line`.
pub(crate) fn nodemcu_responder_with_ack(
    ack_line: &'static str,
) -> impl FnMut(&[u8]) -> Vec<u8> + Send + 'static {
    let mut expecting_block: Option<usize> = None;
    move |data: &[u8]| {
        if let Some(len) = expecting_block.take() {
            let mut rest = Vec::new();
            if data.len() > len {
                // Anything past the announced block length is ordinary
                // command traffic again.
                rest = (data[len..]).to_vec();
            }
            let mut reply = ack_line.as_bytes().to_vec();
            if !rest.is_empty() {
                reply.extend(format!("> {}\r\n", String::from_utf8_lossy(&rest).trim_end()).bytes());
            }
            return reply;
        }

        let text = String::from_utf8_lossy(data);
        let command = text.trim_end_matches(|c| c == '\n' || c == '\r');
        if command.is_empty() {
            // An empty line at the REPL just yields a fresh prompt.
            return b"\r\n> ".to_vec();
        }

        let mut reply = format!("> {}\r\n", command).into_bytes();
        if let Some(rest) = command.strip_prefix("uart.on(\"data\", ") {
            if let Some(len) = rest
                .split(',')
                .next()
                .and_then(|n| n.trim().parse::<usize>().ok())
            {
                expecting_block = Some(len);
            }
        }
        if command.starts_with("print(string.format(\"NodeMCU v.:") {
            reply.extend_from_slice(b"NodeMCU v.:       1.5.4.1\r\n");
        }
        reply
    }
}

/// The well-behaved device used by most tests.
pub(crate) fn nodemcu_responder() -> impl FnMut(&[u8]) -> Vec<u8> + Send + 'static {
    nodemcu_responder_with_ack("> ACK\r\n")
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut link = self.link.lock().unwrap();
        if link.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let count = buf.len().min(link.rx.len());
        for slot in buf.iter_mut().take(count) {
            *slot = link.rx.pop_front().unwrap();
        }
        Ok(count)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut link = self.link.lock().unwrap();
        link.written.extend_from_slice(buf);
        let reply = (link.responder)(buf);
        link.rx.extend(reply);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialPort for MockPort {
    fn name(&self) -> Option<String> {
        Some("mock".into())
    }

    fn baud_rate(&self) -> serialport::Result<u32> {
        Ok(115_200)
    }

    fn data_bits(&self) -> serialport::Result<DataBits> {
        Ok(DataBits::Eight)
    }

    fn flow_control(&self) -> serialport::Result<FlowControl> {
        Ok(FlowControl::None)
    }

    fn parity(&self) -> serialport::Result<Parity> {
        Ok(Parity::None)
    }

    fn stop_bits(&self) -> serialport::Result<StopBits> {
        Ok(StopBits::One)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> serialport::Result<()> {
        Ok(())
    }

    fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_flow_control(&mut self, _flow_control: FlowControl) -> serialport::Result<()> {
        Ok(())
    }

    fn set_parity(&mut self, _parity: Parity) -> serialport::Result<()> {
        Ok(())
    }

    fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn write_request_to_send(&mut self, _level: bool) -> serialport::Result<()> {
        Ok(())
    }

    fn write_data_terminal_ready(&mut self, _level: bool) -> serialport::Result<()> {
        Ok(())
    }

    fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn bytes_to_read(&self) -> serialport::Result<u32> {
        Ok(self.link.lock().unwrap().rx.len() as u32)
    }

    fn bytes_to_write(&self) -> serialport::Result<u32> {
        Ok(0)
    }

    fn clear(&self, buffer_to_clear: ClearBuffer) -> serialport::Result<()> {
        let mut link = self.link.lock().unwrap();
        match buffer_to_clear {
            ClearBuffer::Input => link.rx.clear(),
            ClearBuffer::Output => {}
            ClearBuffer::All => link.rx.clear(),
        }
        Ok(())
    }

    fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
        Ok(Box::new(MockPort {
            link: Arc::clone(&self.link),
            timeout: self.timeout,
        }))
    }

    fn set_break(&self) -> serialport::Result<()> {
        Ok(())
    }

    fn clear_break(&self) -> serialport::Result<()> {
        Ok(())
    }
}
