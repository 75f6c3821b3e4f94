//! Request/response and file-transfer protocols for the NodeMCU Lua REPL.
//!
//! The firmware echoes every line it receives, so the client validates each
//! command by matching the echoed line against the text it sent. File
//! content travels either line by line through `file.writeline` (legacy) or
//! as raw 255-byte blocks acknowledged individually after installing a
//! byte-counted `uart.on` receive handler on the device (preferred).
//!
//! The protocol is strictly half-duplex: the engine never issues a second
//! command before the response to the previous one resolved or timed out.

use std::fmt;
use std::io::{BufRead, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info};
use serialport::SerialPort;

use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::utils::poll_stop_key;

use super::receiver::{spawn_reader, Receiver, RxMode};

// =============================================================================
// Protocol constants
// =============================================================================

/// Prompt prefix the REPL puts in front of echoed input.
const PROMPT_PREFIX: &str = "> ";

/// Acknowledgement line terminating every accepted block.
const BLOCK_ACK: &str = "> ACK";

/// Raw blocks are sized to what the firmware's one-shot receive handler can
/// count in a single installment.
const UART_BLOCK_SIZE: usize = 255;

/// Detection handshake bounds: empty lines written until the prompt marker
/// shows up.
const DETECT_ATTEMPTS: usize = 100;
const DETECT_DELAY_MS: u64 = 300;

/// Prefix identifying the expected runtime in the introspection answer.
const VERSION_PREFIX: &str = "NodeMCU v.: ";

const NODE_INFO_COMMAND: &str =
    "majorVer, minorVer, devVer, chipid, flashid, flashsize, flashmode, flashspeed = node.info();";
const PRINT_VERSION_COMMAND: &str =
    "print(string.format(\"NodeMCU v.: %13s\", majorVer..\".\"..minorVer..\".\"..devVer));";

// =============================================================================
// Public Interface
// =============================================================================

/// A live session with the Lua interpreter on the other side of the serial
/// link. Construction opens the session and runs the detection handshake;
/// [`Interpreter::close`] (also called on drop) tears it down.
pub struct Interpreter {
    /// Writer half of the port. Taken on close; the reader thread holds its
    /// own clone.
    port: Option<Box<dyn SerialPort>>,
    terminator: String,
    timeout: Duration,
    baud_rate: u32,
    receiver: Arc<Receiver>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    /// The device UART is reconfigured at most once per session, right
    /// before the first block transfer.
    uart_configured: bool,
    closed: bool,
}

impl Interpreter {
    /// Take ownership of an opened port, start the reception pipeline and
    /// run the detection handshake. Fails with
    /// [`Error::DeviceNotDetected`] when nothing on the other side behaves
    /// like a NodeMCU; the session is torn down before the error is
    /// returned.
    pub fn new(port: Box<dyn SerialPort>, settings: &Settings) -> Result<Interpreter> {
        let receiver = Arc::new(Receiver::new());
        let stop = Arc::new(AtomicBool::new(false));
        let reader_port = port.try_clone().map_err(|e| Error::Transport {
            operation: "open",
            message: e.to_string(),
        })?;
        let reader = spawn_reader(reader_port, Arc::clone(&receiver), Arc::clone(&stop));

        let mut interpreter = Interpreter {
            port: Some(port),
            terminator: settings.terminator.clone(),
            timeout: settings.timeout,
            baud_rate: settings.baud_rate,
            receiver,
            reader: Some(reader),
            stop,
            uart_configured: false,
            closed: false,
        };

        if let Err(e) = interpreter.detect() {
            interpreter.close();
            return Err(e);
        }
        Ok(interpreter)
    }

    /// Remove the file from the device. The firmware acknowledges by
    /// echoing the remove call.
    pub fn delete_file(&mut self, file: &str) -> Result<()> {
        let command = format!("file.remove(\"{}\");", file);
        let reply = self.send_command(&command)?;
        if !reply.contains(&command) {
            return Err(Error::Protocol {
                operation: "delete_file",
                command,
                response: reply,
            });
        }
        println!("{}", reply.trim());
        Ok(())
    }

    /// Push file content as raw blocks over the UART (the preferred
    /// transfer). The remote file is opened for write, the blocks are sent
    /// through [`Interpreter::write_blocks`] and the file is closed no
    /// matter how the transfer went.
    pub fn save_file<R: Read>(&mut self, file: &str, input: &mut R) -> Result<()> {
        let open = format!("file.open(\"{}\",\"w+\");", file);
        let result = match self.exact_command("save_file", &open) {
            Ok(()) => self.write_blocks(input),
            Err(e) => Err(e),
        };
        self.try_close_file();
        result
    }

    /// Push file content line by line through a `file.writeline` helper
    /// (the legacy transfer). Every step must echo back verbatim. Each line
    /// is wrapped in a `[[...]]` Lua literal; lines containing that
    /// delimiter are not escaped and will corrupt the transfer.
    pub fn save_file_text<R: BufRead>(&mut self, file: &str, reader: R) -> Result<()> {
        let result = self.write_lines(file, reader);
        self.try_close_file();
        result
    }

    /// Turn a Lua source already present on the device into its compiled
    /// form.
    pub fn compile(&mut self, file: &str) -> Result<()> {
        let command = format!("node.compile(\"{}\");", file);
        let reply = self.send_command(&command)?;
        if !reply.contains(&command) {
            return Err(Error::Protocol {
                operation: "compile",
                command,
                response: reply,
            });
        }
        println!("{}", reply.trim());
        Ok(())
    }

    /// `dofile` the given file. With `wait_for_output` the session switches
    /// to pass-through mode and mirrors everything the device prints until
    /// the operator presses a key.
    pub fn run_file(&mut self, file: &str, wait_for_output: bool) -> Result<()> {
        let command = format!("dofile(\"{}\");", file);
        let reply = self.send_command(&command)?;
        if !reply.contains(&command) {
            return Err(Error::Protocol {
                operation: "run_file",
                command,
                response: reply,
            });
        }
        println!("{}", reply.trim());

        if wait_for_output {
            println!("OUTPUT.");
            println!(
                "If you want to exit, press {} or {}.",
                style("Enter").cyan(),
                style("Esc").cyan()
            );
            println!("----------------------------------------------------------------");

            self.receiver.set_mode(RxMode::All);
            loop {
                match poll_stop_key() {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(ref e) => {
                        info!("error: {:?}", e.to_string());
                        break;
                    }
                }
            }
            self.receiver.set_mode(RxMode::Line);
        }
        Ok(())
    }

    /// Send one command and return the echoed response line, with the
    /// prompt prefix stripped when the command itself did not carry one.
    pub fn send_command(&mut self, command: &str) -> Result<String> {
        self.receiver.set_mode(RxMode::Line);
        self.write_line(command)?;
        let mut line = self.receiver.queue().wait_for_line(self.timeout)?;
        debug!("command {:?} -> response {:?}", command, line);
        if line.starts_with(PROMPT_PREFIX) && !command.starts_with(PROMPT_PREFIX) {
            line.drain(..PROMPT_PREFIX.len());
        }
        Ok(line)
    }

    /// Idempotent teardown: stop the reception pipeline and drop the port.
    /// Errors here are logged, never raised.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.receiver.set_mode(RxMode::None);
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                error!("reader thread terminated abnormally");
            }
        }
        // Dropping the handle closes the port.
        self.port.take();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // -------------------------------------------------------------------------
    // Private stuff
    // -------------------------------------------------------------------------

    /// The startup handshake: write empty lines in detect mode until the
    /// prompt marker shows up, then verify the runtime identity through the
    /// introspection commands.
    fn detect(&mut self) -> Result<()> {
        use retry::{delay, retry};

        self.receiver.set_mode(RxMode::Detect);
        self.receiver.reset_detected();

        let result = retry(
            delay::Fixed::from_millis(DETECT_DELAY_MS).take(DETECT_ATTEMPTS - 1),
            || -> Result<()> {
                if self.receiver.detected() {
                    return Ok(());
                }
                self.write_line("")?;
                Err(Error::DeviceNotDetected {
                    response: "prompt marker not seen yet".into(),
                })
            },
        );
        match result {
            Ok(()) => {}
            Err(retry::Error::Operation {
                error: e @ Error::Transport { .. },
                ..
            }) => return Err(e),
            Err(_) => {
                return Err(Error::DeviceNotDetected {
                    response: "prompt marker never received".into(),
                })
            }
        }

        // The device is talking; make sure it is the runtime we expect.
        self.receiver.set_mode(RxMode::Line);
        self.send_command(NODE_INFO_COMMAND)?;
        self.send_command(PRINT_VERSION_COMMAND)?;
        let version = self.receiver.queue().wait_for_line(self.timeout)?;
        if !version.starts_with(VERSION_PREFIX) {
            return Err(Error::DeviceNotDetected { response: version });
        }
        println!("{}", version.trim());
        Ok(())
    }

    fn write_line(&mut self, command: &str) -> Result<()> {
        let data = format!("{}{}", command, self.terminator);
        let port = self.port()?;
        port.write_all(data.as_bytes()).map_err(|e| Error::Transport {
            operation: "write_line",
            message: e.to_string(),
        })
    }

    /// Send a command whose echo must match it verbatim (after trimming).
    fn exact_command(&mut self, operation: &'static str, command: &str) -> Result<()> {
        let reply = self.send_command(command)?;
        if reply.trim() != command.trim() {
            return Err(Error::Protocol {
                operation,
                command: command.to_owned(),
                response: reply,
            });
        }
        println!("{}", reply.trim());
        Ok(())
    }

    fn write_lines<R: BufRead>(&mut self, file: &str, reader: R) -> Result<()> {
        self.exact_command("save_file", &format!("file.open(\"{}\",\"w+\");", file))?;
        self.exact_command("save_file", "w = file.writeline;")?;
        for line in reader.lines() {
            let line = line?;
            self.exact_command("save_file", &format!("w([[{}]]);", line))?;
        }
        self.exact_command("save_file", "w = nil;")?;
        Ok(())
    }

    /// The chunked binary transfer: reconfigure the device UART once per
    /// session, then for every 255-byte block install a one-shot receive
    /// handler sized to the block, push the raw bytes and require the
    /// acknowledgement line before moving on.
    fn write_blocks<R: Read>(&mut self, input: &mut R) -> Result<()> {
        self.configure_uart()?;

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner().template("[NP] \u{23e9} {spinner:.blue} {bytes} pushed"),
        );

        let mut block = [0u8; UART_BLOCK_SIZE];
        let mut index = 0usize;
        let result = loop {
            let len = match fill_block(input, &mut block) {
                Ok(0) => break Ok(()),
                Ok(len) => len,
                Err(e) => break Err(Error::Io(e)),
            };
            if let Err(e) = self.send_block(index, &block[..len]) {
                break Err(e);
            }
            pb.inc(len as u64);
            index += 1;
        };
        pb.finish_and_clear();

        self.receiver.set_mode(RxMode::Line);
        result
    }

    fn configure_uart(&mut self) -> Result<()> {
        if self.uart_configured {
            return Ok(());
        }
        let command = format!("uart.setup(0, {}, 8, 0, 1, 1);", self.baud_rate);
        self.exact_command("block_transfer", &command)?;
        self.uart_configured = true;
        Ok(())
    }

    fn send_block(&mut self, index: usize, block: &[u8]) -> Result<()> {
        let command = format!(
            "uart.on(\"data\", {}, function(b) file.write(b) uart.write(0, \"ACK\\r\\n\") uart.on(\"data\") end, 0);",
            block.len()
        );
        self.exact_command("block_transfer", &command)?;

        // Raw bytes, no terminator: the device-side handler counts them.
        let port = self.port()?;
        port.write_all(block).map_err(|e| Error::Transport {
            operation: "block_transfer",
            message: e.to_string(),
        })?;

        let ack = self.receiver.queue().wait_for_line(self.timeout)?;
        debug!("block {} ({} bytes) -> {:?}", index, block.len(), ack);
        if ack.trim() != BLOCK_ACK {
            return Err(Error::Protocol {
                operation: "block_transfer",
                command: format!("block {} ({} bytes)", index, block.len()),
                response: ack,
            });
        }
        Ok(())
    }

    /// Best-effort `file.close()`; always attempted, never fails the
    /// caller.
    fn try_close_file(&mut self) {
        let command = "file.close();";
        match self.send_command(command) {
            Ok(reply) => {
                if reply.trim() != command {
                    error!("error when closing remote file, device returned: {}", reply.trim());
                } else {
                    println!("{}", reply.trim());
                }
            }
            Err(ref e) => error!("error when closing remote file: {}", e),
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(Error::Transport {
            operation: "write",
            message: "port is closed".into(),
        })
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("port", &self.port.as_ref().and_then(|p| p.name()))
            .field("baud_rate", &self.baud_rate)
            .field("timeout", &self.timeout)
            .field("uart_configured", &self.uart_configured)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Fill `block` from the input, tolerating short reads; returns how many
/// bytes were placed, `0` at end of input.
fn fill_block<R: Read>(input: &mut R, block: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < block.len() {
        match input.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{mock_port, nodemcu_responder, nodemcu_responder_with_ack};
    use crate::settings::SettingsBuilder;
    use std::io::Cursor;

    fn test_settings() -> crate::settings::Settings {
        SettingsBuilder::new().timeout_ms(2_000).finalize()
    }

    /// Written bytes decoded as the sequence of terminated command lines.
    fn written_commands(raw: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(raw)
            .split('\n')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn open_runs_detection_handshake() {
        let (port, handle) = mock_port(nodemcu_responder());
        let interpreter = Interpreter::new(port, &test_settings()).unwrap();
        assert!(!interpreter.is_closed());

        let written = handle.take_written();
        let commands = written_commands(&written);
        // At least one empty probe line, then the two introspection calls.
        assert!(commands.contains(&NODE_INFO_COMMAND.to_string()));
        assert!(commands.contains(&PRINT_VERSION_COMMAND.to_string()));
    }

    #[test]
    fn open_rejects_foreign_runtime() {
        let responder = |data: &[u8]| -> Vec<u8> {
            let text = String::from_utf8_lossy(data);
            let command = text.trim_end_matches(|c| c == '\n' || c == '\r');
            if command.is_empty() {
                return b"\r\n> ".to_vec();
            }
            let mut reply = format!("> {}\r\n", command).into_bytes();
            if command.starts_with("print(") {
                reply.extend_from_slice(b"ESPresso shell 0.3\r\n");
            }
            reply
        };
        let (port, _handle) = mock_port(responder);
        match Interpreter::new(port, &test_settings()) {
            Err(Error::DeviceNotDetected { response }) => {
                assert!(response.starts_with("ESPresso"));
            }
            other => panic!("expected DeviceNotDetected, got {:?}", other),
        }
    }

    #[test]
    fn detection_gives_up_on_silent_device() {
        // The device talks, but never shows the prompt marker.
        let responder = |data: &[u8]| -> Vec<u8> {
            if data.is_empty() {
                Vec::new()
            } else {
                b"garbage without a prompt".to_vec()
            }
        };
        let (port, _handle) = mock_port(responder);
        match Interpreter::new(port, &test_settings()) {
            Err(Error::DeviceNotDetected { .. }) => {}
            other => panic!("expected DeviceNotDetected, got {:?}", other),
        }
    }

    #[test]
    fn send_command_strips_prompt_prefix() {
        let (port, _handle) = mock_port(nodemcu_responder());
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        let reply = interpreter.send_command("print(1);").unwrap();
        assert_eq!(reply, "print(1);\r\n");
    }

    #[test]
    fn delete_file_accepts_matching_echo() {
        let (port, handle) = mock_port(nodemcu_responder());
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        handle.take_written();

        interpreter.delete_file("a/b.lua").unwrap();
        let commands = written_commands(&handle.take_written());
        assert_eq!(commands, vec!["file.remove(\"a/b.lua\");".to_string()]);
    }

    #[test]
    fn delete_file_rejects_mismatched_echo() {
        let responder = {
            let mut base = nodemcu_responder();
            move |data: &[u8]| -> Vec<u8> {
                let text = String::from_utf8_lossy(data).into_owned();
                if text.starts_with("file.remove(") {
                    return b"> something else entirely\r\n".to_vec();
                }
                base(data)
            }
        };
        let (port, _handle) = mock_port(responder);
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        match interpreter.delete_file("a/b.lua") {
            Err(Error::Protocol { operation, .. }) => assert_eq!(operation, "delete_file"),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn text_transfer_issues_writeline_sequence() {
        let (port, handle) = mock_port(nodemcu_responder());
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        handle.take_written();

        interpreter
            .save_file_text("x.lua", Cursor::new("print(1)\n"))
            .unwrap();

        let commands = written_commands(&handle.take_written());
        assert_eq!(
            commands,
            vec![
                "file.open(\"x.lua\",\"w+\");".to_string(),
                "w = file.writeline;".to_string(),
                "w([[print(1)]]);".to_string(),
                "w = nil;".to_string(),
                "file.close();".to_string(),
            ]
        );
    }

    #[test]
    fn text_transfer_closes_file_after_failed_step() {
        let responder = {
            let mut base = nodemcu_responder();
            move |data: &[u8]| -> Vec<u8> {
                let text = String::from_utf8_lossy(data).into_owned();
                if text.starts_with("w = file.writeline;") {
                    return b"> stdin:1: unexpected symbol\r\n".to_vec();
                }
                base(data)
            }
        };
        let (port, handle) = mock_port(responder);
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        handle.take_written();

        let result = interpreter.save_file_text("x.lua", Cursor::new("print(1)\n"));
        assert!(matches!(result, Err(Error::Protocol { .. })));

        let commands = written_commands(&handle.take_written());
        // The helper assignment failed; no line was pushed, but the file
        // was still closed.
        assert_eq!(
            commands,
            vec![
                "file.open(\"x.lua\",\"w+\");".to_string(),
                "w = file.writeline;".to_string(),
                "file.close();".to_string(),
            ]
        );
    }

    #[test]
    fn block_transfer_round_trip() {
        let (port, handle) = mock_port(nodemcu_responder());
        let settings = test_settings();
        let mut interpreter = Interpreter::new(port, &settings).unwrap();
        handle.take_written();

        // 300 bytes spanning two blocks, newlines included on purpose.
        let content: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();

        interpreter.delete_file("a/b.lua").unwrap();
        interpreter.save_file("a/b.lua", &mut Cursor::new(content.clone())).unwrap();
        interpreter.run_file("a/b.lua", false).unwrap();

        let mut expected: Vec<u8> = Vec::new();
        expected.extend(b"file.remove(\"a/b.lua\");\n".iter());
        expected.extend(b"file.open(\"a/b.lua\",\"w+\");\n".iter());
        expected.extend(
            format!("uart.setup(0, {}, 8, 0, 1, 1);\n", settings.baud_rate).bytes(),
        );
        expected.extend(
            "uart.on(\"data\", 255, function(b) file.write(b) uart.write(0, \"ACK\\r\\n\") uart.on(\"data\") end, 0);\n"
                .bytes(),
        );
        expected.extend(&content[..255]);
        expected.extend(
            "uart.on(\"data\", 45, function(b) file.write(b) uart.write(0, \"ACK\\r\\n\") uart.on(\"data\") end, 0);\n"
                .bytes(),
        );
        expected.extend(&content[255..]);
        expected.extend(b"file.close();\n".iter());
        expected.extend(b"dofile(\"a/b.lua\");\n".iter());
        assert_eq!(handle.take_written(), expected);
    }

    #[test]
    fn uart_configured_once_per_session() {
        let (port, handle) = mock_port(nodemcu_responder());
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        handle.take_written();

        interpreter.save_file("a.bin", &mut Cursor::new(vec![1u8; 10])).unwrap();
        interpreter.save_file("b.bin", &mut Cursor::new(vec![2u8; 10])).unwrap();

        let written = String::from_utf8_lossy(&handle.take_written()).into_owned();
        assert_eq!(written.matches("uart.setup(").count(), 1);
    }

    #[test]
    fn refused_block_aborts_transfer() {
        let (port, handle) = mock_port(nodemcu_responder_with_ack("> NACK\r\n"));
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        handle.take_written();

        let content = vec![0u8; 600];
        let result = interpreter.save_file("big.bin", &mut Cursor::new(content));
        match result {
            Err(Error::Protocol {
                operation,
                command,
                response,
            }) => {
                assert_eq!(operation, "block_transfer");
                assert!(command.contains("block 0"));
                assert!(command.contains("255 bytes"));
                assert_eq!(response.trim(), "> NACK");
            }
            other => panic!("expected protocol error, got {:?}", other),
        }

        let written = String::from_utf8_lossy(&handle.take_written()).into_owned();
        // Only the first handler install went out, and the file was still
        // closed afterwards. The install command itself mentions
        // `uart.on("data",` exactly once.
        assert_eq!(written.matches("uart.on(\"data\",").count(), 1);
        assert!(written.contains("file.close();"));
    }

    #[test]
    fn compile_checks_echo() {
        let (port, handle) = mock_port(nodemcu_responder());
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        handle.take_written();

        interpreter.compile("a/b.lua").unwrap();
        let commands = written_commands(&handle.take_written());
        assert_eq!(commands, vec!["node.compile(\"a/b.lua\");".to_string()]);
    }

    #[test]
    fn close_is_idempotent() {
        let (port, _handle) = mock_port(nodemcu_responder());
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        assert!(!interpreter.is_closed());
        interpreter.close();
        assert!(interpreter.is_closed());
        interpreter.close();
        assert!(interpreter.is_closed());
    }

    #[test]
    fn operations_fail_cleanly_after_close() {
        let (port, _handle) = mock_port(nodemcu_responder());
        let mut interpreter = Interpreter::new(port, &test_settings()).unwrap();
        interpreter.close();
        match interpreter.send_command("print(1);") {
            Err(Error::Transport { .. }) => {}
            other => panic!("expected transport error, got {:?}", other),
        }
    }
}
