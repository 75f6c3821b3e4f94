//! NodeMCU serial protocol engine.
//!
//! The firmware on the other side of the link exposes a line-oriented Lua
//! REPL: everything written to the UART is echoed back, and a small set of
//! builtin calls performs file operations. The modules below drive that
//! protocol:
//!
//! * [`line_queue`](self) - the thread-safe FIFO bridging the reader thread
//!   to the synchronous caller,
//! * [`receiver`](self) - the mode-switchable dispatcher fed by the reader
//!   thread, turning raw bytes into lines, pass-through output or a
//!   detection signal,
//! * [`interpreter`](self) - the request/response and file-transfer
//!   protocols built on top.
//!
//! **Example** - pushing a file:
//! ```ignore
//! let port = open_and_setup_port(&settings)?;
//! let mut interpreter = Interpreter::new(port, &settings)?;
//! interpreter.delete_file("init.lua")?;
//! interpreter.save_file("init.lua", &mut File::open("init.lua")?)?;
//! interpreter.run_file("init.lua", true)?;
//! interpreter.close();
//! ```

mod interpreter;
mod line_queue;
mod receiver;

pub use interpreter::Interpreter;
pub use line_queue::LineQueue;

#[cfg(test)]
pub(crate) mod testing;
