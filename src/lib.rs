//! Nodepush is a utility to simplify Lua development for NodeMCU boards by
//! pushing the sources to the device filesystem over the serial port
//! connection. This is a simple and fast process for rapid iteration over
//! firmware scripts: synchronize a directory tree, optionally compile the
//! sources on the device, run the main file and watch its output.
//!
//! The device side is the stock NodeMCU firmware with its line-oriented Lua
//! REPL; no agent needs to be installed first. Everything written to the
//! UART is echoed back, which is what the protocol engine uses to verify
//! every command. File content travels either line by line through a
//! `file.writeline` helper or, preferably, as raw 255-byte blocks counted
//! and acknowledged by a receive handler installed on the device for each
//! block.
//!
//! Nodepush offers interactive selection menus to choose the serial port to
//! be used, can easily switch from one port to another, handle
//! disconnection and various errors, all without restarting.
//!
//! The session lifecycle is implemented as a state machine. State machines
//! are implemented in terms of **states** and **transitions** between them
//! with the following characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * It is possible to have some shared data between **all** states.
//! * Transitions between states are triggered via typed **events** and
//!   follow defined semantics.
//! * Only explicitly defined transitions should be permitted and as many
//!   errors should be detected at **compile-time**.
//! * Transitioning from one state to another consumes the original state
//!   and renders it unusable. Any transition back to that state would
//!   create a new state.
//! * Data can be transferred from one state to the next by attaching it to
//!   the transition event. Such data is statically defined as part of the
//!   event type.
//!
//! The implementation of state transitions leverages `rust`'s `From` and
//! `Into` pattern. The `From` trait allows for a type to define how to
//! create itself from another type, hence providing us an intuitive and
//! simple mechanism for converting `events` into new `states`. Only
//! transitions for which the `From` trait is implemented are authorized and
//! any other transition would be detected at compile-time as an error.

mod device;
mod error;
mod session;
mod settings;
mod sync;
mod utils;

pub use device::{Interpreter, LineQueue};
pub use error::{Error, Result};
pub use session::{singleton, DeviceManager};
pub use settings::{Settings, SettingsBuilder};
pub use sync::FileSync;
