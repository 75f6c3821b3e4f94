//! Helper functions to deal with serial ports, local paths and the
//! keyboard.

mod files;
mod keyboard;
mod ports;

pub(crate) use files::{compiled_counterpart, normalized_exclude_set, unix_relative_path};
pub(crate) use keyboard::{poll_escape, poll_stop_key};
pub(crate) use ports::{open_and_setup_port, select_port, wait_for_port};
