//! States for the `nodepush` session state machine.
//!
//! This module is private and restricted to the [`session`](crate::session)
//! scope. The public interface of the state machine is provided by
//! [`session`](crate::session).
//!
//! ```ignore
//! use super::states::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use std::io;
use std::path::PathBuf;

use console::style;
use log::info;

use super::events::*;
use crate::device::Interpreter;
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::sync::FileSync;
use crate::utils;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state can do any work that needs to be done and
    /// when finished, requests transition to a new state by returning the
    /// appropriate `event`. The `event` is then consumed to create the new
    /// `state` using the corresponding `From` trait implementation if
    /// available.
    fn run(&mut self, settings: &Settings) -> Event;
}

// Init State ==================================================================

/// Represents the initial state of the session state machine.
///
/// From the `InitState`, the state machine can evolve via the following
/// transitions:
///
///  * **`WaitForPortEvent` => `WaitForPortState`** when a specific device
///    path was provided in the settings,
///  * **`SelectPortEvent` => `SelectPortState`** when no device path was
///    provided in the settings.
#[derive(Debug)]
pub(crate) struct InitState {}
impl Runnable for InitState {
    /// At the `Init` state, check if the provided `settings` have a device
    /// path, and if yes, transition to the `WaitForPort` state; otherwise
    /// transition to the `SelectPort` state.
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Init");
        match settings.path {
            Some(_) => Event::WaitForPort(WaitForPortEvent {
                settings: settings.clone(),
            }),
            None => Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
            }),
        }
    }
}

// WaitForPortState ============================================================

#[derive(Debug)]
pub(crate) struct WaitForPortState {}
impl Runnable for WaitForPortState {
    fn run(&mut self, settings: &Settings) -> Event {
        let path = settings.path.as_ref().unwrap();
        info!("=> WaitForPort");
        let canceled = utils::wait_for_port(path);
        if canceled {
            Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
            })
        } else {
            // The wait for port to be ready completed without cancellation.
            // Fire the `PortReady` event to trigger the transition to the
            // next state.
            Event::PortReady(PortReadyEvent {
                settings: settings.clone(),
            })
        }
    }
}

// SelectPortState =============================================================

#[derive(Debug)]
pub(crate) struct SelectPortState {}
impl Runnable for SelectPortState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> SelectPort");
        let selection = utils::select_port(settings.select_first_port);
        match selection {
            // We have a serial port device path that we now need to update
            // in the settings and then trigger the transition via the
            // `PortReady` event.
            Some(path) => {
                let mut cloned_settings = settings.clone();
                cloned_settings.path = Some(path);
                Event::PortReady(PortReadyEvent {
                    settings: cloned_settings,
                })
            }
            None => Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
            }),
        }
    }
}

// ServiceState ================================================================

/// The working state: open the port, run the detection handshake, push the
/// source tree and optionally run the main file.
///
/// This state can transition to another state as following:
///
///  * **`DoneEvent` => `DoneState`** upon completion, successful or not,
///  * **`PortErrorEvent` => `WaitForPortState`** when the serial link
///    itself failed, so the board can be re-plugged and the session retried.
#[derive(Debug)]
pub(crate) struct ServiceState {}
impl Runnable for ServiceState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Service");

        match run_session(settings) {
            Ok(()) => Event::Done(DoneEvent {
                settings: settings.clone(),
                with_errors: false,
            }),
            Err(ref e) if e.is_port_error() => {
                info!("error: {:?}", e.to_string());
                println!("{}", style(format!("[NP] \u{1f4a5} {}", e)).red());
                println!("[NP] \u{1f50c} Check the connection to the board!");
                Event::PortError(PortErrorEvent {
                    settings: settings.clone(),
                })
            }
            Err(e) => {
                println!("{}", style(format!("[NP] \u{1f4a5} {}", e)).red());
                Event::Done(DoneEvent {
                    settings: settings.clone(),
                    with_errors: true,
                })
            }
        }
    }
}

// Done State ==================================================================

#[derive(Debug, Copy, Clone)]
pub(crate) struct DoneState {
    pub with_error: bool,
    pub should_exit: bool,
}
impl Runnable for DoneState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!(
            "=> Done with{}errors",
            if self.with_error { " " } else { " no " }
        );
        Event::Exit(ExitEvent {
            settings: settings.clone(),
            with_error: self.with_error,
        })
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// One complete upload session against an opened port: detection handshake,
/// file synchronization, optional run of the main file, teardown.
fn run_session(settings: &Settings) -> Result<()> {
    let port = utils::open_and_setup_port(settings).map_err(|e| Error::Transport {
        operation: "open",
        message: e.to_string(),
    })?;
    let mut interpreter = Interpreter::new(port, settings)?;

    let result = push_and_run(settings, &mut interpreter);
    interpreter.close();
    result
}

fn push_and_run(settings: &Settings, interpreter: &mut Interpreter) -> Result<()> {
    let root = PathBuf::from(settings.root_dir.clone().unwrap());
    let main_file = PathBuf::from(settings.main_file.clone().unwrap());

    let mut sync = FileSync::new(settings);
    if settings.only_main {
        sync.push_single(interpreter, &main_file)?;
    } else {
        sync.run(interpreter)?;
    }

    if !settings.remove_only && !settings.no_run {
        let main_relative = utils::unix_relative_path(&root, &main_file).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "main file is not under the root directory",
            ))
        })?;
        let excluded = utils::normalized_exclude_set(&root, &settings.exclude);
        if !excluded.contains(&main_relative) {
            interpreter.run_file(&main_relative, settings.wait_for_output)?;
        }
    }
    Ok(())
}
