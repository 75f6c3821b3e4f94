//! Events for the `nodepush` session state machine.
//!
//! This module is private and restricted to the [`session`](crate::session)
//! scope. The public interface of the state machine is provided by
//! [`session`](crate::session).
//!
//! ```ignore
//! use super::events::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use crate::settings::Settings;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// WaitForPortEvent ============================================================

/// Event fired to trigger a transition to the `WaitForPort` state.
///
/// This event can happen under one of the following circumstances:
///
///  1. While at the `Init` state and a port name was provided. Port
///     selection is skipped and we just hold on until the port is created
///     (meaning the board is plugged).
///  2. When an unrecoverable port error occurs while at the `Service`
///     state, usually because the board was removed or reset mid-session.
#[derive(Debug)]
pub(crate) struct WaitForPortEvent {
    pub settings: Settings,
}

// SelectPortEvent =============================================================

/// Event fired to trigger the transition to the `SelectPort` state.
///
/// This event can happen under one of the following circumstances:
///
///  1. If the program is started with no specific device path provided.
///  2. If a device path was provided but the user cancels the wait for it
///     with the `ESC` key, to pick another one instead.
///  3. If the user declines the selection to get a refreshed list of
///     connected devices.
#[derive(Debug)]
pub(crate) struct SelectPortEvent {
    pub settings: Settings,
}

// PortReadyEvent ==============================================================

/// Event fired when we have a serial port with a valid device path on the
/// system, either because the port we were waiting on came up or because one
/// was selected from the list of detected ports.
///
/// Fired from the `WaitForPort` or `SelectPort` states; triggers the
/// transition into the `Service` state.
#[derive(Debug)]
pub(crate) struct PortReadyEvent {
    pub settings: Settings,
}

// PortErrorEvent ==============================================================

/// Event fired when an error related to the serial port (usually a
/// communication error resulting from the board being removed) occurs.
///
/// Fired only from the `Service` state; triggers a transition into the
/// `WaitForPort` state.
#[derive(Debug)]
pub(crate) struct PortErrorEvent {
    pub settings: Settings,
}

// DoneEvent ===================================================================

/// Event fired when the upload session completes, successfully or not, and
/// the program is about to terminate. It triggers a transition to the
/// `Done` state.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub settings: Settings,
    pub with_errors: bool,
}

// ExitEvent ===================================================================

/// The last event that can be triggered in `nodepush` and will result in
/// the event loop terminating with an `exit status`, handing back the
/// control to the original caller that started the event loop.
///
/// The returned `status code` can be used as an exit code from the `main`
/// function.
///
/// **Example**
/// ```no_run
/// use nodepush::{self as np, DeviceManager};
///
/// let settings = np::SettingsBuilder::new().finalize();
/// let mut session = np::singleton(settings);
/// let status = session.run(); // status code returned after the `Exit` event
/// println!("status: {}", status);
/// std::process::exit(0);
/// ```
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub settings: Settings,
    pub with_error: bool,
}

// Events enum ==================================================================

/// Events that can be triggered within the session state machine of
/// `nodepush`.
///
/// Each possible value holds an `event`, which in turn may hold additional
/// data for the state transition. Such data is passed by the origin state
/// for potential use by the target state.
#[derive(Debug)]
pub(crate) enum Event {
    WaitForPort(WaitForPortEvent),
    SelectPort(SelectPortEvent),
    PortReady(PortReadyEvent),
    PortError(PortErrorEvent),
    Done(DoneEvent),
    Exit(ExitEvent),
}
