//! The `nodepush` session state machine and its public interface.
//!
//! The event loop wraps the states defined in [`states`](super::states) and
//! keeps stepping the machine until the `Done` state requests an exit. The
//! single instance of the machine is handed out by [`singleton`].

use std::sync::{Arc, Mutex, Once};

use super::events::*;
use super::states::*;
use crate::settings::Settings;

// =============================================================================
// Public Interface
// =============================================================================

// -----------------------------------------------------------------------------
// Session Manager Singleton
// -----------------------------------------------------------------------------

pub trait DeviceManager {
    fn run(&mut self) -> i8;
}

/// Encapsulate the state machine creation and event loop to provide a
/// concise and simple public interface to the module users.
///
/// Only one instance of this struct exists, using the `singleton` pattern,
/// and which can be accessed by calling the `singleton()` function.
#[derive(Clone)]
pub struct SingletonReader {
    // Since this can be used in many threads, we need to protect concurrent
    // access
    inner: Arc<Mutex<SessionStates>>,
}
impl DeviceManager for SingletonReader {
    /// The session event loop runs until the `Done` state is reached and
    /// its `should_exit` flag is set. At such point, the event loop
    /// terminates and returns an exit code indicating no errors when equal
    /// to **`0`**; otherwise a termination with error.
    ///
    /// The returned status code could be used as an exit code from
    /// `nodepush`.
    fn run(&mut self) -> i8 {
        loop {
            let mut data = self.inner.lock().unwrap();
            *data = data.step();
            if let SessionStates::Done(sm) = &*data {
                if sm.state.should_exit {
                    return if sm.state.with_error { 1 } else { 0 };
                }
            }
        }
    }
}

/// Returns the single instance of the session manager.
///
/// In order to use the singleton instance, proper locking needs to be
/// observed. The example below demonstrates an example usage scenario:
///
/// ```ignore
///     let settings = SettingsBuilder::new().finalize();
///     let mut s = singleton(settings);
///     s.run();
/// ```
pub fn singleton(settings: Settings) -> SingletonReader {
    // Initialize it to a null value
    static mut SM_SINGLETON: *const SingletonReader = 0 as *const SingletonReader;
    static SM_ONCE: Once = Once::new();

    unsafe {
        SM_ONCE.call_once(|| {
            // Make it
            let singleton = SingletonReader {
                inner: Arc::new(Mutex::new(SessionStates::Init(SessionStateMachine::new(
                    settings,
                )))),
            };

            // Put it in the heap so it can outlive this call
            SM_SINGLETON = std::mem::transmute(Box::new(singleton));
        });

        // Now we give out a copy of the data that is safe to use concurrently.
        (*SM_SINGLETON).clone()
    }
}

// =============================================================================
// Private stuff
// =============================================================================

// -----------------------------------------------------------------------------
// The State Machine
// -----------------------------------------------------------------------------

/// The state machine implementing `nodepush`'s management of the serial
/// device lifecycle and the upload session running over it.
///
/// Note that using a generic type that holds the current state serves two
/// purposes. It allows for also having shared data by all states that is
/// not really part of state data (e.g. state machine parameters,
/// statistics, etc...). Additionally, it's nicer when debugging to see the
/// state machine and the current state it is holding at any time.
#[derive(Debug)]
struct SessionStateMachine<S: Runnable> {
    settings: Settings,
    state: S,
}
impl<S: Runnable> SessionStateMachine<S> {
    fn run(&mut self) -> Event {
        self.state.run(&self.settings)
    }
}

/// The session state machine starts in the `InitState`.
impl SessionStateMachine<InitState> {
    fn new(settings: Settings) -> Self {
        SessionStateMachine {
            settings,
            state: InitState {},
        }
    }
}

/// Wraps the state machine and its various states into a simple enum, which
/// can also be used for pattern matching during state transitions.
enum SessionStates {
    Init(SessionStateMachine<InitState>),
    WaitForPort(SessionStateMachine<WaitForPortState>),
    SelectPort(SessionStateMachine<SelectPortState>),
    Service(SessionStateMachine<ServiceState>),
    Done(SessionStateMachine<DoneState>),
}
impl SessionStates {
    fn step(&mut self) -> Self {
        match self {
            SessionStates::Init(sm) => {
                let event = sm.run();
                match event {
                    Event::WaitForPort(ev) => SessionStates::WaitForPort(ev.into()),
                    Event::SelectPort(ev) => SessionStates::SelectPort(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::WaitForPort(sm) => {
                let event = sm.run();
                match event {
                    Event::PortReady(ev) => SessionStates::Service(ev.into()),
                    Event::SelectPort(ev) => SessionStates::SelectPort(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::SelectPort(sm) => {
                let event = sm.run();
                match event {
                    Event::SelectPort(ev) => SessionStates::SelectPort(ev.into()),
                    Event::PortReady(ev) => SessionStates::Service(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::Service(sm) => {
                let event = sm.run();
                match event {
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    Event::PortError(ev) => SessionStates::WaitForPort(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::Done(sm) => {
                let event = sm.run();
                match event {
                    Event::Exit(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<WaitForPortEvent> for SessionStateMachine<WaitForPortState> {
    fn from(event: WaitForPortEvent) -> SessionStateMachine<WaitForPortState> {
        SessionStateMachine {
            settings: event.settings,
            state: WaitForPortState {},
        }
    }
}
impl From<PortErrorEvent> for SessionStateMachine<WaitForPortState> {
    fn from(event: PortErrorEvent) -> SessionStateMachine<WaitForPortState> {
        SessionStateMachine {
            settings: event.settings,
            state: WaitForPortState {},
        }
    }
}

impl From<SelectPortEvent> for SessionStateMachine<SelectPortState> {
    fn from(event: SelectPortEvent) -> SessionStateMachine<SelectPortState> {
        SessionStateMachine {
            settings: event.settings,
            state: SelectPortState {},
        }
    }
}

impl From<PortReadyEvent> for SessionStateMachine<ServiceState> {
    fn from(event: PortReadyEvent) -> SessionStateMachine<ServiceState> {
        SessionStateMachine {
            settings: event.settings,
            state: ServiceState {},
        }
    }
}

impl From<DoneEvent> for SessionStateMachine<DoneState> {
    fn from(event: DoneEvent) -> SessionStateMachine<DoneState> {
        SessionStateMachine {
            settings: event.settings,
            state: DoneState {
                with_error: event.with_errors,
                should_exit: false,
            },
        }
    }
}
impl From<ExitEvent> for SessionStateMachine<DoneState> {
    fn from(event: ExitEvent) -> SessionStateMachine<DoneState> {
        SessionStateMachine {
            settings: event.settings,
            state: DoneState {
                with_error: event.with_error,
                should_exit: true,
            },
        }
    }
}
