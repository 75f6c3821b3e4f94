//! Serial device selection and upload session management.
//!
//! `nodepush` talks to a single NodeMCU board over a serial port which can
//! be given on the command line or selected out of the ports available on
//! the system. Serial devices come and go as boards are plugged, reset and
//! re-flashed, so the session needs the flexibility to wait for a port, to
//! re-select one, and to start over after a link error without restarting
//! the program.
//!
//! The following state diagram summarizes the states and transitions the
//! session management goes through:
//!
//! ```text
//!                            START
//!                              |
//!                              v
//!                          .-------.
//!                          | Init  |
//!                          '-------'
//!                              |
//!                              v
//!                    no  .----------.  yes
//!                  .----( port_name? )----.
//!      .-----.     |     '----------'     |
//!      |     |     v                      v
//!      |    .------------.         .-------------.
//!      '--->| SelectPort |<-----.--| WaitForPort |<---.
//!           '------------'      |  '-------------'    |
//!              |              port                    |
//!              |              ready                   |
//!              |                v                     |
//!             port     ******************             |
//!             ready    *    Service     *     port    |
//!              |       ******************     error   |
//!              '------>* detect, sync,  *-------------'
//!                      *  compile, run  *
//!                      ******************
//!                               |
//!                               v
//!                              END
//! ```

mod events;
mod state_machine;
mod states;

pub use state_machine::{singleton, DeviceManager};
