//! Loadcom configures and drives a stepper-motor BB loader over a serial
//! connection. It owns the device control protocol end to end: the session
//! lifecycle, the request/acknowledge exchange for reading and writing the
//! loader's parameters, and the streaming start/progress/stop machinery of a
//! counted dispensing run.
//!
//! The wire protocol is newline-delimited text at 115200 baud: `SET_*`
//! commands persist parameters (one lenient acknowledgement line each),
//! `GET_ALL` returns a fixed 5-field settings dump, `START:<n>` begins a
//! run whose progress streams back as `PROGRESS:<remaining>` lines until a
//! `FINISHED` or `STOPPED` marker, and the single letter `S` requests an
//! emergency stop. Anything else the firmware prints is tolerated and
//! skipped.
//!
//! The dispensing run is implemented as a state machine. State machines are
//! implemented in terms of **states** and **transitions** between them with
//! the following characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * It is possible to have some shared data between **all** states.
//! * Transitions between states are triggered via typed **events** and
//!   follow defined semantics.
//! * Only explicitly defined transitions should be permitted and as many
//!   errors should be detected at **compile-time**.
//! * Transitioning from one state to another consumes the original state and
//!   renders it unusable. Any transition back to that state would create a
//!   new state.
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

mod codec;
mod error;
mod load_protocol;
mod session;
mod settings;
mod sync;
mod transport;
mod utils;

pub use codec::{Command, DeviceSettings, Reply};
pub use error::{Error, Result};
pub use load_protocol::{LoadProgress, LoadRequest, ProgressSink, RunOutcome};
pub use session::{CancelToken, Session};
pub use settings::{Settings, SettingsBuilder};
pub use transport::{SerialTransport, Transport};
pub use utils::{list_endpoints, poll_cancel_key, select_endpoint, wait_for_endpoint};
