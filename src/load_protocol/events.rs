//! Events for the `loadcom` dispensing-run state machine.
//!
//! This module is private and restricted to the
//! [`load_protocol`](crate::load_protocol) scope. The public interface of
//! the dispensing-run state machine is provided by
//! [`load_protocol`](crate::load_protocol).
//!
//! ```ignore
//! use super::events::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use std::fmt;

use crate::load_protocol::{LoadRequest, RunOutcome};
use crate::transport::Transport;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// BeginRunEvent ===============================================================

/// Event fired to trigger a transition to [`RunningState`].
///
/// This event can happen under one of the following circumstances:
///
///  1. While at the [`StartingState`] after the `START:<amount>` command was
///     written and the initial progress report was emitted.
pub(crate) struct BeginRunEvent {
    pub request: LoadRequest,
    /// The transport to be used in the next state. Consumed and moved to the
    /// next state.
    pub transport: Box<dyn Transport>,
}
impl fmt::Debug for BeginRunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = &self.transport;
        debug_fmt_transport!(transport, f).finish()
    }
}

// RunEndedEvent ===============================================================

/// Event fired when the run reaches a terminal outcome. It triggers a
/// transition to the [`DoneState`].
///
/// This event can happen at the [`StartingState`] (zero target, failed
/// start) or at the [`RunningState`] (termination marker, I/O failure,
/// exhausted idle budget).
pub(crate) struct RunEndedEvent {
    pub request: LoadRequest,
    pub outcome: RunOutcome,
    /// The transport, handed back through the terminal states so the
    /// session can reclaim it once the run is over.
    pub transport: Box<dyn Transport>,
}
impl fmt::Debug for RunEndedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = &self.transport;
        debug_fmt_transport!(transport, f)
            .field(&self.outcome)
            .finish()
    }
}

// ExitEvent ===================================================================

/// The last event that can be triggered in the dispensing-run state machine.
/// It causes the event loop to terminate, handing the terminal
/// [`RunOutcome`] and the transport back to the caller that started the run.
pub(crate) struct ExitEvent {
    pub request: LoadRequest,
    pub outcome: RunOutcome,
    pub transport: Box<dyn Transport>,
}
impl fmt::Debug for ExitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = &self.transport;
        debug_fmt_transport!(transport, f)
            .field(&self.outcome)
            .finish()
    }
}

// Events enum =================================================================

/// Events that can be triggered within the dispensing-run state machine of
/// `loadcom`.
///
/// Each possible value holds an `event`, which in turn may hold additional
/// data for the state transition. Such data is passed by the origin state
/// for potential use by the target state.
#[derive(Debug)]
pub(crate) enum Event {
    BeginRun(BeginRunEvent),
    RunEnded(RunEndedEvent),
    Exit(ExitEvent),
}
