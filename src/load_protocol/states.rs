//! States for the `loadcom` dispensing-run state machine.
//!
//! This module is private and restricted to the
//! [`load_protocol`](crate::load_protocol) scope. The public interface of
//! the dispensing-run state machine is provided by
//! [`load_protocol`](crate::load_protocol).
//!
//! ```ignore
//! use super::states::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use log::{debug, info, log_enabled, warn, Level::Debug};

use super::events::*;
use crate::codec::{Command, Reply};
use crate::load_protocol::{LoadProgress, LoadRequest, ProgressSink, RunOutcome};
use crate::transport::Transport;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Data shared by all states of one run, passed down on every step.
///
/// The cancel flag is owned by the session; the run only reads it. The
/// decode-failure counter makes persistently malformed device output
/// diagnosable instead of silently discarded.
pub(crate) struct RunContext<'a> {
    pub cancel: &'a AtomicBool,
    pub sink: &'a mut dyn ProgressSink,
    /// Maximum silence tolerated from the device before the run is
    /// abandoned with an error.
    pub idle_budget: Duration,
    pub decode_failures: u64,
}

/// Trait adding the ability for a state to be `run` after a transition into
/// it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state can do any work that needs to be done and
    /// when finished, requests a transition to a new state by returning the
    /// appropriate `event`. The `event` is then consumed to create the new
    /// `state` using the corresponding [`From`] trait implementation if
    /// available.
    fn run(&mut self, request: &LoadRequest, ctx: &mut RunContext) -> Event;
}

// Starting State ==============================================================

/// The initial state of the dispensing-run state machine: issue the
/// `START:<amount>` command and emit the initial progress report.
///
/// From the `StartingState`, the state machine can evolve via the following
/// transitions:
///
///  * **[`BeginRunEvent`] => [`RunningState`]** after the start command was
///    written to the device,
///  * **[`RunEndedEvent`] => [`DoneState`]** for a zero-count request
///    (immediately complete, nothing sent) or when the start command could
///    not be written.
pub(crate) struct StartingState {
    /// The transport to be used, already connected and settled.
    ///
    /// Consumed and moved upon the transition out of this state.
    pub transport: Option<Box<dyn Transport>>,
}
impl Runnable for StartingState {
    fn run(&mut self, request: &LoadRequest, ctx: &mut RunContext) -> Event {
        info!("=> Starting ({} BBs)", request.target_count);

        if let Some(mut transport) = self.transport.take() {
            // A zero-count run is a legal no-op. Complete it here so the
            // progress math never divides by the target.
            if request.target_count == 0 {
                ctx.sink.update(1.0, "Nothing to load");
                return Event::RunEnded(RunEndedEvent {
                    request: *request,
                    outcome: RunOutcome::Finished,
                    transport,
                });
            }

            return match transport.write_line(&Command::Start(request.target_count).encode()) {
                Ok(()) => {
                    ctx.sink.update(0.0, "Starting...");
                    Event::BeginRun(BeginRunEvent {
                        request: *request,
                        transport,
                    })
                }
                Err(e) => Event::RunEnded(RunEndedEvent {
                    request: *request,
                    outcome: RunOutcome::Error(e.to_string()),
                    transport,
                }),
            };
        }

        // We should never reach here!
        unreachable!()
    }
}
impl fmt::Debug for StartingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transport {
            Some(transport) => debug_fmt_transport!(transport, f).finish(),
            None => f.debug_tuple("StartingState").finish(),
        }
    }
}

// Running State ===============================================================

/// A `state` of the dispensing-run state machine where `loadcom` consumes
/// the device's progress stream until a termination marker arrives.
///
/// Each pass of the receive loop honors the session's cancel flag (the
/// emergency-stop command is written at most once per run), then blocks on
/// one read bounded by the transport's read timeout. Progress reports are
/// surfaced in arrival order; the remaining count is not assumed to be
/// monotonic. Undecodable lines are counted and skipped, never fatal.
///
/// This state can transition to another state as follows:
///
///  * **[`RunEndedEvent`] => [`DoneState`]** upon a `FINISHED`/`STOPPED`
///    marker, an I/O failure, or a device silent past the idle budget.
pub(crate) struct RunningState {
    /// The transport to be used, with the start command already written.
    ///
    /// Consumed and moved upon the transition to [`DoneState`].
    pub transport: Option<Box<dyn Transport>>,
}
impl Runnable for RunningState {
    fn run(&mut self, request: &LoadRequest, ctx: &mut RunContext) -> Event {
        use hexplay::HexViewBuilder;

        info!("=> Running");

        if let Some(mut transport) = self.transport.take() {
            let mut stop_sent = false;
            let mut last_heard = Instant::now();

            let outcome = loop {
                if ctx.cancel.load(Ordering::SeqCst) && !stop_sent {
                    if let Err(e) = transport.write_line(&Command::Stop.encode()) {
                        break RunOutcome::Error(e.to_string());
                    }
                    info!("stop signal written, waiting for the device to confirm");
                    stop_sent = true;
                }

                let line = match transport.read_line() {
                    Ok(line) => line,
                    Err(e) => break RunOutcome::Error(e.to_string()),
                };

                if line.is_empty() {
                    // Read window expired with nothing received. Keep
                    // polling until the silence outlasts the idle budget.
                    if last_heard.elapsed() >= ctx.idle_budget {
                        break RunOutcome::Error(format!(
                            "device silent for more than {:?}",
                            ctx.idle_budget
                        ));
                    }
                    continue;
                }
                last_heard = Instant::now();

                match Reply::decode(&line) {
                    Reply::Progress(remaining) => {
                        let progress = LoadProgress { remaining };
                        ctx.sink.update(
                            progress.fraction(request.target_count),
                            &progress.label(),
                        );
                    }
                    Reply::Finished => break RunOutcome::Finished,
                    Reply::Stopped => break RunOutcome::Stopped,
                    Reply::Settings(_) | Reply::Unknown => {
                        ctx.decode_failures += 1;
                        debug!("skipping undecodable line: {:?}", line);

                        // Dump the received data in a hex table for
                        // debugging
                        if log_enabled!(Debug) {
                            let view = HexViewBuilder::new(line.as_bytes())
                                .address_offset(0)
                                .row_width(16)
                                .finish();
                            println!("{}", view);
                        }
                    }
                }
            };

            return Event::RunEnded(RunEndedEvent {
                request: *request,
                outcome,
                transport,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}
impl fmt::Debug for RunningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transport {
            Some(transport) => debug_fmt_transport!(transport, f).finish(),
            None => f.debug_tuple("RunningState").finish(),
        }
    }
}

// Done State ==================================================================

/// Reached when the dispensing run arrives at a terminal outcome.
///
/// This state goes into a 2-phase execution. During the initial phase, it
/// runs like any other state to report the outcome and the decode-failure
/// tally. It then triggers the [`ExitEvent`] to cause the run state machine
/// to terminate and hand the transport back.
pub(crate) struct DoneState {
    pub outcome: RunOutcome,
    /// When `true` instructs the run state machine to exit its event loop.
    pub should_exit: bool,
    pub transport: Option<Box<dyn Transport>>,
}
impl Runnable for DoneState {
    fn run(&mut self, request: &LoadRequest, ctx: &mut RunContext) -> Event {
        info!("=> Done ({})", self.outcome);

        if ctx.decode_failures > 0 {
            warn!(
                "{} undecodable line(s) ignored during the run",
                ctx.decode_failures
            );
        }

        if let Some(transport) = self.transport.take() {
            return Event::Exit(ExitEvent {
                request: *request,
                outcome: self.outcome.clone(),
                transport,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}
impl fmt::Debug for DoneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transport {
            Some(transport) => debug_fmt_transport!(transport, f)
                .field(&self.outcome)
                .finish(),
            None => f.debug_tuple("DoneState").finish(),
        }
    }
}
