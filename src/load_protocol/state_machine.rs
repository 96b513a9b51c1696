//! `loadcom` dispensing-run state machine.
//!
//! One run drives the loader from the start command to a terminal outcome:
//!
//! ```text
//!  .----------.             .---------.              .------.
//!  | Starting |--BeginRun-->| Running |--RunEnded--->| Done |--Exit--> END
//!  '----------'             '---------'              '------'
//!        |                                               ^
//!        '------RunEnded (zero target / start failed)----'
//! ```
//!
//! The transport travels through the states and is surrendered back to the
//! caller together with the terminal [`RunOutcome`] when the machine exits.

use std::{sync::atomic::AtomicBool, time::Duration};

use super::events::*;
use super::states::*;
use crate::load_protocol::{LoadRequest, ProgressSink, RunOutcome};
use crate::transport::Transport;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Represents one dispensing run. Use the `factory()` function to get an
/// instance then execute it by calling its `run()` method.
pub(crate) struct DispensingRun<'a> {
    sm: LoadStates,
    ctx: RunContext<'a>,
}
impl DispensingRun<'_> {
    /// The run state machine event loop runs until the `Done` state is
    /// reached and its `should_exit` flag is set. At such point, the event
    /// loop terminates and hands back the terminal outcome along with the
    /// transport that was lent to the run.
    pub fn run(&mut self) -> (RunOutcome, Box<dyn Transport>) {
        loop {
            self.sm = self.sm.step(&mut self.ctx);
            if let LoadStates::Done(sm) = &mut self.sm {
                if sm.state.should_exit {
                    let transport = sm
                        .state
                        .transport
                        .take()
                        .unwrap_or_else(|| unreachable!("transport lost during the run"));
                    return (sm.state.outcome.clone(), transport);
                }
            }
        }
    }
}

/// Factory function for the dispensing-run state machine. Use it to get an
/// instance of the run, which you can execute by invoking its `run()`
/// method.
pub(crate) fn factory<'a>(
    request: LoadRequest,
    transport: Box<dyn Transport>,
    cancel: &'a AtomicBool,
    sink: &'a mut dyn ProgressSink,
    idle_budget: Duration,
) -> DispensingRun<'a> {
    DispensingRun {
        // The machine naturally starts in the `Starting` state.
        sm: LoadStates::Starting(LoadSM::new(request, transport)),
        ctx: RunContext {
            cancel,
            sink,
            idle_budget,
            decode_failures: 0,
        },
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The raw state machine implementing one dispensing run.
///
/// This is a private interface, abstracted for a simpler and more intuitive
/// use in the crate-public `DispensingRun` interface.
///
/// Note that using a generic type that holds the current state serves two
/// purposes. It allows for also having data shared by all states that is
/// not really part of state data (the request being executed). Additionally,
/// it's nicer when debugging to see the state machine and the current state
/// it is holding at any time.
#[derive(Debug)]
struct LoadSM<S: Runnable> {
    request: LoadRequest,
    state: S,
}
impl<S: Runnable> LoadSM<S> {
    fn run(&mut self, ctx: &mut RunContext) -> Event {
        self.state.run(&self.request, ctx)
    }
}

/// The state machine starts in the `StartingState`.
impl LoadSM<StartingState> {
    fn new(request: LoadRequest, transport: Box<dyn Transport>) -> Self {
        LoadSM {
            request,
            state: StartingState {
                transport: Some(transport),
            },
        }
    }
}

/// An enum wrapper around the states of the dispensing-run state machine. It
/// provides a simpler and more intuitive model for manipulating states and
/// their transitions.
enum LoadStates {
    Starting(LoadSM<StartingState>),
    Running(LoadSM<RunningState>),
    Done(LoadSM<DoneState>),
}
impl LoadStates {
    /// The unit of work in the state machine event loop. It checks the
    /// current state and the current event and decides the next transition.
    /// State transitions from events are implemented using the rust
    /// `From`/`Into` pattern. Most of the potential errors of
    /// state/event/transition mismatches can be caught at compile time.
    fn step(&mut self, ctx: &mut RunContext) -> Self {
        match self {
            LoadStates::Starting(sm) => {
                let event = sm.run(ctx);
                match event {
                    Event::BeginRun(ev) => LoadStates::Running(ev.into()),
                    Event::RunEnded(ev) => LoadStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            LoadStates::Running(sm) => {
                let event = sm.run(ctx);
                match event {
                    Event::RunEnded(ev) => LoadStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            LoadStates::Done(sm) => {
                let event = sm.run(ctx);
                match event {
                    Event::Exit(ev) => LoadStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<BeginRunEvent> for LoadSM<RunningState> {
    fn from(event: BeginRunEvent) -> LoadSM<RunningState> {
        LoadSM {
            request: event.request,
            state: RunningState {
                transport: Some(event.transport),
            },
        }
    }
}

impl From<RunEndedEvent> for LoadSM<DoneState> {
    fn from(event: RunEndedEvent) -> LoadSM<DoneState> {
        LoadSM {
            request: event.request,
            state: DoneState {
                outcome: event.outcome,
                should_exit: false,
                transport: Some(event.transport),
            },
        }
    }
}

impl From<ExitEvent> for LoadSM<DoneState> {
    fn from(event: ExitEvent) -> LoadSM<DoneState> {
        LoadSM {
            request: event.request,
            state: DoneState {
                outcome: event.outcome,
                should_exit: true,
                transport: Some(event.transport),
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::transport::testing::{ScriptItem, ScriptedTransport};

    /// Execute one scripted run and collect everything observable: the
    /// outcome, the progress events, and the lines the host wrote.
    fn run_scripted(
        target_count: u32,
        cancel_upfront: bool,
        idle_budget: Duration,
        script: Vec<ScriptItem>,
    ) -> (RunOutcome, Vec<(f64, String)>, Vec<String>) {
        let cancel = AtomicBool::new(false);
        cancel.store(cancel_upfront, Ordering::SeqCst);

        let mut events: Vec<(f64, String)> = Vec::new();
        let mut sink = |fraction: f64, label: &str| {
            events.push((fraction, label.to_string()));
        };

        let transport = ScriptedTransport::new(script);
        let sent = transport.sent_handle();
        let mut run = factory(
            LoadRequest { target_count },
            Box::new(transport),
            &cancel,
            &mut sink,
            idle_budget,
        );
        let (outcome, returned) = run.run();
        // The run always hands the transport back, whatever the outcome.
        assert!(returned.name().is_some());

        let sent = sent.lock().unwrap().clone();
        (outcome, events, sent)
    }

    const BUDGET: Duration = Duration::from_secs(10);

    #[test]
    fn full_run_finishes() {
        let (outcome, events, sent) = run_scripted(
            120,
            false,
            BUDGET,
            vec![
                ScriptItem::Line("PROGRESS:119"),
                ScriptItem::Line("PROGRESS:60"),
                ScriptItem::Line("FINISHED"),
            ],
        );

        assert_eq!(outcome, RunOutcome::Finished);
        assert_eq!(sent, vec!["START:120"]);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], (0.0, "Starting...".to_string()));
        assert!((events[1].0 - 1.0 / 120.0).abs() < 1e-9);
        assert_eq!(events[1].1, "Loading... 119 BBs left");
        assert!((events[2].0 - 0.5).abs() < 1e-9);
        assert_eq!(events[2].1, "Loading... 60 BBs left");
    }

    #[test]
    fn zero_target_completes_without_touching_the_device() {
        let (outcome, events, sent) = run_scripted(0, false, BUDGET, vec![]);

        assert_eq!(outcome, RunOutcome::Finished);
        assert!(sent.is_empty());
        assert_eq!(events, vec![(1.0, "Nothing to load".to_string())]);
    }

    #[test]
    fn stopped_marker_ends_the_run() {
        let (outcome, _, sent) = run_scripted(
            100,
            false,
            BUDGET,
            vec![
                ScriptItem::Line("PROGRESS:40"),
                ScriptItem::Line("STOPPED"),
            ],
        );

        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(sent, vec!["START:100"]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (outcome, events, _) = run_scripted(
            120,
            false,
            BUDGET,
            vec![
                ScriptItem::Line("PROGRESS:not-a-number"),
                ScriptItem::Line("motor temp nominal"),
                ScriptItem::Timeout,
                ScriptItem::Line("PROGRESS:60"),
                ScriptItem::Line("FINISHED"),
            ],
        );

        assert_eq!(outcome, RunOutcome::Finished);
        // Only the initial event and the one valid progress line surface.
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].1, "Loading... 60 BBs left");
    }

    #[test]
    fn non_monotonic_remaining_is_surfaced_in_arrival_order() {
        let (_, events, _) = run_scripted(
            100,
            false,
            BUDGET,
            vec![
                ScriptItem::Line("PROGRESS:50"),
                ScriptItem::Line("PROGRESS:75"),
                ScriptItem::Line("FINISHED"),
            ],
        );

        assert!((events[1].0 - 0.5).abs() < 1e-9);
        assert!((events[2].0 - 0.25).abs() < 1e-9);
    }

    #[test]
    fn silent_device_exhausts_the_idle_budget() {
        let (outcome, _, sent) = run_scripted(50, false, Duration::from_millis(0), vec![]);

        assert_eq!(sent, vec!["START:50"]);
        match outcome {
            RunOutcome::Error(reason) => assert!(reason.contains("silent")),
            other => panic!("expected an error outcome, got {:?}", other),
        }
    }

    #[test]
    fn cancel_flag_writes_stop_exactly_once() {
        let (outcome, _, sent) = run_scripted(
            60,
            true,
            BUDGET,
            vec![
                ScriptItem::Timeout,
                ScriptItem::Line("PROGRESS:55"),
                ScriptItem::Line("STOPPED"),
            ],
        );

        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(sent, vec!["START:60", "S"]);
    }

    #[test]
    fn read_failure_ends_the_run_with_an_error() {
        let (outcome, _, _) = run_scripted(
            30,
            false,
            BUDGET,
            vec![ScriptItem::Line("PROGRESS:29"), ScriptItem::ReadError],
        );

        match outcome {
            RunOutcome::Error(reason) => assert!(reason.contains("scripted read failure")),
            other => panic!("expected an error outcome, got {:?}", other),
        }
    }
}
