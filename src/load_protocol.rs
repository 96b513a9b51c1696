//! `loadcom` dispensing-run protocol.
//!
//! A run is one execution of the counted dispensing operation: the host
//! sends `START:<amount>`, then consumes the device's `PROGRESS:` stream
//! until a termination marker arrives. The run is implemented as a state
//! machine in terms of **states** and typed **events**, with transitions
//! expressed through the `From`/`Into` pattern so that illegal transitions
//! are rejected at compile time.
//!
//! **Example** - Executing a run to completion:
//! ```ignore
//! let mut run = load_protocol::factory(request, transport, &cancel, &mut sink, idle_budget);
//! let (outcome, transport) = run.run();
//! ```

#[macro_use]
mod macros;

mod events;
mod state_machine;
mod states;

pub(crate) use state_machine::factory;

use std::fmt;

// =============================================================================
// Public Interface
// =============================================================================

/// A request to dispense a counted number of BBs.
///
/// A target of zero is a legal no-op request; the run completes immediately
/// without touching the device.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LoadRequest {
    pub target_count: u32,
}

/// One live progress report from the device, in BBs still to dispense.
///
/// The device does not guarantee a monotonically decreasing count; reports
/// are surfaced in exactly the order they arrive.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LoadProgress {
    pub remaining: u32,
}

impl LoadProgress {
    /// Completed fraction of the run, always within `[0, 1]`.
    pub fn fraction(&self, target_count: u32) -> f64 {
        if target_count == 0 {
            return 1.0;
        }
        (target_count.saturating_sub(self.remaining) as f64 / target_count as f64).min(1.0)
    }

    /// Human-readable label for this report.
    pub fn label(&self) -> String {
        format!("Loading... {} BBs left", self.remaining)
    }
}

/// How a dispensing run ended. Terminal; the controller re-enters idle
/// after producing one of these.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RunOutcome {
    /// The device reported the full count dispensed.
    Finished,
    /// The device confirmed an emergency stop.
    Stopped,
    /// The run was abandoned: I/O failure or a device gone silent past the
    /// idle budget.
    Error(String),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Finished => f.write_str("Finished"),
            RunOutcome::Stopped => f.write_str("Stopped"),
            RunOutcome::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Receiver for live progress during a run.
///
/// Invoked zero or more times per run, in arrival order, with the completed
/// fraction and a display label. This is the only yield point a run exposes.
pub trait ProgressSink {
    fn update(&mut self, fraction: f64, label: &str);
}

/// Any `FnMut(fraction, label)` closure works as a sink.
impl<F> ProgressSink for F
where
    F: FnMut(f64, &str),
{
    fn update(&mut self, fraction: f64, label: &str) {
        self(fraction, label)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_clamped_to_unit_interval() {
        let target = 120;
        assert_eq!(LoadProgress { remaining: 120 }.fraction(target), 0.0);
        assert_eq!(LoadProgress { remaining: 0 }.fraction(target), 1.0);
        // Counts above target (device hiccup) clamp instead of going negative.
        assert_eq!(LoadProgress { remaining: 200 }.fraction(target), 0.0);
    }

    #[test]
    fn fraction_with_zero_target_is_complete() {
        assert_eq!(LoadProgress { remaining: 0 }.fraction(0), 1.0);
    }

    #[test]
    fn outcome_display() {
        assert_eq!(RunOutcome::Finished.to_string(), "Finished");
        assert_eq!(RunOutcome::Stopped.to_string(), "Stopped");
        assert_eq!(
            RunOutcome::Error("device silent".into()).to_string(),
            "Error: device silent"
        );
    }
}
