//! Wire codec for the loader's newline-delimited text protocol.
//!
//! Every outgoing command is a single `NAME:VALUE` line (pure `NAME` for
//! commands without a value). Incoming lines are either a full settings dump,
//! a progress report, a run-termination marker, or free-form firmware chatter
//! that the protocol is required to tolerate.

use std::fmt;

// =============================================================================
// Device settings
// =============================================================================

/// The loader parameters held in the device's own storage.
///
/// Values here are advisory until they have round-tripped through the device;
/// the device is the source of truth. The range constants mirror the
/// firmware's configured limits and are only used to pre-clamp user input.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DeviceSettings {
    /// Stepper steps advanced per BB dispensed.
    pub steps_per_bb: u32,
    /// Inter-step delay in microseconds; smaller is faster.
    pub speed: u32,
    /// Number of steps spent ramping up to full speed.
    pub ramp: u32,
    /// Run the stepper in the reverse direction.
    pub reverse: bool,
    /// Seconds the motor holds torque after a run completes.
    pub hold_seconds: u32,
}

impl DeviceSettings {
    /// Firmware-side bounds for the step delay.
    pub const SPEED_RANGE: (u32, u32) = (10, 2000);
    /// Firmware-side bounds for the ramp step count.
    pub const RAMP_RANGE: (u32, u32) = (0, 5000);
    /// Firmware-side bounds for the hold time.
    pub const HOLD_RANGE: (u32, u32) = (0, 60);

    /// The five `SET_*` commands that persist these settings, in the fixed
    /// order the firmware expects them: SBB, SPEED, RAMP, DIR, HOLD.
    pub fn to_commands(&self) -> [Command; 5] {
        [
            Command::SetStepsPerBb(self.steps_per_bb),
            Command::SetSpeed(self.speed),
            Command::SetRamp(self.ramp),
            Command::SetDirection(self.reverse),
            Command::SetHold(self.hold_seconds),
        ]
    }

    /// Decode a full settings dump of the form
    /// `SBB:<int>,SPEED:<int>,RAMP:<int>,DIR:<0|1>,HOLD:<int>`.
    ///
    /// The dump must have exactly five comma-separated fields with the keys
    /// in this exact order; anything else is rejected so the caller keeps
    /// its prior values.
    pub fn decode_dump(line: &str) -> Option<DeviceSettings> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 5 {
            return None;
        }

        let reverse = match field_value(fields[3], "DIR")? {
            0 => false,
            1 => true,
            _ => return None,
        };

        Some(DeviceSettings {
            steps_per_bb: field_value(fields[0], "SBB")?,
            speed: field_value(fields[1], "SPEED")?,
            ramp: field_value(fields[2], "RAMP")?,
            reverse,
            hold_seconds: field_value(fields[4], "HOLD")?,
        })
    }
}

impl Default for DeviceSettings {
    /// The factory parameters the loader firmware ships with.
    fn default() -> Self {
        DeviceSettings {
            steps_per_bb: 100,
            speed: 800,
            ramp: 300,
            reverse: false,
            hold_seconds: 5,
        }
    }
}

/// Parse one `KEY:<int>` dump field, enforcing the expected key.
fn field_value(field: &str, key: &str) -> Option<u32> {
    let mut parts = field.splitn(2, ':');
    if parts.next()? != key {
        return None;
    }
    parts.next()?.trim().parse().ok()
}

// =============================================================================
// Outgoing commands
// =============================================================================

/// A command the host can send to the loader.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Command {
    SetStepsPerBb(u32),
    SetSpeed(u32),
    SetRamp(u32),
    SetDirection(bool),
    SetHold(u32),
    GetAll,
    Start(u32),
    /// Emergency stop. Single letter on the wire so the firmware can match
    /// it without buffering a full token.
    Stop,
}

impl Command {
    /// Render the command as its wire line, without the newline terminator
    /// (the transport appends it).
    pub fn encode(&self) -> String {
        match *self {
            Command::SetStepsPerBb(v) => format!("SET_SBB:{}", v),
            Command::SetSpeed(v) => format!("SET_SPEED:{}", v),
            Command::SetRamp(v) => format!("SET_RAMP:{}", v),
            Command::SetDirection(reverse) => {
                format!("SET_DIR:{}", if reverse { 1 } else { 0 })
            }
            Command::SetHold(v) => format!("SET_HOLD:{}", v),
            Command::GetAll => "GET_ALL".into(),
            Command::Start(amount) => format!("START:{}", amount),
            Command::Stop => "S".into(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

// =============================================================================
// Incoming replies
// =============================================================================

/// A decoded line from the loader.
///
/// `Unknown` covers everything the decoder cannot make sense of, including
/// malformed progress payloads; the protocol requires such lines to be
/// skipped, never to abort an exchange.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reply {
    Settings(DeviceSettings),
    /// BBs still remaining in the current run.
    Progress(u32),
    Finished,
    Stopped,
    Unknown,
}

impl Reply {
    /// Decode one incoming line.
    ///
    /// Termination markers are checked first: a line containing `FINISHED`
    /// or `STOPPED` anywhere ends a run even when it also happens to start
    /// with `PROGRESS:`.
    pub fn decode(line: &str) -> Reply {
        if line.contains("FINISHED") {
            return Reply::Finished;
        }
        if line.contains("STOPPED") {
            return Reply::Stopped;
        }
        if let Some(payload) = line.strip_prefix("PROGRESS:") {
            return match payload.trim().parse() {
                Ok(remaining) => Reply::Progress(remaining),
                Err(_) => Reply::Unknown,
            };
        }
        match DeviceSettings::decode_dump(line) {
            Some(settings) => Reply::Settings(settings),
            None => Reply::Unknown,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_set_commands() {
        assert_eq!(Command::SetStepsPerBb(100).encode(), "SET_SBB:100");
        assert_eq!(Command::SetSpeed(800).encode(), "SET_SPEED:800");
        assert_eq!(Command::SetRamp(300).encode(), "SET_RAMP:300");
        assert_eq!(Command::SetDirection(true).encode(), "SET_DIR:1");
        assert_eq!(Command::SetDirection(false).encode(), "SET_DIR:0");
        assert_eq!(Command::SetHold(5).encode(), "SET_HOLD:5");
    }

    #[test]
    fn encode_valueless_commands() {
        assert_eq!(Command::GetAll.encode(), "GET_ALL");
        assert_eq!(Command::Stop.encode(), "S");
        assert_eq!(Command::Start(120).encode(), "START:120");
    }

    #[test]
    fn decode_settings_dump() {
        let decoded = DeviceSettings::decode_dump("SBB:100,SPEED:800,RAMP:300,DIR:0,HOLD:5");
        assert_eq!(
            decoded,
            Some(DeviceSettings {
                steps_per_bb: 100,
                speed: 800,
                ramp: 300,
                reverse: false,
                hold_seconds: 5,
            })
        );
    }

    #[test]
    fn decode_settings_dump_reverse() {
        let decoded = DeviceSettings::decode_dump("SBB:128,SPEED:450,RAMP:0,DIR:1,HOLD:0");
        assert!(decoded.unwrap().reverse);
    }

    #[test]
    fn dump_round_trips_through_set_commands() {
        let settings = DeviceSettings::decode_dump("SBB:64,SPEED:1200,RAMP:2500,DIR:1,HOLD:12")
            .expect("valid dump");
        let encoded: Vec<String> = settings.to_commands().iter().map(Command::encode).collect();
        assert_eq!(
            encoded,
            vec![
                "SET_SBB:64",
                "SET_SPEED:1200",
                "SET_RAMP:2500",
                "SET_DIR:1",
                "SET_HOLD:12",
            ]
        );
    }

    #[test]
    fn dump_rejects_wrong_field_count() {
        assert_eq!(
            DeviceSettings::decode_dump("SBB:100,SPEED:800,RAMP:300,DIR:0"),
            None
        );
        assert_eq!(
            DeviceSettings::decode_dump("SBB:100,SPEED:800,RAMP:300,DIR:0,HOLD:5,EXTRA:1"),
            None
        );
        assert_eq!(DeviceSettings::decode_dump(""), None);
    }

    #[test]
    fn dump_rejects_non_integer_value() {
        assert_eq!(
            DeviceSettings::decode_dump("SBB:abc,SPEED:800,RAMP:300,DIR:0,HOLD:5"),
            None
        );
        assert_eq!(
            DeviceSettings::decode_dump("SBB:100,SPEED:800,RAMP:300,DIR:2,HOLD:5"),
            None
        );
    }

    #[test]
    fn dump_rejects_out_of_order_fields() {
        assert_eq!(
            DeviceSettings::decode_dump("SPEED:800,SBB:100,RAMP:300,DIR:0,HOLD:5"),
            None
        );
    }

    #[test]
    fn decode_progress() {
        assert_eq!(Reply::decode("PROGRESS:42"), Reply::Progress(42));
        assert_eq!(Reply::decode("PROGRESS:0"), Reply::Progress(0));
    }

    #[test]
    fn decode_progress_malformed_payload() {
        assert_eq!(Reply::decode("PROGRESS:forty"), Reply::Unknown);
        assert_eq!(Reply::decode("PROGRESS:"), Reply::Unknown);
    }

    #[test]
    fn decode_termination_markers() {
        assert_eq!(Reply::decode("FINISHED"), Reply::Finished);
        assert_eq!(Reply::decode("RUN STOPPED BY USER"), Reply::Stopped);
        // A marker wins even on a line that looks like a progress report.
        assert_eq!(Reply::decode("PROGRESS:FINISHED"), Reply::Finished);
    }

    #[test]
    fn decode_ignores_firmware_chatter() {
        assert_eq!(Reply::decode("DEBUG: motor temp ok"), Reply::Unknown);
        assert_eq!(Reply::decode(""), Reply::Unknown);
    }

    #[test]
    fn decode_full_dump_line() {
        assert_eq!(
            Reply::decode("SBB:100,SPEED:800,RAMP:300,DIR:0,HOLD:5"),
            Reply::Settings(DeviceSettings::default())
        );
    }
}
