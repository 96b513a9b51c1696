//! Bulk settings exchange with the loader.
//!
//! Reading pulls all five parameters in one `GET_ALL` round trip; writing
//! pushes them one `SET_*` command at a time, each paired with whatever
//! acknowledgement line the firmware sends back. Acks are not validated
//! beyond being read: the protocol does not tag them, so the next line on
//! the wire is taken as the answer to the command just sent.

use log::{debug, warn};

use crate::codec::{Command, DeviceSettings, Reply};
use crate::error::Result;
use crate::transport::Transport;

/// Read all device parameters in one exchange.
///
/// On any decode failure the caller's `prior` values are returned unchanged;
/// the device stays the source of truth and no value is ever invented here.
pub(crate) fn read_all(
    transport: &mut dyn Transport,
    prior: DeviceSettings,
) -> Result<DeviceSettings> {
    transport.write_line(&Command::GetAll.encode())?;
    let line = transport.read_line()?;

    match Reply::decode(&line) {
        Reply::Settings(settings) => Ok(settings),
        _ => {
            warn!("undecodable settings dump {:?}, keeping prior values", line);
            Ok(prior)
        }
    }
}

/// Write all device parameters, one command per parameter, in the fixed
/// order SBB, SPEED, RAMP, DIR, HOLD.
///
/// Stale buffered input is discarded first so a leftover line cannot pass
/// for an acknowledgement. A missing ack (timeout, empty line) is tolerated
/// and never short-circuits the sequence; all five commands always go out.
pub(crate) fn write_all(
    transport: &mut dyn Transport,
    settings: &DeviceSettings,
) -> Result<String> {
    transport.clear_input()?;

    for command in &settings.to_commands() {
        transport.write_line(&command.encode())?;
        let ack = transport.read_line()?;
        if ack.is_empty() {
            debug!("no ack for {} within the read window", command);
        } else {
            debug!("ack for {}: {:?}", command, ack);
        }
    }

    Ok("Settings Saved to Hardware!".into())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{ScriptItem, ScriptedTransport};

    #[test]
    fn read_all_applies_device_dump() {
        let mut transport = ScriptedTransport::new(vec![ScriptItem::Line(
            "SBB:100,SPEED:800,RAMP:300,DIR:0,HOLD:5",
        )]);

        let settings = read_all(&mut transport, DeviceSettings::default()).unwrap();
        assert_eq!(transport.sent(), vec!["GET_ALL"]);
        assert_eq!(
            settings,
            DeviceSettings {
                steps_per_bb: 100,
                speed: 800,
                ramp: 300,
                reverse: false,
                hold_seconds: 5,
            }
        );
    }

    #[test]
    fn read_all_keeps_prior_on_malformed_dump() {
        let prior = DeviceSettings {
            steps_per_bb: 77,
            speed: 555,
            ramp: 111,
            reverse: true,
            hold_seconds: 3,
        };
        for garbage in &[
            ScriptItem::Line("SBB:100,SPEED:800"),
            ScriptItem::Line("bootup chatter"),
            ScriptItem::Timeout,
        ] {
            let mut transport = ScriptedTransport::new(vec![garbage.clone()]);
            assert_eq!(read_all(&mut transport, prior).unwrap(), prior);
        }
    }

    #[test]
    fn write_all_sends_five_commands_in_order() {
        let mut transport = ScriptedTransport::new(vec![
            ScriptItem::Line("OK"),
            ScriptItem::Line("OK"),
            ScriptItem::Line("OK"),
            ScriptItem::Line("OK"),
            ScriptItem::Line("OK"),
        ]);

        let status = write_all(&mut transport, &DeviceSettings::default()).unwrap();
        assert_eq!(status, "Settings Saved to Hardware!");
        assert_eq!(transport.cleared(), 1);
        assert_eq!(
            transport.sent(),
            vec![
                "SET_SBB:100",
                "SET_SPEED:800",
                "SET_RAMP:300",
                "SET_DIR:0",
                "SET_HOLD:5",
            ]
        );
    }

    #[test]
    fn write_all_tolerates_missing_acks() {
        // Every ack read times out; the sequence must still complete.
        let mut transport = ScriptedTransport::silent();

        let status = write_all(&mut transport, &DeviceSettings::default()).unwrap();
        assert_eq!(status, "Settings Saved to Hardware!");
        assert_eq!(transport.sent().len(), 5);
    }
}
