//! The loadcom session: one logical connection to one loader.
//!
//! A session owns the single live [`Transport`] and sequences the lifecycle
//! `Disconnected -> Connecting -> Connected -> Disconnected`. Every settings
//! or load operation issued while disconnected fails fast with
//! [`Error::NotConnected`] and never touches hardware.
//!
//! All operations run synchronously on the caller's thread; in particular
//! [`Session::start`] blocks for the whole run. Concurrent calls into the
//! same session are not supported and must be serialized by the caller. The
//! one concurrency-safe path is the [`CancelToken`], which another thread
//! may trip to request an emergency stop of a run in flight.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;

use log::{debug, info};

use crate::codec::{Command, DeviceSettings};
use crate::error::{Error, Result};
use crate::load_protocol::{self, LoadRequest, ProgressSink, RunOutcome};
use crate::settings::Settings;
use crate::sync;
use crate::transport::{SerialTransport, Transport};

// =============================================================================
// Public Interface
// =============================================================================

/// Handle for requesting an emergency stop of a run in flight.
///
/// Cloneable and safe to trip from any thread. The run loop observes the
/// request between reads, writes the stop command once, and keeps reading
/// until the device confirms with its termination marker.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Ask the current run to stop. Advisory: the device decides when the
    /// run actually ends.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A control session with one BB loader.
pub struct Session {
    settings: Settings,
    /// Local mirror of the device parameters; refreshed on connect and kept
    /// in step on save. The device remains the source of truth.
    device: DeviceSettings,
    transport: Option<Box<dyn Transport>>,
    cancel: Arc<AtomicBool>,
}

impl Session {
    /// Create a disconnected session. The device-settings mirror starts at
    /// the firmware factory defaults and is replaced by the device's own
    /// values on the first successful connect.
    pub fn new(settings: Settings) -> Self {
        Session {
            settings,
            device: DeviceSettings::default(),
            transport: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// The session's current view of the device parameters.
    pub fn device_settings(&self) -> &DeviceSettings {
        &self.device
    }

    /// A handle other threads can use to stop a run in flight.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            flag: Arc::clone(&self.cancel),
        }
    }

    /// Open the configured endpoint and bring the session up.
    ///
    /// Opening the port resets the loader board, so the session waits out
    /// the settle delay before the first command; without it the opening
    /// exchange is lost in the reset. Then all device parameters are read
    /// in bulk. On open failure the session stays disconnected and the
    /// settings mirror is left untouched.
    pub fn connect(&mut self) -> Result<String> {
        if let Some(transport) = &self.transport {
            let name = transport.name().unwrap_or_else(|| "<unknown>".into());
            return Ok(format!("Connected to {}", name));
        }

        info!("=> Connecting");
        let transport = SerialTransport::open(&self.settings)?;

        debug!(
            "settling for {:?} while the board resets",
            self.settings.settle_delay
        );
        thread::sleep(self.settings.settle_delay);

        self.attach(Box::new(transport))
    }

    /// Bring the session up over an already-open transport: bulk-read the
    /// device parameters and transition to connected.
    pub(crate) fn attach(&mut self, mut transport: Box<dyn Transport>) -> Result<String> {
        self.device = sync::read_all(transport.as_mut(), self.device)?;

        let name = transport.name().unwrap_or_else(|| "<unknown>".into());
        self.transport = Some(transport);
        info!("=> Connected");

        Ok(format!("Connected to {}", name))
    }

    /// Drop the connection if one is live. Idempotent; safe to call on an
    /// already-disconnected session.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            info!("=> Disconnected");
        }
    }

    /// Re-read all device parameters, keeping the prior values on an
    /// undecodable reply.
    pub fn reload_settings(&mut self) -> Result<DeviceSettings> {
        let prior = self.device;
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        self.device = sync::read_all(transport.as_mut(), prior)?;
        Ok(self.device)
    }

    /// Persist `settings` to the device, one command per parameter, and
    /// update the local mirror.
    pub fn save_settings(&mut self, settings: DeviceSettings) -> Result<String> {
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        let status = sync::write_all(transport.as_mut(), &settings)?;
        self.device = settings;
        Ok(status)
    }

    /// Execute one counted dispensing run to its terminal outcome.
    ///
    /// Blocks the caller for the full duration of the run; `sink` receives
    /// progress reports in arrival order. The transport is lent to the run
    /// state machine and reclaimed afterwards, whatever the outcome.
    pub fn start(&mut self, target_count: u32, sink: &mut dyn ProgressSink) -> Result<RunOutcome> {
        let transport = self.transport.take().ok_or(Error::NotConnected)?;
        // A stale stop request from a previous run must not kill this one.
        self.cancel.store(false, Ordering::SeqCst);

        let mut run = load_protocol::factory(
            LoadRequest { target_count },
            transport,
            &self.cancel,
            sink,
            self.settings.run_idle_budget,
        );
        let (outcome, transport) = run.run();

        self.transport = Some(transport);
        Ok(outcome)
    }

    /// Write the emergency-stop command.
    ///
    /// Returns as soon as the command is on the wire; it is the run loop's
    /// own read that eventually observes the device's `STOPPED` marker.
    pub fn stop(&mut self) -> Result<String> {
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        transport.write_line(&Command::Stop.encode())?;
        Ok("Stop Signal Sent".into())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsBuilder;
    use crate::transport::testing::{ScriptItem, ScriptedTransport};

    fn session() -> Session {
        Session::new(SettingsBuilder::new().finalize())
    }

    #[test]
    fn operations_while_disconnected_fail_fast() {
        let mut session = session();
        assert!(!session.is_connected());

        assert!(matches!(
            session.reload_settings(),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            session.save_settings(DeviceSettings::default()),
            Err(Error::NotConnected)
        ));
        assert!(matches!(session.stop(), Err(Error::NotConnected)));

        let mut sink = |_: f64, _: &str| {};
        assert!(matches!(
            session.start(10, &mut sink),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn attach_reads_device_settings() {
        let mut session = session();
        let transport = ScriptedTransport::new(vec![ScriptItem::Line(
            "SBB:100,SPEED:800,RAMP:300,DIR:0,HOLD:5",
        )]);

        let status = session.attach(Box::new(transport)).unwrap();
        assert_eq!(status, "Connected to scripted");
        assert!(session.is_connected());
        assert_eq!(
            *session.device_settings(),
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
    fn attach_keeps_defaults_on_bad_dump() {
        let mut session = session();
        let transport = ScriptedTransport::new(vec![ScriptItem::Line("SBB:nope")]);

        session.attach(Box::new(transport)).unwrap();
        assert_eq!(*session.device_settings(), DeviceSettings::default());
    }

    #[test]
    fn save_updates_the_local_mirror() {
        let mut session = session();
        session
            .attach(Box::new(ScriptedTransport::silent()))
            .unwrap();

        let wanted = DeviceSettings {
            steps_per_bb: 64,
            speed: 500,
            ramp: 100,
            reverse: true,
            hold_seconds: 2,
        };
        let status = session.save_settings(wanted).unwrap();
        assert_eq!(status, "Settings Saved to Hardware!");
        assert_eq!(*session.device_settings(), wanted);
    }

    #[test]
    fn start_reclaims_the_transport_after_the_run() {
        let mut session = session();
        let transport = ScriptedTransport::new(vec![
            ScriptItem::Timeout, // GET_ALL reply missing; defaults kept
            ScriptItem::Line("PROGRESS:5"),
            ScriptItem::Line("FINISHED"),
        ]);
        session.attach(Box::new(transport)).unwrap();

        let mut sink = |_: f64, _: &str| {};
        let outcome = session.start(10, &mut sink).unwrap();
        assert_eq!(outcome, RunOutcome::Finished);
        assert!(session.is_connected());
    }

    #[test]
    fn stop_writes_the_single_letter_command() {
        let mut session = session();
        let transport = ScriptedTransport::silent();
        let sent = transport.sent_handle();
        session.attach(Box::new(transport)).unwrap();

        let status = session.stop().unwrap();
        assert_eq!(status, "Stop Signal Sent");
        assert_eq!(sent.lock().unwrap().last().unwrap(), "S");
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut session = session();
        session.disconnect();
        session
            .attach(Box::new(ScriptedTransport::silent()))
            .unwrap();
        session.disconnect();
        assert!(!session.is_connected());
        session.disconnect();
    }

    #[test]
    fn cancel_token_round_trip() {
        let session = session();
        let token = session.cancel_token();
        assert!(!token.is_requested());
        token.request_stop();
        assert!(token.is_requested());
    }
}
