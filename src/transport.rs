//! Line-oriented transport over the serial connection to the loader.
//!
//! The [`Transport`] trait is the seam between the protocol engine and the
//! physical port: everything above it deals in whole text lines, everything
//! below it in bytes and timeouts. Production code uses [`SerialTransport`];
//! the protocol tests script a fake device against the same trait.

use std::io::{Read, Write};

use log::{debug, info};
use serialport::SerialPort;

use crate::error::{Error, Result};
use crate::settings::Settings;

// =============================================================================
// Public Interface
// =============================================================================

/// A byte-stream connection to one loader, exposed as line primitives.
pub trait Transport: Send {
    /// A human-readable name for the endpoint, when one is known.
    fn name(&self) -> Option<String>;

    /// Write `text` followed by a newline terminator, completely.
    fn write_line(&mut self, text: &str) -> Result<()>;

    /// Read one line, blocking up to the configured read timeout.
    ///
    /// Returns an empty string when the timeout expires with nothing to
    /// read; never blocks indefinitely. Trailing newline and whitespace are
    /// stripped, and invalid byte sequences are replaced rather than
    /// failing the read.
    fn read_line(&mut self) -> Result<String>;

    /// Discard any bytes already buffered on the input side, so a stale
    /// reply cannot be misattributed to the next exchange.
    fn clear_input(&mut self) -> Result<()>;
}

/// [`Transport`] implementation over a real serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open and configure the serial port named in `settings`.
    ///
    /// Freshly plugged USB serial adapters can take a moment to accept an
    /// open, so the attempt is retried a few times before giving up.
    pub fn open(settings: &Settings) -> Result<SerialTransport> {
        use retry::{delay, retry_with_index};

        let path = settings
            .path
            .clone()
            .ok_or_else(|| Error::Connection {
                path: "<none>".into(),
                source: serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "no serial endpoint selected",
                ),
            })?;

        let result = retry_with_index(
            delay::Fixed::from_millis(1000).take(4),
            |index| -> std::result::Result<Box<dyn SerialPort>, serialport::Error> {
                debug!("Trying to open {} ({})", &path, index);
                serialport::new(&path, settings.baud_rate)
                    .data_bits(settings.data_bits)
                    .stop_bits(settings.stop_bits)
                    .parity(settings.parity)
                    .flow_control(settings.flow_control)
                    .timeout(settings.read_timeout)
                    .open()
            },
        );

        match result {
            Ok(port) => {
                info!(
                    "Connected to {} at {} baud",
                    port.name().unwrap_or_else(|| path.clone()),
                    settings.baud_rate
                );
                debug!("data_bits    : {:#?}", settings.data_bits);
                debug!("stop_bits    : {:#?}", settings.stop_bits);
                debug!("parity       : {:#?}", settings.parity);
                debug!("flow control : {:#?}", settings.flow_control);
                debug!("read timeout : {:#?}", settings.read_timeout);

                Ok(SerialTransport { port })
            }
            Err(err) => {
                let source = match err {
                    retry::Error::Operation {
                        error,
                        total_delay,
                        tries,
                    } => {
                        info!(
                            "Failed to open the port after {:?} and {} tries: {}",
                            total_delay, tries, error,
                        );
                        error
                    }
                    retry::Error::Internal(_) => serialport::Error::new(
                        serialport::ErrorKind::Unknown,
                        "internal error while retrying to open the port",
                    ),
                };
                Err(Error::Connection { path, source })
            }
        }
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> Option<String> {
        self.port.name()
    }

    fn write_line(&mut self, text: &str) -> Result<()> {
        self.port.write_all(text.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut raw: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];

        // The port's own timeout bounds each read call, so a silent device
        // hands back control after at most `read_timeout` per byte. A
        // timeout mid-line yields whatever arrived so far, same as the
        // firmware's partner tools expect.
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    raw.push(byte[0]);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(String::from_utf8_lossy(&raw).trim_end().to_string())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }
}

// =============================================================================
// Test support
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::Transport;
    use crate::error::Result;

    /// One entry in a scripted device conversation.
    #[derive(Debug, Clone)]
    pub(crate) enum ScriptItem {
        /// The device emits this line.
        Line(&'static str),
        /// The read window expires with nothing received.
        Timeout,
        /// The read fails at the I/O level.
        ReadError,
    }

    /// A [`Transport`] that replays a scripted conversation and records
    /// everything the host sends. Once the script runs out, every further
    /// read behaves as a timeout.
    ///
    /// The recordings live behind shared handles so a test can keep
    /// observing them after the transport was boxed and moved into the
    /// code under test.
    pub(crate) struct ScriptedTransport {
        script: VecDeque<ScriptItem>,
        sent: Arc<Mutex<Vec<String>>>,
        cleared: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<ScriptItem>) -> Self {
            ScriptedTransport {
                script: script.into(),
                sent: Arc::new(Mutex::new(Vec::new())),
                cleared: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn silent() -> Self {
            ScriptedTransport::new(Vec::new())
        }

        /// Everything the host wrote so far, one entry per line.
        pub(crate) fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        /// Shared handle to the write recording.
        pub(crate) fn sent_handle(&self) -> Arc<Mutex<Vec<String>>> {
            Arc::clone(&self.sent)
        }

        /// Number of times the input buffer was cleared.
        pub(crate) fn cleared(&self) -> usize {
            self.cleared.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        fn name(&self) -> Option<String> {
            Some("scripted".into())
        }

        fn write_line(&mut self, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn read_line(&mut self) -> Result<String> {
            match self.script.pop_front() {
                Some(ScriptItem::Line(line)) => Ok(line.to_string()),
                Some(ScriptItem::Timeout) | None => Ok(String::new()),
                Some(ScriptItem::ReadError) => Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "scripted read failure",
                )
                .into()),
            }
        }

        fn clear_input(&mut self) -> Result<()> {
            self.cleared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
