//! Serial endpoint enumeration and selection.

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use serialport::{available_ports, SerialPortType};

use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

use crate::utils::poll_cancel_key;

//==============================================================================
// Public Interface
//==============================================================================

/// Enumerate the serial endpoints available on the system.
///
/// USB serial controllers are listed with their manufacturer/product info
/// appended after the device path; other port types (including virtual ports
/// used for testing) are listed by path alone. Enumeration failures yield an
/// empty list, never an error.
pub fn list_endpoints() -> Vec<String> {
    let mut endpoints = vec![];
    match available_ports() {
        Ok(ports) => {
            for p in ports {
                match p.port_type {
                    // USB ports give us more info about the connected serial
                    // controller
                    SerialPortType::UsbPort(info) => {
                        let extended_name = format!(
                            "{}: ({} / {})",
                            p.port_name,
                            info.manufacturer.as_ref().map_or("", String::as_str),
                            info.product.as_ref().map_or("", String::as_str)
                        );
                        endpoints.push(extended_name);
                    }
                    _ => {
                        endpoints.push(p.port_name);
                    }
                }
            }
        }
        Err(ref e) => {
            info!("error: {}", e.to_string());
        }
    }
    endpoints
}

/// Interactively pick the endpoint the loader is plugged into.
///
/// When no endpoint is available yet, waits with a spinner until at least
/// one appears (the loader may be plugged in while we wait). The user may
/// cancel the selection to request a refresh of the list; `None` is only
/// returned for a cancelled selection so the caller can loop.
pub fn select_endpoint() -> Option<String> {
    let mut found_endpoints;
    let mut attempt: usize = 1;
    let waiting_period: usize = 1;

    let pb = spinner();

    // Avoid cursor flicker during the waiting
    Term::stdout().hide_cursor().unwrap();
    loop {
        found_endpoints = list_endpoints();
        if !found_endpoints.is_empty() {
            pb.finish_with_message("Select the loader's port:");
            break;
        }

        let waited = attempt * waiting_period;
        pb.set_message(format!(
            "[{:03}s] ⌛ Waiting for the loader to be plugged in...",
            style(waited).dim()
        ));
        attempt += 1;

        thread::sleep(Duration::from_secs(waiting_period as u64));
    }
    Term::stdout().show_cursor().unwrap();

    let selection = select_endpoint_interactive(&found_endpoints);
    match &selection {
        Some(path) => {
            pb.finish_with_message(format!("👍 Using loader port {}", style(path).green()));
        }
        None => {
            pb.finish_with_message("❌ Selection canceled -> refreshing the list...");
        }
    }
    selection
}

/// Check for an endpoint with the given path on the system. If not
/// immediately found, enter a waiting loop, re-enumerating every period
/// until the device appears. While waiting, the user can cancel by pressing
/// `Esc` or `q`.
///
/// Returns `true` when the wait was cancelled by the user.
pub fn wait_for_endpoint(path: &str) -> bool {
    let pb = spinner();

    let mut attempt: usize = 1;
    let waiting_period = 2;

    pb.set_message(format!(
        "[{:03}s] ⏳ Waiting for {} to be ready (Esc to cancel)...",
        style(waiting_period).dim(),
        style(path).cyan()
    ));

    // Two threads cooperate here: the main thread polls for the device, a
    // second one polls the keyboard for cancellation. Termination is
    // coordinated over two channels, one per direction:
    //
    //  - when the device is ready, the main thread tells the keyboard
    //    thread to stop over `done_tx`,
    //  - when the cancel key is pressed, the keyboard thread tells the main
    //    thread to stop waiting over `cancel_tx`.
    let (cancel_tx, cancel_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    let keyboard_thread = thread::spawn(move || loop {
        if done_rx.try_recv().is_ok() {
            break;
        }
        if let Ok(cancel) = poll_cancel_key() {
            if cancel {
                cancel_tx
                    .send(1)
                    .expect("an unrecoverable error while sending over cancel_tx");
                break;
            }
        }
    });

    let mut cancelled = false;
    loop {
        let found = list_endpoints()
            .iter()
            .any(|detected| detected.starts_with(path));
        if found {
            done_tx
                .send(1)
                .expect("an unrecoverable error while sending over done_tx");

            pb.finish_with_message(format!("👍 Loader port {} is ready", style(path).green()));
            break;
        }

        let waited = attempt * waiting_period;
        pb.set_message(format!(
            "[{:03}s] ⏳ Waiting for {} to be ready (Esc to cancel)...",
            style(waited).dim(),
            style(path).cyan()
        ));

        // Wait out the period on the cancellation channel so a cancel key
        // interrupts the wait immediately.
        match cancel_rx.recv_timeout(Duration::from_secs(waiting_period as u64)) {
            Ok(_) => {
                pb.finish_with_message(format!(
                    "❌ Waiting on port {} canceled after {} seconds",
                    style(path).cyan(),
                    style(waited).dim()
                ));
                cancelled = true;
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                // try again after a timeout
            }
            Err(RecvTimeoutError::Disconnected) => {
                // no point in waiting anymore :'(
                cancelled = true;
                break;
            }
        }

        attempt += 1;
    }

    keyboard_thread
        .join()
        .expect("an unrecoverable error while joining the keyboard thread");

    cancelled
}

//==============================================================================
// Private stuff
//==============================================================================

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            // For more spinners check out the cli-spinners project:
            // https://github.com/sindresorhus/cli-spinners/blob/master/spinners.json
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[LC] {spinner:.blue} {msg}"),
    );
    pb
}

fn select_endpoint_interactive(endpoints: &[String]) -> Option<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    for item in endpoints {
        select.item(item);
    }

    // The listed entries carry the USB descriptor info after the path;
    // strip it back off the selected one.
    let selection = select.default(0).interact_on_opt(&term).unwrap();
    selection.map(|x| String::from(endpoints.get(x).unwrap().split(':').next().unwrap()))
}
