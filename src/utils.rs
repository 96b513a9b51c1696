//! Helper functions to deal with serial endpoints and the keyboard.

mod keyboard;
mod ports;

pub use keyboard::poll_cancel_key;
pub use ports::{list_endpoints, select_endpoint, wait_for_endpoint};
