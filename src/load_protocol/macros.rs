//! Helper macros for the dispensing-run state machine modules.

/// Generate debug formatting code for a [`Transport`](crate::transport::Transport)
/// trait object carried by a state or an event.
#[macro_export]
macro_rules! debug_fmt_transport {
    ($transport:ident, $f:ident) => {
        $f.debug_tuple("").field(&$transport.name())
    };
}
