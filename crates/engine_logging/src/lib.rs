#![deny(missing_docs)]
//! Shared logging utilities for the cloudrender workspace.
//!
//! Every crate logs through the `engine_*` macros below. Each line carries the
//! cooperative pump tick of the thread that emitted it, so interleaved output
//! from operations that share one event loop can be lined up afterwards.

use std::cell::Cell;

#[doc(hidden)]
pub use log;

thread_local! {
    /// Number of cooperative loop pumps performed on this thread.
    static PUMP_TICK: Cell<u64> = const { Cell::new(0) };
}

/// Advances the pump tick for the current thread and returns the new value.
/// The loop bridge calls this once per pump.
pub fn advance_pump_tick() -> u64 {
    PUMP_TICK.with(|v| {
        let next = v.get().wrapping_add(1);
        v.set(next);
        next
    })
}

/// Retrieves the pump tick for the current thread.
/// Returns 0 on threads that never pumped (e.g. blocking workers).
pub fn pump_tick() -> u64 {
    PUMP_TICK.with(|v| v.get())
}

/// Logs a trace-level message tagged with the current pump tick.
#[macro_export]
macro_rules! engine_trace {
    ($($arg:tt)*) => {{
        $crate::log::trace!("[pump {}] {}", $crate::pump_tick(), format_args!($($arg)*));
    }};
}

/// Logs an info-level message tagged with the current pump tick.
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {{
        $crate::log::info!("[pump {}] {}", $crate::pump_tick(), format_args!($($arg)*));
    }};
}

/// Logs a debug-level message tagged with the current pump tick.
#[macro_export]
macro_rules! engine_debug {
    ($($arg:tt)*) => {{
        $crate::log::debug!("[pump {}] {}", $crate::pump_tick(), format_args!($($arg)*));
    }};
}

/// Logs a warn-level message tagged with the current pump tick.
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {{
        $crate::log::warn!("[pump {}] {}", $crate::pump_tick(), format_args!($($arg)*));
    }};
}

/// Logs an error-level message tagged with the current pump tick.
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {{
        $crate::log::error!("[pump {}] {}", $crate::pump_tick(), format_args!($($arg)*));
    }};
}

/// Initializes a terminal logger for use in tests.
///
/// Safe to call from every test: it no-ops if a logger is already installed.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}
