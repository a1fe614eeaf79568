//! The seam between the engine and the application that embeds it.

use std::time::Duration;

pub type TimerId = u64;

/// Periodic callbacks owned by the host's own run loop.
///
/// The host calls `Orchestrator::on_timer` whenever a registered timer fires.
pub trait HostTimers {
    fn add_timer(&mut self, interval: Duration) -> TimerId;
    fn remove_timer(&mut self, id: TimerId);
}
