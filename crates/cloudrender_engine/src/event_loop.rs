//! Cooperative event loop driven by the host's timer instead of a thread.
//!
//! One current-thread tokio runtime and a `LocalSet` live inside the bridge.
//! Nothing runs until the host calls [`LoopBridge::pump_once`]; blocking work
//! is pushed to the runtime's worker pool and picked up by a later pump.

use std::cell::Cell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::time::Duration;

use engine_logging::{advance_pump_tick, engine_debug, engine_error, engine_warn};
use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::task::{AbortHandle, JoinError, JoinHandle, LocalSet};

use crate::host::{HostTimers, TimerId};

/// Upper bound on concurrently running blocking network calls.
pub const WORKER_POOL_SIZE: usize = 10;

pub const DEFAULT_PUMP_INTERVAL: Duration = Duration::from_millis(1);

const DRAIN_PUMP_LIMIT: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("could not build the event loop runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Pending,
    Completed,
    Cancelled,
    Panicked,
}

/// The three things a host-driven scheduler must offer.
pub trait Scheduler {
    /// Advances the ready queue once. Returns whether the caller should stop
    /// pumping after this call.
    fn pump_once(&mut self) -> bool;
    fn schedule_boxed(&mut self, label: &str, task: LocalBoxFuture<'static, ()>) -> AbortHandle;
    fn cancel_all(&mut self);
}

/// Pumps until the scheduler reports it is idle or `max_pumps` is reached.
/// Returns whether it went idle.
pub fn pump_until_idle<S: Scheduler + ?Sized>(scheduler: &mut S, max_pumps: usize) -> bool {
    (0..max_pumps).any(|_| scheduler.pump_once())
}

struct TrackedTask {
    label: String,
    outcome: Rc<Cell<TaskOutcome>>,
    abort: AbortHandle,
}

/// Records `Cancelled` if the task future is dropped before it finished.
struct OutcomeGuard {
    outcome: Rc<Cell<TaskOutcome>>,
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if self.outcome.get() == TaskOutcome::Pending {
            self.outcome.set(TaskOutcome::Cancelled);
        }
    }
}

pub struct LoopBridge {
    runtime: Runtime,
    local: LocalSet,
    tasks: Vec<TrackedTask>,
    pump_timer: Option<TimerId>,
    pump_interval: Duration,
}

impl LoopBridge {
    pub fn new() -> Result<Self, BridgeError> {
        Self::with_pump_interval(DEFAULT_PUMP_INTERVAL)
    }

    pub fn with_pump_interval(pump_interval: Duration) -> Result<Self, BridgeError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(WORKER_POOL_SIZE)
            .thread_name("cloudrender-worker")
            .build()?;
        Ok(Self {
            runtime,
            local: LocalSet::new(),
            tasks: Vec::new(),
            pump_timer: None,
            pump_interval,
        })
    }

    /// Queues `future` on the loop. It first runs on the next pump.
    pub fn schedule<F>(&mut self, label: impl Into<String>, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let label = label.into();
        let outcome = Rc::new(Cell::new(TaskOutcome::Pending));
        let guard = OutcomeGuard {
            outcome: outcome.clone(),
        };
        let tracked = async move {
            let guard = guard;
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(value) => {
                    guard.outcome.set(TaskOutcome::Completed);
                    value
                }
                Err(payload) => {
                    guard.outcome.set(TaskOutcome::Panicked);
                    std::panic::resume_unwind(payload)
                }
            }
        };

        let handle = self.local.spawn_local(tracked);
        engine_debug!("Scheduled task {label}");
        self.tasks.push(TrackedTask {
            label,
            outcome,
            abort: handle.abort_handle(),
        });
        handle
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.outcome.get() == TaskOutcome::Pending)
            .count()
    }

    /// Runs one iteration of the loop.
    ///
    /// Once nothing is pending it still performs this final pump so completion
    /// wakeups are delivered, then reports `true`.
    pub fn pump_once(&mut self) -> bool {
        advance_pump_tick();

        let stop_after_this_pump = if self.tasks.is_empty() {
            engine_debug!("No more scheduled tasks, stopping after this pump");
            true
        } else if self.pending_tasks() == 0 {
            engine_debug!(
                "All {} tasks are done, collecting outcomes and stopping after this pump",
                self.tasks.len()
            );
            true
        } else {
            false
        };

        self.runtime
            .block_on(self.local.run_until(tokio::task::yield_now()));

        if stop_after_this_pump {
            self.reap_finished();
        }
        stop_after_this_pump
    }

    fn reap_finished(&mut self) {
        self.tasks.retain(|task| {
            match task.outcome.get() {
                TaskOutcome::Pending => return true,
                TaskOutcome::Completed => engine_debug!("Task {}: completed", task.label),
                TaskOutcome::Cancelled => engine_debug!("Task {}: cancelled", task.label),
                TaskOutcome::Panicked => engine_error!("Task {}: panicked", task.label),
            }
            false
        });
    }

    pub fn is_pumping(&self) -> bool {
        self.pump_timer.is_some()
    }

    pub fn is_pump_timer(&self, id: TimerId) -> bool {
        self.pump_timer == Some(id)
    }

    /// Registers the pump timer unless one is already active.
    /// Returns whether a timer was registered by this call.
    pub fn ensure_pumping(&mut self, timers: &mut dyn HostTimers) -> bool {
        if self.pump_timer.is_some() {
            engine_debug!("Pump timer already active");
            return false;
        }
        self.pump_timer = Some(timers.add_timer(self.pump_interval));
        engine_debug!("Started pumping");
        true
    }

    /// Handles one firing of the pump timer. Returns whether pumping stopped.
    pub fn on_pump_timer(&mut self, timers: &mut dyn HostTimers) -> bool {
        if !self.pump_once() {
            return false;
        }
        if let Some(id) = self.pump_timer.take() {
            timers.remove_timer(id);
        }
        engine_debug!("Stopped pumping");
        true
    }

    /// Drives the loop synchronously until `handle` resolves.
    pub fn block_on_task<T>(&mut self, handle: &mut JoinHandle<T>) -> Result<T, JoinError> {
        advance_pump_tick();
        self.runtime.block_on(self.local.run_until(handle))
    }

    /// Aborts every pending task and drains the loop until they have settled.
    pub fn cancel_all(&mut self) {
        for task in &self.tasks {
            if task.outcome.get() == TaskOutcome::Pending {
                engine_debug!("Cancelling task {}", task.label);
                task.abort.abort();
            }
        }
        if !pump_until_idle(self, DRAIN_PUMP_LIMIT) {
            engine_warn!("{} tasks still pending after cancellation", self.pending_tasks());
        }
    }

    /// Cancels everything, releases the pump timer and stops the runtime,
    /// giving in-flight worker calls a short grace period.
    pub fn shutdown(mut self, timers: &mut dyn HostTimers) {
        self.cancel_all();
        if let Some(id) = self.pump_timer.take() {
            timers.remove_timer(id);
        }
        let Self { runtime, local, .. } = self;
        drop(local);
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
        engine_debug!("Event loop shut down");
    }
}

impl Scheduler for LoopBridge {
    fn pump_once(&mut self) -> bool {
        LoopBridge::pump_once(self)
    }

    fn schedule_boxed(&mut self, label: &str, task: LocalBoxFuture<'static, ()>) -> AbortHandle {
        self.schedule(label, task).abort_handle()
    }

    fn cancel_all(&mut self) {
        LoopBridge::cancel_all(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    pub(crate) struct FakeTimers {
        next_id: TimerId,
        pub(crate) active: Vec<(TimerId, Duration)>,
        pub(crate) removed: Vec<TimerId>,
    }

    impl HostTimers for FakeTimers {
        fn add_timer(&mut self, interval: Duration) -> TimerId {
            self.next_id += 1;
            self.active.push((self.next_id, interval));
            self.next_id
        }

        fn remove_timer(&mut self, id: TimerId) {
            self.active.retain(|(active, _)| *active != id);
            self.removed.push(id);
        }
    }

    fn bridge() -> LoopBridge {
        engine_logging::initialize_for_tests();
        LoopBridge::new().unwrap()
    }

    #[test]
    fn empty_loop_stops_after_one_pump() {
        let mut bridge = bridge();
        assert!(bridge.pump_once());
    }

    #[test]
    fn task_runs_only_when_pumped() {
        let mut bridge = bridge();
        let seen = Rc::new(Cell::new(false));
        let flag = seen.clone();
        bridge.schedule("flag", async move { flag.set(true) });

        assert!(!seen.get());
        assert!(!bridge.pump_once());
        assert!(seen.get());
        // done now, one more pump delivers the outcome
        assert!(bridge.pump_once());
        assert_eq!(bridge.pending_tasks(), 0);
    }

    #[test]
    fn blocking_work_completes_across_pumps() {
        let mut bridge = bridge();
        let result = Rc::new(RefCell::new(None));
        let sink = result.clone();
        bridge.schedule("worker", async move {
            let value = tokio::task::spawn_blocking(|| {
                std::thread::sleep(Duration::from_millis(20));
                21 * 2
            })
            .await
            .unwrap();
            *sink.borrow_mut() = Some(value);
        });

        let mut pumps = 0;
        while !bridge.pump_once() {
            pumps += 1;
            assert!(pumps < 10_000, "loop never went idle");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(*result.borrow(), Some(42));
        assert!(pumps > 1);
    }

    #[test]
    fn cancelled_tasks_are_swallowed() {
        let mut bridge = bridge();
        let handle = bridge.schedule("forever", std::future::pending::<()>());
        assert!(!bridge.pump_once());

        bridge.cancel_all();

        assert_eq!(bridge.pending_tasks(), 0);
        assert!(handle.is_finished());
        assert!(bridge.pump_once());
    }

    #[test]
    fn panicking_task_does_not_reach_the_host() {
        let mut bridge = bridge();
        let mut handle = bridge.schedule("boom", async {
            panic!("boom");
        });

        assert!(pump_until_idle(&mut bridge, 16));
        let err = bridge.block_on_task(&mut handle).unwrap_err();
        assert!(err.is_panic());
    }

    #[test]
    fn only_one_pump_timer_at_a_time() {
        let mut bridge = bridge();
        let mut timers = FakeTimers::default();

        assert!(bridge.ensure_pumping(&mut timers));
        assert!(!bridge.ensure_pumping(&mut timers));
        assert_eq!(timers.active.len(), 1);

        assert!(bridge.on_pump_timer(&mut timers));
        assert!(timers.active.is_empty());
        assert!(!bridge.is_pumping());
        assert!(bridge.ensure_pumping(&mut timers));
    }

    #[test]
    fn scheduler_trait_drives_boxed_tasks() {
        let mut bridge = bridge();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let scheduler: &mut dyn Scheduler = &mut bridge;
        scheduler.schedule_boxed("boxed", Box::pin(async move { counter.set(counter.get() + 1) }));

        assert!(pump_until_idle(scheduler, 8));
        assert_eq!(hits.get(), 1);
    }
}
