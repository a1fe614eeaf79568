//! Single-flight long operations driven by a host tick.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use cloudrender_core::{OperationKind, OperationState, PlanError, ReportLevel};
use engine_logging::{engine_debug, engine_error, engine_warn};
use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthError;
use crate::download::DownloadError;
use crate::event_loop::LoopBridge;
use crate::host::{HostTimers, TimerId};
use crate::rest::RestError;
use crate::upload::UploadError;

/// How often a running operation is polled: 15 Hz.
pub const OPERATION_TICK: Duration = Duration::from_nanos(1_000_000_000 / 15);

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Rest(#[from] RestError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("Login failed: {0}")]
    Auth(#[from] AuthError),
    #[error("Could not plan the upload: {0}")]
    Plan(#[from] PlanError),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Invalid(String),
    #[error("background worker failed: {0}")]
    Worker(String),
    #[error("cancelled")]
    Cancelled,
}

impl OperationError {
    /// The service rejected the credential; the user has to log in again.
    /// A 401 from a pre-signed storage URL says nothing about the session.
    pub fn is_token_expired(&self) -> bool {
        matches!(self, OperationError::Rest(err) if err.is_token_expired())
    }

    /// The body stopped at a checkpoint after a cancel request.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            OperationError::Cancelled
                | OperationError::Upload(UploadError::Cancelled)
                | OperationError::Download(DownloadError::Cancelled)
        )
    }

    pub fn report_level(&self) -> ReportLevel {
        if self.is_token_expired() {
            return ReportLevel::Info;
        }
        match self {
            OperationError::Download(_)
            | OperationError::Io(_)
            | OperationError::Upload(UploadError::Read { .. } | UploadError::Complete(_)) => {
                ReportLevel::Warning
            }
            _ => ReportLevel::Error,
        }
    }
}

/// How a run ended. Handed to the settle callback exactly once.
#[derive(Debug)]
pub enum Settled {
    Succeeded,
    Failed(OperationError),
    Cancelled,
    Panicked(String),
}

/// What a running body may see of its runner.
#[derive(Debug, Clone)]
pub struct OperationContext {
    kind: OperationKind,
    state: Rc<Cell<OperationState>>,
    cancel: CancellationToken,
}

impl OperationContext {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Marks the run as done. The runner does this itself when the body
    /// returns, so bodies only need it to stop early.
    pub fn quit(&self) {
        self.state.set(OperationState::Quit);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Call between worker calls. Fails once a cancel was requested.
    pub fn checkpoint(&self) -> Result<(), OperationError> {
        if self.cancel.is_cancelled() {
            return Err(OperationError::Cancelled);
        }
        Ok(())
    }

    /// Resolves when a cancel is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

type Body = Box<dyn FnOnce(OperationContext) -> LocalBoxFuture<'static, Result<(), OperationError>>>;
type SettleFn = Box<dyn FnOnce(Settled)>;

pub struct LongOperation {
    kind: OperationKind,
    body: Body,
    on_settle: Option<SettleFn>,
}

impl LongOperation {
    pub fn new<F, Fut>(kind: OperationKind, body: F) -> Self
    where
        F: FnOnce(OperationContext) -> Fut + 'static,
        Fut: Future<Output = Result<(), OperationError>> + 'static,
    {
        Self {
            kind,
            body: Box::new(move |context| body(context).boxed_local()),
            on_settle: None,
        }
    }

    /// Cleanup that runs once however the run ends, panics included.
    pub fn on_settle(mut self, cleanup: impl FnOnce(Settled) + 'static) -> Self {
        self.on_settle = Some(Box::new(cleanup));
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick was not consumed: not our timer, or still running.
    PassThrough,
    RunningModal,
    Finished,
}

/// Runs at most one [`LongOperation`] of a kind at a time and polls it from
/// its own host timer until it reaches a terminal state.
pub struct OperationRunner {
    kind: OperationKind,
    state: Rc<Cell<OperationState>>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    settle: Rc<RefCell<Option<SettleFn>>>,
    timer: Option<TimerId>,
    tick_interval: Duration,
    stop_upon_exception: bool,
}

impl OperationRunner {
    pub fn new(kind: OperationKind, tick_interval: Duration) -> Self {
        Self {
            kind,
            state: Rc::new(Cell::new(OperationState::Initializing)),
            task: None,
            cancel: CancellationToken::new(),
            settle: Rc::new(RefCell::new(None)),
            timer: None,
            tick_interval,
            stop_upon_exception: true,
        }
    }

    pub fn with_stop_upon_exception(mut self, stop: bool) -> Self {
        self.stop_upon_exception = stop;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn state(&self) -> OperationState {
        self.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some() || self.timer.is_some()
    }

    pub fn owns_timer(&self, id: TimerId) -> bool {
        self.timer == Some(id)
    }

    /// Launches `operation`, cancelling whatever this runner was doing.
    pub fn start(
        &mut self,
        bridge: &mut LoopBridge,
        timers: &mut dyn HostTimers,
        operation: LongOperation,
    ) -> TickOutcome {
        if self.is_active() {
            engine_debug!("Replacing the running {} task", self.kind);
            self.cancel(bridge, timers);
        }
        let LongOperation {
            kind,
            body,
            on_settle,
        } = operation;
        if kind != self.kind {
            engine_warn!("{} runner started a {kind} operation", self.kind);
        }

        self.state = Rc::new(Cell::new(OperationState::Initializing));
        self.cancel = CancellationToken::new();
        self.settle = Rc::new(RefCell::new(on_settle));

        let context = OperationContext {
            kind,
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        };
        let settle = self.settle.clone();
        // Cancellation is cooperative: the body is never dropped mid-await, so
        // a request already handed to a worker always completes first.
        let wrapped = async move {
            context.state.set(OperationState::Running);
            let settled = match body(context.clone()).await {
                Ok(()) => Settled::Succeeded,
                Err(err) if err.is_cancelled() => Settled::Cancelled,
                Err(err) => Settled::Failed(err),
            };
            match &settled {
                Settled::Failed(err) => engine_error!("{kind} failed: {err}"),
                other => engine_debug!("{kind} settled: {other:?}"),
            }
            run_settle(&settle, settled);
            context.quit();
        };

        self.task = Some(bridge.schedule(kind.label(), wrapped));
        self.timer = Some(timers.add_timer(self.tick_interval));
        bridge.ensure_pumping(timers);
        TickOutcome::RunningModal
    }

    /// Handles one firing of a host timer.
    pub fn poll_tick(
        &mut self,
        bridge: &mut LoopBridge,
        timers: &mut dyn HostTimers,
        timer: TimerId,
    ) -> TickOutcome {
        if !self.owns_timer(timer) {
            return TickOutcome::PassThrough;
        }

        let finished = self.task.as_ref().is_some_and(JoinHandle::is_finished);
        if finished && self.state.get() != OperationState::Quit {
            if let Some(mut task) = self.task.take() {
                let result = bridge.block_on_task(&mut task);
                self.absorb(result);
            }
            if self.state.get() == OperationState::Exception {
                if !self.stop_upon_exception {
                    return TickOutcome::PassThrough;
                }
                self.finish(timers);
                return TickOutcome::Finished;
            }
        }

        if self.state.get() == OperationState::Quit {
            self.finish(timers);
            return TickOutcome::Finished;
        }
        TickOutcome::PassThrough
    }

    /// Requests cancellation and drives the loop until the body has stopped
    /// at its next checkpoint. A worker call in flight finishes first.
    pub fn cancel(&mut self, bridge: &mut LoopBridge, timers: &mut dyn HostTimers) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            let result = bridge.block_on_task(&mut task);
            self.absorb(result);
        }
        self.finish(timers);
    }

    /// Drops the task at its current await point. Only for shutdown: a
    /// worker call in flight is abandoned, not awaited.
    pub fn abort(&mut self, bridge: &mut LoopBridge, timers: &mut dyn HostTimers) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            task.abort();
            let result = bridge.block_on_task(&mut task);
            self.absorb(result);
        }
        self.finish(timers);
    }

    /// Releases the timer and this runner's claim on the loop.
    pub fn finish(&mut self, timers: &mut dyn HostTimers) {
        if let Some(id) = self.timer.take() {
            timers.remove_timer(id);
        }
        if self.task.take().is_some() {
            self.cancel.cancel();
        }
        engine_debug!("{} finished in state {:?}", self.kind, self.state.get());
    }

    fn absorb(&mut self, result: Result<(), JoinError>) {
        match result {
            Ok(()) => {}
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                self.state.set(OperationState::Exception);
                run_settle(&self.settle, Settled::Panicked(message.clone()));
                engine_error!("{} raised: {message}", self.kind);
            }
            Err(_) => {
                run_settle(&self.settle, Settled::Cancelled);
                self.state.set(OperationState::Quit);
                engine_debug!("{} task was cancelled", self.kind);
            }
        }
    }
}

fn run_settle(slot: &RefCell<Option<SettleFn>>, settled: Settled) {
    let cleanup = slot.borrow_mut().take();
    if let Some(cleanup) = cleanup {
        cleanup(settled);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::event_loop::pump_until_idle;
    use crate::event_loop::tests::FakeTimers;

    struct Harness {
        bridge: LoopBridge,
        timers: FakeTimers,
        runner: OperationRunner,
        settled: Rc<RefCell<Vec<Settled>>>,
    }

    impl Harness {
        fn new() -> Self {
            engine_logging::initialize_for_tests();
            Self {
                bridge: LoopBridge::new().unwrap(),
                timers: FakeTimers::default(),
                runner: OperationRunner::new(OperationKind::Render, OPERATION_TICK),
                settled: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn start<Fut>(&mut self, body: impl FnOnce(OperationContext) -> Fut + 'static) -> TickOutcome
        where
            Fut: Future<Output = Result<(), OperationError>> + 'static,
        {
            let sink = self.settled.clone();
            let operation = LongOperation::new(OperationKind::Render, body)
                .on_settle(move |settled| sink.borrow_mut().push(settled));
            self.runner.start(&mut self.bridge, &mut self.timers, operation)
        }

        fn operation_timer(&self) -> TimerId {
            self.timers
                .active
                .iter()
                .map(|(id, _)| *id)
                .find(|id| self.runner.owns_timer(*id))
                .unwrap()
        }

        fn run_to_idle_and_tick(&mut self) -> TickOutcome {
            let timer = self.operation_timer();
            assert!(pump_until_idle(&mut self.bridge, 64));
            self.runner
                .poll_tick(&mut self.bridge, &mut self.timers, timer)
        }
    }

    #[test]
    fn successful_run_quits_and_releases_the_timer() {
        let mut harness = Harness::new();
        assert_eq!(harness.start(|_| async { Ok(()) }), TickOutcome::RunningModal);
        assert!(harness.runner.is_active());
        let timer = harness.operation_timer();

        assert_eq!(harness.run_to_idle_and_tick(), TickOutcome::Finished);
        assert_eq!(harness.runner.state(), OperationState::Quit);
        assert!(!harness.runner.is_active());
        assert!(matches!(harness.settled.borrow()[..], [Settled::Succeeded]));
        assert!(harness.timers.removed.contains(&timer));
    }

    #[test]
    fn errors_are_handed_to_cleanup_and_still_quit() {
        let mut harness = Harness::new();
        harness.start(|_| async { Err(OperationError::Invalid("nope".to_string())) });

        assert_eq!(harness.run_to_idle_and_tick(), TickOutcome::Finished);
        assert_eq!(harness.runner.state(), OperationState::Quit);
        let settled = harness.settled.borrow();
        assert!(matches!(&settled[..], [Settled::Failed(OperationError::Invalid(msg))] if msg == "nope"));
    }

    #[test]
    fn panics_reach_the_exception_state() {
        let mut harness = Harness::new();
        harness.start(|_| async {
            if true {
                panic!("kaput");
            }
            Ok(())
        });

        assert_eq!(harness.run_to_idle_and_tick(), TickOutcome::Finished);
        assert_eq!(harness.runner.state(), OperationState::Exception);
        assert!(!harness.runner.is_active());
        assert!(matches!(&harness.settled.borrow()[..], [Settled::Panicked(msg)] if msg == "kaput"));
    }

    #[test]
    fn exception_keeps_the_timer_when_not_stopping() {
        let mut harness = Harness::new();
        harness.runner =
            OperationRunner::new(OperationKind::Render, OPERATION_TICK).with_stop_upon_exception(false);
        harness.start(|_| async {
            if true {
                panic!("kaput");
            }
            Ok(())
        });
        let timer = harness.operation_timer();

        assert_eq!(harness.run_to_idle_and_tick(), TickOutcome::PassThrough);
        assert_eq!(harness.runner.state(), OperationState::Exception);
        assert!(harness.runner.owns_timer(timer));
    }

    #[test]
    fn foreign_and_early_ticks_pass_through() {
        let mut harness = Harness::new();
        harness.start(|_| std::future::pending::<Result<(), OperationError>>());
        let timer = harness.operation_timer();

        assert_eq!(
            harness
                .runner
                .poll_tick(&mut harness.bridge, &mut harness.timers, timer + 100),
            TickOutcome::PassThrough
        );
        harness.bridge.pump_once();
        assert_eq!(
            harness
                .runner
                .poll_tick(&mut harness.bridge, &mut harness.timers, timer),
            TickOutcome::PassThrough
        );
        assert_eq!(harness.runner.state(), OperationState::Running);
    }

    async fn wait_for_cancel(context: OperationContext) -> Result<(), OperationError> {
        context.cancelled().await;
        context.checkpoint()
    }

    #[test]
    fn cancel_waits_for_the_task_and_runs_cleanup() {
        let mut harness = Harness::new();
        harness.start(wait_for_cancel);
        harness.bridge.pump_once();

        harness.runner.cancel(&mut harness.bridge, &mut harness.timers);

        assert_eq!(harness.runner.state(), OperationState::Quit);
        assert!(!harness.runner.is_active());
        assert!(matches!(harness.settled.borrow()[..], [Settled::Cancelled]));
    }

    #[test]
    fn cancel_lets_the_worker_call_in_flight_finish() {
        let mut harness = Harness::new();
        let worker_done = Arc::new(AtomicBool::new(false));
        let continued = Rc::new(Cell::new(false));
        let (done, after) = (worker_done.clone(), continued.clone());
        harness.start(move |context| async move {
            tokio::task::spawn_blocking(move || {
                std::thread::sleep(Duration::from_millis(50));
                done.store(true, Ordering::SeqCst);
            })
            .await
            .map_err(|err| OperationError::Worker(err.to_string()))?;
            context.checkpoint()?;
            after.set(true);
            Ok::<(), OperationError>(())
        });
        harness.bridge.pump_once();

        harness.runner.cancel(&mut harness.bridge, &mut harness.timers);

        assert!(worker_done.load(Ordering::SeqCst));
        assert!(!continued.get());
        assert!(matches!(harness.settled.borrow()[..], [Settled::Cancelled]));
        assert_eq!(harness.runner.state(), OperationState::Quit);
    }

    #[test]
    fn abort_drops_a_body_that_never_checks_in() {
        let mut harness = Harness::new();
        harness.start(|_| std::future::pending::<Result<(), OperationError>>());
        harness.bridge.pump_once();

        harness.runner.abort(&mut harness.bridge, &mut harness.timers);

        assert!(!harness.runner.is_active());
        assert_eq!(harness.runner.state(), OperationState::Quit);
        assert!(matches!(harness.settled.borrow()[..], [Settled::Cancelled]));
    }

    #[test]
    fn restarting_cancels_the_previous_run() {
        let mut harness = Harness::new();
        harness.start(wait_for_cancel);
        harness.start(|_| async { Ok(()) });

        assert_eq!(harness.run_to_idle_and_tick(), TickOutcome::Finished);
        assert!(matches!(
            harness.settled.borrow()[..],
            [Settled::Cancelled, Settled::Succeeded]
        ));
    }

    #[test]
    fn token_expiry_is_reported_as_info() {
        let err = OperationError::Rest(crate::rest::classify(401, "").unwrap_err());
        assert!(err.is_token_expired());
        assert_eq!(err.report_level(), ReportLevel::Info);
        let err = OperationError::Rest(crate::rest::classify(500, "").unwrap_err());
        assert_eq!(err.report_level(), ReportLevel::Error);
        let err = OperationError::Download(DownloadError::Status(404));
        assert_eq!(err.report_level(), ReportLevel::Warning);
    }

    #[test]
    fn storage_401_is_not_a_session_expiry() {
        let err = OperationError::Upload(UploadError::Part(crate::rest::classify(401, "").unwrap_err()));
        assert!(!err.is_token_expired());
        assert_eq!(err.report_level(), ReportLevel::Error);
    }

    #[test]
    fn checkpoint_errors_count_as_cancellation() {
        assert!(OperationError::Cancelled.is_cancelled());
        assert!(OperationError::Upload(UploadError::Cancelled).is_cancelled());
        assert!(OperationError::Download(DownloadError::Cancelled).is_cancelled());
        assert!(!OperationError::Invalid("x".to_string()).is_cancelled());
    }
}
