use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use cloudrender_core::{Invocation, OperationKind, OperationState, SessionState};
use engine_logging::{engine_debug, engine_info};
use thiserror::Error;

use crate::actions::{
    create_job_operation, download_operation, fetch_jobs_operation, login_operation,
    render_operation, ActionEnv, NewJobRequest,
};
use crate::auth::Authenticator;
use crate::event_loop::{BridgeError, LoopBridge, DEFAULT_PUMP_INTERVAL};
use crate::host::{HostTimers, TimerId};
use crate::operator::{LongOperation, OperationRunner, TickOutcome, OPERATION_TICK};
use crate::rest::RestTransport;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Poll interval of a running operation.
    pub tick_interval: Duration,
    pub pump_interval: Duration,
    /// How long a finished progress bar stays at 99.9% before it resets.
    pub settle_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            tick_interval: OPERATION_TICK,
            pump_interval: DEFAULT_PUMP_INTERVAL,
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// An invocation refused at the boundary, with the reasons why.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} refused: {}", reasons.join("; "))]
pub struct Rejected {
    pub kind: OperationKind,
    pub reasons: Vec<&'static str>,
}

/// The host-facing entry point: gates user requests, starts operations and
/// routes timer firings to the loop and the operation runners.
pub struct Orchestrator {
    bridge: LoopBridge,
    env: ActionEnv,
    runners: BTreeMap<OperationKind, OperationRunner>,
    tick_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        session: SessionState,
        transport: Arc<dyn RestTransport>,
        authenticator: Arc<dyn Authenticator>,
        settings: OrchestratorSettings,
    ) -> Result<Self, BridgeError> {
        Ok(Self {
            bridge: LoopBridge::with_pump_interval(settings.pump_interval)?,
            env: ActionEnv {
                session: Rc::new(RefCell::new(session)),
                transport,
                authenticator,
                settle_delay: settings.settle_delay,
            },
            runners: BTreeMap::new(),
            tick_interval: settings.tick_interval,
        })
    }

    /// Read access for drawing. Drop the guard before calling back in.
    pub fn session(&self) -> Ref<'_, SessionState> {
        self.env.session.borrow()
    }

    /// For host-side settings edits.
    pub fn session_mut(&self) -> RefMut<'_, SessionState> {
        self.env.session.borrow_mut()
    }

    pub fn operation_state(&self, kind: OperationKind) -> OperationState {
        self.runners
            .get(&kind)
            .map(OperationRunner::state)
            .unwrap_or_default()
    }

    pub fn is_busy(&self) -> bool {
        self.runners.values().any(OperationRunner::is_active)
    }

    pub fn login(
        &mut self,
        timers: &mut dyn HostTimers,
        username: &str,
        password: &str,
    ) -> Result<(), Rejected> {
        self.gate(&Invocation::Login { username, password })?;
        let operation = login_operation(&self.env, username.trim().to_string(), password.to_string());
        self.launch(timers, operation);
        Ok(())
    }

    pub fn fetch_jobs(&mut self, timers: &mut dyn HostTimers) -> Result<(), Rejected> {
        self.gate(&Invocation::FetchJobs)?;
        let operation = fetch_jobs_operation(&self.env);
        self.launch(timers, operation);
        Ok(())
    }

    pub fn create_job(
        &mut self,
        timers: &mut dyn HostTimers,
        request: NewJobRequest,
    ) -> Result<(), Rejected> {
        let file_size = std::fs::metadata(&request.source)
            .ok()
            .filter(|metadata| metadata.is_file())
            .map(|metadata| metadata.len());
        self.gate(&Invocation::CreateJob {
            name: &request.name,
            file_size,
        })?;
        let operation = create_job_operation(&self.env, request, file_size.unwrap_or_default());
        self.launch(timers, operation);
        Ok(())
    }

    pub fn render(&mut self, timers: &mut dyn HostTimers) -> Result<(), Rejected> {
        self.gate(&Invocation::Render)?;
        {
            let mut session = self.session_mut();
            let credits = session
                .registry()
                .selected()
                .map(|job| job.cost_estimation);
            session.set_render_credits(credits);
        }
        let operation = render_operation(&self.env);
        self.launch(timers, operation);
        Ok(())
    }

    pub fn download(&mut self, timers: &mut dyn HostTimers) -> Result<(), Rejected> {
        self.gate(&Invocation::Download)?;
        let operation = download_operation(&self.env);
        self.launch(timers, operation);
        Ok(())
    }

    pub fn select(&mut self, id: &str) -> bool {
        let mut session = self.session_mut();
        let selected = session.registry_mut().select(id);
        if !selected {
            engine_debug!("Ignoring selection of unknown job {id}");
        }
        selected
    }

    /// Cancels a running operation and waits for it to stop.
    /// Returns whether anything was running.
    pub fn cancel(&mut self, timers: &mut dyn HostTimers, kind: OperationKind) -> bool {
        match self.runners.get_mut(&kind) {
            Some(runner) if runner.is_active() => {
                runner.cancel(&mut self.bridge, timers);
                true
            }
            _ => false,
        }
    }

    /// Routes one host timer firing.
    pub fn on_timer(&mut self, timers: &mut dyn HostTimers, id: TimerId) -> TickOutcome {
        if self.bridge.is_pump_timer(id) {
            self.bridge.on_pump_timer(timers);
            return TickOutcome::PassThrough;
        }
        match self.runners.values_mut().find(|runner| runner.owns_timer(id)) {
            Some(runner) => runner.poll_tick(&mut self.bridge, timers, id),
            None => TickOutcome::PassThrough,
        }
    }

    pub fn shutdown(mut self, timers: &mut dyn HostTimers) {
        for runner in self.runners.values_mut() {
            if runner.is_active() {
                runner.abort(&mut self.bridge, timers);
            }
        }
        self.bridge.shutdown(timers);
    }

    fn gate(&self, invocation: &Invocation<'_>) -> Result<(), Rejected> {
        let reasons = self.session().blockers(invocation);
        if reasons.is_empty() {
            return Ok(());
        }
        let kind = invocation.kind();
        engine_info!("Refusing {kind}: {}", reasons.join("; "));
        Err(Rejected { kind, reasons })
    }

    fn launch(&mut self, timers: &mut dyn HostTimers, operation: LongOperation) {
        let kind = operation.kind();
        let tick_interval = self.tick_interval;
        let runner = self
            .runners
            .entry(kind)
            .or_insert_with(|| OperationRunner::new(kind, tick_interval));
        runner.start(&mut self.bridge, timers, operation);
        // Set before the first pump so a second request in this host tick is refused.
        self.session_mut().set_running(true);
        engine_debug!("Started {kind}");
    }
}
