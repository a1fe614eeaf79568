use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use engine_logging::{engine_error, engine_info, engine_warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{JobRegistry, OperationKind, Progress, Stage};

pub const DEFAULT_API_URL: &str = "https://render.example.com/api";

/// Host-managed settings the operations read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub api_url: String,
    pub download_folder: Option<PathBuf>,
    /// `file.type` announced when creating a job.
    pub file_type: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            download_folder: None,
            file_type: "blend".to_string(),
        }
    }
}

impl SessionSettings {
    /// `api_url` joined with `path`, without doubling slashes.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    Info,
    Warning,
    Error,
}

/// A message for the user, shown by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub level: ReportLevel,
    pub message: String,
}

/// A user request together with the inputs its gate needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation<'a> {
    Login { username: &'a str, password: &'a str },
    FetchJobs,
    /// `file_size` is `None` when the source file does not exist.
    CreateJob { name: &'a str, file_size: Option<u64> },
    Render,
    Download,
}

impl Invocation<'_> {
    pub fn kind(&self) -> OperationKind {
        match self {
            Invocation::Login { .. } => OperationKind::Login,
            Invocation::FetchJobs => OperationKind::FetchJobs,
            Invocation::CreateJob { .. } => OperationKind::CreateJob,
            Invocation::Render => OperationKind::Render,
            Invocation::Download => OperationKind::Download,
        }
    }
}

const WAIT_FOR_OTHER: &str = "Please wait until the other operation is finished";
const NOT_LOGGED_IN: &str = "Please log in first";
const NO_SELECTION: &str = "No render job selected";

/// Everything one foreground session knows: credentials, the job list, the
/// single-flight flag and the per-operation progress bars.
///
/// Only the event loop thread touches this, so it carries no locks.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    settings: SessionSettings,
    token: Option<String>,
    async_op_running: bool,
    getting_jobs: bool,
    registry: JobRegistry,
    progress: BTreeMap<OperationKind, Progress>,
    render_credits: Option<Decimal>,
    reports: VecDeque<Report>,
    dirty: bool,
}

impl SessionState {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SessionSettings {
        self.dirty = true;
        &mut self.settings
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.as_deref().is_some_and(|token| !token.is_empty())
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
        self.dirty = true;
    }

    /// Forgets the credential, e.g. after the server said it expired.
    pub fn clear_token(&mut self) {
        if self.token.take().is_some() {
            engine_info!("Credential token cleared");
        }
        self.dirty = true;
    }

    pub fn is_running(&self) -> bool {
        self.async_op_running
    }

    pub fn set_running(&mut self, running: bool) {
        self.async_op_running = running;
        self.dirty = true;
    }

    pub fn is_getting_jobs(&self) -> bool {
        self.getting_jobs
    }

    pub fn set_getting_jobs(&mut self, getting: bool) {
        self.getting_jobs = getting;
        self.dirty = true;
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut JobRegistry {
        self.dirty = true;
        &mut self.registry
    }

    pub fn progress(&self, kind: OperationKind) -> Progress {
        self.progress.get(&kind).cloned().unwrap_or_default()
    }

    pub fn progress_mut(&mut self, kind: OperationKind) -> &mut Progress {
        self.dirty = true;
        self.progress.entry(kind).or_default()
    }

    pub fn render_credits(&self) -> Option<Decimal> {
        self.render_credits
    }

    pub fn set_render_credits(&mut self, credits: Option<Decimal>) {
        self.render_credits = credits;
    }

    /// Queues a message for the user and mirrors it to the log.
    pub fn report(&mut self, level: ReportLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            ReportLevel::Info => engine_info!("{message}"),
            ReportLevel::Warning => engine_warn!("{message}"),
            ReportLevel::Error => engine_error!("{message}"),
        }
        self.reports.push_back(Report { level, message });
        self.dirty = true;
    }

    pub fn take_reports(&mut self) -> Vec<Report> {
        self.reports.drain(..).collect()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns whether anything changed since the last call, and resets the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Reasons `invocation` must be refused right now. Empty means it may start.
    pub fn blockers(&self, invocation: &Invocation<'_>) -> Vec<&'static str> {
        let mut blockers = Vec::new();
        if self.async_op_running {
            blockers.push(WAIT_FOR_OTHER);
        }

        match invocation {
            Invocation::Login { username, password } => {
                if username.trim().is_empty() || password.is_empty() {
                    blockers.push("Please enter username and password");
                }
            }
            Invocation::FetchJobs => {
                if self.getting_jobs {
                    blockers.push("Getting jobs...");
                }
                if !self.is_logged_in() {
                    blockers.push(NOT_LOGGED_IN);
                }
            }
            Invocation::CreateJob { name, file_size } => {
                if !self.is_logged_in() {
                    blockers.push(NOT_LOGGED_IN);
                }
                if name.trim().is_empty() {
                    blockers.push("Please specify a job name first");
                }
                if !self.progress(OperationKind::CreateJob).is_complete() {
                    blockers.push("Creating job...");
                }
                match file_size {
                    None => blockers.push("The source file does not exist"),
                    Some(0) => blockers.push("The source file is empty"),
                    Some(_) => {}
                }
            }
            Invocation::Render => {
                if !self.is_logged_in() {
                    blockers.push(NOT_LOGGED_IN);
                }
                match self.registry.selected() {
                    None => blockers.push(NO_SELECTION),
                    Some(job) if job.stage != Stage::Uploaded => blockers
                        .push("Render job is not ready to render yet, or has been rendered already"),
                    Some(_) => {}
                }
            }
            Invocation::Download => {
                if !self.is_logged_in() {
                    blockers.push(NOT_LOGGED_IN);
                }
                let selected = self.registry.selected();
                if selected.is_none() {
                    blockers.push(NO_SELECTION);
                }
                let folder_set = self
                    .settings
                    .download_folder
                    .as_ref()
                    .is_some_and(|folder| !folder.as_os_str().is_empty());
                if !folder_set {
                    blockers.push("Please specify a download folder before downloading");
                }
                if selected.is_some_and(|job| job.stage != Stage::Finished) {
                    blockers.push("Render job is not done rendering yet");
                }
            }
        }
        blockers
    }

    pub fn can_start(&self, invocation: &Invocation<'_>) -> bool {
        self.blockers(invocation).is_empty()
    }
}
