use std::fmt;

/// The long-running user actions. At most one of them runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Login,
    FetchJobs,
    CreateJob,
    Render,
    Download,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Login,
        OperationKind::FetchJobs,
        OperationKind::CreateJob,
        OperationKind::Render,
        OperationKind::Download,
    ];

    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Login => "login",
            OperationKind::FetchJobs => "fetch-jobs",
            OperationKind::CreateJob => "create-job",
            OperationKind::Render => "render",
            OperationKind::Download => "download",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of one operation run. `Quit` and `Exception` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationState {
    #[default]
    Initializing,
    Running,
    Exception,
    Quit,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Quit | OperationState::Exception)
    }
}
