use std::fmt;

/// Server-side lifecycle of a render job.
///
/// The client only ever learns a stage from the server; it never advances one
/// locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    #[default]
    Unknown,
    Uploaded,
    Queued,
    Rendering,
    Finished,
    Failed,
}

impl Stage {
    /// Looks up a stage by its server name, falling back to `Unknown`.
    pub fn from_server(name: &str) -> Self {
        match name {
            "UPLOADED" => Stage::Uploaded,
            "QUEUED" => Stage::Queued,
            "RENDERING" => Stage::Rendering,
            "FINISHED" => Stage::Finished,
            "FAILED" => Stage::Failed,
            _ => Stage::Unknown,
        }
    }

    pub fn as_server_name(self) -> &'static str {
        match self {
            Stage::Unknown => "UNKNOWN",
            Stage::Uploaded => "UPLOADED",
            Stage::Queued => "QUEUED",
            Stage::Rendering => "RENDERING",
            Stage::Finished => "FINISHED",
            Stage::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Finished | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_server_name())
    }
}
