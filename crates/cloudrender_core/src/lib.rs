//! Cloudrender core: job data, session state and upload planning.
//!
//! Nothing in here performs I/O. The engine crate mutates these types from its
//! single-threaded event loop; the host reads them to draw its UI.
mod humanize;
mod job;
mod operation;
mod progress;
mod registry;
mod session;
mod stage;
mod upload_plan;

pub use humanize::humanize_elapsed;
pub use job::{parse_money, Job, CREATION_DATE_FORMAT};
pub use operation::{OperationKind, OperationState};
pub use progress::Progress;
pub use registry::JobRegistry;
pub use session::{Invocation, Report, ReportLevel, SessionSettings, SessionState, DEFAULT_API_URL};
pub use stage::Stage;
pub use upload_plan::{plan_upload, PartRange, PlanError, UploadPlan, MIN_PART_SIZE, UPLOAD_PROGRESS_SPAN};
