//! Cloudrender engine: REST plumbing, the cooperative event loop and the long
//! operations that talk to the render service.
mod actions;
mod auth;
mod download;
mod event_loop;
mod host;
mod operator;
mod orchestrator;
mod rest;
mod upload;

pub use actions::NewJobRequest;
pub use auth::{AuthError, Authenticator, EndpointAuthenticator};
pub use download::{download_progress, download_to_file, DownloadError, DOWNLOAD_CHUNK_SIZE};
pub use event_loop::{
    pump_until_idle, BridgeError, LoopBridge, Scheduler, TaskOutcome, DEFAULT_PUMP_INTERVAL,
    WORKER_POOL_SIZE,
};
pub use host::{HostTimers, TimerId};
pub use operator::{
    LongOperation, OperationContext, OperationError, OperationRunner, Settled, TickOutcome,
    OPERATION_TICK,
};
pub use orchestrator::{Orchestrator, OrchestratorSettings, Rejected};
pub use rest::{
    classify, Payload, PooledTransport, RestError, RestErrorKind, RestMethod, RestRequest,
    RestResponse, RestTransport, TransportSettings, TOKEN_EXPIRED_MESSAGE,
};
pub use upload::{build_completion_manifest, upload_multipart, CompletedPart, UploadError};
