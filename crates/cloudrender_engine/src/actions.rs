//! The concrete long operations: login, job list, job creation, render and
//! download.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use cloudrender_core::{
    plan_upload, Job, OperationKind, ReportLevel, SessionState, MIN_PART_SIZE,
};
use engine_logging::{engine_debug, engine_error, engine_info};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};

use crate::auth::Authenticator;
use crate::download::{download_progress, download_to_file, DOWNLOAD_CHUNK_SIZE};
use crate::operator::{LongOperation, OperationContext, OperationError, Settled};
use crate::rest::{RestRequest, RestTransport};
use crate::upload::upload_multipart;

const DOWNLOAD_START: f64 = 0.1;
const DOWNLOAD_END: f64 = 0.999;

/// Inputs of a job creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJobRequest {
    pub name: String,
    pub source: PathBuf,
    pub project: Option<String>,
}

/// Everything an operation body needs from the outside.
#[derive(Clone)]
pub(crate) struct ActionEnv {
    pub(crate) session: Rc<RefCell<SessionState>>,
    pub(crate) transport: Arc<dyn RestTransport>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) settle_delay: Duration,
}

impl ActionEnv {
    /// Scoped access to the session. Never call across an `.await`.
    fn with_session<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.session.borrow_mut())
    }

    fn begin(&self, kind: OperationKind, fraction: f64, text: &str) {
        self.with_session(|session| session.progress_mut(kind).begin(fraction, text));
    }

    fn progress_to(&self, kind: OperationKind, fraction: f64, text: Option<&str>) {
        self.with_session(|session| {
            let progress = session.progress_mut(kind);
            match text {
                Some(text) => progress.advance_with_text(fraction, text),
                None => progress.advance(fraction),
            };
        });
    }

    fn report(&self, level: ReportLevel, message: impl Into<String>) {
        let message = message.into();
        self.with_session(|session| session.report(level, message));
    }

    /// Leaves a finished progress bar visible for a moment. A cancel request
    /// cuts the pause short; the work it follows is already done.
    async fn linger(&self, context: &OperationContext) {
        if self.settle_delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.settle_delay) => {}
            _ = context.cancelled() => {}
        }
    }

    fn authorized(&self, path: &str) -> (String, Option<String>) {
        self.with_session(|session| {
            (
                session.settings().endpoint(path),
                session.token().map(ToOwned::to_owned),
            )
        })
    }

    fn selected_job(&self) -> Result<Job, OperationError> {
        self.with_session(|session| session.registry().selected().cloned())
            .ok_or_else(|| OperationError::Invalid("No render job selected".to_string()))
    }

    /// Terminal bookkeeping shared by every operation.
    fn settle(&self, kind: OperationKind, settled: Settled) {
        self.with_session(|session| {
            match settled {
                Settled::Succeeded => {}
                Settled::Failed(err) => report_failure(session, &err),
                Settled::Cancelled => {
                    session.report(ReportLevel::Info, format!("Operation {kind} cancelled."))
                }
                Settled::Panicked(message) => session.report(
                    ReportLevel::Error,
                    format!("Unexpected error during {kind}: {message}"),
                ),
            }
            session.progress_mut(kind).finish();
            session.set_running(false);
            session.set_getting_jobs(false);
            session.mark_dirty();
        });
    }

    fn operation<F, Fut>(&self, kind: OperationKind, body: F) -> LongOperation
    where
        F: FnOnce(ActionEnv, OperationContext) -> Fut + 'static,
        Fut: std::future::Future<Output = Result<(), OperationError>> + 'static,
    {
        let env = self.clone();
        let cleanup = self.clone();
        LongOperation::new(kind, move |context| body(env, context))
            .on_settle(move |settled| cleanup.settle(kind, settled))
    }
}

/// Token expiry drops the credential and is only informational.
fn report_failure(session: &mut SessionState, err: &OperationError) {
    if err.is_token_expired() {
        session.clear_token();
    }
    session.report(err.report_level(), err.to_string());
}

pub(crate) fn login_operation(env: &ActionEnv, username: String, password: String) -> LongOperation {
    env.operation(OperationKind::Login, move |env, context| {
        login(env, context, username, password)
    })
}

pub(crate) fn fetch_jobs_operation(env: &ActionEnv) -> LongOperation {
    env.operation(OperationKind::FetchJobs, fetch_jobs)
}

pub(crate) fn create_job_operation(env: &ActionEnv, request: NewJobRequest, file_size: u64) -> LongOperation {
    env.operation(OperationKind::CreateJob, move |env, context| {
        create_job(env, context, request, file_size)
    })
}

pub(crate) fn render_operation(env: &ActionEnv) -> LongOperation {
    env.operation(OperationKind::Render, render)
}

pub(crate) fn download_operation(env: &ActionEnv) -> LongOperation {
    env.operation(OperationKind::Download, download)
}

async fn login(
    env: ActionEnv,
    context: OperationContext,
    username: String,
    password: String,
) -> Result<(), OperationError> {
    let kind = OperationKind::Login;
    env.begin(kind, 0.1, "Logging in...");
    context.checkpoint()?;

    let authenticator = env.authenticator.clone();
    let result = tokio::task::spawn_blocking(move || authenticator.login(&username, &password))
        .await
        .map_err(|err| OperationError::Worker(err.to_string()))?;
    let token = match result {
        Ok(token) => token,
        Err(err) => {
            env.with_session(SessionState::clear_token);
            return Err(err.into());
        }
    };
    env.with_session(|session| session.set_token(token));
    context.checkpoint()?;

    env.progress_to(kind, 0.5, Some("Getting jobs..."));
    env.with_session(|session| session.set_getting_jobs(true));
    match refresh_jobs(&env).await {
        Ok(_) => {}
        Err(err) => env.with_session(|session| report_failure(session, &err)),
    }

    env.progress_to(kind, 0.999, Some("Logged in"));
    env.report(ReportLevel::Info, "Login successful.");
    Ok(())
}

async fn fetch_jobs(env: ActionEnv, context: OperationContext) -> Result<(), OperationError> {
    env.begin(OperationKind::FetchJobs, 0.1, "Getting jobs...");
    context.checkpoint()?;
    env.with_session(|session| session.set_getting_jobs(true));

    match refresh_jobs(&env).await? {
        Some(count) => {
            engine_debug!("Fetched {count} jobs");
            env.report(ReportLevel::Info, "Job list updated.");
        }
        None => env.report(ReportLevel::Warning, "No jobs."),
    }
    Ok(())
}

/// Fetches the job list into the registry. `None` when the server did not
/// answer with a list.
async fn refresh_jobs(env: &ActionEnv) -> Result<Option<usize>, OperationError> {
    let (url, token) = env.authorized("project");
    let response = env
        .transport
        .request(RestRequest::get(url).auth(token.as_deref()))
        .await?;
    let payload = response.json()?;
    let Some(items) = payload.as_array() else {
        return Ok(None);
    };

    let jobs: Vec<Job> = items
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| Job::from_payload(raw, index))
        .collect();
    let count = jobs.len();
    env.with_session(|session| {
        session.registry_mut().absorb_fetch(jobs);
        session.set_getting_jobs(false);
    });
    Ok(Some(count))
}

/// The server's answer to `POST /project`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CreatedJob {
    id: String,
    upload_id: String,
    upload_urls: Vec<String>,
    complete_url: String,
}

impl CreatedJob {
    fn from_reply(reply: &Value) -> Result<Self, OperationError> {
        let missing = |field: &str| {
            OperationError::Invalid(format!("The server did not return {field} for the new job"))
        };
        let id = match reply.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(missing("an id")),
        };
        let upload = reply.get("uploadData").ok_or_else(|| missing("upload data"))?;
        let upload_urls = upload
            .get("uploadUrls")
            .and_then(Value::as_array)
            .map(|urls| {
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let complete_url = upload
            .get("completeUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("a completion url"))?
            .to_string();
        let upload_id = upload
            .get("uploadId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            id,
            upload_id,
            upload_urls,
            complete_url,
        })
    }
}

/// `<job name>.zip` reduced to one plain file name, so a server-supplied name
/// can never point outside the download folder.
fn archive_name(job: &Job) -> String {
    let stem: String = job
        .name
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let stem = stem.trim_start_matches('.');
    if stem.is_empty() {
        return format!("{}.zip", job.id());
    }
    format!("{stem}.zip")
}

fn job_payload(request: &NewJobRequest, file_type: &str) -> Value {
    let file_name = request
        .source
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("unknown_file");
    let mut payload = json!({
        "name": request.name,
        "file": { "type": file_type, "name": file_name },
    });
    if let Some(project) = request.project.as_deref().filter(|project| !project.trim().is_empty()) {
        payload["project"] = json!(project);
    }
    payload
}

async fn create_job(
    env: ActionEnv,
    context: OperationContext,
    request: NewJobRequest,
    file_size: u64,
) -> Result<(), OperationError> {
    let kind = OperationKind::CreateJob;
    env.begin(kind, 0.1, "Creating Job...");
    context.checkpoint()?;

    let (url, token) = env.authorized("project");
    let file_type = env.with_session(|session| session.settings().file_type.clone());
    let response = env
        .transport
        .request(RestRequest::post_json(url, job_payload(&request, &file_type)).auth(token.as_deref()))
        .await?;
    let created = CreatedJob::from_reply(&response.json()?)?;
    engine_info!("Created job {} (upload {})", created.id, created.upload_id);
    context.checkpoint()?;

    env.progress_to(kind, 0.2, Some("Uploading..."));
    let plan = plan_upload(file_size, created.upload_urls.len(), MIN_PART_SIZE)?;
    let step = plan.progress_step();
    upload_multipart(
        env.transport.as_ref(),
        &request.source,
        &plan,
        &created.upload_urls,
        &created.complete_url,
        &context.cancellation(),
        |_, done| {
            if done == plan.part_count {
                env.progress_to(kind, 0.8, Some("Finishing Upload..."));
            } else {
                env.progress_to(kind, 0.2 + step * done as f64, None);
            }
        },
    )
    .await?;

    // The upload is complete; a cancel from here on is ignored.
    env.progress_to(kind, 0.9, Some("Updating Job List..."));
    match refresh_jobs(&env).await {
        Ok(_) => {
            env.with_session(|session| session.registry_mut().select(&created.id));
        }
        Err(err) => engine_error!("Refreshing the job list after creation failed: {err}"),
    }

    env.progress_to(kind, 0.999, Some("Job created"));
    env.linger(&context).await;
    env.progress_to(kind, 1.0, None);
    env.report(ReportLevel::Info, "New job created.");
    Ok(())
}

async fn render(env: ActionEnv, context: OperationContext) -> Result<(), OperationError> {
    let kind = OperationKind::Render;
    env.begin(kind, 0.1, "Sending...");
    context.checkpoint()?;

    let job = env.selected_job()?;
    let (url, token) = env.authorized(&format!("project/{}/startPay", job.id()));
    let chips = env
        .with_session(|session| session.render_credits())
        .and_then(|credits| credits.to_f64())
        .unwrap_or_default();
    let response = env
        .transport
        .request(
            RestRequest::post_json(url, json!({ "fromBeginning": true, "chips": chips }))
                .auth(token.as_deref()),
        )
        .await?;
    engine_info!("Render started: {}", response.text());

    env.progress_to(kind, 0.999, Some("Job rendering"));
    env.linger(&context).await;
    env.progress_to(kind, 1.0, None);
    env.report(ReportLevel::Info, "Job rendering.");
    Ok(())
}

async fn download(env: ActionEnv, context: OperationContext) -> Result<(), OperationError> {
    let kind = OperationKind::Download;
    env.begin(kind, DOWNLOAD_START, "10% - Downloading...");
    context.checkpoint()?;

    let job = env.selected_job()?;
    let folder = env
        .with_session(|session| session.settings().download_folder.clone())
        .ok_or_else(|| OperationError::Invalid("Please specify a download folder before downloading".to_string()))?;
    let (url, token) = env.authorized(&format!("project/{}/download", job.id()));
    let response = env
        .transport
        .request(RestRequest::post(url).auth(token.as_deref()))
        .await?;
    let reply = response.json()?;

    let Some(link) = reply
        .get("link")
        .and_then(Value::as_str)
        .filter(|link| !link.is_empty())
    else {
        env.progress_to(kind, DOWNLOAD_END, Some("100% - Not downloaded!"));
        env.linger(&context).await;
        env.report(ReportLevel::Warning, format!("Could not get download link. {reply}"));
        return Ok(());
    };

    let destination = folder.join(archive_name(&job));
    let result = download_to_file(
        link,
        &destination,
        DOWNLOAD_CHUNK_SIZE,
        &context.cancellation(),
        |downloaded, total| {
            let (fraction, text) = download_progress(downloaded, total, DOWNLOAD_START, DOWNLOAD_END);
            env.progress_to(kind, fraction, Some(&text));
        },
    )
    .await;

    match result {
        Ok(_) => {
            env.progress_to(kind, DOWNLOAD_END, Some("100% - Downloaded"));
            env.linger(&context).await;
            env.report(ReportLevel::Info, "Zip-file downloaded.");
            Ok(())
        }
        Err(err) => {
            env.progress_to(kind, DOWNLOAD_END, Some("100% - Not downloaded!"));
            env.linger(&context).await;
            Err(err.into())
        }
    }
}
