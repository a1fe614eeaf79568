//! Multipart upload of a source file to pre-signed part urls.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use cloudrender_core::{PartRange, UploadPlan};
use engine_logging::{engine_debug, engine_info};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::rest::{RestError, RestRequest, RestTransport};

const MANIFEST_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub number: usize,
    pub entity_tag: String,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("the plan needs {needed} upload urls but the server sent {available}")]
    NotEnoughUrls { needed: usize, available: usize },
    #[error("Could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Part(RestError),
    #[error("part {number} was stored without an ETag")]
    MissingEntityTag { number: usize },
    #[error("Could not upload the file, please check online. {0}")]
    Complete(RestError),
    #[error("file reader failed: {0}")]
    Worker(String),
    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn rest_error(&self) -> Option<&RestError> {
        match self {
            UploadError::Part(err) | UploadError::Complete(err) => Some(err),
            _ => None,
        }
    }
}

/// Uploads every part of `plan` in order, one request at a time, then posts
/// the completion manifest to `complete_url`.
///
/// `on_part` runs after each stored part with the number of parts done so far.
/// The first failure aborts the upload; nothing is retried. `cancel` is looked
/// at between requests, never during one.
pub async fn upload_multipart(
    transport: &dyn RestTransport,
    source: &Path,
    plan: &UploadPlan,
    urls: &[String],
    complete_url: &str,
    cancel: &CancellationToken,
    mut on_part: impl FnMut(&CompletedPart, usize),
) -> Result<Vec<CompletedPart>, UploadError> {
    if urls.len() < plan.part_count {
        return Err(UploadError::NotEnoughUrls {
            needed: plan.part_count,
            available: urls.len(),
        });
    }
    engine_info!(
        "Uploading {} in {} parts of {} bytes",
        source.display(),
        plan.part_count,
        plan.part_size
    );

    let mut completed = Vec::with_capacity(plan.part_count);
    for (part, url) in plan.parts.iter().zip(urls) {
        if cancel.is_cancelled() {
            engine_info!("Upload cancelled before part {}", part.number);
            return Err(UploadError::Cancelled);
        }
        let chunk = read_part(source, *part).await?;
        let response = transport
            .request(RestRequest::put_bytes(url.as_str(), chunk))
            .await
            .map_err(UploadError::Part)?;
        let entity_tag = response
            .header("ETag")
            .ok_or(UploadError::MissingEntityTag {
                number: part.number,
            })?
            .to_string();
        engine_debug!("Part {} stored: {} bytes", part.number, part.len);

        completed.push(CompletedPart {
            number: part.number,
            entity_tag,
        });
        if let Some(last) = completed.last() {
            on_part(last, completed.len());
        }
    }

    if cancel.is_cancelled() {
        engine_info!("Upload cancelled before completion");
        return Err(UploadError::Cancelled);
    }
    let manifest = build_completion_manifest(&completed);
    transport
        .request(RestRequest::post_text(complete_url, manifest))
        .await
        .map_err(UploadError::Complete)?;
    engine_info!("Upload of {} completed", source.display());
    Ok(completed)
}

/// The XML body that asks the storage service to assemble the parts.
pub fn build_completion_manifest(parts: &[CompletedPart]) -> String {
    let mut body = format!("<CompleteMultipartUpload xmlns=\"{MANIFEST_NAMESPACE}\">");
    for part in parts {
        body.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part.number,
            escape_xml(&part.entity_tag)
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

async fn read_part(source: &Path, part: PartRange) -> Result<Vec<u8>, UploadError> {
    let path = source.to_path_buf();
    let worker_path = path.clone();
    tokio::task::spawn_blocking(move || read_range(&worker_path, part))
        .await
        .map_err(|err| UploadError::Worker(err.to_string()))?
        .map_err(|source| UploadError::Read { path, source })
}

fn read_range(path: &Path, part: PartRange) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(part.offset))?;
    let mut buffer = Vec::with_capacity(part.len as usize);
    file.take(part.len).read_to_end(&mut buffer)?;
    if buffer.len() as u64 != part.len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("part {} ended after {} of {} bytes", part.number, buffer.len(), part.len),
        ));
    }
    Ok(buffer)
}
