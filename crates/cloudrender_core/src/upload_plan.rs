//! Multipart upload planning.

use thiserror::Error;

/// Smallest part the upload endpoint accepts from us. Object stores require
/// 5 MiB; the service asks for 10.
pub const MIN_PART_SIZE: u64 = 10 * 1024 * 1024;

/// Share of an operation's progress bar covered by the part uploads.
pub const UPLOAD_PROGRESS_SPAN: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("the server returned no upload urls")]
    NoUploadUrls,
    #[error("minimum part size must be positive")]
    ZeroPartSize,
}

/// One part of a multipart upload: bytes `[offset, offset + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based, as the storage service numbers parts.
    pub number: usize,
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub part_count: usize,
    pub part_size: u64,
    pub parts: Vec<PartRange>,
}

impl UploadPlan {
    /// Progress increment credited after each part.
    pub fn progress_step(&self) -> f64 {
        UPLOAD_PROGRESS_SPAN / self.part_count as f64
    }

    pub fn total_len(&self) -> u64 {
        self.parts.iter().map(|part| part.len).sum()
    }
}

/// Splits `file_size` bytes over at most `url_count` parts.
///
/// Parts are `ceil(file_size / url_count)` bytes unless that is below
/// `min_part_size`, in which case parts are `min_part_size` bytes and only the
/// first `ceil(file_size / min_part_size)` urls are used. The last part takes
/// the remainder. An empty file is a single empty part.
pub fn plan_upload(
    file_size: u64,
    url_count: usize,
    min_part_size: u64,
) -> Result<UploadPlan, PlanError> {
    if url_count == 0 {
        return Err(PlanError::NoUploadUrls);
    }
    if min_part_size == 0 {
        return Err(PlanError::ZeroPartSize);
    }

    let even_size = file_size.div_ceil(url_count as u64);
    let part_size = even_size.max(min_part_size);
    // Never more than `url_count`: part_size >= ceil(file_size / url_count).
    let part_count = file_size.div_ceil(part_size) as usize;

    if file_size == 0 {
        return Ok(UploadPlan {
            part_count: 1,
            part_size,
            parts: vec![PartRange {
                number: 1,
                offset: 0,
                len: 0,
            }],
        });
    }

    let parts = (0..part_count)
        .map(|index| {
            let offset = index as u64 * part_size;
            PartRange {
                number: index + 1,
                offset,
                len: part_size.min(file_size - offset),
            }
        })
        .collect();

    Ok(UploadPlan {
        part_count,
        part_size,
        parts,
    })
}
