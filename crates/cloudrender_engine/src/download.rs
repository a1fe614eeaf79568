//! Streaming download of a finished render to disk.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use engine_logging::{engine_debug, engine_info};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MEGABYTE: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("The download folder does not exist. {}", .0.display())]
    DestinationMissing(PathBuf),
    #[error("Could not download file. The server answered {0}")]
    Status(u16),
    #[error("Could not download file: {0}")]
    Transport(String),
    #[error("Could not download file. Writing {} failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("download worker failed: {0}")]
    Worker(String),
    #[error("download cancelled")]
    Cancelled,
}

/// Streams `url` into `destination` in `chunk_size` pieces.
///
/// `on_progress(downloaded, total)` runs on the calling task after each chunk,
/// but only when the server announced a content length. A failed download
/// leaves whatever was written so far in place. `cancel` is checked between
/// chunks.
pub async fn download_to_file(
    url: &str,
    destination: &Path,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u64, u64),
) -> Result<u64, DownloadError> {
    let folder = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !folder.is_dir() {
        return Err(DownloadError::DestinationMissing(folder.to_path_buf()));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let url = url.to_string();
    let path = destination.to_path_buf();
    let cancel = cancel.clone();
    let worker = tokio::task::spawn_blocking(move || {
        stream_blocking(&url, &path, chunk_size.max(1), &cancel, |downloaded, total| {
            let _ = tx.send((downloaded, total));
        })
    });

    while let Some((downloaded, total)) = rx.recv().await {
        on_progress(downloaded, total);
    }
    let written = worker
        .await
        .map_err(|err| DownloadError::Worker(err.to_string()))??;
    engine_info!("Downloaded {written} bytes to {}", destination.display());
    Ok(written)
}

fn stream_blocking(
    url: &str,
    destination: &Path,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut report: impl FnMut(u64, u64),
) -> Result<u64, DownloadError> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None)
        .build()
        .map_err(|err| DownloadError::Transport(err.to_string()))?;
    let mut response = client
        .get(url)
        .send()
        .map_err(|err| DownloadError::Transport(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status(status.as_u16()));
    }
    let total = response.content_length().filter(|total| *total > 0);
    engine_debug!("Download started, content length {total:?}");

    let write_error = |source| DownloadError::Write {
        path: destination.to_path_buf(),
        source,
    };
    let mut file = File::create(destination).map_err(write_error)?;
    let mut buffer = vec![0u8; chunk_size];
    let mut downloaded = 0u64;
    loop {
        if cancel.is_cancelled() {
            engine_info!("Download cancelled after {downloaded} bytes");
            return Err(DownloadError::Cancelled);
        }
        let read = read_chunk(&mut response, &mut buffer)
            .map_err(|err| DownloadError::Transport(err.to_string()))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read]).map_err(write_error)?;
        downloaded += read as u64;
        if let Some(total) = total {
            report(downloaded, total);
        }
    }
    file.flush().map_err(write_error)?;
    Ok(downloaded)
}

/// Fills `buffer` as far as the stream allows. Returns 0 at end of stream.
fn read_chunk(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Maps downloaded bytes onto the `[start, end]` slice of a progress bar.
///
/// Returns the fraction, rounded to two digits, and a status line such as
/// `"55% - 1.5/3 MB"`.
pub fn download_progress(downloaded: u64, total: u64, start: f64, end: f64) -> (f64, String) {
    if total == 0 {
        return (start, format!("{}% - Downloading...", percent(start)));
    }
    let share = round2(downloaded as f64 / total as f64);
    // Rounding may overshoot `end`; the caller finishes the bar itself.
    let fraction = round2(start + share * (end - start)).min(end);
    let text = format!(
        "{}% - {}/{} MB",
        percent(fraction),
        round2(downloaded as f64 / MEGABYTE),
        round2(total as f64 / MEGABYTE)
    );
    (fraction, text)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(fraction: f64) -> u32 {
    (fraction * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_maps_into_the_slice() {
        assert_eq!(
            download_progress(0, 4 * 1024 * 1024, 0.1, 0.999),
            (0.1, "10% - 0/4 MB".to_string())
        );
        let (fraction, text) = download_progress(1536 * 1024, 3 * 1024 * 1024, 0.1, 0.999);
        assert_eq!(fraction, 0.55);
        assert_eq!(text, "55% - 1.5/3 MB");
    }

    #[test]
    fn last_chunk_stops_short_of_a_full_bar() {
        let (fraction, text) = download_progress(10, 10, 0.1, 0.999);
        assert_eq!(fraction, 0.999);
        assert!(text.starts_with("100% - "));
    }

    #[test]
    fn unknown_total_stays_at_start() {
        let (fraction, text) = download_progress(123, 0, 0.1, 0.999);
        assert_eq!(fraction, 0.1);
        assert_eq!(text, "10% - Downloading...");
    }

    #[test]
    fn read_chunk_fills_across_short_reads() {
        let data = vec![7u8; 10];
        let mut reader = io::Cursor::new(data).chain(io::Cursor::new(vec![8u8; 5]));
        let mut buffer = [0u8; 12];
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 12);
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 3);
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 0);
    }
}
