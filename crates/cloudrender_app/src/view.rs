//! Plain-text rendering of session state for the terminal.

use chrono::{DateTime, Local};
use cloudrender_core::{JobRegistry, OperationKind, Report, ReportLevel, SessionState};

pub fn format_report(report: &Report, at: DateTime<Local>) -> String {
    let level = match report.level {
        ReportLevel::Info => "info",
        ReportLevel::Warning => "warning",
        ReportLevel::Error => "error",
    };
    format!("[{}] {level}: {}", at.format("%H:%M:%S"), report.message)
}

/// One line per job; the selected job is marked with `*`.
pub fn format_jobs(registry: &JobRegistry) -> String {
    if registry.is_empty() {
        return "No jobs.".to_string();
    }
    let selected = registry.selected_id();
    registry
        .list()
        .iter()
        .map(|job| {
            let marker = if selected == Some(job.id()) { '*' } else { ' ' };
            format!(
                "{marker} {:<12} {:<24} {:<10} {:>6} {:>8} {}",
                job.id(),
                job.display_name,
                job.stage.as_server_name(),
                job.progress,
                job.cost_estimation,
                job.created
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The progress bars still in flight, e.g. `create-job  20% Uploading...`.
pub fn format_progress(session: &SessionState) -> Vec<String> {
    OperationKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let progress = session.progress(kind);
            if progress.is_complete() {
                return None;
            }
            Some(format!(
                "{:<10} {:>3}% {}",
                kind.label(),
                (progress.fraction() * 100.0).floor() as u32,
                progress.text()
            ))
        })
        .collect()
}

pub fn format_status(session: &SessionState, busy: bool) -> String {
    let mut lines = vec![
        format!("API: {}", session.settings().api_url),
        format!(
            "Logged in: {} | Busy: {} | Jobs: {}",
            yes_no(session.is_logged_in()),
            yes_no(busy),
            session.registry().len()
        ),
    ];
    lines.push(match &session.settings().download_folder {
        Some(folder) => format!("Download folder: {}", folder.display()),
        None => "Download folder: (not set)".to_string(),
    });
    if let Some(job) = session.registry().selected() {
        lines.push(format!(
            "Selected: {} ({}, {})",
            job.id(),
            job.display_name,
            job.stage.as_server_name()
        ));
    }
    lines.extend(format_progress(session));
    lines.join("\n")
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
