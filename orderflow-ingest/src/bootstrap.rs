//! Startup bootstrap from a directory of order files.
//!
//! Each `*.json` file holds one order payload. Files go through the same
//! [`IngestPipeline::process`] path as stream messages, in lexical order.

use std::path::{Path, PathBuf};

use orderflow_storage::cache::CacheAdapter;
use orderflow_storage::StoreAdapter;

use crate::pipeline::{IngestInput, IngestPipeline, ProcessReport};

/// Result of one bootstrap run.
#[derive(Debug, Default)]
pub struct BootstrapSummary {
    /// `*.json` files found.
    pub files: usize,
    pub done: usize,
    /// Unreadable files plus files whose processing failed.
    pub failed: usize,
    pub reports: Vec<ProcessReport>,
    /// Files that could not be read, with the reason.
    pub unreadable: Vec<(PathBuf, String)>,
}

/// List `*.json` files in `dir`, sorted by file name.
pub async fn list_order_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json && entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Feed every order file in `dir` through the pipeline.
///
/// A missing or unreadable directory yields an empty summary with a warning;
/// bootstrap data is optional.
pub async fn bootstrap_from_dir<S, C>(pipeline: &IngestPipeline<S, C>, dir: &Path) -> BootstrapSummary
where
    S: StoreAdapter,
    C: CacheAdapter,
{
    let mut summary = BootstrapSummary::default();

    let files = match list_order_files(dir).await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Bootstrap directory unavailable; skipping");
            return summary;
        }
    };
    summary.files = files.len();

    for path in files {
        let payload = match tokio::fs::read(&path).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable bootstrap file");
                summary.failed += 1;
                summary.unreadable.push((path, e.to_string()));
                continue;
            }
        };

        let report = pipeline.process(IngestInput::file(path, payload)).await;
        if report.is_done() {
            summary.done += 1;
        } else {
            summary.failed += 1;
        }
        summary.reports.push(report);
    }

    tracing::info!(
        dir = %dir.display(),
        files = summary.files,
        done = summary.done,
        failed = summary.failed,
        "Bootstrap complete"
    );
    summary
}
