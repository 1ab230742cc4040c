use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use walkdir::WalkDir;

use crate::markup::{SpanKind, Unbalance, scan};
use crate::progress::ProgressCounter;
use crate::title::canonical_namespace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedPage {
    pub title: String,
    pub path: String,
    pub kind: SpanKind,
    pub problem: Unbalance,
    pub position: usize,
    pub line: usize,
    pub column: usize,
}

/// A page file that could not be read as UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadablePage {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MalformedReport {
    pub scanned: usize,
    pub malformed: Vec<MalformedPage>,
    pub unreadable: Vec<UnreadablePage>,
}

/// Scan every `*.wiki` file under `root` and list the pages whose markup does not
/// balance. Pages are reported, never repaired.
pub fn report_malformed_pages(
    root: &Path,
    progress: Option<&ProgressCounter>,
) -> Result<MalformedReport> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let mut report = MalformedReport::default();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("wiki") {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        let relative_display = relative.to_string_lossy().replace('\\', "/");
        let content = match read_page_text(path) {
            Ok(content) => content,
            Err(reason) => {
                tracing::warn!(path = %relative_display, %reason, "skipping unreadable page");
                if let Some(progress) = progress {
                    progress.record_failure();
                }
                report.unreadable.push(UnreadablePage {
                    path: relative_display,
                    reason,
                });
                continue;
            }
        };
        report.scanned += 1;

        match scan(&content) {
            Ok(_) => {
                if let Some(progress) = progress {
                    progress.record_page();
                }
            }
            Err(error) => {
                let (line, column) = error.line_and_column(&content);
                let title = title_from_relative_path(relative);
                tracing::warn!(page = %title, %error, line, column, "malformed markup");
                if let Some(progress) = progress {
                    progress.record_failure();
                }
                report.malformed.push(MalformedPage {
                    title,
                    path: relative_display,
                    kind: error.kind,
                    problem: error.problem,
                    position: error.position,
                    line,
                    column,
                });
            }
        }
    }
    Ok(report)
}

fn read_page_text(path: &Path) -> Result<String, String> {
    let bytes = fs::read(path).map_err(|error| error.to_string())?;
    String::from_utf8(bytes).map_err(|error| format!("not valid UTF-8: {}", error.utf8_error()))
}

/// `Category/Paintings_in_Paris.wiki` -> `Category:Paintings in Paris`. Directories that
/// are not namespaces are not part of the title.
pub fn title_from_relative_path(relative: &Path) -> String {
    let stem = relative
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_default();
    let namespace = relative
        .parent()
        .and_then(|parent| parent.file_name())
        .and_then(|name| canonical_namespace(&name.to_string_lossy()));
    match namespace {
        Some(namespace) if !stem.contains(':') => format!("{namespace}:{stem}"),
        _ => stem,
    }
}
