use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use similar::{ChangeTag, TextDiff};

/// Line counts of one diff entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
}

impl DiffStats {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Unified diff of `old` → `new` with its line counts. Identical texts give
/// an empty body and zero counts.
pub fn unified_diff(label: &str, old: &str, new: &str) -> (DiffStats, String) {
    if old == new {
        return (DiffStats::default(), String::new());
    }
    let diff = TextDiff::from_lines(old, new);
    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.added += 1,
            ChangeTag::Delete => stats.removed += 1,
            ChangeTag::Equal => {}
        }
    }
    let body = diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{label}"), &format!("b/{label}"))
        .to_string();
    (stats, body)
}

/// Append-only per-candidate diff log.
#[derive(Clone, Debug)]
pub struct DiffLog {
    path: PathBuf,
    preview_lines: usize,
}

impl DiffLog {
    pub const FILE_NAME: &'static str = "diff.log";

    pub fn in_dir(dir: &Path, preview_lines: usize) -> Self {
        Self { path: dir.join(Self::FILE_NAME), preview_lines }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record revision `attempt` of artifact `label`. Nothing is written when
    /// the revisions are identical.
    pub fn append(&self, label: &str, attempt: u32, old: &str, new: &str) -> Result<DiffStats> {
        let (stats, body) = unified_diff(label, old, new);
        if stats.is_empty() {
            tracing::debug!(label, attempt, "revision unchanged; no diff entry");
            return Ok(stats);
        }

        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open diff log {}", self.path.display()))?;
        writeln!(f, "=== {label} attempt {attempt} (+{} -{}) ===", stats.added, stats.removed)?;
        f.write_all(body.as_bytes())?;
        if !body.ends_with('\n') {
            writeln!(f)?;
        }

        tracing::info!(label, attempt, added = stats.added, removed = stats.removed, "diff logged");
        tracing::debug!("{}", preview(&body, self.preview_lines));
        Ok(stats)
    }
}

/// First `max_lines` lines of `body`, with a trailer counting the rest.
pub fn preview(body: &str, max_lines: usize) -> String {
    let total = body.lines().count();
    let mut out = body.lines().take(max_lines).collect::<Vec<_>>().join("\n");
    if total > max_lines {
        out.push_str(&format!("\n... ({} more lines)", total - max_lines));
    }
    out
}
