//! Applies modification payloads to a file's current content.
//!
//! Full-file payloads replace the content verbatim. Unified diffs are applied
//! hunk by hunk, top to bottom, on a private copy of the lines; the caller only
//! ever sees the fully patched result or an error, never a partial patch.

use serde::{Deserialize, Serialize};

use crate::core::error::ApplyError;
use crate::core::types::ModificationForm;
use crate::core::unified_diff::{Hunk, parse_unified_diff, split_lines};

/// Lines a drifted hunk may move from its declared position.
pub const DEFAULT_SEARCH_WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyOptions {
    /// Maximum distance (in lines) between a hunk's adjusted declared
    /// position and the place its old lines are found.
    pub search_window: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            search_window: DEFAULT_SEARCH_WINDOW,
        }
    }
}

/// Apply `payload` to `current` (the content of `path`, absent if the file
/// does not exist yet).
pub fn apply(
    path: &str,
    current: Option<&str>,
    payload: &str,
    form: ModificationForm,
    options: &ApplyOptions,
) -> Result<String, ApplyError> {
    match form {
        ModificationForm::FullFile => Ok(payload.to_string()),
        ModificationForm::Diff => {
            let current = current.ok_or_else(|| ApplyError::TargetMissing {
                path: path.to_string(),
            })?;
            let diff = parse_unified_diff(payload).map_err(|err| ApplyError::InvalidDiff {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
            apply_hunks(path, current, &diff.hunks, options)
        }
    }
}

/// Content split into lines plus its final-newline state.
struct FileLines {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl FileLines {
    fn parse(content: &str) -> Self {
        Self {
            lines: split_lines(content).into_iter().map(str::to_string).collect(),
            // An empty file gains a terminated last line when lines are added.
            trailing_newline: content.is_empty() || content.ends_with('\n'),
        }
    }

    fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }
}

fn apply_hunks(
    path: &str,
    current: &str,
    hunks: &[Hunk],
    options: &ApplyOptions,
) -> Result<String, ApplyError> {
    let mut file = FileLines::parse(current);
    // Net line-count change of the hunks applied so far.
    let mut delta: isize = 0;
    // Hunks never match above the end of the previously applied hunk.
    let mut floor = 0usize;

    for (idx, hunk) in hunks.iter().enumerate() {
        let old = hunk.old_lines();
        let new = hunk.new_lines();
        let expected = hunk.anchor() as isize + delta;
        let pos = locate(&file.lines, &old, expected, floor, options.search_window).ok_or_else(
            || ApplyError::HunkConflict {
                path: path.to_string(),
                hunk: idx + 1,
            },
        )?;

        let reaches_end = pos + old.len() == file.lines.len();
        file.lines
            .splice(pos..pos + old.len(), new.iter().map(|line| line.to_string()));
        if reaches_end {
            if hunk.new_missing_newline {
                file.trailing_newline = false;
            } else if hunk.old_missing_newline {
                file.trailing_newline = true;
            }
        }

        floor = pos + new.len();
        delta += new.len() as isize - old.len() as isize;
    }

    Ok(file.render())
}

/// Find where `old` matches: the expected position first, then alternating
/// earlier/later candidates up to `window` lines away.
fn locate(
    lines: &[String],
    old: &[&str],
    expected: isize,
    floor: usize,
    window: usize,
) -> Option<usize> {
    let matches_at = |pos: isize| -> Option<usize> {
        let pos = usize::try_from(pos).ok()?;
        if pos < floor || pos + old.len() > lines.len() {
            return None;
        }
        lines[pos..pos + old.len()]
            .iter()
            .zip(old)
            .all(|(have, want)| have == want)
            .then_some(pos)
    };

    if let Some(pos) = matches_at(expected) {
        return Some(pos);
    }
    (1..=window as isize).find_map(|distance| {
        matches_at(expected - distance).or_else(|| matches_at(expected + distance))
    })
}
