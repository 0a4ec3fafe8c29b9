//! GNU unified diff parsing.
//!
//! Accepts a single-file diff: optional preamble (`diff --git`, `index`),
//! optional `---`/`+++` headers, then one or more `@@ -a,b +c,d @@` hunks made
//! of context (` `), removed (`-`) and added (`+`) lines. Lines keep any `\r`
//! so they compare equal to lines split from CRLF content.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static HUNK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based first line of the old range (0 for insertions into an empty file).
    pub old_start: usize,
    /// Declared old line count.
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
    /// `\ No newline at end of file` follows the last old-side line.
    pub old_missing_newline: bool,
    /// `\ No newline at end of file` follows the last new-side line.
    pub new_missing_newline: bool,
}

impl Hunk {
    /// Lines the hunk expects to find: context and removed lines in order.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => Some(text.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    /// Lines the hunk leaves behind: context and added lines in order.
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Add(text) => Some(text.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }

    /// 0-based line before which the hunk's old range begins.
    pub fn anchor(&self) -> usize {
        if self.old_len == 0 {
            self.old_start
        } else {
            self.old_start.saturating_sub(1)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnifiedDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffParseError {
    #[error("diff contains no hunks")]
    NoHunks,
    /// `line` is 1-based within the diff text.
    #[error("line {line}: {reason}")]
    Invalid { line: usize, reason: String },
}

fn invalid(line: usize, reason: impl Into<String>) -> DiffParseError {
    DiffParseError::Invalid {
        line: line + 1,
        reason: reason.into(),
    }
}

/// Parse a single-file unified diff.
pub fn parse_unified_diff(text: &str) -> Result<UnifiedDiff, DiffParseError> {
    let lines = split_lines(text);
    let mut diff = UnifiedDiff::default();
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx];
        if line.starts_with("@@") {
            let (hunk, next) = parse_hunk(&lines, idx)?;
            if let Some(prev) = diff.hunks.last()
                && hunk.anchor() < prev.anchor() + prev.old_len
            {
                return Err(invalid(idx, "hunks overlap or are out of order"));
            }
            diff.hunks.push(hunk);
            idx = next;
            continue;
        }
        if let Some(path) = line.strip_prefix("--- ") {
            if !diff.hunks.is_empty() {
                return Err(invalid(idx, "diff touches more than one file"));
            }
            diff.old_path = Some(header_path(path));
        } else if let Some(path) = line.strip_prefix("+++ ") {
            if !diff.hunks.is_empty() {
                return Err(invalid(idx, "diff touches more than one file"));
            }
            diff.new_path = Some(header_path(path));
        } else if !diff.hunks.is_empty() && !line.trim().is_empty() {
            return Err(invalid(idx, format!("unexpected line `{line}` after hunk")));
        }
        idx += 1;
    }

    if diff.hunks.is_empty() {
        return Err(DiffParseError::NoHunks);
    }
    Ok(diff)
}

fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize), DiffParseError> {
    let header = lines[start].trim_end();
    let caps = HUNK_HEADER_RE
        .captures(header)
        .ok_or_else(|| invalid(start, format!("malformed hunk header `{header}`")))?;
    let number = |group: usize, default: usize| -> Result<usize, DiffParseError> {
        match caps.get(group) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| invalid(start, "hunk range out of bounds")),
            None => Ok(default),
        }
    };

    let mut hunk = Hunk {
        old_start: number(1, 0)?,
        old_len: number(2, 1)?,
        new_start: number(3, 0)?,
        new_len: number(4, 1)?,
        lines: Vec::new(),
        old_missing_newline: false,
        new_missing_newline: false,
    };

    let mut old_seen = 0usize;
    let mut new_seen = 0usize;
    let mut idx = start + 1;
    while idx < lines.len() {
        let line = lines[idx];
        if line.starts_with("@@") || is_file_header(lines, idx) {
            break;
        }
        let body = line.get(1..).unwrap_or("").to_string();
        match line.chars().next() {
            Some(' ') => {
                hunk.lines.push(HunkLine::Context(body));
                old_seen += 1;
                new_seen += 1;
            }
            Some('-') => {
                hunk.lines.push(HunkLine::Remove(body));
                old_seen += 1;
            }
            Some('+') => {
                hunk.lines.push(HunkLine::Add(body));
                new_seen += 1;
            }
            Some('\\') => match hunk.lines.last() {
                Some(HunkLine::Context(_)) => {
                    hunk.old_missing_newline = true;
                    hunk.new_missing_newline = true;
                }
                Some(HunkLine::Remove(_)) => hunk.old_missing_newline = true,
                Some(HunkLine::Add(_)) => hunk.new_missing_newline = true,
                None => return Err(invalid(idx, "newline marker before any hunk line")),
            },
            // Editors strip the lone space of empty context lines; once the
            // declared ranges are filled an empty line is trailing padding.
            None | Some('\r') => {
                if old_seen >= hunk.old_len && new_seen >= hunk.new_len {
                    idx += 1;
                    continue;
                }
                hunk.lines.push(HunkLine::Context(line.to_string()));
                old_seen += 1;
                new_seen += 1;
            }
            Some(_) => {
                return Err(invalid(idx, format!("unexpected line `{line}` in hunk")));
            }
        }
        idx += 1;
    }

    if hunk.lines.is_empty() {
        return Err(invalid(start, "empty hunk"));
    }
    if old_seen != hunk.old_len || new_seen != hunk.new_len {
        return Err(invalid(
            start,
            format!(
                "hunk header declares {} old and {} new lines, body has {old_seen} and {new_seen}",
                hunk.old_len, hunk.new_len
            ),
        ));
    }
    Ok((hunk, idx))
}

fn is_file_header(lines: &[&str], idx: usize) -> bool {
    lines[idx].starts_with("--- ")
        && lines
            .get(idx + 1)
            .is_some_and(|next| next.starts_with("+++ "))
}

/// Strip the conventional `a/` / `b/` prefix and any trailing timestamp.
fn header_path(raw: &str) -> String {
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_string()
}

/// Split on `\n`, dropping the empty element after a trailing newline.
pub(crate) fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}
