//! Project state snapshots on disk.
//!
//! A snapshot is JSON `{ "version": 1, "files": { "<path>": "<content>" } }`,
//! validated against the embedded schema on load. Directories can also be
//! captured into a state directly.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::state::ProjectState;
use crate::io::config::write_atomic;

const PROJECT_STATE_SCHEMA: &str = include_str!("../../schemas/project_state/v1.schema.json");

pub const SNAPSHOT_VERSION: u32 = 1;

/// Directories never captured from a project tree.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target"];

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    files: BTreeMap<String, String>,
}

/// Load and validate a snapshot file.
pub fn load_snapshot(path: &Path) -> Result<ProjectState> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    parse_snapshot(&contents).with_context(|| format!("load snapshot {}", path.display()))
}

pub fn parse_snapshot(contents: &str) -> Result<ProjectState> {
    let value: Value = serde_json::from_str(contents).context("parse snapshot json")?;
    validate_schema(&value)?;
    let snapshot: Snapshot = serde_json::from_value(value).context("deserialize snapshot")?;
    Ok(ProjectState::from(snapshot.files))
}

pub fn snapshot_json(state: &ProjectState) -> Result<String> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        files: state.files().clone(),
    };
    let mut buf = serde_json::to_string_pretty(&snapshot).context("serialize snapshot")?;
    buf.push('\n');
    Ok(buf)
}

/// Atomically write a snapshot (temp file + rename).
pub fn write_snapshot(path: &Path, state: &ProjectState) -> Result<()> {
    write_atomic(path, &snapshot_json(state)?)
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(PROJECT_STATE_SCHEMA).context("parse project state schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "snapshot schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Capture the text files under `root`.
///
/// Hidden entries, dependency/build directories and non-UTF-8 files are
/// skipped.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn capture_dir(root: &Path) -> Result<ProjectState> {
    let mut state = ProjectState::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || {
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_ref())
            }
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let Some(relative) = relative.to_str() else {
            warn!(path = %entry.path().display(), "skipping non-UTF-8 path");
            continue;
        };
        let bytes = fs::read(entry.path())
            .with_context(|| format!("read {}", entry.path().display()))?;
        match String::from_utf8(bytes) {
            Ok(content) => {
                state.insert(relative.replace('\\', "/"), content);
            }
            Err(_) => warn!(path = relative, "skipping non-UTF-8 file"),
        }
    }
    debug!(files = state.len(), "captured project directory");
    Ok(state)
}
