//! Test-only helpers: scripted hosts and action stream builders.

use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::pipeline::Host;

/// Host that records every operation and fails the scripted ones.
#[derive(Debug, Default, Clone)]
pub struct ScriptedHost {
    /// `(path, content)` of every successful write, in order.
    pub writes: Vec<(String, String)>,
    /// Every successfully run command, in order.
    pub commands: Vec<String>,
    fail_commands: Vec<String>,
    fail_writes: Vec<String>,
}

impl ScriptedHost {
    /// Fail any command containing one of `needles`.
    pub fn failing_commands(needles: &[&str]) -> Self {
        Self {
            fail_commands: needles.iter().map(|needle| (*needle).to_string()).collect(),
            ..Self::default()
        }
    }

    /// Fail writes to any of `paths`.
    pub fn failing_writes(paths: &[&str]) -> Self {
        Self {
            fail_writes: paths.iter().map(|path| (*path).to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Host for ScriptedHost {
    fn write_file(&mut self, path: &str, content: &str) -> Result<()> {
        if self.fail_writes.iter().any(|fail| fail == path) {
            return Err(anyhow!("scripted failure writing {path}"));
        }
        self.writes.push((path.to_string(), content.to_string()));
        Ok(())
    }

    fn run_shell(&mut self, command: &str) -> Result<()> {
        if self
            .fail_commands
            .iter()
            .any(|needle| command.contains(needle.as_str()))
        {
            return Err(anyhow!("scripted failure running `{command}`"));
        }
        self.commands.push(command.to_string());
        Ok(())
    }
}

/// `<boltAction type="file">` block with verbatim content.
pub fn file_block(path: &str, content: &str) -> String {
    format!("<boltAction type=\"file\" filePath=\"{path}\">{content}</boltAction>")
}

pub fn shell_block(command: &str) -> String {
    format!("<boltAction type=\"shell\">\n  {command}\n</boltAction>")
}

/// Modification block carrying a unified diff.
pub fn diff_block(path: &str, diff: &str) -> String {
    format!(
        "<boltAction type=\"modification\" filePath=\"{path}\"><diff>\n{diff}</diff></boltAction>"
    )
}

/// Modification block carrying replacement content.
pub fn full_file_block(path: &str, content: &str) -> String {
    format!(
        "<boltAction type=\"modification\" filePath=\"{path}\"><file>{content}</file></boltAction>"
    )
}

/// Wrap blocks in an artifact, with some prose around it.
pub fn artifact(blocks: &[String]) -> String {
    let mut text = String::from("Here is the plan.\n\n<boltArtifact id=\"test\" title=\"Test\">\n");
    for block in blocks {
        text.push_str("  ");
        text.push_str(block);
        text.push('\n');
    }
    text.push_str("</boltArtifact>\n\nDone.\n");
    text
}

/// Temporary project directory seeded with `files`.
pub fn temp_project(files: &[(&str, &str)]) -> Result<TempDir> {
    let dir = TempDir::new()?;
    for (path, content) in files {
        write_file(dir.path(), path, content)?;
    }
    Ok(dir)
}

/// Write `content` at `root/path`, creating parent directories.
pub fn write_file(root: &Path, path: &str, content: &str) -> Result<()> {
    let target = root.join(path);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, content)?;
    Ok(())
}
