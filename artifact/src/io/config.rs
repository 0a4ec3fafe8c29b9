//! Protocol settings stored in a TOML file (`artifact.toml` by default).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::diff_applier::ApplyOptions;
use crate::core::grammar::Grammar;
use crate::core::types::{DEFAULT_WORK_DIR, ProtocolConfig};

/// Protocol settings (TOML).
///
/// Intended to be edited by humans. Missing fields default to the WebContainer
/// conventions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Absolute working directory that action paths are rooted at.
    pub work_dir: String,

    pub grammar: Grammar,

    pub diff: ApplyOptions,

    pub shell: ShellSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellSettings {
    /// Interpreter used as `<program> -c <command>`.
    pub program: String,

    /// Per-command wall-clock budget in seconds.
    pub timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl ShellSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            work_dir: DEFAULT_WORK_DIR.to_string(),
            grammar: Grammar::default(),
            diff: ApplyOptions::default(),
            shell: ShellSettings::default(),
        }
    }
}

impl ProtocolSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.work_dir.starts_with('/') {
            return Err(anyhow!("work_dir must be an absolute path"));
        }
        self.grammar.validate().map_err(|err| anyhow!(err))?;
        if self.shell.program.trim().is_empty() {
            return Err(anyhow!("shell.program must be non-empty"));
        }
        if self.shell.timeout_secs == 0 {
            return Err(anyhow!("shell.timeout_secs must be > 0"));
        }
        if self.shell.output_limit_bytes == 0 {
            return Err(anyhow!("shell.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    /// The subset the protocol core needs.
    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            work_dir: self.work_dir.clone(),
            grammar: self.grammar.clone(),
            apply: self.diff,
        }
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `ProtocolSettings::default()`.
pub fn load_settings(path: &Path) -> Result<ProtocolSettings> {
    if !path.exists() {
        let settings = ProtocolSettings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: ProtocolSettings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &ProtocolSettings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);
    fs::write(tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
