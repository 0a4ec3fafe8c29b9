//! Host that applies actions to a real project directory.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ShellSettings;
use crate::io::process::run_command_with_timeout;
use crate::pipeline::Host;

/// Writes files under `root` and runs shell commands with `root` as the
/// working directory.
#[derive(Debug, Clone)]
pub struct WorkdirHost {
    root: PathBuf,
    shell: ShellSettings,
}

impl WorkdirHost {
    pub fn new(root: impl Into<PathBuf>, shell: ShellSettings) -> Self {
        Self {
            root: root.into(),
            shell,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(anyhow!("refusing to write outside the project: {path}"));
        }
        Ok(self.root.join(relative))
    }
}

impl Host for WorkdirHost {
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    fn write_file(&mut self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, content).with_context(|| format!("write {}", target.display()))?;
        debug!(target = %target.display(), "wrote file");
        Ok(())
    }

    #[instrument(skip(self), fields(program = %self.shell.program))]
    fn run_shell(&mut self, command: &str) -> Result<()> {
        let mut cmd = Command::new(&self.shell.program);
        cmd.arg("-c").arg(command).current_dir(&self.root);
        let timeout = self.shell.timeout();
        let output = run_command_with_timeout(cmd, timeout, self.shell.output_limit_bytes)
            .with_context(|| format!("run `{command}`"))?;
        if !output.success() {
            warn!(timed_out = output.timed_out, exit_code = ?output.status.code(), "shell command failed");
            return Err(anyhow!(output.failure_message(timeout)));
        }
        info!("shell command finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_project;

    fn host(root: &Path) -> WorkdirHost {
        WorkdirHost::new(root, ShellSettings::default())
    }

    #[test]
    fn writes_nested_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut host = host(temp.path());
        host.write_file("src/app/main.js", "run();\n").expect("write");
        let written = fs::read_to_string(temp.path().join("src/app/main.js")).expect("read");
        assert_eq!(written, "run();\n");
    }

    #[test]
    fn refuses_paths_outside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut host = host(temp.path());
        assert!(host.write_file("../escape.txt", "x").is_err());
        assert!(host.write_file("/etc/passwd", "x").is_err());
    }

    #[test]
    fn runs_commands_in_the_project_root() {
        let temp = temp_project(&[("package.json", "{}\n")]).expect("project");
        let mut host = host(temp.path());
        host.run_shell("test -f package.json && echo built > out.txt")
            .expect("run");
        let out = fs::read_to_string(temp.path().join("out.txt")).expect("read");
        assert_eq!(out, "built\n");
    }

    #[test]
    fn failing_command_reports_status_and_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut host = host(temp.path());
        let err = host
            .run_shell("echo missing dependency >&2; exit 2")
            .expect_err("failure");
        assert_eq!(
            err.to_string(),
            "exited with status 2: missing dependency"
        );
    }
}
