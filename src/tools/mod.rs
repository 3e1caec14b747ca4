pub mod eslint;
pub mod files;
pub mod git;
pub mod process;
pub mod typecheck;
pub mod types;

use crate::config::Config;
use anyhow::{Result, anyhow};
use std::path::Path;
use std::time::Duration;

pub use types::{
    DoctorReport, FileCapture, LintSummary, Snapshot, SnapshotInfo, ToolCheck, ValidationResult,
};

/// Whole-tree correctness gate run after each batch.
pub trait ValidationPort {
    /// Never fails: tool crashes and timeouts come back as a failed result.
    fn validate(&self) -> ValidationResult;
}

/// Captures and restores pre-batch working tree state.
pub trait SnapshotPort {
    fn create(&self, label: &str, files: &[String]) -> Result<Snapshot>;
    fn restore(&self, snapshot: &Snapshot) -> Result<()>;
    fn discard(&self, snapshot: Snapshot) -> Result<()>;
    fn list(&self) -> Result<Vec<SnapshotInfo>>;
}

pub trait LintPort {
    fn unused_summary(&self) -> Result<LintSummary>;
}

pub fn snapshot_port(cfg: &Config, repo_root: &Path) -> Result<Box<dyn SnapshotPort>> {
    match cfg.safety.snapshot_backend.as_str() {
        "files" => Ok(Box::new(files::FileSnapshotPort::new(repo_root))),
        "git" => Ok(Box::new(git::GitSnapshotPort::new(
            repo_root,
            &cfg.safety.snapshot_label_prefix,
        )?)),
        other => Err(anyhow!("unknown safety.snapshot_backend: {other}")),
    }
}

pub fn doctor(cfg: &Config, repo_root: &Path) -> DoctorReport {
    let mut checks = vec![probe_tool("git", &["git".to_string(), "--version".to_string()], repo_root)];
    if let Some(exe) = cfg.validation.command.first() {
        checks.push(probe_tool(
            "validation",
            &[exe.clone(), "--version".to_string()],
            repo_root,
        ));
    }
    if let Some(exe) = cfg.lint.command.first() {
        checks.push(probe_tool("lint", &[exe.clone(), "--version".to_string()], repo_root));
    }
    let git_repo = git::is_git_repo(repo_root);
    let needs_git = cfg.safety.snapshots && cfg.safety.snapshot_backend == "git";
    let ok = checks.iter().all(|c| c.ok) && (git_repo || !needs_git);
    DoctorReport {
        repo_root: repo_root.display().to_string(),
        git_repo,
        checks,
        ok,
    }
}

fn probe_tool(name: &str, argv: &[String], cwd: &Path) -> ToolCheck {
    match process::run_command(argv, cwd, Some(Duration::from_secs(60))) {
        Ok(out) => ToolCheck {
            name: name.to_string(),
            command: argv.join(" "),
            ok: out.status.success(),
            detail: process::combined_output(&out).trim().to_string(),
        },
        Err(err) => ToolCheck {
            name: name.to_string(),
            command: argv.join(" "),
            ok: false,
            detail: format!("{err:#}"),
        },
    }
}
