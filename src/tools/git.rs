//! Snapshots backed by the git stash.
//!
//! `git stash create` records pending changes without touching the working
//! tree; the resulting commit is stored under the snapshot label so an operator
//! can find it with `git stash list` if the run dies. A clean tree yields no
//! stash commit, and restore then falls back to the captured file contents.

use super::{
    SnapshotPort,
    files::{capture_files, snapshot_id, verify, write_back},
    process::git,
    types::{Snapshot, SnapshotInfo},
};
use crate::util::now_rfc3339;
use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct GitSnapshotPort {
    repo_root: PathBuf,
    label_prefix: String,
}

impl GitSnapshotPort {
    pub fn new(repo_root: &Path, label_prefix: &str) -> Result<Self> {
        if !is_git_repo(repo_root) {
            return Err(anyhow!(
                "not a git work tree: {} (set safety.snapshot_backend = \"files\")",
                repo_root.display()
            ));
        }
        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            label_prefix: label_prefix.to_string(),
        })
    }

    fn stash_index(&self, commit: &str) -> Result<Option<usize>> {
        let raw = git(&self.repo_root, &["stash", "list", "--format=%H"])?;
        Ok(raw.lines().position(|l| l.trim() == commit))
    }

    fn drop_stash(&self, commit: &str) -> Result<()> {
        if let Some(i) = self.stash_index(commit)? {
            let entry = format!("stash@{{{i}}}");
            git(&self.repo_root, &["stash", "drop", "--quiet", &entry])?;
            debug!("dropped {entry} ({commit})");
        }
        Ok(())
    }
}

impl SnapshotPort for GitSnapshotPort {
    fn create(&self, label: &str, files: &[String]) -> Result<Snapshot> {
        let captures = capture_files(&self.repo_root, files)?;
        let commit = git(&self.repo_root, &["stash", "create", label])?
            .trim()
            .to_string();
        let stash_commit = if commit.is_empty() {
            debug!("working tree clean; snapshot {label} holds file contents only");
            None
        } else {
            git(&self.repo_root, &["stash", "store", "-m", label, &commit])?;
            Some(commit)
        };
        let id = match &stash_commit {
            Some(c) => c[..c.len().min(16)].to_string(),
            None => snapshot_id(label, &captures),
        };
        info!(
            "snapshot {id} ({label}) stash={} files={}",
            stash_commit.is_some(),
            captures.len()
        );
        Ok(Snapshot {
            id,
            label: label.to_string(),
            stash_commit,
            files: captures,
            created: now_rfc3339(),
        })
    }

    fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(commit) = &snapshot.stash_commit {
            git(&self.repo_root, &["reset", "--hard", "--quiet", "HEAD"])?;
            git(&self.repo_root, &["stash", "apply", "--quiet", commit])?;
        }
        // Untracked batch files are invisible to the stash; the capture covers them.
        write_back(&self.repo_root, &snapshot.files)?;
        verify(&self.repo_root, &snapshot.files)?;
        if let Some(commit) = &snapshot.stash_commit {
            if let Err(err) = self.drop_stash(commit) {
                warn!("snapshot {} restored but stash entry kept: {err:#}", snapshot.id);
            }
        }
        info!("snapshot {} restored", snapshot.id);
        Ok(())
    }

    fn discard(&self, snapshot: Snapshot) -> Result<()> {
        if let Some(commit) = &snapshot.stash_commit {
            self.drop_stash(commit)?;
        }
        debug!("snapshot {} discarded", snapshot.id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let raw = git(&self.repo_root, &["stash", "list", "--format=%H%x09%gs"])?;
        Ok(raw
            .lines()
            .filter_map(|l| l.split_once('\t'))
            .filter(|(_, subject)| subject.contains(&self.label_prefix))
            .map(|(hash, subject)| SnapshotInfo {
                id: hash[..hash.len().min(16)].to_string(),
                label: subject.to_string(),
            })
            .collect())
    }
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    std::process::Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "--quiet"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::write(dir.path().join("a.ts"), "const a = 1;\n").unwrap();
        run_git(dir.path(), &["add", "a.ts"]);
        run_git(dir.path(), &["commit", "--quiet", "-m", "initial"]);
        dir
    }

    fn read(dir: &Path, name: &str) -> String {
        std::fs::read_to_string(dir.join(name)).unwrap()
    }

    #[test]
    fn clean_tree_snapshot_has_no_stash() {
        let repo = make_git_repo();
        let port = GitSnapshotPort::new(repo.path(), "safe-batch").unwrap();
        let snap = port.create("safe-batch batch-1", &["a.ts".into()]).unwrap();
        assert!(snap.stash_commit.is_none());
        port.restore(&snap).unwrap();
        assert_eq!(read(repo.path(), "a.ts"), "const a = 1;\n");
    }

    #[test]
    fn clean_tree_restore_reverts_batch_edits() {
        let repo = make_git_repo();
        let port = GitSnapshotPort::new(repo.path(), "safe-batch").unwrap();
        let snap = port.create("safe-batch batch-1", &["a.ts".into()]).unwrap();
        std::fs::write(repo.path().join("a.ts"), "broken\n").unwrap();
        port.restore(&snap).unwrap();
        assert_eq!(read(repo.path(), "a.ts"), "const a = 1;\n");
    }

    #[test]
    fn dirty_tree_restore_keeps_pre_batch_changes() {
        let repo = make_git_repo();
        std::fs::write(repo.path().join("a.ts"), "const a = 2;\n").unwrap();
        let port = GitSnapshotPort::new(repo.path(), "safe-batch").unwrap();

        let snap = port.create("safe-batch batch-1", &["a.ts".into()]).unwrap();
        assert!(snap.stash_commit.is_some());
        assert_eq!(port.list().unwrap().len(), 1);

        std::fs::write(repo.path().join("a.ts"), "broken\n").unwrap();
        port.restore(&snap).unwrap();

        assert_eq!(read(repo.path(), "a.ts"), "const a = 2;\n");
        assert!(port.list().unwrap().is_empty());
    }

    #[test]
    fn discard_drops_stash_entry() {
        let repo = make_git_repo();
        std::fs::write(repo.path().join("a.ts"), "const a = 3;\n").unwrap();
        let port = GitSnapshotPort::new(repo.path(), "safe-batch").unwrap();
        let snap = port.create("safe-batch batch-1", &["a.ts".into()]).unwrap();
        port.discard(snap).unwrap();
        assert!(port.list().unwrap().is_empty());
        assert_eq!(read(repo.path(), "a.ts"), "const a = 3;\n");
    }

    #[test]
    fn rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitSnapshotPort::new(dir.path(), "safe-batch").is_err());
    }
}
