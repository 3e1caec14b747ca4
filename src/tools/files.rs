use super::{
    SnapshotPort,
    types::{FileCapture, Snapshot, SnapshotInfo},
};
use crate::util::{hash_file, now_rfc3339, sha256_hex};
use anyhow::{Context, Result, anyhow};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn capture_files(repo_root: &Path, files: &[String]) -> Result<Vec<FileCapture>> {
    let mut out = Vec::with_capacity(files.len());
    for rel in files {
        let path = repo_root.join(rel);
        if path.exists() {
            let contents =
                std::fs::read(&path).with_context(|| format!("capture {}", path.display()))?;
            out.push(FileCapture {
                path: rel.clone(),
                sha256: Some(sha256_hex(&contents)),
                contents: Some(contents),
            });
        } else {
            out.push(FileCapture {
                path: rel.clone(),
                sha256: None,
                contents: None,
            });
        }
    }
    Ok(out)
}

/// Writes captured contents back for every file that no longer matches.
pub fn write_back(repo_root: &Path, captures: &[FileCapture]) -> Result<()> {
    for cap in captures {
        let path = repo_root.join(&cap.path);
        match &cap.contents {
            Some(bytes) => {
                if current_hash(&path)? != cap.sha256 {
                    std::fs::write(&path, bytes)
                        .with_context(|| format!("restore {}", path.display()))?;
                    debug!("restored {}", cap.path);
                }
            }
            None => {
                if path.exists() {
                    std::fs::remove_file(&path)
                        .with_context(|| format!("remove {}", path.display()))?;
                }
            }
        }
    }
    Ok(())
}

/// Fails unless every captured file is byte-identical to its capture.
pub fn verify(repo_root: &Path, captures: &[FileCapture]) -> Result<()> {
    let mut mismatched = Vec::new();
    for cap in captures {
        if current_hash(&repo_root.join(&cap.path))? != cap.sha256 {
            mismatched.push(cap.path.clone());
        }
    }
    if mismatched.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "files differ from snapshot after restore: {}",
            mismatched.join(", ")
        ))
    }
}

fn current_hash(path: &Path) -> Result<Option<String>> {
    if path.exists() {
        Ok(Some(hash_file(path)?))
    } else {
        Ok(None)
    }
}

pub fn snapshot_id(label: &str, captures: &[FileCapture]) -> String {
    let mut seed = format!("{label}:{}", now_rfc3339());
    for c in captures {
        seed.push(':');
        seed.push_str(c.sha256.as_deref().unwrap_or("-"));
    }
    sha256_hex(seed.as_bytes())[..16].to_string()
}

/// Content-only snapshots for trees without version control.
pub struct FileSnapshotPort {
    repo_root: PathBuf,
    live: RefCell<BTreeMap<String, SnapshotInfo>>,
}

impl FileSnapshotPort {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            live: RefCell::new(BTreeMap::new()),
        }
    }
}

impl SnapshotPort for FileSnapshotPort {
    fn create(&self, label: &str, files: &[String]) -> Result<Snapshot> {
        let captures = capture_files(&self.repo_root, files)?;
        let id = snapshot_id(label, &captures);
        info!("snapshot {id} ({label}) captured {} files", captures.len());
        self.live.borrow_mut().insert(
            id.clone(),
            SnapshotInfo {
                id: id.clone(),
                label: label.to_string(),
            },
        );
        Ok(Snapshot {
            id,
            label: label.to_string(),
            stash_commit: None,
            files: captures,
            created: now_rfc3339(),
        })
    }

    fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        write_back(&self.repo_root, &snapshot.files)?;
        verify(&self.repo_root, &snapshot.files)?;
        self.live.borrow_mut().remove(&snapshot.id);
        info!("snapshot {} restored", snapshot.id);
        Ok(())
    }

    fn discard(&self, snapshot: Snapshot) -> Result<()> {
        self.live.borrow_mut().remove(&snapshot.id);
        debug!("snapshot {} discarded", snapshot.id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<SnapshotInfo>> {
        Ok(self.live.borrow().values().cloned().collect())
    }
}
