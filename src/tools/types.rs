use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub error_count: usize,
    /// Diagnostic code -> occurrences.
    pub categorized_errors: BTreeMap<String, usize>,
    pub raw_output: String,
}

impl ValidationResult {
    pub fn execution_failure(reason: impl Into<String>) -> Self {
        let mut categorized_errors = BTreeMap::new();
        categorized_errors.insert(EXECUTION_FAILURE.to_string(), 1);
        Self {
            passed: false,
            error_count: 1,
            categorized_errors,
            raw_output: reason.into(),
        }
    }
}

pub const EXECUTION_FAILURE: &str = "EXECUTION_FAILURE";
pub const UNPARSED: &str = "UNPARSED";

/// Pre-batch state of one file. `contents == None` means the file did not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCapture {
    pub path: String,
    pub sha256: Option<String>,
    pub contents: Option<Vec<u8>>,
}

/// Handle to a restorable pre-batch state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    pub label: String,
    /// Stash commit holding pending changes; `None` when the tree was clean.
    pub stash_commit: Option<String>,
    pub files: Vec<FileCapture>,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LintSummary {
    pub total_unused: u32,
    pub files_with_unused: u32,
    pub per_file: BTreeMap<String, u32>,
    pub total_messages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCheck {
    pub name: String,
    pub command: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub repo_root: String,
    pub git_repo: bool,
    pub checks: Vec<ToolCheck>,
    pub ok: bool,
}
