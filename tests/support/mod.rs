#![allow(dead_code)]

use anyhow::{Result, anyhow};
use safe_batch::{
    findings::{Decision, Finding},
    review::{ReviewDecision, ReviewPrompt},
    risk::{FileKind, FileTask, RiskTier},
    tools::{Snapshot, SnapshotInfo, SnapshotPort, ValidationPort, ValidationResult},
};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

/// Returns queued results in order, then passes forever.
#[derive(Default)]
pub struct ScriptedValidator {
    queue: RefCell<VecDeque<ValidationResult>>,
    pub calls: Cell<usize>,
}

impl ScriptedValidator {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn with(results: Vec<ValidationResult>) -> Self {
        Self {
            queue: RefCell::new(results.into()),
            calls: Cell::new(0),
        }
    }
}

impl ValidationPort for ScriptedValidator {
    fn validate(&self) -> ValidationResult {
        self.calls.set(self.calls.get() + 1);
        self.queue.borrow_mut().pop_front().unwrap_or_else(pass)
    }
}

pub fn pass() -> ValidationResult {
    ValidationResult {
        passed: true,
        ..Default::default()
    }
}

pub fn fail(code: &str, count: usize) -> ValidationResult {
    let mut categorized_errors = BTreeMap::new();
    categorized_errors.insert(code.to_string(), count);
    ValidationResult {
        passed: false,
        error_count: count,
        categorized_errors,
        raw_output: format!("error {code}: injected"),
    }
}

/// Snapshot port whose create or restore always fails.
#[derive(Default)]
pub struct BrokenSnapshots {
    pub fail_create: bool,
    pub fail_discard: bool,
    pub discards: Cell<u32>,
}

impl SnapshotPort for BrokenSnapshots {
    fn create(&self, label: &str, _files: &[String]) -> Result<Snapshot> {
        if self.fail_create {
            return Err(anyhow!("stash refused"));
        }
        Ok(Snapshot {
            id: "broken".into(),
            label: label.to_string(),
            stash_commit: None,
            files: Vec::new(),
            created: String::new(),
        })
    }

    fn restore(&self, _snapshot: &Snapshot) -> Result<()> {
        Err(anyhow!("reset failed"))
    }

    fn discard(&self, _snapshot: Snapshot) -> Result<()> {
        self.discards.set(self.discards.get() + 1);
        if self.fail_discard {
            return Err(anyhow!("stash drop failed"));
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<SnapshotInfo>> {
        Ok(Vec::new())
    }
}

pub struct ScriptedPrompt {
    pub answers: BTreeMap<String, Option<ReviewDecision>>,
    pub asked: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[(&str, Option<ReviewDecision>)]) -> Self {
        Self {
            answers: answers.iter().map(|(p, d)| (p.to_string(), *d)).collect(),
            asked: Vec::new(),
        }
    }
}

impl ReviewPrompt for ScriptedPrompt {
    fn ask(&mut self, task: &FileTask, _reasons: &[String]) -> Result<Option<ReviewDecision>> {
        self.asked.push(task.path.clone());
        Ok(self.answers.get(&task.path).copied().flatten())
    }
}

pub fn finding(file: &str, symbol: &str, line: u32, column: u32, decision: Decision) -> Finding {
    Finding {
        file: file.to_string(),
        symbol: symbol.to_string(),
        line,
        column,
        decision,
        confidence: 1.0,
    }
}

pub fn task(path: &str, tier: RiskTier, kind: FileKind, flagged: u32) -> FileTask {
    FileTask {
        path: path.to_string(),
        risk_tier: tier,
        flagged_count: flagged,
        file_kind: kind,
        factors: Vec::new(),
        mitigations: Vec::new(),
        findings: Vec::new(),
    }
}

pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

pub fn read_file(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}
