use crate::{
    config::Config,
    findings::normalize_path,
    risk::{FileTask, RiskTier},
    util::{now_rfc3339, write_json},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub path: String,
    pub decision: ReviewDecision,
    pub reviewer: String,
    pub recorded_at: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl ApprovalRecord {
    pub fn new(path: &str, decision: ReviewDecision, reviewer: &str, note: Option<String>) -> Self {
        Self {
            path: normalize_path(path),
            decision,
            reviewer: reviewer.to_string(),
            recorded_at: now_rfc3339(),
            note,
        }
    }
}

/// Approval records keyed by exact file path. The latest record wins.
#[derive(Debug, Default)]
pub struct ApprovalStore {
    path: Option<PathBuf>,
    records: BTreeMap<String, ApprovalRecord>,
}

impl ApprovalStore {
    pub fn load(path: &Path) -> Result<Self> {
        let mut store = Self {
            path: Some(path.to_path_buf()),
            records: BTreeMap::new(),
        };
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading approvals: {}", path.display()))?;
            let records: Vec<ApprovalRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing approvals: {}", path.display()))?;
            for r in records {
                store.records.insert(r.path.clone(), r);
            }
        }
        Ok(store)
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&ApprovalRecord> {
        self.records.get(path)
    }

    pub fn is_approved(&self, path: &str) -> bool {
        self.get(path)
            .is_some_and(|r| r.decision == ReviewDecision::Approve)
    }

    pub fn record(&mut self, rec: ApprovalRecord) {
        info!("review {:?} {} by {}", rec.decision, rec.path, rec.reviewer);
        self.records.insert(rec.path.clone(), rec);
    }

    pub fn records(&self) -> impl Iterator<Item = &ApprovalRecord> {
        self.records.values()
    }

    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(p) => write_json(p, &self.records.values().collect::<Vec<_>>()),
            None => Ok(()),
        }
    }
}

/// Why a file must be reviewed before automatic processing; empty means it may run unattended.
pub fn review_reasons(cfg: &Config, task: &FileTask) -> Vec<String> {
    let mut reasons = Vec::new();
    if task.flagged_count > cfg.review.auto_process_ceiling {
        reasons.push(format!(
            "{} flagged symbols exceeds auto-process ceiling {}",
            task.flagged_count, cfg.review.auto_process_ceiling
        ));
    }
    match task.risk_tier {
        RiskTier::High | RiskTier::Critical => {
            reasons.push(format!("risk tier {}", task.risk_tier.as_str()));
        }
        RiskTier::Low | RiskTier::Medium => {}
    }
    reasons
}

/// Source of operator decisions in interactive mode.
pub trait ReviewPrompt {
    /// `None` leaves the file undecided.
    fn ask(&mut self, task: &FileTask, reasons: &[String]) -> Result<Option<ReviewDecision>>;
}

pub struct StdinPrompt;

impl ReviewPrompt for StdinPrompt {
    fn ask(&mut self, task: &FileTask, reasons: &[String]) -> Result<Option<ReviewDecision>> {
        let mut stderr = std::io::stderr();
        writeln!(
            stderr,
            "\nreview {} (tier={}, flagged={})",
            task.path,
            task.risk_tier.as_str(),
            task.flagged_count
        )?;
        for r in reasons.iter().chain(&task.factors) {
            writeln!(stderr, "  - {r}")?;
        }
        for m in &task.mitigations {
            writeln!(stderr, "  * {m}")?;
        }
        write!(stderr, "approve? [y]es / [n]o / [s]kip: ")?;
        stderr.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(ReviewDecision::Approve),
            "n" | "no" => Some(ReviewDecision::Reject),
            _ => None,
        })
    }
}
