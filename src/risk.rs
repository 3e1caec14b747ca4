use crate::{config::Config, findings::Finding, scan::ContentScan};
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    fn rank(self) -> u8 {
        match self {
            RiskTier::Low => 0,
            RiskTier::Medium => 1,
            RiskTier::High => 2,
            RiskTier::Critical => 3,
        }
    }

    fn from_rank(rank: u8) -> Self {
        match rank {
            0 => RiskTier::Low,
            1 => RiskTier::Medium,
            2 => RiskTier::High,
            _ => RiskTier::Critical,
        }
    }

    /// Raises the tier by `steps`, saturating at critical.
    pub fn escalate(self, steps: u8) -> Self {
        Self::from_rank(self.rank().saturating_add(steps).min(3))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Core,
    Service,
    Component,
    Test,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    pub kind: FileKind,
    pub factors: Vec<String>,
    pub mitigations: Vec<String>,
}

/// A file scheduled for the campaign. Not modified once batching starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTask {
    pub path: String,
    pub risk_tier: RiskTier,
    pub flagged_count: u32,
    pub file_kind: FileKind,
    pub factors: Vec<String>,
    pub mitigations: Vec<String>,
    pub findings: Vec<Finding>,
}

impl FileTask {
    pub fn new(path: String, findings: Vec<Finding>, assessment: RiskAssessment) -> Self {
        Self {
            path,
            risk_tier: assessment.tier,
            flagged_count: findings.len() as u32,
            file_kind: assessment.kind,
            factors: assessment.factors,
            mitigations: assessment.mitigations,
            findings,
        }
    }
}

/// Compiled classification rules.
pub struct RiskRules {
    core: Vec<Regex>,
    service: Vec<Regex>,
    test: Vec<Regex>,
    escalate_one_over: u32,
    escalate_two_over: u32,
    max_imports: u32,
}

impl RiskRules {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            Ok(patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<std::result::Result<Vec<_>, _>>()?)
        };
        Ok(Self {
            core: compile(&cfg.risk.core_patterns)?,
            service: compile(&cfg.risk.service_patterns)?,
            test: compile(&cfg.risk.test_patterns)?,
            escalate_one_over: cfg.risk.flagged_escalate_one_over,
            escalate_two_over: cfg.risk.flagged_escalate_two_over,
            max_imports: cfg.risk.max_imports_before_escalation,
        })
    }

    pub fn file_kind(&self, path: &str) -> FileKind {
        if self.core.iter().any(|r| r.is_match(path)) {
            FileKind::Core
        } else if self.service.iter().any(|r| r.is_match(path)) {
            FileKind::Service
        } else if self.test.iter().any(|r| r.is_match(path)) {
            FileKind::Test
        } else if path.ends_with(".tsx") || path.ends_with(".jsx") || path.contains("components/") {
            FileKind::Component
        } else {
            FileKind::Other
        }
    }

    /// Classifies a file. Every rule only ever raises the tier.
    pub fn classify(&self, path: &str, flagged: u32, scan: Option<&ContentScan>) -> RiskAssessment {
        let mut tier = RiskTier::Low;
        let mut factors = Vec::new();
        let mut mitigations = Vec::new();

        let kind = self.file_kind(path);
        match kind {
            FileKind::Core => {
                tier = tier.max(RiskTier::Critical);
                factors.push("core calculation path".to_string());
                mitigations.push(format!(
                    "process in a dedicated small batch and review {path} by hand"
                ));
            }
            FileKind::Service => {
                tier = tier.max(RiskTier::High);
                factors.push("service layer path".to_string());
                mitigations.push("verify public service exports are still used".to_string());
            }
            FileKind::Component | FileKind::Test | FileKind::Other => {}
        }

        if flagged > self.escalate_two_over {
            tier = tier.escalate(2);
            factors.push(format!(
                "{flagged} flagged symbols (> {})",
                self.escalate_two_over
            ));
            mitigations.push("split the file's edits across review passes".to_string());
        } else if flagged > self.escalate_one_over {
            tier = tier.escalate(1);
            factors.push(format!(
                "{flagged} flagged symbols (> {})",
                self.escalate_one_over
            ));
            mitigations.push("spot-check eliminations before merging".to_string());
        }

        if let Some(scan) = scan {
            if scan.import_count > self.max_imports {
                tier = tier.escalate(1);
                factors.push(format!(
                    "complex dependencies: {} imports (> {})",
                    scan.import_count, self.max_imports
                ));
                mitigations.push("check re-exports and side-effect imports".to_string());
            }
            if !scan.keyword_hits.is_empty() {
                tier = tier.escalate(1);
                factors.push(format!("domain keywords: {}", scan.keyword_hits.join(", ")));
                mitigations.push("confirm domain symbols are truly unused".to_string());
            }
        }

        RiskAssessment {
            tier,
            kind,
            factors,
            mitigations,
        }
    }
}
