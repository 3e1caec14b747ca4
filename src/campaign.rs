//! End-to-end campaign orchestration.
//!
//! A [`Campaign`] owns every piece of mutable run state (review queue,
//! validation history, checkpoints, approvals) and is threaded explicitly
//! through planning and execution.

use crate::{
    batch_plan::{self, BatchPlan},
    config::Config,
    error::CampaignError,
    executor::{BatchExecutor, BatchState, ExecutorOptions},
    findings::{self, Finding},
    report::{
        self, CampaignReport, FinalStats, LintDelta, PlanSummary, PlannedBatch, ReviewEntry,
    },
    review::{ApprovalRecord, ApprovalStore, ReviewDecision, ReviewPrompt, review_reasons},
    risk::{FileTask, RiskRules},
    scan,
    tools::{LintPort, SnapshotPort, ValidationPort, ValidationResult},
    util::{now_rfc3339, sha256_hex, write_json},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub batch_id: usize,
    pub files: Vec<String>,
    pub state: BatchState,
    pub recorded_at: String,
}

/// Persisted between runs so a halted campaign can be resumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub campaign_id: String,
    pub completed_files: BTreeSet<String>,
    pub checkpoints: Vec<Checkpoint>,
}

impl Progress {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading progress: {}", path.display()))?;
        Ok(Some(serde_json::from_str(&raw).with_context(|| {
            format!("parsing progress: {}", path.display())
        })?))
    }
}

#[derive(Debug, Clone)]
pub struct CampaignPlan {
    pub total_findings: usize,
    pub tasks: Vec<FileTask>,
    pub automatic: Vec<String>,
    pub approved: Vec<String>,
    pub review: Vec<ReviewEntry>,
    pub skipped_completed: Vec<String>,
    pub batches: BatchPlan,
}

impl CampaignPlan {
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            total_files: self.tasks.len(),
            total_findings: self.total_findings,
            automatic_processing: self.automatic.clone(),
            approved: self.approved.clone(),
            manual_review_required: self.review.clone(),
            skipped_completed: self.skipped_completed.clone(),
            batches: PlannedBatch::from_plan(&self.batches),
        }
    }
}

pub struct CampaignRun {
    pub report: CampaignReport,
    pub fatal: Option<CampaignError>,
}

/// Campaign id: config plus findings, so a changed input never resumes stale progress.
pub fn campaign_id(cfg: &Config, findings_raw: &[u8]) -> String {
    let cfg_hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    let findings_hash = sha256_hex(findings_raw);
    sha256_hex(format!("{cfg_hash}:{findings_hash}").as_bytes())[..16].to_string()
}

pub struct Campaign {
    cfg: Config,
    repo_root: PathBuf,
    id: String,
    approvals: ApprovalStore,
    completed: BTreeSet<String>,
    progress_path: Option<PathBuf>,
    baseline: Option<usize>,
    pub manual_review_queue: Vec<ReviewEntry>,
    pub validation_history: Vec<ValidationResult>,
    pub checkpoints: Vec<Checkpoint>,
}

impl Campaign {
    pub fn new(cfg: &Config, repo_root: &Path, id: &str, approvals: ApprovalStore) -> Self {
        Self {
            cfg: cfg.clone(),
            repo_root: repo_root.to_path_buf(),
            id: id.to_string(),
            approvals,
            completed: BTreeSet::new(),
            progress_path: None,
            baseline: None,
            manual_review_queue: Vec::new(),
            validation_history: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Persists progress after each batch; existing progress is resumed.
    pub fn with_progress_file(mut self, path: &Path, previous: Option<Progress>) -> Self {
        if let Some(p) = previous {
            info!(
                "resuming campaign {}: {} files already completed",
                self.id,
                p.completed_files.len()
            );
            self.completed = p.completed_files;
            self.checkpoints = p.checkpoints;
        }
        self.progress_path = Some(path.to_path_buf());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn approvals(&self) -> &ApprovalStore {
        &self.approvals
    }

    pub fn progress(&self) -> Progress {
        Progress {
            campaign_id: self.id.clone(),
            completed_files: self.completed.clone(),
            checkpoints: self.checkpoints.clone(),
        }
    }

    pub fn classify(&self, findings: &[Finding]) -> Result<Vec<FileTask>> {
        let rules = RiskRules::from_config(&self.cfg)?;
        Ok(findings::group_by_file(findings)
            .into_iter()
            .map(|(path, file_findings)| {
                let scan = scan::scan_file(&self.cfg, &self.repo_root, &path);
                let assessment = rules.classify(&path, file_findings.len() as u32, Some(&scan));
                FileTask::new(path, file_findings, assessment)
            })
            .collect())
    }

    /// Classifies, gates and batches. With a prompt, undecided review files are
    /// put to the operator and the answers recorded.
    pub fn plan(
        &mut self,
        findings: &[Finding],
        mut prompt: Option<&mut dyn ReviewPrompt>,
    ) -> Result<CampaignPlan> {
        let tasks = self.classify(findings)?;
        let mut automatic = Vec::new();
        let mut approved = Vec::new();
        let mut review = Vec::new();
        let mut skipped_completed = Vec::new();
        let mut runnable: Vec<FileTask> = Vec::new();
        let mut decided = false;

        for task in &tasks {
            if self.completed.contains(&task.path) {
                skipped_completed.push(task.path.clone());
                continue;
            }
            let reasons = review_reasons(&self.cfg, task);
            if reasons.is_empty() {
                automatic.push(task.path.clone());
                runnable.push(task.clone());
                continue;
            }

            if self.approvals.get(&task.path).is_none() {
                if let Some(p) = prompt.as_deref_mut() {
                    if let Some(decision) = p.ask(task, &reasons)? {
                        self.approvals.record(ApprovalRecord::new(
                            &task.path,
                            decision,
                            &self.cfg.review.reviewer,
                            Some("interactive".to_string()),
                        ));
                        decided = true;
                    }
                }
            }

            if self.approvals.is_approved(&task.path) {
                approved.push(task.path.clone());
                runnable.push(task.clone());
            } else {
                let mut reasons = reasons;
                if let Some(rec) = self.approvals.get(&task.path) {
                    if rec.decision == ReviewDecision::Reject {
                        reasons.push(format!("rejected by {}", rec.reviewer));
                    }
                }
                review.push(report::review_entry(task, reasons));
            }
        }

        if decided {
            self.approvals.save()?;
        }

        info!(
            "plan files={} automatic={} approved={} review={} skipped={}",
            tasks.len(),
            automatic.len(),
            approved.len(),
            review.len(),
            skipped_completed.len()
        );

        self.manual_review_queue = review.clone();
        let batches = batch_plan::partition(&self.cfg, runnable);
        Ok(CampaignPlan {
            total_findings: findings.len(),
            tasks,
            automatic,
            approved,
            review,
            skipped_completed,
            batches,
        })
    }

    /// Runs batches in order and stops at the first one that does not succeed.
    pub fn execute(
        &mut self,
        plan: &CampaignPlan,
        validator: &dyn ValidationPort,
        snapshots: &dyn SnapshotPort,
        lint: Option<&dyn LintPort>,
    ) -> CampaignRun {
        let started = now_rfc3339();
        let mut opts = ExecutorOptions::from_config(&self.cfg);

        if opts.validate && !opts.dry_run && self.cfg.validation.compare_to_baseline {
            let baseline = validator.validate();
            info!("baseline validation errors={}", baseline.error_count);
            self.baseline = Some(baseline.error_count);
            self.validation_history.push(baseline);
        }
        opts.baseline_errors = self.baseline;

        let lint_before = lint.and_then(|l| match l.unused_summary() {
            Ok(s) => Some(s),
            Err(err) => {
                warn!("lint measurement failed: {err:#}");
                None
            }
        });

        let executor = BatchExecutor::new(&self.cfg, &self.repo_root, validator, snapshots, opts);
        let mut results = Vec::new();
        let mut halted_reason = None;
        let mut fatal = None;

        for batch in &plan.batches.batches {
            let outcome = executor.run_batch(batch);
            let res = outcome.result;
            if let Some(v) = &res.validation_result {
                self.validation_history.push(v.clone());
            }
            self.checkpoint(batch.id, &res.files, res.final_state, res.success);
            let success = res.success;
            let batch_id = res.batch_id;
            results.push(res);

            if let Some(err) = outcome.fatal {
                halted_reason = Some(err.to_string());
                fatal = Some(err);
                break;
            }
            if !success {
                halted_reason = Some(format!("batch {batch_id} failed"));
                warn!("stopping campaign after failed batch {batch_id}");
                break;
            }
        }

        let lint = lint_before.map(|before| LintDelta {
            before,
            after: match (lint, &fatal) {
                (Some(l), None) => l.unused_summary().ok(),
                _ => None,
            },
        });

        let final_stats = FinalStats::from_results(&results);
        let recommendations = report::recommendations(
            &self.cfg,
            &final_stats,
            &self.manual_review_queue,
            halted_reason.as_deref(),
        );

        let report = CampaignReport {
            campaign_id: self.id.clone(),
            campaign_name: self.cfg.global.campaign_name.clone(),
            started,
            finished: now_rfc3339(),
            dry_run: executor.options().dry_run,
            plan: plan.summary(),
            batch_results: results,
            final_stats,
            recommendations,
            halted_reason,
            baseline_error_count: self.baseline,
            lint,
        };
        CampaignRun { report, fatal }
    }

    fn checkpoint(&mut self, batch_id: usize, files: &[String], state: BatchState, success: bool) {
        // A dry run writes nothing, so it must not mark files done.
        if self.cfg.global.dry_run {
            return;
        }
        if success {
            self.completed.extend(files.iter().cloned());
        }
        self.checkpoints.push(Checkpoint {
            batch_id,
            files: files.to_vec(),
            state,
            recorded_at: now_rfc3339(),
        });
        if let Some(path) = &self.progress_path {
            if let Err(err) = write_json(path, &self.progress()) {
                warn!("failed to persist progress: {err:#}");
            }
        }
    }
}
