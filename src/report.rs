use crate::{
    batch_plan::BatchPlan,
    config::Config,
    executor::BatchState,
    risk::FileTask,
    tools::{LintSummary, ValidationResult},
};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: usize,
    pub files: Vec<String>,
    pub success: bool,
    pub final_state: BatchState,
    pub state_trail: Vec<BatchState>,
    pub processed_count: u32,
    pub eliminated_count: u32,
    pub preserved_count: u32,
    pub validation_result: Option<ValidationResult>,
    pub rollback_performed: bool,
    pub snapshot_id: Option<String>,
    pub errors: Vec<String>,
    pub notes: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub path: String,
    pub risk_tier: crate::risk::RiskTier,
    pub flagged_count: u32,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_files: usize,
    pub total_findings: usize,
    pub automatic_processing: Vec<String>,
    pub approved: Vec<String>,
    pub manual_review_required: Vec<ReviewEntry>,
    pub skipped_completed: Vec<String>,
    pub batches: Vec<PlannedBatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedBatch {
    pub id: usize,
    pub limit: usize,
    pub files: Vec<String>,
}

impl PlannedBatch {
    pub fn from_plan(plan: &BatchPlan) -> Vec<PlannedBatch> {
        plan.batches
            .iter()
            .map(|b| PlannedBatch {
                id: b.id,
                limit: b.limit,
                files: b.paths(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalStats {
    pub total_batches: usize,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub rolled_back_batches: usize,
    pub files_processed: u32,
    pub eliminated: u32,
    pub preserved: u32,
    pub success_rate: f64,
    pub elimination_rate: f64,
    pub duration_ms: u64,
}

impl FinalStats {
    pub fn from_results(results: &[BatchResult]) -> Self {
        let total_batches = results.len();
        let successful_batches = results.iter().filter(|r| r.success).count();
        let rolled_back_batches = results.iter().filter(|r| r.rollback_performed).count();
        let eliminated: u32 = results.iter().map(|r| r.eliminated_count).sum();
        let preserved: u32 = results.iter().map(|r| r.preserved_count).sum();
        let touched = eliminated + preserved;
        Self {
            total_batches,
            successful_batches,
            failed_batches: total_batches - successful_batches,
            rolled_back_batches,
            files_processed: results
                .iter()
                .filter(|r| r.success)
                .map(|r| r.processed_count)
                .sum(),
            eliminated,
            preserved,
            success_rate: if total_batches == 0 {
                1.0
            } else {
                successful_batches as f64 / total_batches as f64
            },
            elimination_rate: if touched == 0 {
                0.0
            } else {
                eliminated as f64 / touched as f64
            },
            duration_ms: results.iter().map(|r| r.duration_ms).sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintDelta {
    pub before: LintSummary,
    pub after: Option<LintSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    pub campaign_id: String,
    pub campaign_name: String,
    pub started: String,
    pub finished: String,
    pub dry_run: bool,
    pub plan: PlanSummary,
    pub batch_results: Vec<BatchResult>,
    pub final_stats: FinalStats,
    pub recommendations: Vec<String>,
    pub halted_reason: Option<String>,
    pub baseline_error_count: Option<usize>,
    pub lint: Option<LintDelta>,
}

pub fn recommendations(
    cfg: &Config,
    stats: &FinalStats,
    review_queue: &[ReviewEntry],
    halted_reason: Option<&str>,
) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(reason) = halted_reason {
        out.push(format!(
            "Campaign halted: {reason}. Inspect the working tree before resuming."
        ));
    }
    if stats.total_batches > 0 && stats.success_rate < cfg.report.min_success_rate {
        out.push(format!(
            "Success rate {:.0}% is below {:.0}%: reduce batching.default_batch_size (currently {}).",
            stats.success_rate * 100.0,
            cfg.report.min_success_rate * 100.0,
            cfg.batching.default_batch_size
        ));
    }
    if stats.rolled_back_batches > 0 {
        out.push(format!(
            "{} batch(es) were rolled back; review their validation errors before re-running.",
            stats.rolled_back_batches
        ));
    }
    let touched = stats.eliminated + stats.preserved;
    if touched > 0 && stats.elimination_rate < cfg.report.min_elimination_rate {
        out.push(format!(
            "Only {:.0}% of flagged symbols were eliminated; audit the preserve decisions.",
            stats.elimination_rate * 100.0
        ));
    }
    if !review_queue.is_empty() {
        out.push(format!(
            "{} file(s) await manual review; record decisions with `safe-batch review`.",
            review_queue.len()
        ));
    }
    if out.is_empty() && stats.total_batches > 0 {
        out.push(
            "All batches passed; batching.default_batch_size can be raised for the next run."
                .to_string(),
        );
    }
    out
}

pub fn render_markdown(report: &CampaignReport) -> String {
    let mut md = String::new();
    let s = &report.final_stats;
    let _ = writeln!(md, "# Campaign report: {}\n", report.campaign_name);
    let _ = writeln!(md, "- Campaign id: `{}`", report.campaign_id);
    let _ = writeln!(md, "- Started: {}", report.started);
    let _ = writeln!(md, "- Finished: {}", report.finished);
    if report.dry_run {
        let _ = writeln!(md, "- Mode: dry run (no files written)");
    }
    if let Some(reason) = &report.halted_reason {
        let _ = writeln!(md, "- **Halted**: {reason}");
    }

    let _ = writeln!(md, "\n## Statistics\n");
    let _ = writeln!(md, "| metric | value |\n|---|---|");
    let _ = writeln!(md, "| batches | {} |", s.total_batches);
    let _ = writeln!(md, "| successful | {} |", s.successful_batches);
    let _ = writeln!(md, "| failed | {} |", s.failed_batches);
    let _ = writeln!(md, "| rolled back | {} |", s.rolled_back_batches);
    let _ = writeln!(md, "| files processed | {} |", s.files_processed);
    let _ = writeln!(md, "| eliminated | {} |", s.eliminated);
    let _ = writeln!(md, "| preserved | {} |", s.preserved);
    let _ = writeln!(md, "| success rate | {:.1}% |", s.success_rate * 100.0);
    let _ = writeln!(md, "| elimination rate | {:.1}% |", s.elimination_rate * 100.0);
    if let Some(lint) = &report.lint {
        let after = lint
            .after
            .as_ref()
            .map(|a| a.total_unused.to_string())
            .unwrap_or_else(|| "-".into());
        let _ = writeln!(md, "| unused (lint) before / after | {} / {} |", lint.before.total_unused, after);
    }

    let _ = writeln!(md, "\n## Batches\n");
    for b in &report.batch_results {
        let _ = writeln!(
            md,
            "### Batch {} ({:?}, {} ms)\n",
            b.batch_id, b.final_state, b.duration_ms
        );
        for f in &b.files {
            let _ = writeln!(md, "- {f}");
        }
        if let Some(v) = &b.validation_result {
            let _ = writeln!(md, "\nValidation: passed={} errors={}", v.passed, v.error_count);
            for (code, n) in &v.categorized_errors {
                let _ = writeln!(md, "- {code}: {n}");
            }
        }
        if !b.errors.is_empty() {
            let _ = writeln!(md, "\nErrors:");
            for e in &b.errors {
                let _ = writeln!(md, "- {e}");
            }
        }
        md.push('\n');
    }

    if !report.plan.manual_review_required.is_empty() {
        let _ = writeln!(md, "## Manual review required\n");
        for r in &report.plan.manual_review_required {
            let _ = writeln!(
                md,
                "- {} ({}, {} flagged): {}",
                r.path,
                r.risk_tier.as_str(),
                r.flagged_count,
                r.reasons.join("; ")
            );
        }
        md.push('\n');
    }

    let _ = writeln!(md, "## Recommendations\n");
    for r in &report.recommendations {
        let _ = writeln!(md, "- {r}");
    }
    md
}

pub fn review_entry(task: &FileTask, reasons: Vec<String>) -> ReviewEntry {
    ReviewEntry {
        path: task.path.clone(),
        risk_tier: task.risk_tier,
        flagged_count: task.flagged_count,
        reasons,
    }
}
