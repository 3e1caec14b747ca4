mod support;

use anyhow::Result;
use safe_batch::{
    campaign::{Campaign, Progress, campaign_id},
    config::Config,
    findings::{self, Decision, Finding},
    review::{ApprovalRecord, ApprovalStore, ReviewDecision},
    risk::RiskTier,
    tools::{LintPort, LintSummary, eslint::parse_eslint_json, files::FileSnapshotPort},
};
use std::cell::Cell;
use std::path::Path;
use support::{BrokenSnapshots, ScriptedPrompt, ScriptedValidator, fail, finding, pass, read_file, write_file};

/// One file with `n` single-line declarations, each flagged for removal.
fn busy_file(root: &Path, rel: &str, n: u32) -> Vec<Finding> {
    let body: String = (0..n).map(|i| format!("const v{i} = {i};\n")).collect();
    write_file(root, rel, &body);
    (0..n)
        .map(|i| finding(rel, &format!("v{i}"), i + 1, 7, Decision::Eliminate))
        .collect()
}

/// Small low-risk files, one flagged declaration each.
fn small_files(root: &Path, names: &[&str]) -> Vec<Finding> {
    names
        .iter()
        .map(|name| {
            let rel = format!("src/{name}.ts");
            write_file(root, &rel, &format!("const {name} = 1;\nexport const keep = 2;\n"));
            finding(&rel, name, 1, 7, Decision::Eliminate)
        })
        .collect()
}

#[test]
fn heavily_flagged_file_waits_for_review() {
    let dir = tempfile::tempdir().unwrap();
    let findings = busy_file(dir.path(), "src/utils/big.ts", 25);
    let before = read_file(dir.path(), "src/utils/big.ts");
    let cfg = Config::default();

    let mut campaign = Campaign::new(&cfg, dir.path(), "t", ApprovalStore::in_memory());
    let plan = campaign.plan(&findings, None).unwrap();
    assert!(plan.batches.batches.is_empty());
    assert!(plan.automatic.is_empty());
    assert_eq!(plan.review.len(), 1);
    assert_eq!(plan.review[0].path, "src/utils/big.ts");
    assert_eq!(plan.review[0].risk_tier, RiskTier::High);
    assert!(plan.review[0].reasons.iter().any(|r| r.contains("ceiling")));
    assert_eq!(campaign.manual_review_queue.len(), 1);

    let validator = ScriptedValidator::passing();
    let snaps = FileSnapshotPort::new(dir.path());
    let run = campaign.execute(&plan, &validator, &snaps, None);
    assert!(run.fatal.is_none());
    assert!(run.report.batch_results.is_empty());
    assert!(run.report.recommendations.iter().any(|r| r.contains("manual review")));
    assert_eq!(validator.calls.get(), 0);
    assert_eq!(read_file(dir.path(), "src/utils/big.ts"), before);
}

#[test]
fn recorded_approval_lets_the_file_run() {
    let dir = tempfile::tempdir().unwrap();
    let findings = busy_file(dir.path(), "src/utils/big.ts", 25);
    let cfg = Config::default();
    let mut approvals = ApprovalStore::in_memory();
    approvals.record(ApprovalRecord::new(
        "./src/utils/big.ts",
        ReviewDecision::Approve,
        "alex",
        None,
    ));

    let mut campaign = Campaign::new(&cfg, dir.path(), "t", approvals);
    let plan = campaign.plan(&findings, None).unwrap();
    assert_eq!(plan.approved, vec!["src/utils/big.ts"]);
    assert!(plan.review.is_empty());
    assert_eq!(plan.batches.batches.len(), 1);
    assert_eq!(plan.batches.batches[0].limit, cfg.batching.high_risk_batch_size);

    let validator = ScriptedValidator::passing();
    let snaps = FileSnapshotPort::new(dir.path());
    let run = campaign.execute(&plan, &validator, &snaps, None);
    assert!(run.report.halted_reason.is_none());
    assert_eq!(run.report.final_stats.eliminated, 25);
    assert_eq!(read_file(dir.path(), "src/utils/big.ts"), "");
}

#[test]
fn interactive_answers_are_applied_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let mut findings = busy_file(dir.path(), "src/services/a.ts", 2);
    findings.extend(busy_file(dir.path(), "src/services/b.ts", 2));
    findings.extend(small_files(dir.path(), &["plain"]));
    let store_path = dir.path().join(".safe-batch/approvals.json");
    let cfg = Config::default();

    let mut campaign = Campaign::new(
        &cfg,
        dir.path(),
        "t",
        ApprovalStore::load(&store_path).unwrap(),
    );
    let mut prompt = ScriptedPrompt::new(&[
        ("src/services/a.ts", Some(ReviewDecision::Approve)),
        ("src/services/b.ts", Some(ReviewDecision::Reject)),
    ]);
    let plan = campaign.plan(&findings, Some(&mut prompt)).unwrap();

    assert_eq!(prompt.asked, vec!["src/services/a.ts", "src/services/b.ts"]);
    assert_eq!(plan.automatic, vec!["src/plain.ts"]);
    assert_eq!(plan.approved, vec!["src/services/a.ts"]);
    assert_eq!(plan.review.len(), 1);
    assert!(plan.review[0].reasons.iter().any(|r| r.starts_with("rejected by")));

    let reloaded = ApprovalStore::load(&store_path).unwrap();
    assert!(reloaded.is_approved("src/services/a.ts"));
    assert_eq!(
        reloaded.get("src/services/b.ts").map(|r| r.decision),
        Some(ReviewDecision::Reject)
    );

    // Decisions already on file are not asked again.
    let mut again = Campaign::new(&cfg, dir.path(), "t", reloaded);
    let mut silent = ScriptedPrompt::new(&[]);
    again.plan(&findings, Some(&mut silent)).unwrap();
    assert!(silent.asked.is_empty());
}

#[test]
fn skipped_prompt_leaves_file_in_queue() {
    let dir = tempfile::tempdir().unwrap();
    let findings = busy_file(dir.path(), "src/core/k.ts", 1);
    let cfg = Config::default();
    let mut campaign = Campaign::new(&cfg, dir.path(), "t", ApprovalStore::in_memory());
    let mut prompt = ScriptedPrompt::new(&[("src/core/k.ts", None)]);
    let plan = campaign.plan(&findings, Some(&mut prompt)).unwrap();
    assert_eq!(prompt.asked.len(), 1);
    assert_eq!(plan.review.len(), 1);
    assert!(campaign.approvals().get("src/core/k.ts").is_none());
}

#[test]
fn campaign_stops_at_first_failed_batch() {
    let dir = tempfile::tempdir().unwrap();
    let findings = small_files(dir.path(), &["one", "two", "three"]);
    let mut cfg = Config::default();
    cfg.batching.default_batch_size = 1;

    let mut campaign = Campaign::new(&cfg, dir.path(), "t", ApprovalStore::in_memory());
    let plan = campaign.plan(&findings, None).unwrap();
    assert_eq!(plan.batches.batches.len(), 3);
    let order: Vec<String> = plan.batches.batches.iter().flat_map(|b| b.paths()).collect();

    let validator = ScriptedValidator::with(vec![pass(), fail("TS2304", 2)]);
    let snaps = FileSnapshotPort::new(dir.path());
    let run = campaign.execute(&plan, &validator, &snaps, None);

    assert!(run.fatal.is_none());
    let results = &run.report.batch_results;
    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert!(results[1].rollback_performed);
    assert_eq!(run.report.halted_reason.as_deref(), Some("batch 2 failed"));
    assert!(run.report.recommendations[0].starts_with("Campaign halted"));
    assert_eq!(run.report.final_stats.rolled_back_batches, 1);
    assert_eq!(campaign.validation_history.len(), 2);

    assert_eq!(read_file(dir.path(), &order[0]), "export const keep = 2;\n");
    for untouched in &order[1..] {
        assert!(read_file(dir.path(), untouched).starts_with("const "));
    }
}

#[test]
fn resume_skips_files_completed_by_an_earlier_run() {
    let dir = tempfile::tempdir().unwrap();
    let findings = small_files(dir.path(), &["one", "two", "three"]);
    let progress_path = dir.path().join(".safe-batch/progress.json");
    let mut cfg = Config::default();
    cfg.batching.default_batch_size = 1;

    let mut first = Campaign::new(&cfg, dir.path(), "c1", ApprovalStore::in_memory())
        .with_progress_file(&progress_path, None);
    let plan = first.plan(&findings, None).unwrap();
    let done = plan.batches.batches[0].paths();
    let validator = ScriptedValidator::with(vec![pass(), fail("TS2304", 1)]);
    let snaps = FileSnapshotPort::new(dir.path());
    first.execute(&plan, &validator, &snaps, None);

    let saved = Progress::load(&progress_path).unwrap().unwrap();
    assert_eq!(saved.campaign_id, "c1");
    assert_eq!(saved.completed_files.iter().cloned().collect::<Vec<_>>(), done);
    assert_eq!(saved.checkpoints.len(), 2);

    let mut second = Campaign::new(&cfg, dir.path(), "c1", ApprovalStore::in_memory())
        .with_progress_file(&progress_path, Some(saved));
    let plan = second.plan(&findings, None).unwrap();
    assert_eq!(plan.skipped_completed, done);
    assert_eq!(plan.batches.file_count(), 2);
    let run = second.execute(&plan, &ScriptedValidator::passing(), &snaps, None);
    assert!(run.report.halted_reason.is_none());
    assert_eq!(second.progress().completed_files.len(), 3);
}

#[test]
fn dry_run_records_no_progress() {
    let dir = tempfile::tempdir().unwrap();
    let findings = small_files(dir.path(), &["one"]);
    let progress_path = dir.path().join(".safe-batch/progress.json");
    let mut cfg = Config::default();
    cfg.global.dry_run = true;

    let mut campaign = Campaign::new(&cfg, dir.path(), "d", ApprovalStore::in_memory())
        .with_progress_file(&progress_path, None);
    let plan = campaign.plan(&findings, None).unwrap();
    let run = campaign.execute(
        &plan,
        &ScriptedValidator::passing(),
        &BrokenSnapshots {
            fail_create: true,
            ..Default::default()
        },
        None,
    );
    assert!(run.report.dry_run);
    assert_eq!(run.report.final_stats.eliminated, 1);
    assert!(campaign.progress().completed_files.is_empty());
    assert!(!progress_path.exists());
    assert_eq!(read_file(dir.path(), "src/one.ts"), "const one = 1;\nexport const keep = 2;\n");
}

#[test]
fn snapshot_failure_aborts_the_campaign() {
    let dir = tempfile::tempdir().unwrap();
    let findings = small_files(dir.path(), &["one", "two"]);
    let mut cfg = Config::default();
    cfg.batching.default_batch_size = 1;

    let mut campaign = Campaign::new(&cfg, dir.path(), "t", ApprovalStore::in_memory());
    let plan = campaign.plan(&findings, None).unwrap();
    let run = campaign.execute(
        &plan,
        &ScriptedValidator::passing(),
        &BrokenSnapshots {
            fail_create: true,
            ..Default::default()
        },
        None,
    );
    let fatal = run.fatal.unwrap();
    assert!(fatal.requires_manual_intervention());
    assert_eq!(run.report.batch_results.len(), 1);
    assert!(run.report.halted_reason.unwrap().contains("manual intervention"));
}

#[test]
fn baseline_is_measured_once_before_batches() {
    let dir = tempfile::tempdir().unwrap();
    let findings = small_files(dir.path(), &["one"]);
    let mut cfg = Config::default();
    cfg.validation.compare_to_baseline = true;

    let mut campaign = Campaign::new(&cfg, dir.path(), "t", ApprovalStore::in_memory());
    let plan = campaign.plan(&findings, None).unwrap();
    let validator = ScriptedValidator::with(vec![fail("TS7006", 5), fail("TS7006", 5)]);
    let snaps = FileSnapshotPort::new(dir.path());
    let run = campaign.execute(&plan, &validator, &snaps, None);

    assert_eq!(validator.calls.get(), 2);
    assert_eq!(run.report.baseline_error_count, Some(5));
    assert!(run.report.batch_results[0].success);
}

struct CountingLint {
    readings: Vec<u32>,
    calls: Cell<usize>,
}

impl LintPort for CountingLint {
    fn unused_summary(&self) -> Result<LintSummary> {
        let i = self.calls.get();
        self.calls.set(i + 1);
        Ok(LintSummary {
            total_unused: self.readings[i.min(self.readings.len() - 1)],
            ..Default::default()
        })
    }
}

#[test]
fn lint_is_measured_before_and_after() {
    let dir = tempfile::tempdir().unwrap();
    let findings = small_files(dir.path(), &["one"]);
    let cfg = Config::default();
    let mut campaign = Campaign::new(&cfg, dir.path(), "t", ApprovalStore::in_memory());
    let plan = campaign.plan(&findings, None).unwrap();
    let lint = CountingLint {
        readings: vec![9, 8],
        calls: Cell::new(0),
    };
    let run = campaign.execute(
        &plan,
        &ScriptedValidator::passing(),
        &FileSnapshotPort::new(dir.path()),
        Some(&lint),
    );
    let delta = run.report.lint.unwrap();
    assert_eq!(delta.before.total_unused, 9);
    assert_eq!(delta.after.map(|a| a.total_unused), Some(8));
}

#[test]
fn campaign_id_tracks_input_and_mode() {
    let cfg = Config::default();
    let a = campaign_id(&cfg, b"[]");
    assert_eq!(a.len(), 16);
    assert_eq!(a, campaign_id(&cfg, b"[]"));
    assert_ne!(a, campaign_id(&cfg, b"[ ]"));
    let mut dry = cfg.clone();
    dry.global.dry_run = true;
    assert_ne!(a, campaign_id(&dry, b"[]"));
}

#[test]
fn findings_accept_list_or_wrapped_document() {
    let list = r#"[{"file": "./src/a.ts", "symbol": "x", "line": 3, "column": 7, "decision": "eliminate"}]"#;
    let wrapped = r#"{"findings": [{"file": "src\\b.ts", "symbol": "y", "line": 1, "column": 1, "decision": "preserve", "confidence": 0.4}]}"#;
    let a = findings::parse(list).unwrap();
    assert_eq!(a[0].file, "src/a.ts");
    assert_eq!(a[0].confidence, 1.0);
    let b = findings::parse(wrapped).unwrap();
    assert_eq!(b[0].file, "src/b.ts");
    assert_eq!(b[0].decision, Decision::Preserve);

    let zero_line = r#"[{"file": "a.ts", "symbol": "x", "line": 0, "column": 1, "decision": "eliminate"}]"#;
    assert!(findings::parse(zero_line).is_err());
}

#[test]
fn eslint_json_counts_only_unused_rules() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let raw = serde_json::json!([
        {
            "filePath": root.join("src/a.ts").display().to_string(),
            "messages": [
                {"ruleId": "@typescript-eslint/no-unused-vars"},
                {"ruleId": "@typescript-eslint/no-unused-vars"},
                {"ruleId": "no-console"}
            ]
        },
        {
            "filePath": root.join("src/b.ts").display().to_string(),
            "messages": [{"ruleId": null}]
        }
    ])
    .to_string();
    let cfg = Config::default();
    let summary = parse_eslint_json(&raw, &cfg.lint.unused_rules, &root).unwrap();
    assert_eq!(summary.total_unused, 2);
    assert_eq!(summary.files_with_unused, 1);
    assert_eq!(summary.total_messages, 4);
    assert_eq!(summary.per_file.get("src/a.ts"), Some(&2));
}
