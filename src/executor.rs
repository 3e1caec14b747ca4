use crate::{
    batch_plan::Batch,
    config::Config,
    edit::Editor,
    error::CampaignError,
    report::BatchResult,
    tools::{SnapshotPort, ValidationPort, ValidationResult, types::EXECUTION_FAILURE},
    util::now_rfc3339,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    Snapshotting,
    Editing,
    Validating,
    Success,
    RollingBack,
    RolledBack,
    Failed,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchState::Success | BatchState::RolledBack | BatchState::Failed
        )
    }

    pub fn can_transition(self, to: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, to),
            (Pending, Snapshotting)
                | (Pending, Editing)
                | (Snapshotting, Editing)
                | (Snapshotting, Failed)
                | (Editing, Validating)
                | (Editing, Success)
                | (Editing, RollingBack)
                | (Editing, Failed)
                | (Validating, Success)
                | (Validating, RollingBack)
                | (Validating, Failed)
                | (RollingBack, RolledBack)
                | (RollingBack, Failed)
        )
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub snapshots: bool,
    pub auto_rollback: bool,
    pub validate: bool,
    pub dry_run: bool,
    pub label_prefix: String,
    /// Error count the tree already had before the campaign started.
    pub baseline_errors: Option<usize>,
}

impl ExecutorOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            snapshots: cfg.safety.snapshots,
            auto_rollback: cfg.safety.auto_rollback,
            validate: cfg.validation.enabled,
            dry_run: cfg.global.dry_run,
            label_prefix: cfg.safety.snapshot_label_prefix.clone(),
            baseline_errors: None,
        }
    }
}

/// Result of one batch plus the error that must stop the campaign, if any.
#[derive(Debug)]
pub struct BatchOutcome {
    pub result: BatchResult,
    pub fatal: Option<CampaignError>,
}

pub struct BatchExecutor<'a> {
    repo_root: PathBuf,
    editor: Editor,
    validator: &'a dyn ValidationPort,
    snapshots: &'a dyn SnapshotPort,
    opts: ExecutorOptions,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        cfg: &Config,
        repo_root: &Path,
        validator: &'a dyn ValidationPort,
        snapshots: &'a dyn SnapshotPort,
        opts: ExecutorOptions,
    ) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            editor: Editor::new(cfg),
            validator,
            snapshots,
            opts,
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.opts
    }

    pub fn run_batch(&self, batch: &Batch) -> BatchOutcome {
        let started = Instant::now();
        let mut result = BatchResult {
            batch_id: batch.id,
            files: batch.paths(),
            success: false,
            final_state: BatchState::Pending,
            state_trail: vec![BatchState::Pending],
            processed_count: 0,
            eliminated_count: 0,
            preserved_count: 0,
            validation_result: None,
            rollback_performed: false,
            snapshot_id: None,
            errors: Vec::new(),
            notes: Vec::new(),
            duration_ms: 0,
        };

        info!(
            "batch {} start files={} limit={} worst_tier={:?}",
            batch.id,
            batch.tasks.len(),
            batch.limit,
            batch.worst_tier()
        );

        let fatal = self.drive(batch, &mut result).err();
        if let Some(err) = &fatal {
            error!("{err}");
            result.errors.push(err.to_string());
            if !result.final_state.is_terminal() {
                result.final_state = BatchState::Failed;
                result.state_trail.push(BatchState::Failed);
            }
            result.success = false;
        }
        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "batch {} end state={:?} eliminated={} preserved={} rollback={} {}ms",
            batch.id,
            result.final_state,
            result.eliminated_count,
            result.preserved_count,
            result.rollback_performed,
            result.duration_ms
        );
        BatchOutcome { result, fatal }
    }

    fn drive(&self, batch: &Batch, result: &mut BatchResult) -> Result<(), CampaignError> {
        let mut snapshot = None;
        if self.opts.snapshots && !self.opts.dry_run {
            advance(result, BatchState::Snapshotting)?;
            let label = format!(
                "{} batch-{} {}",
                self.opts.label_prefix,
                batch.id,
                now_rfc3339()
            );
            let snap = self
                .snapshots
                .create(&label, &batch.paths())
                .map_err(|e| CampaignError::SnapshotCreate {
                    batch_id: batch.id,
                    reason: format!("{e:#}"),
                })?;
            result.snapshot_id = Some(snap.id.clone());
            snapshot = Some(snap);
        }

        advance(result, BatchState::Editing)?;
        for task in &batch.tasks {
            match self.editor.apply(&self.repo_root, task, self.opts.dry_run) {
                Ok(outcome) => {
                    result.processed_count += 1;
                    result.eliminated_count += outcome.eliminated;
                    result.preserved_count += outcome.preserved;
                    result
                        .notes
                        .extend(outcome.notes.into_iter().map(|n| format!("{}: {n}", task.path)));
                }
                Err(err) => {
                    warn!("edit failed for {}: {err:#}", task.path);
                    result.errors.push(format!("{}: {err:#}", task.path));
                }
            }
        }

        if self.opts.validate && !self.opts.dry_run {
            advance(result, BatchState::Validating)?;
            let validation = self.judge(self.validator.validate());
            result.validation_result = Some(validation);
        }

        let passed = result.errors.is_empty()
            && result
                .validation_result
                .as_ref()
                .is_none_or(|v| v.passed);

        if passed {
            advance(result, BatchState::Success)?;
            result.success = true;
            if let Some(snap) = snapshot.take() {
                let id = snap.id.clone();
                if let Err(err) = self.snapshots.discard(snap) {
                    warn!("batch {} succeeded but snapshot {id} was not discarded: {err:#}", batch.id);
                }
            }
            return Ok(());
        }

        result.success = false;
        match snapshot.take() {
            Some(snap) if self.opts.auto_rollback => {
                advance(result, BatchState::RollingBack)?;
                warn!("batch {} failed; restoring snapshot {}", batch.id, snap.id);
                self.snapshots
                    .restore(&snap)
                    .map_err(|e| CampaignError::Rollback {
                        batch_id: batch.id,
                        reason: format!("{e:#}"),
                    })?;
                result.rollback_performed = true;
                advance(result, BatchState::RolledBack)?;
            }
            other => {
                if let Some(snap) = other {
                    let id = snap.id.clone();
                    if let Err(err) = self.snapshots.discard(snap) {
                        warn!("batch {} snapshot {id} was not discarded: {err:#}", batch.id);
                    }
                }
                warn!(
                    "batch {} failed without rollback; edits remain in the working tree",
                    batch.id
                );
                advance(result, BatchState::Failed)?;
            }
        }
        Ok(())
    }

    fn judge(&self, mut v: ValidationResult) -> ValidationResult {
        if let Some(baseline) = self.opts.baseline_errors {
            let crashed = v.categorized_errors.contains_key(EXECUTION_FAILURE);
            if !crashed {
                v.passed = v.error_count <= baseline;
            }
        }
        v
    }
}

fn advance(result: &mut BatchResult, to: BatchState) -> Result<(), CampaignError> {
    let from = result.final_state;
    if !from.can_transition(to) {
        return Err(CampaignError::InvalidTransition {
            batch_id: result.batch_id,
            from,
            to,
        });
    }
    result.final_state = to;
    result.state_trail.push(to);
    Ok(())
}
