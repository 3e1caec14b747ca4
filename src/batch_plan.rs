use crate::{
    config::Config,
    risk::{FileKind, FileTask, RiskTier},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: usize, // 1-based
    /// Locked when the first file is added; never tightened afterwards.
    pub limit: usize,
    pub tasks: Vec<FileTask>,
}

impl Batch {
    pub fn paths(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.path.clone()).collect()
    }

    pub fn worst_tier(&self) -> Option<RiskTier> {
        self.tasks.iter().map(|t| t.risk_tier).max()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
}

impl BatchPlan {
    pub fn file_count(&self) -> usize {
        self.batches.iter().map(|b| b.tasks.len()).sum()
    }
}

/// Lower risk first, then fewer flagged symbols, then path.
pub fn sort_tasks(tasks: &mut [FileTask]) {
    tasks.sort_by(|a, b| {
        a.risk_tier
            .cmp(&b.risk_tier)
            .then(a.flagged_count.cmp(&b.flagged_count))
            .then_with(|| a.path.cmp(&b.path))
    });
}

pub fn limit_for(cfg: &Config, task: &FileTask) -> usize {
    let b = &cfg.batching;
    let tier_limit = match task.risk_tier {
        RiskTier::Critical => b.critical_batch_size,
        RiskTier::High => b.high_risk_batch_size,
        RiskTier::Medium | RiskTier::Low => b.default_batch_size,
    };
    let kind_limit = match task.file_kind {
        FileKind::Core => b.critical_batch_size,
        FileKind::Service => b.high_risk_batch_size,
        FileKind::Component | FileKind::Test | FileKind::Other => b.default_batch_size,
    };
    b.default_batch_size.min(tier_limit).min(kind_limit).max(1)
}

/// Greedy partition. A file whose own limit is stricter than the running
/// batch's locked limit starts a new batch rather than joining it.
pub fn partition(cfg: &Config, mut tasks: Vec<FileTask>) -> BatchPlan {
    sort_tasks(&mut tasks);

    let mut batches: Vec<Batch> = Vec::new();
    let mut current: Option<Batch> = None;

    for task in tasks {
        let limit = limit_for(cfg, &task);
        let fits = match &current {
            Some(b) => b.tasks.len() < b.limit && limit >= b.limit,
            None => false,
        };
        if !fits {
            if let Some(done) = current.take() {
                batches.push(done);
            }
            current = Some(Batch {
                id: batches.len() + 1,
                limit,
                tasks: Vec::new(),
            });
        }
        if let Some(b) = current.as_mut() {
            b.tasks.push(task);
        }
    }
    if let Some(done) = current {
        batches.push(done);
    }

    BatchPlan { batches }
}
