//! Errors that terminate a campaign.
//!
//! Everything recoverable (file edits, validation failures) is carried as data
//! in [`crate::report::BatchResult`]; only states where continuing would be
//! unsafe are raised here.

use crate::executor::BatchState;

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("batch {batch_id}: snapshot creation failed, manual intervention required: {reason}")]
    SnapshotCreate { batch_id: usize, reason: String },

    #[error("batch {batch_id}: rollback failed, working tree state unknown, manual intervention required: {reason}")]
    Rollback { batch_id: usize, reason: String },

    #[error("batch {batch_id}: illegal state transition {from:?} -> {to:?}")]
    InvalidTransition {
        batch_id: usize,
        from: BatchState,
        to: BatchState,
    },
}

impl CampaignError {
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(
            self,
            CampaignError::SnapshotCreate { .. } | CampaignError::Rollback { .. }
        )
    }
}
