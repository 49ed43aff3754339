//! Proposal confidence checker

use crate::domain::{ActionParams, CheckerId};
use crate::error::CheckerError;
use crate::ports::outbound::{Checker, CheckerVerdict};
use async_trait::async_trait;

pub const DEFAULT_CHECKER_ID: &str = "proposal_confidence";

/// Approves proposals whose own confidence reaches `floor`.
///
/// Approvals echo the proposed confidence. Rejections are as sure as the
/// proposal is unsure, i.e. `1 - proposed_confidence`.
pub struct ProposalConfidenceChecker {
    id: CheckerId,
    floor: f64,
}

impl ProposalConfidenceChecker {
    pub fn new(floor: f64) -> Self {
        Self {
            id: CheckerId::from(DEFAULT_CHECKER_ID),
            floor: floor.clamp(0.0, 1.0),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = CheckerId::new(id);
        self
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }
}

#[async_trait]
impl Checker for ProposalConfidenceChecker {
    fn id(&self) -> CheckerId {
        self.id.clone()
    }

    async fn evaluate(&self, params: &ActionParams) -> Result<CheckerVerdict, CheckerError> {
        let proposed = params.proposed_confidence;
        if !proposed.is_finite() {
            return Err(CheckerError::InvalidVerdict {
                reason: format!("proposed confidence {proposed} is not finite"),
            });
        }

        if proposed >= self.floor {
            Ok(CheckerVerdict::approve(proposed))
        } else {
            Ok(CheckerVerdict::reject(1.0 - proposed))
        }
    }
}
