//! Risk limit checker
//!
//! In-process `Checker` enforcing static position limits. Breaches are
//! rejected outright; everything else is approved with a confidence that
//! shrinks as the notional approaches `max_notional`.

use crate::domain::{well_known, ActionParams, CheckerId};
use crate::error::CheckerError;
use crate::ports::outbound::{Checker, CheckerVerdict};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

/// Lowest confidence granted to an action that is within limits
pub const MIN_APPROVAL_CONFIDENCE: f64 = 0.05;

/// Static limits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Allowed action verbs, compared case-insensitively
    pub allowed_actions: BTreeSet<String>,
    /// Largest amount per action, in asset units
    pub max_amount: f64,
    /// Largest `amount * price`
    pub max_notional: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            allowed_actions: ["BUY", "SELL"].into_iter().map(String::from).collect(),
            max_amount: 10.0,
            max_notional: 250_000.0,
        }
    }
}

pub struct RiskLimitChecker {
    id: CheckerId,
    limits: RiskLimits,
}

impl RiskLimitChecker {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            id: CheckerId::from(well_known::RISK_LIMITS),
            limits,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = CheckerId::new(id);
        self
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    fn breach(&self, params: &ActionParams) -> Option<String> {
        let action = params.action.to_ascii_uppercase();
        if !self
            .limits
            .allowed_actions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&action))
        {
            return Some(format!("action {} not allowed", params.action));
        }
        if params.amount > self.limits.max_amount {
            return Some(format!(
                "amount {} above limit {}",
                params.amount, self.limits.max_amount
            ));
        }
        let notional = params.notional();
        if notional > self.limits.max_notional {
            return Some(format!(
                "notional {notional} above limit {}",
                self.limits.max_notional
            ));
        }
        None
    }
}

impl Default for RiskLimitChecker {
    fn default() -> Self {
        Self::new(RiskLimits::default())
    }
}

#[async_trait]
impl Checker for RiskLimitChecker {
    fn id(&self) -> CheckerId {
        self.id.clone()
    }

    async fn evaluate(&self, params: &ActionParams) -> Result<CheckerVerdict, CheckerError> {
        if self.limits.max_notional <= 0.0 {
            return Err(CheckerError::Internal {
                reason: "max_notional must be positive".into(),
            });
        }

        if let Some(breach) = self.breach(params) {
            return Ok(CheckerVerdict::reject(1.0).with_auxiliary(json!({ "breach": breach })));
        }

        let utilisation = params.notional() / self.limits.max_notional;
        let confidence = (1.0 - utilisation).clamp(MIN_APPROVAL_CONFIDENCE, 1.0);
        Ok(CheckerVerdict::approve(confidence).with_auxiliary(json!({ "utilisation": utilisation })))
    }
}
