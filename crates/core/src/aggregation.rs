//! Approval aggregation policies.
//!
//! Combines the individual decisions recorded for one approval step into a
//! single [`StepOutcome`]. Every approval counts towards the policy's
//! thresholds, including `SKIPPED` ones.

use serde::{Deserialize, Serialize};

/// Per-approver decision state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        self != Self::Pending
    }
}

/// The decision an approver submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approve,
    Reject,
    Skip,
}

impl ApprovalDecision {
    /// The status an approval takes once this decision is recorded.
    pub fn status(self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
            Self::Skip => ApprovalStatus::Skipped,
        }
    }
}

/// How individual approvals combine into a step outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalPolicy {
    Any,
    #[default]
    All,
    Majority,
}

/// Result of aggregating a step's approvals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    Satisfied,
    Rejected,
    Pending,
    /// Nothing is pending any more, yet the policy is neither met nor
    /// failed (for example `ALL` with a skipped approval). No further
    /// response can change the result.
    Undecided,
}

/// Counts of approvals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApprovalTally {
    pub approved: usize,
    pub rejected: usize,
    pub pending: usize,
    pub skipped: usize,
}

impl ApprovalTally {
    pub fn from_statuses<I: IntoIterator<Item = ApprovalStatus>>(statuses: I) -> Self {
        statuses.into_iter().fold(Self::default(), |mut tally, status| {
            match status {
                ApprovalStatus::Approved => tally.approved += 1,
                ApprovalStatus::Rejected => tally.rejected += 1,
                ApprovalStatus::Pending => tally.pending += 1,
                ApprovalStatus::Skipped => tally.skipped += 1,
            }
            tally
        })
    }

    /// Every approval of the step, skipped ones included.
    pub fn total(&self) -> usize {
        self.approved + self.rejected + self.pending + self.skipped
    }
}

impl ApprovalPolicy {
    /// Decide the step outcome for the given tally.
    ///
    /// - `Any`: satisfied on the first approval; rejected only once a
    ///   rejection exists and nothing is left pending.
    /// - `All`: satisfied when every approval is approved; any rejection
    ///   rejects immediately.
    /// - `Majority`: with `m = ceil(total / 2)`, satisfied at `m` approvals,
    ///   rejected at `m` rejections.
    ///
    /// Skipped approvals stay in `total`. A step with no approvals at all is
    /// pending; one whose approvals are all answered without meeting either
    /// threshold is [`StepOutcome::Undecided`].
    pub fn evaluate(self, tally: &ApprovalTally) -> StepOutcome {
        let total = tally.total();
        if total == 0 {
            return StepOutcome::Pending;
        }

        let decided = match self {
            ApprovalPolicy::Any => {
                if tally.approved > 0 {
                    Some(StepOutcome::Satisfied)
                } else if tally.rejected > 0 && tally.pending == 0 {
                    Some(StepOutcome::Rejected)
                } else {
                    None
                }
            }
            ApprovalPolicy::All => {
                if tally.rejected > 0 {
                    Some(StepOutcome::Rejected)
                } else if tally.approved == total {
                    Some(StepOutcome::Satisfied)
                } else {
                    None
                }
            }
            ApprovalPolicy::Majority => {
                let majority = total.div_ceil(2);
                if tally.approved >= majority {
                    Some(StepOutcome::Satisfied)
                } else if tally.rejected >= majority {
                    Some(StepOutcome::Rejected)
                } else {
                    None
                }
            }
        };

        match decided {
            Some(outcome) => outcome,
            None if tally.pending == 0 => StepOutcome::Undecided,
            None => StepOutcome::Pending,
        }
    }
}

/// Aggregate a step's approval statuses under `policy`.
pub fn aggregate(policy: ApprovalPolicy, statuses: &[ApprovalStatus]) -> StepOutcome {
    policy.evaluate(&ApprovalTally::from_statuses(statuses.iter().copied()))
}
