//! Instance outcome statistics.

use serde::{Deserialize, Serialize};

use crate::types::DbId;

/// Raw counts as produced by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InstanceCounts {
    pub total: i64,
    pub completed: i64,
    pub rejected: i64,
    pub in_progress: i64,
    /// Mean hours from start to completion, over completed instances only.
    pub avg_completion_hours: Option<f64>,
}

/// Optional scope for analytics.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AnalyticsScope {
    #[serde(alias = "workflowId")]
    pub workflow_id: Option<DbId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowAnalytics {
    pub workflow_id: Option<DbId>,
    pub total_instances: i64,
    pub completed_instances: i64,
    pub rejected_instances: i64,
    pub in_progress_instances: i64,
    /// Percent of all instances.
    pub completion_rate: f64,
    /// Percent of all instances.
    pub rejection_rate: f64,
    /// Unrounded mean over COMPLETED instances.
    pub avg_completion_hours: f64,
}

impl WorkflowAnalytics {
    pub fn from_counts(workflow_id: Option<DbId>, counts: InstanceCounts) -> Self {
        Self {
            workflow_id,
            total_instances: counts.total,
            completed_instances: counts.completed,
            rejected_instances: counts.rejected,
            in_progress_instances: counts.in_progress,
            completion_rate: percent(counts.completed, counts.total),
            rejection_rate: percent(counts.rejected, counts.total),
            avg_completion_hours: counts.avg_completion_hours.unwrap_or(0.0),
        }
    }
}

/// Mean of a set of durations in hours, `None` when empty.
pub fn mean_hours<I: IntoIterator<Item = chrono::Duration>>(durations: I) -> Option<f64> {
    let (sum, n) = durations
        .into_iter()
        .fold((0.0_f64, 0_u32), |(sum, n), d| {
            (sum + d.num_milliseconds() as f64 / 3_600_000.0, n + 1)
        });
    (n > 0).then(|| sum / f64::from(n))
}

fn percent(part: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
