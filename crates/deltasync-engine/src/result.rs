//! Cycle result types.

use deltasync_types::PushStatus;

/// Aggregate record counts for one cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleCounts {
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    /// Records that failed row validation and carried no hash.
    pub invalid: u64,
    /// Restorations performed by the repair step.
    pub restored: u64,
    /// Total records in the cycle's current projection.
    pub total_current: u64,
}

/// Terse structured result of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub client_id: String,
    pub counts: CycleCounts,
    /// Absent when the cycle ended early with no changes to push.
    pub push_status: Option<PushStatus>,
    pub no_changes: bool,
    pub duration_secs: f64,
    pub message: Option<String>,
}

impl CycleReport {
    /// True when every pushed record was accepted by the target.
    #[must_use]
    pub fn fully_synchronized(&self) -> bool {
        self.no_changes || self.push_status == Some(PushStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(push_status: Option<PushStatus>, no_changes: bool) -> CycleReport {
        CycleReport {
            client_id: "acme".into(),
            counts: CycleCounts::default(),
            push_status,
            no_changes,
            duration_secs: 0.0,
            message: None,
        }
    }

    #[test]
    fn no_changes_counts_as_synchronized() {
        assert!(report(None, true).fully_synchronized());
    }

    #[test]
    fn partial_push_is_not_synchronized() {
        assert!(!report(Some(PushStatus::Partial), false).fully_synchronized());
        assert!(report(Some(PushStatus::Success), false).fully_synchronized());
    }
}
