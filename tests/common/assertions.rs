//! Custom assertions for run statistics

use paper_harvest::RunStats;

/// Every input URL must end in exactly one terminal bucket
pub fn assert_all_accounted(stats: &RunStats) {
    assert_eq!(
        stats.completed + stats.failed + stats.skipped + stats.cancelled,
        stats.total,
        "tasks went missing: {stats:?}"
    );
}
