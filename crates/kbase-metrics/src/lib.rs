//! Usage and error tracking, triage statistics and the metrics dashboard.
//!
//! Trackers write JSON and CSV files into the metrics output directory;
//! the dashboard reads them back and renders KPIs against configured targets.

mod csv;
pub mod dashboard;
pub mod errors;
pub mod html;
pub mod triage;
pub mod usage;

pub use dashboard::{Kpis, MetricsBundle, StatusLevel};
pub use errors::{ErrorReport, ErrorTracker};
pub use triage::TriageStats;
pub use usage::{UsageReport, UsageTracker};

/// Sort `(name, count)` pairs by count descending, then name ascending.
pub(crate) fn by_count_desc<'a, I>(items: I) -> Vec<(&'a String, &'a u64)>
where
    I: IntoIterator<Item = (&'a String, &'a u64)>,
{
    let mut v: Vec<_> = items.into_iter().collect();
    v.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    v
}

/// `part / whole * 100`, or 0 when `whole` is 0.
pub(crate) fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}
