use chrono::NaiveDate;
use kbase_core::MetricTargets;
use kbase_metrics::dashboard::render_terminal;
use kbase_metrics::html::render_html;
use kbase_metrics::triage::TRIAGE_JSON;
use kbase_metrics::{ErrorTracker, Kpis, MetricsBundle, TriageStats, UsageTracker};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn now() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 31)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap()
}

#[test]
fn trackers_feed_the_dashboard() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    let usage = UsageTracker::simulate(30, now(), &mut rng);
    usage.write_outputs(dir.path()).unwrap();
    let errors = ErrorTracker::simulate(30, 5, now(), &mut rng);
    errors.write_outputs(dir.path()).unwrap();

    let mut stats = TriageStats::default();
    for i in 0..10 {
        stats.record_triage(Some(0.5 + f64::from(i) * 0.05), i >= 6);
    }
    stats.record_pr_created();
    stats.record_pr_created();
    stats.record_pr_merged();
    stats.save(&dir.path().join(TRIAGE_JSON)).unwrap();

    let bundle = MetricsBundle::load(dir.path()).unwrap();
    let usage_report = bundle.usage.as_ref().unwrap();
    let error_report = bundle.errors.as_ref().unwrap();

    let daily_usage: u64 = usage_report.daily_usage.values().sum();
    assert_eq!(daily_usage, usage_report.metrics.total_events);
    let daily_errors: u64 = error_report.daily_errors.values().sum();
    assert_eq!(daily_errors, error_report.metrics.total_errors);

    let kpis = Kpis::from_bundle(&bundle);
    assert!((kpis.high_confidence_rate - 40.0).abs() < 1e-9);
    assert!((kpis.pr_merge_rate - 50.0).abs() < 1e-9);
    assert_eq!(kpis.total_events, usage_report.metrics.total_events);

    let text = render_terminal(&bundle, &MetricTargets::default(), false);
    assert!(text.contains("Data Period: Last"));
    let html = render_html(&bundle, &MetricTargets::default());
    assert!(html.contains("Error Severity Distribution"));
}

#[test]
fn empty_directory_renders_zeros() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = MetricsBundle::load(dir.path()).unwrap();
    assert!(bundle.is_empty());

    let text = render_terminal(&bundle, &MetricTargets::default(), false);
    assert!(text.contains("Total Events: 0"));
    assert!(!text.contains("PLUGIN USAGE"));
}
