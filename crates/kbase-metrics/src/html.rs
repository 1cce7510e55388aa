//! Self-contained HTML rendering of the dashboard.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt::Write;

use kbase_core::MetricTargets;

use crate::by_count_desc;
use crate::dashboard::{status_level, Kpis, MetricsBundle, StatusLevel};

/// File name the dashboard page is written under.
pub const DASHBOARD_HTML: &str = "dashboard.html";

const STYLE: &str = r#"
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
         line-height: 1.6; color: #1f2937; background: #f3f4f6; padding: 20px; }
  .container { max-width: 1200px; margin: 0 auto; background: white; border-radius: 8px;
               box-shadow: 0 1px 3px rgba(0,0,0,0.1); padding: 40px; }
  h1 { font-size: 2.5em; margin-bottom: 10px; color: #111827; }
  .subtitle { color: #6b7280; margin-bottom: 30px; }
  .kpi-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(250px, 1fr));
              gap: 20px; margin: 30px 0; }
  .kpi-card { background: #f9fafb; padding: 20px; border-radius: 8px; border-left: 4px solid #6366f1; }
  .kpi-target { font-size: 0.9em; color: #6b7280; margin-top: 5px; }
  .gauge { width: 100%; height: auto; }
  .gauge-value { font-size: 24px; font-weight: bold; fill: #111827; }
  .gauge-label { font-size: 12px; fill: #6b7280; }
  .chart { margin: 30px 0; background: #f9fafb; padding: 20px; border-radius: 8px; }
  .chart h3 { margin-bottom: 20px; color: #111827; }
  .bar-chart { display: flex; flex-direction: column; gap: 10px; }
  .bar-item { display: grid; grid-template-columns: 150px 1fr; gap: 10px; align-items: center; }
  .bar-label { font-size: 0.9em; color: #4b5563; white-space: nowrap; overflow: hidden;
               text-overflow: ellipsis; }
  .bar-container { position: relative; height: 30px; background: #e5e7eb; border-radius: 4px;
                   overflow: hidden; }
  .bar-fill { height: 100%; background: linear-gradient(90deg, #6366f1, #8b5cf6); }
  .bar-value { position: absolute; right: 10px; top: 50%; transform: translateY(-50%);
               font-weight: bold; font-size: 0.9em; color: #1f2937; }
  .metrics-summary { display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
                     gap: 15px; margin: 30px 0; }
  .metric-box { background: white; border: 1px solid #e5e7eb; padding: 15px; border-radius: 6px; }
  .metric-box h4 { font-size: 0.85em; color: #6b7280; margin-bottom: 5px; }
  .metric-box .value { font-size: 1.8em; font-weight: bold; color: #111827; }
  footer { margin-top: 40px; padding-top: 20px; border-top: 1px solid #e5e7eb; color: #6b7280;
           font-size: 0.9em; text-align: center; }
"#;

/// Escape text for use in HTML element content and quoted attributes.
///
/// # Examples
///
/// ```
/// use kbase_metrics::html::escape_html;
///
/// assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
/// ```
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Point on the gauge's half circle (centre 100,100) for a fill fraction.
fn arc_point(fraction: f64, radius: f64) -> (f64, f64) {
    let theta = PI * fraction.clamp(0.0, 1.0);
    (100.0 - radius * theta.cos(), 100.0 - radius * theta.sin())
}

/// Half-circle gauge filled to `value / max_value`, with a dot marking the target.
pub fn gauge_svg(value: f64, target: f64, label: &str, max_value: f64) -> String {
    let (fraction, target_fraction) = if max_value > 0.0 {
        (value / max_value, target / max_value)
    } else {
        (0.0, 0.0)
    };
    let color = match status_level(value, target, true) {
        StatusLevel::Good => "#10b981",
        StatusLevel::Warn => "#f59e0b",
        StatusLevel::Bad => "#ef4444",
    };
    let (x, y) = arc_point(fraction, 80.0);
    let (tx, ty) = arc_point(target_fraction, 85.0);

    format!(
        r##"<svg viewBox="0 0 200 120" class="gauge">
  <path d="M 20 100 A 80 80 0 0 1 180 100" fill="none" stroke="#e5e7eb" stroke-width="20" stroke-linecap="round"/>
  <path d="M 20 100 A 80 80 0 0 1 {x:.2} {y:.2}" fill="none" stroke="{color}" stroke-width="20" stroke-linecap="round"/>
  <circle cx="{tx:.2}" cy="{ty:.2}" r="4" fill="#6366f1"/>
  <text x="100" y="90" text-anchor="middle" class="gauge-value">{value:.1}</text>
  <text x="100" y="110" text-anchor="middle" class="gauge-label">{label}</text>
</svg>"##,
        label = escape_html(label),
    )
}

/// Horizontal bars for the ten largest entries, widths relative to the largest.
pub fn bar_chart(data: &BTreeMap<String, u64>, title: &str) -> String {
    if data.is_empty() {
        return "<p>No data available</p>".to_string();
    }
    let max = data.values().copied().max().unwrap_or(0);
    let mut bars = String::new();
    for (label, value) in by_count_desc(data).into_iter().take(10) {
        let width = if max > 0 {
            *value as f64 / max as f64 * 100.0
        } else {
            0.0
        };
        let _ = write!(
            bars,
            r#"
      <div class="bar-item">
        <div class="bar-label">{}</div>
        <div class="bar-container">
          <div class="bar-fill" style="width: {width:.1}%"></div>
          <div class="bar-value">{value}</div>
        </div>
      </div>"#,
            escape_html(label)
        );
    }
    format!(
        "\n  <div class=\"chart\">\n    <h3>{}</h3>\n    <div class=\"bar-chart\">{bars}\n    </div>\n  </div>",
        escape_html(title)
    )
}

/// Render the whole dashboard page.
pub fn render_html(bundle: &MetricsBundle, targets: &MetricTargets) -> String {
    let kpis = Kpis::from_bundle(bundle);
    let mut out = String::new();

    let _ = write!(
        out,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Self-Healing Knowledge Base Dashboard</title>
<style>{STYLE}</style>
</head>
<body>
<div class="container">
  <h1>Self-Healing Knowledge Base Dashboard</h1>
  <p class="subtitle">Generated on {}</p>
"#,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    out.push_str("\n  <h2>Key Performance Indicators</h2>\n  <div class=\"kpi-grid\">\n");
    let cards = [
        (kpis.triage_accuracy, targets.triage_accuracy, "Triage Accuracy", 100.0, "%+"),
        (kpis.high_confidence_rate, targets.high_confidence_rate, "High-Confidence", 100.0, "%+"),
        (kpis.pr_merge_rate, targets.pr_merge_rate, "PR Merge Rate", 100.0, "%+"),
        (kpis.time_saved_monthly, targets.time_saved_monthly, "Time Saved (hrs)", 30.0, "+ hours"),
    ];
    for (value, target, label, max, suffix) in cards {
        let _ = writeln!(
            out,
            "    <div class=\"kpi-card\">\n{}\n      <div class=\"kpi-target\">Target: {target:.0}{suffix}</div>\n    </div>",
            gauge_svg(value, target, label, max)
        );
    }
    out.push_str("  </div>\n");

    out.push_str("\n  <h2>Additional Metrics</h2>\n  <div class=\"metrics-summary\">\n");
    let boxes = [
        ("Error Resolution Rate", format!("{:.1}%", kpis.error_resolution_rate)),
        ("Error Trend", escape_html(&kpis.error_trend)),
        ("Total Events", kpis.total_events.to_string()),
        ("Plugin Usage", kpis.plugin_usage.to_string()),
        ("Total Errors", kpis.total_errors.to_string()),
    ];
    for (title, value) in boxes {
        let _ = writeln!(
            out,
            "    <div class=\"metric-box\"><h4>{title}</h4><div class=\"value\">{value}</div></div>"
        );
    }
    out.push_str("  </div>\n");

    if let Some(u) = bundle.usage.as_ref().filter(|u| !u.plugins.is_empty()) {
        out.push_str(&bar_chart(&u.plugins, "Plugin Usage"));
    }
    if let Some(e) = bundle
        .errors
        .as_ref()
        .filter(|e| !e.metrics.by_severity.is_empty())
    {
        out.push_str(&bar_chart(&e.metrics.by_severity, "Error Severity Distribution"));
    }

    let _ = write!(
        out,
        r#"
  <footer>
    <p>Self-Healing Knowledge Base Metrics Dashboard</p>
    <p>Targets: Triage Accuracy {:.0}%+ | High-Confidence {:.0}%+ | PR Merge Rate {:.0}%+ | Time Saved {:.0}+ hrs/month</p>
  </footer>
</div>
</body>
</html>
"#,
        targets.triage_accuracy,
        targets.high_confidence_rate,
        targets.pr_merge_rate,
        targets.time_saved_monthly
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::UsageReport;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn gauge_end_points() {
        assert_eq!(arc_point(0.0, 80.0), (20.0, 100.0));
        let (x, y) = arc_point(0.5, 80.0);
        assert!((x - 100.0).abs() < 1e-9 && (y - 20.0).abs() < 1e-9);
        let (x, y) = arc_point(2.0, 80.0);
        assert!((x - 180.0).abs() < 1e-9 && (y - 100.0).abs() < 1e-9);
    }

    #[test]
    fn gauge_color_follows_target() {
        assert!(gauge_svg(85.0, 80.0, "A", 100.0).contains("#10b981"));
        assert!(gauge_svg(70.0, 80.0, "A", 100.0).contains("#f59e0b"));
        assert!(gauge_svg(10.0, 80.0, "A", 100.0).contains("#ef4444"));
        assert!(gauge_svg(10.0, 80.0, "A", 0.0).contains("M 20 100 A 80 80 0 0 1 20.00 100.00"));
    }

    #[test]
    fn bar_chart_keeps_top_ten_and_escapes() {
        let data: BTreeMap<String, u64> = (0..12u64)
            .map(|i| (format!("p{i:02}"), i + 1))
            .chain([("<b>".to_string(), 100)])
            .collect();
        let html = bar_chart(&data, "Plugins & more");
        assert_eq!(html.matches("bar-item").count(), 10);
        assert!(html.contains("&lt;b&gt;"));
        assert!(html.contains("Plugins &amp; more"));
        assert!(html.contains("width: 100.0%"));
        assert!(!html.contains(">p00<"));
    }

    #[test]
    fn empty_chart_says_so() {
        assert_eq!(bar_chart(&BTreeMap::new(), "x"), "<p>No data available</p>");
    }

    #[test]
    fn page_contains_cards_and_charts() {
        let bundle = MetricsBundle::simulated(&mut StdRng::seed_from_u64(9));
        let html = render_html(&bundle, &MetricTargets::default());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert_eq!(html.matches("class=\"kpi-card\"").count(), 4);
        assert!(html.contains("<h3>Plugin Usage</h3>"));
        assert!(html.contains("<h3>Error Severity Distribution</h3>"));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn plugin_names_are_escaped() {
        let mut usage = UsageReport::default();
        usage.plugins.insert("<script>".into(), 3);
        let bundle = MetricsBundle {
            usage: Some(usage),
            ..MetricsBundle::default()
        };
        let html = render_html(&bundle, &MetricTargets::default());
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
