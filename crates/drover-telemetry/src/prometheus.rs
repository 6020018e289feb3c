//! Prometheus text exposition format.
//!
//! Renders the latest snapshot and the pool size for scraping by a
//! Prometheus server or compatible agent.

use drover_core::MetricsSnapshot;

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name} {value}\n"));
}

/// Render the snapshot (if any) and worker count into Prometheus text.
///
/// Snapshot gauges are omitted until the first poll has been published.
pub fn render_prometheus(snapshot: Option<&MetricsSnapshot>, workers: u32) -> String {
    let mut out = String::new();

    if let Some(s) = snapshot {
        gauge(
            &mut out,
            "drover_pending_messages",
            "Messages ready across monitored queues.",
            s.pending_messages,
        );
        gauge(
            &mut out,
            "drover_arrival_rate",
            "Publish rate across monitored queues (msg/s).",
            format!("{:.2}", s.arrival_rate),
        );
        gauge(
            &mut out,
            "drover_processing_time_seconds",
            "Smoothed per-task processing time.",
            format!("{:.4}", s.processing_time),
        );
        gauge(
            &mut out,
            "drover_target_response_time_seconds",
            "Configured response-time target.",
            format!("{:.4}", s.target_response_time),
        );
        gauge(
            &mut out,
            "drover_snapshot_epoch_seconds",
            "Unix time of the latest published snapshot.",
            s.epoch,
        );
    }

    gauge(
        &mut out,
        "drover_workers",
        "Worker processes tracked by the pool.",
        workers,
    );

    out
}
