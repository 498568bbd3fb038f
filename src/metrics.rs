//! Metric counters and Prometheus text exposition (§4.7, §6).
//!
//! Counters are logical key→value maps keyed by a pre-sorted label tuple,
//! guarded by `parking_lot::Mutex` the same way the donor guards its other
//! shared in-memory state. Exposition text is built with `std::fmt::Write`
//! the same way the donor's `hls` module builds playlists — `writeln!`
//! into a `String`, not a templating engine.

use std::collections::HashMap;
use std::fmt::Write as _;

use parking_lot::Mutex;

/// Labels sorted by name so the scrape path never has to re-sort.
type LabelKey = Vec<(&'static str, String)>;

#[derive(Default)]
struct Counter {
    values: HashMap<LabelKey, u64>,
}

impl Counter {
    fn incr(&mut self, mut labels: LabelKey) {
        labels.sort_unstable_by_key(|(name, _)| *name);
        *self.values.entry(labels).or_insert(0) += 1;
    }

    fn set(&mut self, mut labels: LabelKey, value: u64) {
        labels.sort_unstable_by_key(|(name, _)| *name);
        self.values.insert(labels, value);
    }

    fn render(&self, name: &str, kind: &str, out: &mut String) {
        writeln!(out, "# TYPE {name} {kind}").unwrap();
        let mut entries: Vec<_> = self.values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (labels, value) in entries {
            if labels.is_empty() {
                writeln!(out, "{name} {value}").unwrap();
            } else {
                let label_str = labels
                    .iter()
                    .map(|(k, v)| format!("{k}=\"{}\"", escape(v)))
                    .collect::<Vec<_>>()
                    .join(",");
                writeln!(out, "{name}{{{label_str}}} {value}").unwrap();
            }
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// All metric series owned by the gateway. One instance lives in
/// `AppState`, shared across every handler and both background loops.
#[derive(Default)]
pub struct Metrics {
    streams_total: Mutex<Counter>,
    stream_connectivity_total: Mutex<Counter>,
    stream_sessions_total: Mutex<Counter>,
    session_sweeps_total: Mutex<u64>,
    playback_requests_total: Mutex<Counter>,
    playback_errors_total: Mutex<Counter>,
    playback_read_retries_total: Mutex<Counter>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_streams_total(&self, status: &str, value: u64) {
        self.streams_total.lock().set(vec![("status", status.to_string())], value);
    }

    pub fn set_stream_connectivity_total(&self, connectivity: &str, value: u64) {
        self.stream_connectivity_total
            .lock()
            .set(vec![("connectivity", connectivity.to_string())], value);
    }

    pub fn set_stream_sessions_total(&self, status: &str, value: u64) {
        self.stream_sessions_total
            .lock()
            .set(vec![("status", status.to_string())], value);
    }

    pub fn record_sweep(&self) {
        *self.session_sweeps_total.lock() += 1;
    }

    pub fn record_playback_request(&self, tenant_id: &str, camera_id: &str, asset: &str, result: &str) {
        self.playback_requests_total.lock().incr(vec![
            ("tenant_id", tenant_id.to_string()),
            ("camera_id", camera_id.to_string()),
            ("asset", asset.to_string()),
            ("result", result.to_string()),
        ]);
    }

    pub fn record_playback_error(&self, tenant_id: &str, camera_id: &str, asset: &str, code: &str) {
        self.playback_errors_total.lock().incr(vec![
            ("tenant_id", tenant_id.to_string()),
            ("camera_id", camera_id.to_string()),
            ("asset", asset.to_string()),
            ("code", code.to_string()),
        ]);
    }

    pub fn record_read_retry(&self, tenant_id: &str, camera_id: &str, asset: &str) {
        self.playback_read_retries_total.lock().incr(vec![
            ("tenant_id", tenant_id.to_string()),
            ("camera_id", camera_id.to_string()),
            ("asset", asset.to_string()),
        ]);
    }

    /// Render every series as Prometheus text exposition v0.0.4.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(1024);
        self.streams_total.lock().render("nearhome_streams_total", "gauge", &mut out);
        self.stream_connectivity_total.lock().render(
            "nearhome_stream_connectivity_total",
            "gauge",
            &mut out,
        );
        self.stream_sessions_total.lock().render(
            "nearhome_stream_sessions_total",
            "gauge",
            &mut out,
        );
        writeln!(out, "# TYPE nearhome_stream_session_sweeps_total counter").unwrap();
        writeln!(out, "nearhome_stream_session_sweeps_total {}", *self.session_sweeps_total.lock()).unwrap();
        self.playback_requests_total.lock().render(
            "nearhome_playback_requests_total",
            "counter",
            &mut out,
        );
        self.playback_errors_total.lock().render(
            "nearhome_playback_errors_total",
            "counter",
            &mut out,
        );
        self.playback_read_retries_total.lock().render(
            "nearhome_playback_read_retries_total",
            "counter",
            &mut out,
        );
        out
    }
}
