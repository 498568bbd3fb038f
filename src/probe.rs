//! Probe Loop — a single background task that periodically refreshes every
//! stream's `health` and advances `provisioning → ready`.
//!
//! The random health distribution is a placeholder for a real prober
//! (§4.3, §9 open question); it sits behind the `Prober` trait so a real
//! implementation is a drop-in replacement that never touches the loop
//! body, mirroring how the donor isolates its (also placeholder-adjacent)
//! `CameraStream` behind `supervised_connect` rather than inlining it into
//! the ingestion loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::warn;

use crate::registry::Registry;
use crate::types::{Connectivity, Health, StreamStatus};

/// Samples a new `Health` reading for a `ready` stream given its current
/// one. Implementors may ignore `current` entirely (the default does).
pub trait Prober: Send + Sync {
    fn sample(&self) -> Health;
}

/// The spec's fixed placeholder distribution: 78% online, 15% degraded,
/// 7% offline, with bounded numeric ranges per connectivity state.
pub struct RandomPlaceboProber;

impl Prober for RandomPlaceboProber {
    fn sample(&self) -> Health {
        let now = Utc::now();
        let mut rng = rand::thread_rng();
        let roll: f64 = rng.gen();
        if roll < 0.78 {
            Health {
                connectivity: Connectivity::Online,
                latency_ms: Some(rng.gen_range(70.0..=130.0)),
                packet_loss_pct: Some(rng.gen_range(0.0..=0.3)),
                jitter_ms: Some(rng.gen_range(3.0..=12.0)),
                error: None,
                checked_at: now,
            }
        } else if roll < 0.93 {
            Health {
                connectivity: Connectivity::Degraded,
                latency_ms: Some(rng.gen_range(160.0..=320.0)),
                packet_loss_pct: Some(rng.gen_range(1.0..=5.0)),
                jitter_ms: Some(rng.gen_range(15.0..=45.0)),
                error: None,
                checked_at: now,
            }
        } else {
            Health {
                connectivity: Connectivity::Offline,
                latency_ms: None,
                packet_loss_pct: None,
                jitter_ms: None,
                error: Some("stream unreachable".to_string()),
                checked_at: now,
            }
        }
    }
}

/// Apply one probe transform to a single entry, per the rules in §4.3.
/// Never panics; an entry whose mutation would fail is simply skipped by
/// the caller (there is currently no fallible path, but the signature
/// keeps the loop resilient if a future prober introduces one).
fn probe_one(status: StreamStatus, prober: &dyn Prober) -> (StreamStatus, Health) {
    let now = Utc::now();
    match status {
        StreamStatus::Stopped => (StreamStatus::Stopped, Health::stopped(now)),
        StreamStatus::Provisioning => (StreamStatus::Ready, Health::online(now)),
        StreamStatus::Ready => (StreamStatus::Ready, prober.sample()),
    }
}

/// Run one probe tick over every entry in the registry. A panic probing
/// one entry is caught and logged so it cannot interrupt the rest of the
/// tick (§5) — the Rust analog of the spec's "error on one entry must not
/// terminate the global cycle" requirement, since `probe_one` itself has
/// no fallible path today.
pub fn run_tick(registry: &Registry, prober: &dyn Prober) {
    for entry in registry.iterate() {
        let key = crate::registry::StreamKey::new(entry.tenant_id.clone(), entry.camera_id.clone());
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            probe_one(entry.status, prober)
        }));
        let (next_status, next_health) = match outcome {
            Ok(result) => result,
            Err(panic) => {
                warn!(tenant_id = %key.tenant_id, camera_id = %key.camera_id, ?panic, "Probe failed for entry, continuing tick");
                continue;
            }
        };
        registry.update_probe(&key, |e| {
            e.status = next_status;
            e.health = next_health;
            e.updated_at = Utc::now();
        });
    }
}

/// Spawn the Probe Loop as a background task ticking at `interval`.
pub fn spawn(registry: Arc<Registry>, prober: Arc<dyn Prober>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            run_tick(&registry, prober.as_ref());
        }
    })
}
