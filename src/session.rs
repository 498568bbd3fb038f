//! Session Manager — the authoritative map of playback sessions keyed by
//! `(tenantId, cameraId, sid)`, and the Sweep Loop that retires
//! expired/idle sessions.
//!
//! Like the Stream Registry, the session map is a `DashMap` so concurrent
//! `observe()` calls on distinct `sid`s never contend, while two
//! interleaving requests on the *same* `sid` are serialized by the shard
//! lock — satisfying the "both succeed or both see SESSION_CLOSED, no
//! intermediate state" ordering guarantee in §5.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::metrics::Metrics;
use crate::types::SessionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub tenant_id: String,
    pub camera_id: String,
    pub sid: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub tenant_id: String,
    pub camera_id: String,
    pub sid: String,
    pub sub: String,
    pub status: SessionStatus,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
}

/// Returned by `observe()` when the session has already reached a
/// terminal state — the caller renders this as `PLAYBACK_SESSION_CLOSED`.
pub struct SessionClosed;

#[derive(Default)]
pub struct SweepCounts {
    pub expired: usize,
    pub ended: usize,
}

#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<SessionKey, SessionEntry>,
}

fn epoch_to_datetime(epoch_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch_secs, 0).single().unwrap_or_else(Utc::now)
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a playback request for `sid`. Creates the session (seeded
    /// `active`) on first observation; refreshes `last_seen_at` and ensures
    /// `active` on subsequent non-terminal observations; refuses terminal
    /// sessions with `SessionClosed` (§4.4 state table).
    pub fn observe(
        &self,
        tenant_id: &str,
        camera_id: &str,
        sid: &str,
        sub: &str,
        issued_at_epoch: i64,
        expires_at_epoch: i64,
    ) -> Result<(), SessionClosed> {
        use dashmap::mapref::entry::Entry;

        let now = Utc::now();
        let key = SessionKey {
            tenant_id: tenant_id.to_string(),
            camera_id: camera_id.to_string(),
            sid: sid.to_string(),
        };

        match self.sessions.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    tenant_id: key.tenant_id,
                    camera_id: key.camera_id,
                    sid: key.sid,
                    sub: sub.to_string(),
                    status: SessionStatus::Active,
                    issued_at: epoch_to_datetime(issued_at_epoch),
                    activated_at: Some(now),
                    ended_at: None,
                    expires_at: epoch_to_datetime(expires_at_epoch),
                    last_seen_at: now,
                    end_reason: None,
                });
                Ok(())
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.status.is_terminal() {
                    return Err(SessionClosed);
                }
                entry.status = SessionStatus::Active;
                entry.last_seen_at = now;
                if entry.activated_at.is_none() {
                    entry.activated_at = Some(now);
                }
                Ok(())
            }
        }
    }

    /// Run one sweep pass: expire sessions past `expires_at`, then idle-out
    /// `active` sessions that haven't been seen within `idle_ttl`. Returns
    /// the per-pass counts; the caller (the manual `/sessions/sweep` handler
    /// or the background Sweep Loop) is responsible for recording the pass
    /// against `nearhome_stream_session_sweeps_total` so every pass — manual
    /// or scheduled — is counted exactly once.
    pub fn sweep(&self, idle_ttl: Duration) -> SweepCounts {
        let now = Utc::now();
        let mut counts = SweepCounts::default();

        for mut entry in self.sessions.iter_mut() {
            if entry.status.is_terminal() {
                continue;
            }
            if entry.expires_at <= now {
                entry.status = SessionStatus::Expired;
                entry.ended_at = Some(now);
                entry.end_reason = Some("token_expired".to_string());
                counts.expired += 1;
            } else if entry.status == SessionStatus::Active
                && now.signed_duration_since(entry.last_seen_at)
                    > chrono::Duration::from_std(idle_ttl).unwrap_or(chrono::Duration::zero())
            {
                entry.status = SessionStatus::Ended;
                entry.ended_at = Some(now);
                entry.end_reason = Some("idle_timeout".to_string());
                counts.ended += 1;
            }
        }

        counts
    }

    /// Mark every non-terminal session for a stream as `ended` with the
    /// given reason (used on deprovision, with `reason = "deprovisioned"`).
    pub fn close_for_stream(&self, tenant_id: &str, camera_id: &str, reason: &str) {
        let now = Utc::now();
        for mut entry in self.sessions.iter_mut() {
            if entry.tenant_id == tenant_id && entry.camera_id == camera_id && !entry.status.is_terminal() {
                entry.status = SessionStatus::Ended;
                entry.ended_at = Some(now);
                entry.end_reason = Some(reason.to_string());
            }
        }
    }

    /// List sessions matching the given filters, sorted by `last_seen_at`
    /// descending.
    pub fn list(
        &self,
        tenant_id: Option<&str>,
        camera_id: Option<&str>,
        status: Option<SessionStatus>,
        sid: Option<&str>,
    ) -> Vec<SessionEntry> {
        let mut matches: Vec<SessionEntry> = self
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| tenant_id.map_or(true, |t| e.tenant_id == t))
            .filter(|e| camera_id.map_or(true, |c| e.camera_id == c))
            .filter(|e| status.map_or(true, |s| e.status == s))
            .filter(|e| sid.map_or(true, |s| e.sid == s))
            .collect();
        matches.sort_unstable_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        matches
    }

    pub fn count_by_status(&self) -> std::collections::HashMap<SessionStatus, usize> {
        let mut counts = std::collections::HashMap::new();
        for entry in self.sessions.iter() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        counts
    }
}

/// Spawn the Sweep Loop as a background task ticking at `interval`. Every
/// pass — scheduled here or forced via the manual `/sessions/sweep` handler
/// — records one `nearhome_stream_session_sweeps_total` increment.
pub fn spawn(
    sessions: Arc<SessionManager>,
    metrics: Arc<Metrics>,
    interval: Duration,
    idle_ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sessions.sweep(idle_ttl);
            metrics.record_sweep();
        }
    })
}
