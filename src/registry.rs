//! Stream Registry — the authoritative map of provisioned streams keyed by
//! `(tenantId, cameraId)`.
//!
//! Backed by a `DashMap` rather than one process-wide mutex: `upsert` holds
//! the shard's entry for its whole read-modify-write via `DashMap::entry`,
//! which keeps concurrent provisions on distinct keys independent while
//! still serializing same-key provisions so `version` stays monotonic — the
//! finer-grained per-key locking the design spec allows in §5.

use chrono::Utc;
use dashmap::DashMap;

use crate::error::Result;
use crate::types::{Health, SourceConfig, StreamEntry, StreamStatus};

pub type TenantId = String;
pub type CameraId = String;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub tenant_id: TenantId,
    pub camera_id: CameraId,
}

impl StreamKey {
    pub fn new(tenant_id: impl Into<String>, camera_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            camera_id: camera_id.into(),
        }
    }
}

pub struct UpsertOutcome {
    pub entry: StreamEntry,
    pub reprovisioned: bool,
}

#[derive(Default)]
pub struct Registry {
    streams: DashMap<StreamKey, StreamEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a stream entry. See SPEC_FULL.md §4.1 for the full
    /// idempotency contract: unchanged config → `reprovisioned=false` and
    /// `version` unchanged; otherwise `version` increments by exactly one.
    ///
    /// `provision` is invoked with the prospective (not-yet-committed) entry
    /// to ensure the on-disk assets exist before it is written into the map
    /// and marked `ready`; it runs while the per-key shard lock is held, so
    /// no other provision for the same key can observe an intermediate
    /// `provisioning` state with stale config. If `provision` fails, the map
    /// is left exactly as it was before the call — a failed reprovision
    /// never bumps `version` or discards the previous entry.
    pub fn upsert(
        &self,
        key: StreamKey,
        rtsp_url: String,
        source: SourceConfig,
        provision: impl FnOnce(&StreamEntry) -> Result<()>,
    ) -> Result<UpsertOutcome> {
        use dashmap::mapref::entry::Entry;

        let now = Utc::now();
        match self.streams.entry(key.clone()) {
            Entry::Vacant(slot) => {
                let mut entry = StreamEntry {
                    tenant_id: key.tenant_id,
                    camera_id: key.camera_id,
                    rtsp_url,
                    source,
                    version: 1,
                    status: StreamStatus::Provisioning,
                    health: Health::degraded_provisioning(now),
                    updated_at: now,
                };
                provision(&entry)?;
                entry.status = StreamStatus::Ready;
                entry.health = Health::online(now);
                entry.updated_at = now;
                let out = entry.clone();
                slot.insert(entry);
                Ok(UpsertOutcome {
                    entry: out,
                    reprovisioned: true,
                })
            }
            Entry::Occupied(mut slot) => {
                let unchanged =
                    slot.get().rtsp_url == rtsp_url && slot.get().source == source;
                if unchanged {
                    return Ok(UpsertOutcome {
                        entry: slot.get().clone(),
                        reprovisioned: false,
                    });
                }
                let next_version = slot.get().version + 1;
                let mut entry = slot.get().clone();
                entry.rtsp_url = rtsp_url;
                entry.source = source;
                entry.version = next_version;
                entry.status = StreamStatus::Provisioning;
                entry.health = Health::degraded_provisioning(now);
                entry.updated_at = now;
                provision(&entry)?;
                entry.status = StreamStatus::Ready;
                entry.health = Health::online(now);
                entry.updated_at = now;
                let out = entry.clone();
                *slot.get_mut() = entry;
                Ok(UpsertOutcome {
                    entry: out,
                    reprovisioned: true,
                })
            }
        }
    }

    /// Mark a stream stopped. Returns `false` if the key was never
    /// provisioned. Retains the entry so later playback requests can
    /// distinguish "never provisioned" from "stopped".
    pub fn mark_stopped(&self, key: &StreamKey) -> bool {
        let Some(mut entry) = self.streams.get_mut(key) else {
            return false;
        };
        let now = Utc::now();
        entry.status = StreamStatus::Stopped;
        entry.health = Health::stopped(now);
        entry.updated_at = now;
        true
    }

    pub fn get(&self, key: &StreamKey) -> Option<StreamEntry> {
        self.streams.get(key).map(|e| e.clone())
    }

    pub fn iterate(&self) -> Vec<StreamEntry> {
        self.streams.iter().map(|e| e.value().clone()).collect()
    }

    /// Apply a mutation to a single entry, used by the Probe Loop. A
    /// missing key is a no-op (the stream may have raced with a
    /// deprovision that hasn't been observed by this tick yet).
    pub fn update_probe(&self, key: &StreamKey, mutator: impl FnOnce(&mut StreamEntry)) {
        if let Some(mut entry) = self.streams.get_mut(key) {
            mutator(&mut entry);
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
