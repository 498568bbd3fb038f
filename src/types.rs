//! Closed, strongly-typed domain values shared by the registry, session
//! manager, and HTTP surface — status/connectivity/codec are sum types
//! parsed once at the boundary, never loose strings threaded through the
//! core (see design note in SPEC_FULL.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Auto,
    Tcp,
    Udp,
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecHint {
    H264,
    H265,
    Mpeg4,
    Unknown,
}

impl Default for CodecHint {
    fn default() -> Self {
        CodecHint::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Provisioning,
    Ready,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Issued,
    Active,
    Ended,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Expired)
    }
}

/// The source description for a provisioned stream. Equality here drives
/// the idempotency check in `Registry::upsert` — `target_profiles` is
/// compared as an ordered sequence, so reordering counts as a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub transport: Transport,
    pub codec_hint: CodecHint,
    pub target_profiles: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            codec_hint: CodecHint::default(),
            target_profiles: vec!["main".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub connectivity: Connectivity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_loss_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl Health {
    pub fn degraded_provisioning(now: DateTime<Utc>) -> Self {
        Self {
            connectivity: Connectivity::Degraded,
            latency_ms: None,
            packet_loss_pct: None,
            jitter_ms: None,
            error: Some("provisioning".to_string()),
            checked_at: now,
        }
    }

    pub fn online(now: DateTime<Utc>) -> Self {
        Self {
            connectivity: Connectivity::Online,
            latency_ms: None,
            packet_loss_pct: None,
            jitter_ms: None,
            error: None,
            checked_at: now,
        }
    }

    pub fn stopped(now: DateTime<Utc>) -> Self {
        Self {
            connectivity: Connectivity::Offline,
            latency_ms: None,
            packet_loss_pct: None,
            jitter_ms: None,
            error: Some("deprovisioned".to_string()),
            checked_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEntry {
    pub tenant_id: String,
    pub camera_id: String,
    pub rtsp_url: String,
    pub source: SourceConfig,
    pub version: u64,
    pub status: StreamStatus,
    pub health: Health,
    pub updated_at: DateTime<Utc>,
}
