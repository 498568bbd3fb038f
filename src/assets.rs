//! Asset Producer / Reader — writes and serves the synthetic manifest and
//! segment for a provisioned stream.
//!
//! The producer is a placeholder (§1 Non-goals): a real encoder can replace
//! it without changing the path layout or the retry contract downstream of
//! it. Writes go through a temp-file-then-rename so a concurrent read never
//! observes a torn file; the retry policy below is kept regardless, as
//! defense against any other transient condition (e.g. a deprovision
//! cleanup racing a read).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::error::{GatewayError, Result};

pub const SEGMENT_MARKER: &str = "NEARHOME_STREAM_SEGMENT";
const MANIFEST_NAME: &str = "index.m3u8";
const SEGMENT_NAME: &str = "segment0.ts";

/// Directory holding a stream's assets: `<root>/<tenant_id>/<camera_id>/`.
pub fn stream_dir(root: &Path, tenant_id: &str, camera_id: &str) -> PathBuf {
    root.join(tenant_id).join(camera_id)
}

/// Write the placeholder manifest and segment for a stream, creating
/// directories as needed. Idempotent: safe to call on every (re)provision.
pub fn produce(root: &Path, tenant_id: &str, camera_id: &str) -> Result<()> {
    let dir = stream_dir(root, tenant_id, camera_id);
    std::fs::create_dir_all(&dir)
        .map_err(|e| GatewayError::Internal(format!("create asset dir {dir:?}: {e}")))?;

    let manifest = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:5\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:5.0,\n{SEGMENT_NAME}\n"
    );
    write_atomic(&dir.join(MANIFEST_NAME), manifest.as_bytes())?;
    write_atomic(&dir.join(SEGMENT_NAME), SEGMENT_MARKER.as_bytes())?;
    Ok(())
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)
        .map_err(|e| GatewayError::Internal(format!("write {tmp:?}: {e}")))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| GatewayError::Internal(format!("rename {tmp:?} -> {path:?}: {e}")))?;
    Ok(())
}

/// Which asset kind is being read — distinguishes the two not-found error
/// variants and the `asset` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Manifest,
    Segment,
}

impl AssetKind {
    pub fn label(self) -> &'static str {
        match self {
            AssetKind::Manifest => "manifest",
            AssetKind::Segment => "segment",
        }
    }

    fn not_found_error(self) -> GatewayError {
        match self {
            AssetKind::Manifest => GatewayError::ManifestNotFound,
            AssetKind::Segment => GatewayError::SegmentNotFound,
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            AssetKind::Manifest => MANIFEST_NAME,
            AssetKind::Segment => SEGMENT_NAME,
        }
    }
}

/// Configures the retry-with-backoff policy for asset reads (§4.2, §6).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
        scaled.min(self.max_delay)
    }
}

/// True for the filesystem conditions the spec calls "transient-missing":
/// not-found, temporarily-unavailable, or resource-busy.
fn is_transient_missing(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    const EBUSY: i32 = 16;
    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::WouldBlock | ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(EBUSY)
}

/// Read an asset with retry-with-backoff. Returns the bytes on success, or
/// the asset's typed not-found error once the retry budget is exhausted.
/// `on_retry` is invoked once per retry (the caller increments the
/// `nearhome_playback_read_retries_total` counter there).
pub async fn read_with_retry(
    root: &Path,
    tenant_id: &str,
    camera_id: &str,
    kind: AssetKind,
    policy: RetryPolicy,
    mut on_retry: impl FnMut(),
) -> Result<Vec<u8>> {
    let path = stream_dir(root, tenant_id, camera_id).join(kind.file_name());

    let mut attempt = 0u32;
    loop {
        match std::fs::read(&path) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < policy.max_retries && is_transient_missing(&e) => {
                attempt += 1;
                on_retry();
                warn!(
                    tenant_id,
                    camera_id,
                    asset = kind.label(),
                    attempt,
                    error = %e,
                    "Transient asset read miss, retrying"
                );
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
            Err(_) => return Err(kind.not_found_error()),
        }
    }
}

/// Rewrite the manifest body so the relative segment reference becomes an
/// absolute, token-carrying playback URL. A plain textual substitution, not
/// a manifest parse (§4.2) — forward-compatible with a multi-segment
/// manifest since it replaces every occurrence.
pub fn rewrite_manifest(body: &str, tenant_id: &str, camera_id: &str, token: &str) -> String {
    let encoded_token = urlencode(token);
    let absolute = format!("/playback/{tenant_id}/{camera_id}/{SEGMENT_NAME}?token={encoded_token}");
    body.replace(SEGMENT_NAME, &absolute)
}

/// Minimal percent-encoding for the token query parameter. Tokens are
/// base64url + `.` so only `.` passes through untouched; everything not in
/// the URL-safe unreserved set is escaped.
fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_writes_manifest_and_segment() {
        let dir = tempfile::tempdir().unwrap();
        produce(dir.path(), "tenant-a", "camera-a").unwrap();
        let d = stream_dir(dir.path(), "tenant-a", "camera-a");
        let manifest = std::fs::read_to_string(d.join(MANIFEST_NAME)).unwrap();
        assert!(manifest.contains("#EXTM3U"));
        assert!(manifest.contains(SEGMENT_NAME));
        let segment = std::fs::read(d.join(SEGMENT_NAME)).unwrap();
        assert_eq!(segment, SEGMENT_MARKER.as_bytes());
    }

    #[test]
    fn rewrite_replaces_relative_reference() {
        let body = "#EXTM3U\n#EXTINF:5.0,\nsegment0.ts\n";
        let out = rewrite_manifest(body, "tenant-a", "camera-a", "abc.def");
        assert!(out.contains("/playback/tenant-a/camera-a/segment0.ts?token=abc.def"));
        assert!(!out.contains("\nsegment0.ts\n"));
    }

    #[tokio::test]
    async fn retry_succeeds_once_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let sdir = stream_dir(dir.path(), "tenant-a", "camera-a");
        std::fs::create_dir_all(&sdir).unwrap();

        let path = sdir.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            std::fs::write(path.join(MANIFEST_NAME), b"ready").unwrap();
        });

        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        let mut retries = 0;
        let result = read_with_retry(
            dir.path(),
            "tenant-a",
            "camera-a",
            AssetKind::Manifest,
            policy,
            || retries += 1,
        )
        .await;
        assert!(result.is_ok());
        assert!(retries >= 1);
    }

    #[tokio::test]
    async fn retry_exhausted_returns_typed_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result = read_with_retry(
            dir.path(),
            "tenant-missing",
            "camera-missing",
            AssetKind::Segment,
            policy,
            || {},
        )
        .await;
        assert!(matches!(result, Err(GatewayError::SegmentNotFound)));
    }
}
