//! Token Verifier — stateless validator of HMAC-SHA256 playback tokens.
//!
//! Mirrors the pack's HMAC-signed, base64url, dot-joined delivery-token
//! pattern (sign the encoded payload, verify with `Hmac::verify_slice` for
//! a constant-time comparison), but keeps the fixed five-step precedence
//! order the design spec requires: the first failing check wins, nothing
//! falls through silently.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub sub: String,
    pub tid: String,
    pub cid: String,
    pub sid: String,
    pub exp: i64,
    pub iat: i64,
    pub v: u8,
}

impl TokenPayload {
    fn is_well_formed(&self) -> bool {
        !self.sub.is_empty()
            && !self.tid.is_empty()
            && !self.cid.is_empty()
            && !self.sid.is_empty()
            && self.exp > 0
            && self.iat > 0
            && self.v == 1
    }
}

/// Verify a raw `token` query-parameter value against `secret`, applying
/// the five-step precedence from §4.5. `now` is epoch seconds, passed in
/// so tests can verify expiry without sleeping.
pub fn verify(token: Option<&str>, secret: &str, now: i64) -> Result<TokenPayload, GatewayError> {
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Err(GatewayError::TokenMissing),
    };

    let mut parts = token.splitn(2, '.');
    let (payload_b64, sig_b64) = match (parts.next(), parts.next()) {
        (Some(p), Some(s)) if !p.is_empty() && !s.is_empty() && token.matches('.').count() == 1 => {
            (p, s)
        }
        _ => return Err(GatewayError::TokenFormatInvalid),
    };

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| GatewayError::TokenSignatureInvalid)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Internal(format!("invalid HMAC key: {e}")))?;
    mac.update(payload_b64.as_bytes());
    // `verify_slice` is constant-time and rejects length mismatches without
    // branching on content, satisfying the spec's timing requirement.
    mac.verify_slice(&sig_bytes)
        .map_err(|_| GatewayError::TokenSignatureInvalid)?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| GatewayError::TokenPayloadInvalid)?;
    let payload: TokenPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|_| GatewayError::TokenPayloadInvalid)?;
    if !payload.is_well_formed() {
        return Err(GatewayError::TokenPayloadInvalid);
    }

    if payload.exp <= now {
        return Err(GatewayError::TokenExpired);
    }

    Ok(payload)
}

/// Scope check: the token's `(tid, cid)` must equal the request path's
/// `(tenant_id, camera_id)` (§4.5). Distinct from verification — a scope
/// mismatch is 403, not 401.
pub fn check_scope(payload: &TokenPayload, tenant_id: &str, camera_id: &str) -> Result<(), GatewayError> {
    if payload.tid == tenant_id && payload.cid == camera_id {
        Ok(())
    } else {
        Err(GatewayError::TokenScopeMismatch)
    }
}

/// Sign a payload into the wire token format. Used by tests and by any
/// in-process token-issuance helper; the control plane does the equivalent
/// with the same shared secret in production.
pub fn sign(payload: &TokenPayload, secret: &str) -> String {
    let json = serde_json::to_vec(payload).expect("TokenPayload always serializes");
    let payload_b64 = URL_SAFE_NO_PAD.encode(json);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload_b64.as_bytes());
    let sig = mac.finalize().into_bytes();
    format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tid: &str, cid: &str, exp: i64) -> TokenPayload {
        TokenPayload {
            sub: "user-1".to_string(),
            tid: tid.to_string(),
            cid: cid.to_string(),
            sid: "sid-1".to_string(),
            exp,
            iat: 1,
            v: 1,
        }
    }

    #[test]
    fn missing_token_is_rejected() {
        let err = verify(None, "secret", 1000).unwrap_err();
        assert!(matches!(err, GatewayError::TokenMissing));
        let err = verify(Some(""), "secret", 1000).unwrap_err();
        assert!(matches!(err, GatewayError::TokenMissing));
    }

    #[test]
    fn malformed_format_is_rejected() {
        let err = verify(Some("no-dot-here"), "secret", 1000).unwrap_err();
        assert!(matches!(err, GatewayError::TokenFormatInvalid));
        let err = verify(Some("a.b.c"), "secret", 1000).unwrap_err();
        assert!(matches!(err, GatewayError::TokenFormatInvalid));
        let err = verify(Some(".sig"), "secret", 1000).unwrap_err();
        assert!(matches!(err, GatewayError::TokenFormatInvalid));
    }

    #[test]
    fn valid_token_round_trips() {
        let p = payload("tenant-a", "camera-a", 2000);
        let token = sign(&p, "shared-secret");
        let verified = verify(Some(&token), "shared-secret", 1000).unwrap();
        assert_eq!(verified.tid, "tenant-a");
        assert_eq!(verified.cid, "camera-a");
    }

    #[test]
    fn wrong_secret_fails_signature_check() {
        let p = payload("tenant-a", "camera-a", 2000);
        let token = sign(&p, "correct-secret");
        let err = verify(Some(&token), "wrong-secret", 1000).unwrap_err();
        assert!(matches!(err, GatewayError::TokenSignatureInvalid));
    }

    #[test]
    fn mismatched_length_signature_maps_to_same_code_as_content_mismatch() {
        let p = payload("tenant-a", "camera-a", 2000);
        let token = sign(&p, "secret");
        let (payload_b64, _sig) = token.split_once('.').unwrap();

        let short_sig_token = format!("{payload_b64}.YWJj");
        let err_short = verify(Some(&short_sig_token), "secret", 1000).unwrap_err();

        let wrong_content_token = format!("{payload_b64}.{}", "A".repeat(43));
        let err_content = verify(Some(&wrong_content_token), "secret", 1000).unwrap_err();

        assert!(matches!(err_short, GatewayError::TokenSignatureInvalid));
        assert!(matches!(err_content, GatewayError::TokenSignatureInvalid));
    }

    #[test]
    fn expired_token_is_rejected_after_signature_check_passes() {
        let p = payload("tenant-a", "camera-a", 500);
        let token = sign(&p, "secret");
        let err = verify(Some(&token), "secret", 1000).unwrap_err();
        assert!(matches!(err, GatewayError::TokenExpired));
    }

    #[test]
    fn scope_mismatch_is_distinct_from_verification_failure() {
        let p = payload("tenant-a", "camera-a", 2000);
        let token = sign(&p, "secret");
        let verified = verify(Some(&token), "secret", 1000).unwrap();
        let err = check_scope(&verified, "tenant-d", "camera-a").unwrap_err();
        assert!(matches!(err, GatewayError::TokenScopeMismatch));
    }
}
