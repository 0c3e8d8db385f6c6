//! Protocol enforcer (component J): a per-session state machine that gates
//! mutating tool calls behind an initialization call and a subsequent,
//! recent context-check call, and issues signed preflight tokens proving
//! that a context-check happened.

use crate::models::SessionState;
use crate::storage::Store;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Default context-check validity window.
pub const DEFAULT_CONTEXT_CHECK_TTL_SECONDS: i64 = 300;
/// Default preflight-token lifetime.
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 300;

/// Tools that never require briefing or a context check.
pub const EXEMPT_TOOLS: &[&str] = &["get_briefing", "health"];

/// Mutators whose durable-state changes additionally require a recent
/// context check, not just briefing.
pub const CONTEXT_CHECK_REQUIRED_TOOLS: &[&str] = &[
    "remember",
    "record_outcome",
    "add_rule",
    "update_rule",
    "delete_rule",
    "prune_memories",
    "compact",
    "link_memories",
    "unlink_memories",
    "delete_memory",
];

/// How a tool name is gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// Always allowed.
    Exempt,
    /// Requires `briefed == true`.
    InitRequired,
    /// Requires `briefed == true` and a context check within TTL.
    ContextCheckRequired,
}

/// Classifies a tool name per §4.J. Unknown tools default to
/// [`ToolCategory::InitRequired`], the conservative default ("most reads").
#[must_use]
pub fn classify_tool(tool: &str) -> ToolCategory {
    if EXEMPT_TOOLS.contains(&tool) {
        ToolCategory::Exempt
    } else if CONTEXT_CHECK_REQUIRED_TOOLS.contains(&tool) {
        ToolCategory::ContextCheckRequired
    } else {
        ToolCategory::InitRequired
    }
}

/// The two blocking outcomes a caller can hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// `get_briefing` has not been called this session.
    InitRequired,
    /// No context check within the TTL window exists for this session.
    ContextCheckRequired,
}

/// A structured protocol block, carried by `Error::Protocol`.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Which rule was violated.
    pub kind: ViolationKind,
    /// Human-facing explanation.
    pub message: String,
    /// The tool the caller should call to unblock.
    pub remedy_tool: &'static str,
    /// An optional extra hint string.
    pub remedy_hint: Option<String>,
}

impl Violation {
    /// Wire form of `kind`, matching §6's violation response format.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self.kind {
            ViolationKind::InitRequired => "INIT_REQUIRED",
            ViolationKind::ContextCheckRequired => "CONTEXT_CHECK_REQUIRED",
        }
    }
}

/// Computes the session id: `8-hex-of-md5(project_path)` + `-` +
/// `YYYYMMDDHH` (UTC hour bucket).
#[must_use]
pub fn session_id_for(project_path: &str, now: DateTime<Utc>) -> String {
    let digest = md5::compute(project_path.as_bytes());
    let hex = format!("{digest:x}");
    format!("{}-{}", &hex[..8], now.format("%Y%m%d%H"))
}

/// Signed-payload portion of a preflight token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPayload {
    /// The action being attested.
    pub action: String,
    /// The session this check was recorded under.
    pub session_id: String,
    /// The project this check applies to.
    pub project_path: String,
    /// When the check was recorded.
    pub issued_at: DateTime<Utc>,
    /// When this token stops being valid.
    pub expires_at: DateTime<Utc>,
}

/// A base64 payload plus its hex HMAC-SHA256 signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightToken {
    /// Base64-encoded JSON [`TokenPayload`].
    pub payload: String,
    /// Hex-encoded HMAC-SHA256 over `payload`'s bytes.
    pub sig: String,
}

fn sign(secret: &str, payload_b64: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Fatal(format!("invalid HMAC key: {e}")))?;
    mac.update(payload_b64.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Issues a preflight token attesting that `action` was about to be taken
/// under `session_id`/`project_path` at `now`, valid for `ttl_seconds`.
///
/// # Errors
///
/// Returns `Error::Fatal` if `secret` cannot key an HMAC (never happens for
/// non-empty keys; HMAC-SHA256 accepts any key length).
pub fn issue_token(
    secret: &str,
    action: &str,
    session_id: &str,
    project_path: &str,
    now: DateTime<Utc>,
    ttl_seconds: i64,
) -> Result<PreflightToken> {
    let payload = TokenPayload {
        action: action.to_string(),
        session_id: session_id.to_string(),
        project_path: project_path.to_string(),
        issued_at: now,
        expires_at: now + chrono::Duration::seconds(ttl_seconds),
    };
    let json = serde_json::to_vec(&payload)
        .map_err(|e| Error::Fatal(format!("failed to serialize token payload: {e}")))?;
    let payload_b64 = BASE64.encode(json);
    let sig = sign(secret, &payload_b64)?;
    Ok(PreflightToken { payload: payload_b64, sig })
}

/// Verifies a token's signature and expiry, returning its payload.
///
/// # Errors
///
/// Returns `Error::Validation` on a bad signature, malformed payload, or an
/// expired token.
pub fn verify_token(secret: &str, token: &PreflightToken, now: DateTime<Utc>) -> Result<TokenPayload> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Fatal(format!("invalid HMAC key: {e}")))?;
    mac.update(token.payload.as_bytes());
    let expected_sig =
        hex::decode(&token.sig).map_err(|_| Error::Validation("preflight token signature is not hex".to_string()))?;
    mac.verify_slice(&expected_sig)
        .map_err(|_| Error::Validation("preflight token signature mismatch".to_string()))?;

    let json = BASE64
        .decode(&token.payload)
        .map_err(|_| Error::Validation("preflight token payload is not base64".to_string()))?;
    let payload: TokenPayload = serde_json::from_slice(&json)
        .map_err(|_| Error::Validation("preflight token payload is not valid JSON".to_string()))?;

    if payload.expires_at < now {
        return Err(Error::Validation("preflight token has expired".to_string()));
    }
    Ok(payload)
}

/// Owns the process-lifetime HMAC secret and exposes the session gate
/// checks; session state itself lives in the durable store so it survives
/// process restarts within the same hour bucket.
pub struct ProtocolEnforcer {
    token_secret: String,
}

impl ProtocolEnforcer {
    /// Builds an enforcer with the given HMAC secret.
    #[must_use]
    pub fn new(token_secret: String) -> Self {
        Self { token_secret }
    }

    /// Records that `get_briefing` was called: loads or creates the
    /// session and sets `briefed = true`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a store failure.
    pub fn get_briefing(&self, store: &Store, project_path: &str, now: DateTime<Utc>) -> Result<SessionState> {
        let session_id = session_id_for(project_path, now);
        let mut state = store.get_or_create_session(&session_id, project_path)?;
        state.briefed = true;
        state.last_activity = now;
        store.put_session(&state)?;
        Ok(state)
    }

    /// Gate for init-required and context-check-required tools: fails with
    /// `ViolationKind::InitRequired` unless `get_briefing` has already been
    /// called this hour bucket. Never mutates session state.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol(Violation)` if the session is unbriefed,
    /// otherwise `Error::Store` on a read failure.
    pub fn check_init(&self, store: &Store, project_path: &str, now: DateTime<Utc>) -> Result<SessionState> {
        let session_id = session_id_for(project_path, now);
        let state = store.get_session(&session_id)?;
        match state {
            Some(state) if state.briefed => Ok(state),
            _ => Err(Error::Protocol(Violation {
                kind: ViolationKind::InitRequired,
                message: "this session has not been briefed; call get_briefing first".to_string(),
                remedy_tool: "get_briefing",
                remedy_hint: None,
            })),
        }
    }

    /// Gate for context-check-required tools: `check_init` first, then
    /// requires a context check recorded within `ttl_seconds`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol(Violation)` if unbriefed or stale/missing,
    /// otherwise `Error::Store` on a read failure.
    pub fn check_counsel(
        &self,
        store: &Store,
        project_path: &str,
        action: &str,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let state = self.check_init(store, project_path, now)?;
        if state.has_recent_context_check(ttl_seconds, now) {
            Ok(())
        } else {
            Err(Error::Protocol(Violation {
                kind: ViolationKind::ContextCheckRequired,
                message: format!("about to {action}"),
                remedy_tool: "context_check",
                remedy_hint: None,
            }))
        }
    }

    /// Records a context check for the current hour-bucket session and
    /// issues a preflight token for `action`. Requires the session to
    /// already be briefed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol(Violation::InitRequired)` if unbriefed,
    /// otherwise `Error::Store` on a write failure.
    pub fn context_check(
        &self,
        store: &Store,
        project_path: &str,
        topic: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<PreflightToken> {
        let mut state = self.check_init(store, project_path, now)?;
        state.record_context_check(topic.to_string(), now);
        store.put_session(&state)?;
        issue_token(&self.token_secret, action, &state.session_id, project_path, now, DEFAULT_TOKEN_TTL_SECONDS)
    }

    /// Verifies a preflight token issued by this enforcer's secret.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` on a bad signature, malformed payload,
    /// or expiry.
    pub fn verify(&self, token: &PreflightToken, now: DateTime<Utc>) -> Result<TokenPayload> {
        verify_token(&self.token_secret, token, now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_expected_shape() {
        let now = DateTime::parse_from_rfc3339("2026-07-30T14:00:00Z").unwrap().with_timezone(&Utc);
        let id = session_id_for("/some/project", now);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1], "2026073014");
    }

    #[test]
    fn token_round_trips() {
        let now = Utc::now();
        let token = issue_token("secret", "remember", "sess-1", "/p", now, 300).unwrap();
        let payload = verify_token("secret", &token, now).unwrap();
        assert_eq!(payload.action, "remember");
        assert_eq!(payload.session_id, "sess-1");
        assert_eq!(payload.project_path, "/p");
    }

    #[test]
    fn tampered_token_fails_verification() {
        let now = Utc::now();
        let mut token = issue_token("secret", "remember", "sess-1", "/p", now, 300).unwrap();
        token.sig = "00".repeat(32);
        assert!(verify_token("secret", &token, now).is_err());
    }

    #[test]
    fn expired_token_fails_verification() {
        let now = Utc::now();
        let token = issue_token("secret", "remember", "sess-1", "/p", now - chrono::Duration::seconds(400), 300)
            .unwrap();
        assert!(verify_token("secret", &token, now).is_err());
    }

    #[test]
    fn check_init_blocks_until_briefed() {
        let store = Store::open_in_memory().unwrap();
        let enforcer = ProtocolEnforcer::new("secret".to_string());
        let now = Utc::now();
        assert!(enforcer.check_init(&store, "/p", now).is_err());
        enforcer.get_briefing(&store, "/p", now).unwrap();
        assert!(enforcer.check_init(&store, "/p", now).is_ok());
    }

    #[test]
    fn check_counsel_requires_recent_context_check() {
        let store = Store::open_in_memory().unwrap();
        let enforcer = ProtocolEnforcer::new("secret".to_string());
        let now = Utc::now();
        enforcer.get_briefing(&store, "/p", now).unwrap();
        assert!(enforcer.check_counsel(&store, "/p", "record a decision", 300, now).is_err());
        enforcer.context_check(&store, "/p", "about to record a decision", "remember", now).unwrap();
        assert!(enforcer.check_counsel(&store, "/p", "record a decision", 300, now).is_ok());
    }

    #[test]
    fn classify_tool_matches_the_three_categories() {
        assert_eq!(classify_tool("get_briefing"), ToolCategory::Exempt);
        assert_eq!(classify_tool("recall"), ToolCategory::InitRequired);
        assert_eq!(classify_tool("remember"), ToolCategory::ContextCheckRequired);
    }
}
