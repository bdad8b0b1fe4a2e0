//! Link-session resource types.
//!
//! The "session" is the slow remote resource describing whether the
//! external-service account is signed in and which wallet it is linked to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of the account↔wallet link session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionState {
    /// Signed in; the account is linked to a wallet.
    Active(SessionData),
    /// Signed out of the external service.
    SignedOut,
}

impl SessionState {
    /// Whether this is the signed-in state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

/// The signed-in session payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Stable account identifier on the external service.
    pub account_id: String,
    /// Display handle, when the service exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Address of the linked wallet.
    pub wallet_address: String,
    /// When the service-side session expires.
    pub expires_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn data() -> SessionData {
        SessionData {
            account_id: "acct_1".into(),
            handle: Some("alice".into()),
            wallet_address: "0xabc".into(),
            expires_at: Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn active_roundtrip() {
        let state = SessionState::Active(data());
        let json = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn active_wire_shape() {
        let v = serde_json::to_value(SessionState::Active(data())).unwrap();
        assert_eq!(v["status"], "active");
        assert_eq!(v["accountId"], "acct_1");
        assert_eq!(v["walletAddress"], "0xabc");
    }

    #[test]
    fn signed_out_wire_shape() {
        let v = serde_json::to_value(SessionState::SignedOut).unwrap();
        assert_eq!(v, json!({"status": "signedOut"}));
    }

    #[test]
    fn is_active() {
        assert!(SessionState::Active(data()).is_active());
        assert!(!SessionState::SignedOut.is_active());
    }

    #[test]
    fn handle_omitted_when_absent() {
        let mut d = data();
        d.handle = None;
        let json = serde_json::to_string(&SessionState::Active(d)).unwrap();
        assert!(!json.contains("handle"));
    }
}
