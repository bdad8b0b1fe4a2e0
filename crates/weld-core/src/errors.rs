//! Wire-format error codes.
//!
//! Typed error vocabulary for RPC responses, eliminating string-based error
//! detection. Codes are small integers carried end-to-end so callers branch
//! on specific conditions; [`WireError`] is the error payload inside an RPC
//! response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Centralized RPC error codes.
///
/// Serialized on the wire as small integers via [`ErrorCode::as_wire`] /
/// [`ErrorCode::from_wire`]. An integer this enumeration does not know maps
/// to [`ErrorCode::Unknown`]; the raw value stays available on the
/// surrounding [`WireError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Code not in the shared enumeration.
    Unknown,
    /// Internal error on the serving side.
    Internal,
    /// Method not found.
    MethodNotFound,
    /// Invalid parameters.
    InvalidParams,
    /// The session resource could not be produced.
    SessionUnavailable,
    /// The account is signed out of the external service.
    SignedOut,
    /// The linked wallet does not match the requested one.
    WalletMismatch,
    /// The user rejected the link request.
    LinkRejected,
}

/// All known error code variants, for exhaustive testing.
pub const ALL_ERROR_CODES: &[ErrorCode] = &[
    ErrorCode::Internal,
    ErrorCode::MethodNotFound,
    ErrorCode::InvalidParams,
    ErrorCode::SessionUnavailable,
    ErrorCode::SignedOut,
    ErrorCode::WalletMismatch,
    ErrorCode::LinkRejected,
];

impl ErrorCode {
    /// Integer representation sent on the wire.
    #[must_use]
    pub fn as_wire(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Internal => 1,
            Self::MethodNotFound => 2,
            Self::InvalidParams => 3,
            Self::SessionUnavailable => 10,
            Self::SignedOut => 11,
            Self::WalletMismatch => 12,
            Self::LinkRejected => 13,
        }
    }

    /// Resolve an integer received on the wire.
    ///
    /// Unrecognized integers map to [`ErrorCode::Unknown`] rather than
    /// failing — an old peer must be able to talk to a newer one.
    #[must_use]
    pub fn from_wire(code: i64) -> Self {
        match code {
            1 => Self::Internal,
            2 => Self::MethodNotFound,
            3 => Self::InvalidParams,
            10 => Self::SessionUnavailable,
            11 => Self::SignedOut,
            12 => Self::WalletMismatch,
            13 => Self::LinkRejected,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Internal => "INTERNAL",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::SessionUnavailable => "SESSION_UNAVAILABLE",
            Self::SignedOut => "SIGNED_OUT",
            Self::WalletMismatch => "WALLET_MISMATCH",
            Self::LinkRejected => "LINK_REJECTED",
        };
        write!(f, "{name}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire error payload
// ─────────────────────────────────────────────────────────────────────────────

/// Error payload inside an RPC response.
///
/// `code` is the raw wire integer; [`WireError::code`] resolves it against
/// the shared enumeration for branching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Raw integer error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl std::error::Error for WireError {}

impl WireError {
    /// Create a new wire error with a known code.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_wire(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The resolved error code for branching.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from_wire(self.code)
    }

    /// Internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Method not found.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("method not found: {method}"),
        )
    }

    /// Invalid parameters.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    /// Session resource unavailable.
    #[must_use]
    pub fn session_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SessionUnavailable, message)
    }

    /// Account signed out.
    #[must_use]
    pub fn signed_out() -> Self {
        Self::new(ErrorCode::SignedOut, "account is signed out")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
