//! Error types for `cardex-core`.
//!
//! Token verification failures ([`AuthFailure`]) and throttling
//! ([`Rejection::Throttled`]) are separate axes; callers map every
//! `AuthFailure` to "unauthenticated" but the distinction is kept here for
//! logging and tests.

/// Why a presented token was rejected by [`crate::TokenCodec::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// Wrong segment count or a segment that is not unpadded base64url.
    #[error("malformed token")]
    MalformedToken,

    /// The signature checked out but the payload is not a valid claims object.
    #[error("malformed claims")]
    MalformedClaims,

    /// The signature does not match the header and payload.
    #[error("invalid signature")]
    InvalidSignature,

    /// The token's `exp` is in the past.
    #[error("token expired")]
    Expired,
}

/// Failure to issue a token.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("subject id must not be empty")]
    EmptySubject,

    #[error("failed to serialize token segment: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure to construct a [`crate::TokenCodec`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("signing secret must not be empty")]
    EmptySecret,
}

/// Why the gate refused to authenticate a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Unauthenticated {
    /// No `Authorization` header, or one without the `Bearer ` prefix.
    #[error("missing bearer credentials")]
    MissingCredentials,

    #[error(transparent)]
    Token(#[from] AuthFailure),
}

/// Terminal outcome for a request the gate did not admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("rate limit exceeded")]
    Throttled,

    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] Unauthenticated),
}

/// Configuration errors raised while building core components.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias used throughout `cardex-core`.
pub type CoreResult<T> = Result<T, CoreError>;
