//! Compact HMAC-signed bearer tokens.
//!
//! A token is `base64url(header) "." base64url(claims) "." base64url(signature)`,
//! every segment unpadded. The header is the fixed object
//! `{"alg":"HS256","typ":"JWT"}`; the claims carry `user_id`, `email`,
//! `user_type` and `exp` (Unix seconds). Tokens are valid for exactly
//! [`TOKEN_TTL`] after issuance and cannot be revoked before that.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::clock::unix_seconds;
use crate::error::{AuthFailure, CodecError, IssueError};

type HmacSha256 = Hmac<Sha256>;

/// Fixed validity window applied by [`TokenCodec::issue`].
pub const TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Account classification used downstream for feature gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    #[default]
    Free,
    Paid,
}

impl AccountTier {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountTier::Free => "free",
            AccountTier::Paid => "paid",
        }
    }
}

impl fmt::Display for AccountTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(AccountTier::Free),
            "paid" => Ok(AccountTier::Paid),
            other => Err(format!("unknown account tier: {other}")),
        }
    }
}

/// The identity a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: String,
    pub email: String,
    pub account_tier: AccountTier,
}

/// Authenticated identity recovered from a token.
///
/// Fields are private: the only ways to obtain a `Claims` value are
/// [`TokenCodec::issue`] and [`TokenCodec::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    subject_id: String,
    email: String,
    account_tier: AccountTier,
    expires_at: i64,
}

impl Claims {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn account_tier(&self) -> AccountTier {
        self.account_tier
    }

    /// Expiry as Unix seconds.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

#[derive(Serialize, Deserialize)]
struct WireClaims {
    user_id: String,
    email: String,
    user_type: AccountTier,
    exp: i64,
}

impl From<&Claims> for WireClaims {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.subject_id.clone(),
            email: claims.email.clone(),
            user_type: claims.account_tier,
            exp: claims.expires_at,
        }
    }
}

impl From<WireClaims> for Claims {
    fn from(wire: WireClaims) -> Self {
        Self {
            subject_id: wire.user_id,
            email: wire.email,
            account_tier: wire.user_type,
            expires_at: wire.exp,
        }
    }
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

/// Signing algorithms the codec knows. Only one is supported; the header
/// names it but is never consulted to choose one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Hs256,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Hs256 => "HS256",
        }
    }

    fn header(self) -> Header {
        Header {
            alg: self.name(),
            typ: "JWT",
        }
    }
}

/// Issues and verifies bearer tokens with a shared secret.
///
/// Holds no mutable state; share it behind an `Arc`.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    mac: HmacSha256,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Creates a codec keyed with `secret`.
    ///
    /// # Errors
    ///
    /// [`CodecError::EmptySecret`] if `secret` is empty.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, CodecError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CodecError::EmptySecret);
        }
        // HMAC takes keys of any length, so only emptiness can fail here.
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| CodecError::EmptySecret)?;
        Ok(Self {
            algorithm: Algorithm::Hs256,
            mac,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Issues a token for `identity`, expiring [`TOKEN_TTL`] after `now`.
    ///
    /// Returns the token together with the claims it encodes. Output is a
    /// pure function of the identity, the secret and the whole second of
    /// `now`.
    pub fn issue(
        &self,
        identity: &Identity,
        now: SystemTime,
    ) -> Result<(String, Claims), IssueError> {
        if identity.subject_id.is_empty() {
            return Err(IssueError::EmptySubject);
        }

        let claims = Claims {
            subject_id: identity.subject_id.clone(),
            email: identity.email.clone(),
            account_tier: identity.account_tier,
            expires_at: unix_seconds(now) + TOKEN_TTL.as_secs() as i64,
        };

        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.algorithm.header())?);
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&WireClaims::from(&claims))?);
        let signature = self.sign(&header_b64, &claims_b64).finalize().into_bytes();
        let token = format!(
            "{header_b64}.{claims_b64}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        );

        tracing::debug!(
            subject = %claims.subject_id,
            exp = claims.expires_at,
            "Issued token"
        );

        Ok((token, claims))
    }

    /// Checks a token's structure, signature and expiry.
    ///
    /// The header segment is only checked for valid base64url; its contents
    /// are not matched against [`Algorithm`]. That check is structural, not
    /// a security boundary: the signature is what authenticates the token.
    pub fn verify(&self, token: &str, now: SystemTime) -> Result<Claims, AuthFailure> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthFailure::MalformedToken);
        };

        decode_segment(header_b64)?;
        let claims_bytes = decode_segment(claims_b64)?;
        let signature = decode_segment(signature_b64)?;

        self.sign(header_b64, claims_b64)
            .verify_slice(&signature)
            .map_err(|_| AuthFailure::InvalidSignature)?;

        let wire: WireClaims =
            serde_json::from_slice(&claims_bytes).map_err(|_| AuthFailure::MalformedClaims)?;
        let claims = Claims::from(wire);

        if unix_seconds(now) > claims.expires_at {
            return Err(AuthFailure::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, header_b64: &str, claims_b64: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, AuthFailure> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthFailure::MalformedToken)
}
