//! Request admission: rate limiting first, then bearer authentication.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Rejection, Unauthenticated};
use crate::rate_limit::RateLimiter;
use crate::token::{Claims, TokenCodec};

/// Key used when a request carries no usable address at all.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// The parts of an inbound request the gate looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMeta<'a> {
    pub forwarded_for: Option<&'a str>,
    pub real_ip: Option<&'a str>,
    pub peer: Option<SocketAddr>,
    pub authorization: Option<&'a str>,
}

/// Whether a route needs a verified identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    Protected,
}

/// A request the gate let through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub client_key: String,
    /// Present exactly when the route was [`RouteAccess::Protected`].
    pub claims: Option<Claims>,
}

/// Derives the rate-limit key: the first entry of `X-Forwarded-For`, then
/// `X-Real-IP`, then the peer IP (without port). Empty values are skipped.
pub fn client_key(meta: &RequestMeta<'_>) -> String {
    let forwarded = meta
        .forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    let real_ip = meta.real_ip.map(str::trim);

    forwarded
        .into_iter()
        .chain(real_ip)
        .find(|v| !v.is_empty())
        .map(str::to_owned)
        .or_else(|| meta.peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, Unauthenticated> {
    authorization
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(Unauthenticated::MissingCredentials)
}

/// Sequences the rate limiter and the token codec in front of a handler.
#[derive(Clone)]
pub struct RequestGate {
    limiter: Arc<RateLimiter>,
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
}

impl RequestGate {
    pub fn new(limiter: Arc<RateLimiter>, codec: Arc<TokenCodec>, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter,
            codec,
            clock,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Every request ends in exactly one of: throttled, unauthenticated, or
    /// admitted. A throttled request is never asked for credentials.
    pub fn admit(
        &self,
        meta: &RequestMeta<'_>,
        access: RouteAccess,
    ) -> Result<Admission, Rejection> {
        let now = self.clock.now();
        let client_key = client_key(meta);

        if !self.limiter.allow_at(&client_key, now) {
            tracing::debug!(client = %client_key, "Request throttled");
            return Err(Rejection::Throttled);
        }

        let claims = match access {
            RouteAccess::Public => None,
            RouteAccess::Protected => {
                let verified = bearer_token(meta.authorization).and_then(|token| {
                    self.codec.verify(token, now).map_err(Unauthenticated::from)
                });
                match verified {
                    Ok(claims) => Some(claims),
                    Err(reason) => {
                        tracing::debug!(client = %client_key, %reason, "Authentication failed");
                        return Err(Rejection::Unauthenticated(reason));
                    }
                }
            }
        };

        Ok(Admission { client_key, claims })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::AuthFailure;
    use crate::rate_limit::RateLimitConfig;
    use crate::token::{AccountTier, Identity};
    use std::time::Duration;

    const T0: u64 = 1_700_000_000;

    fn gate(capacity: u32) -> (RequestGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let limiter = RateLimiter::with_clock(
            RateLimitConfig::new(capacity, Duration::from_secs(60)),
            clock.clone(),
        )
        .unwrap();
        let codec = TokenCodec::new(b"gate-test-secret").unwrap();
        let gate = RequestGate::new(Arc::new(limiter), Arc::new(codec), clock.clone());
        (gate, clock)
    }

    fn token_for(gate: &RequestGate, clock: &ManualClock) -> String {
        let identity = Identity {
            subject_id: "user-1".to_string(),
            email: "misty@example.com".to_string(),
            account_tier: AccountTier::Free,
        };
        gate.codec().issue(&identity, clock.now()).unwrap().0
    }

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.10:51515".parse().unwrap())
    }

    #[test]
    fn client_key_prefers_first_forwarded_entry() {
        let meta = RequestMeta {
            forwarded_for: Some(" 203.0.113.7 , 10.0.0.1"),
            real_ip: Some("198.51.100.2"),
            peer: peer(),
            ..Default::default()
        };
        assert_eq!(client_key(&meta), "203.0.113.7");
    }

    #[test]
    fn client_key_falls_back_to_real_ip() {
        let meta = RequestMeta {
            forwarded_for: Some(" , 10.0.0.1"),
            real_ip: Some(" 198.51.100.2 "),
            peer: peer(),
            ..Default::default()
        };
        assert_eq!(client_key(&meta), "198.51.100.2");
    }

    #[test]
    fn client_key_falls_back_to_peer_ip_without_port() {
        let meta = RequestMeta {
            real_ip: Some(""),
            peer: peer(),
            ..Default::default()
        };
        assert_eq!(client_key(&meta), "192.0.2.10");
    }

    #[test]
    fn client_key_unknown_without_any_address() {
        assert_eq!(client_key(&RequestMeta::default()), UNKNOWN_CLIENT);
    }

    #[test]
    fn bearer_token_requires_prefix() {
        assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
        assert_eq!(
            bearer_token(Some("Basic abc")),
            Err(Unauthenticated::MissingCredentials)
        );
        assert_eq!(
            bearer_token(Some("abc")),
            Err(Unauthenticated::MissingCredentials)
        );
        assert_eq!(bearer_token(None), Err(Unauthenticated::MissingCredentials));
    }

    #[test]
    fn public_route_admits_without_claims() {
        let (gate, _) = gate(5);
        let meta = RequestMeta {
            peer: peer(),
            ..Default::default()
        };
        let admission = gate.admit(&meta, RouteAccess::Public).unwrap();
        assert_eq!(admission.client_key, "192.0.2.10");
        assert!(admission.claims.is_none());
    }

    #[test]
    fn protected_route_attaches_verified_claims() {
        let (gate, clock) = gate(5);
        let header = format!("Bearer {}", token_for(&gate, &clock));
        let meta = RequestMeta {
            peer: peer(),
            authorization: Some(&header),
            ..Default::default()
        };
        let admission = gate.admit(&meta, RouteAccess::Protected).unwrap();
        let claims = admission.claims.unwrap();
        assert_eq!(claims.subject_id(), "user-1");
        assert_eq!(claims.email(), "misty@example.com");
    }

    #[test]
    fn protected_route_without_header_is_unauthenticated() {
        let (gate, _) = gate(5);
        let meta = RequestMeta {
            peer: peer(),
            ..Default::default()
        };
        assert_eq!(
            gate.admit(&meta, RouteAccess::Protected),
            Err(Rejection::Unauthenticated(Unauthenticated::MissingCredentials))
        );
    }

    #[test]
    fn protected_route_with_expired_token_is_unauthenticated() {
        let (gate, clock) = gate(5);
        let header = format!("Bearer {}", token_for(&gate, &clock));
        clock.advance(Duration::from_secs(86_401));
        let meta = RequestMeta {
            peer: peer(),
            authorization: Some(&header),
            ..Default::default()
        };
        assert_eq!(
            gate.admit(&meta, RouteAccess::Protected),
            Err(Rejection::Unauthenticated(Unauthenticated::Token(
                AuthFailure::Expired
            )))
        );
    }

    #[test]
    fn protected_route_with_garbage_token_is_unauthenticated() {
        let (gate, _) = gate(5);
        let meta = RequestMeta {
            peer: peer(),
            authorization: Some("Bearer not-a-token"),
            ..Default::default()
        };
        assert_eq!(
            gate.admit(&meta, RouteAccess::Protected),
            Err(Rejection::Unauthenticated(Unauthenticated::Token(
                AuthFailure::MalformedToken
            )))
        );
    }

    #[test]
    fn throttling_wins_over_authentication() {
        let (gate, _) = gate(1);
        let meta = RequestMeta {
            peer: peer(),
            ..Default::default()
        };
        assert!(matches!(
            gate.admit(&meta, RouteAccess::Protected),
            Err(Rejection::Unauthenticated(_))
        ));
        assert_eq!(
            gate.admit(&meta, RouteAccess::Protected),
            Err(Rejection::Throttled)
        );
    }

    #[test]
    fn failed_authentication_still_spends_budget() {
        let (gate, clock) = gate(2);
        let bad = RequestMeta {
            peer: peer(),
            authorization: Some("Bearer x.y.z"),
            ..Default::default()
        };
        assert!(gate.admit(&bad, RouteAccess::Protected).is_err());

        let header = format!("Bearer {}", token_for(&gate, &clock));
        let good = RequestMeta {
            authorization: Some(&header),
            ..bad
        };
        assert!(gate.admit(&good, RouteAccess::Protected).is_ok());
        assert_eq!(
            gate.admit(&good, RouteAccess::Protected),
            Err(Rejection::Throttled)
        );
    }
}
