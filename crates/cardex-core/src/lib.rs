//! Cardex core library: request admission for the card-price service.
//!
//! `cardex-core` decides whether an inbound request may proceed and who is
//! making it. It is independent of any HTTP framework so the web crate (and
//! any future frontends) share the same admission rules.
//!
//! # Modules
//!
//! - [`token`]: HMAC-SHA256 bearer tokens: [`TokenCodec`], [`Claims`], [`Identity`].
//! - [`rate_limit`]: Per-client token buckets: [`RateLimiter`], [`RateLimitConfig`].
//! - [`gate`]: Composition of the two: [`RequestGate`], client key derivation.
//! - [`clock`]: Injectable time source ([`Clock`]).
//! - [`error`]: Failure taxonomy ([`AuthFailure`], [`Rejection`]) and [`CoreError`].

pub mod clock;
pub mod error;
pub mod gate;
pub mod rate_limit;
pub mod token;

pub use clock::{unix_seconds, Clock, ManualClock, SystemClock};
pub use error::{
    AuthFailure, CodecError, CoreError, CoreResult, IssueError, Rejection, Unauthenticated,
};
pub use gate::{bearer_token, client_key, Admission, RequestGate, RequestMeta, RouteAccess};
pub use rate_limit::{RateLimitConfig, RateLimiter, RefillPolicy};
pub use token::{AccountTier, Algorithm, Claims, Identity, TokenCodec, TOKEN_TTL};
