use std::sync::Arc;

use cardex_core::{Clock, RateLimiter, RequestGate, TokenCodec};

use crate::auth::users::UserStore;
use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Rate limiter and token codec, shared by every gated route.
    pub gate: RequestGate,
    pub users: Arc<UserStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: ServerConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let codec = TokenCodec::new(&config.auth.jwt_secret)?;
        let limiter = RateLimiter::with_clock(config.rate_limit.limiter_config(), clock.clone())?;
        let gate = RequestGate::new(Arc::new(limiter), Arc::new(codec), clock.clone());
        let users = UserStore::from_seed(&config.users, clock.now());

        Ok(Self {
            config: Arc::new(config),
            gate,
            users: Arc::new(users),
            clock,
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        self.gate.codec()
    }
}
