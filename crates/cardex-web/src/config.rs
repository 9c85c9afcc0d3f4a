use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use cardex_core::{AccountTier, RateLimitConfig, RefillPolicy};
use serde::{Deserialize, Deserializer};

/// An account created at startup. `password_hash` is an argon2 PHC string
/// as printed by the `hash_password` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub account_tier: AccountTier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rate_limit_requests")]
    pub requests: u32,
    #[serde(
        default = "default_rate_limit_window",
        deserialize_with = "deserialize_duration"
    )]
    pub window: Duration,
    /// Keep fractional refill progress instead of discarding it.
    #[serde(default)]
    pub carry_fractional_refill: bool,
    /// 0 disables the idle-bucket sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Buckets idle for this many windows are evicted by the sweep.
    #[serde(default = "default_idle_windows")]
    pub idle_windows: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_origins")]
    pub origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_environment() -> String { "development".to_string() }
fn default_rate_limit_requests() -> u32 { 100 }
fn default_rate_limit_window() -> Duration { Duration::from_secs(60) }
fn default_sweep_interval_secs() -> u64 { 60 }
fn default_idle_windows() -> u32 { 5 }
fn default_cors_origins() -> Vec<String> { vec!["http://localhost:3000".to_string()] }

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: default_rate_limit_requests(),
            window: default_rate_limit_window(),
            carry_fractional_refill: false,
            sweep_interval_secs: default_sweep_interval_secs(),
            idle_windows: default_idle_windows(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { origins: default_cors_origins() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            environment: default_environment(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitSettings::default(),
            cors: CorsConfig::default(),
            tls: TlsConfig::default(),
            users: Vec::new(),
        }
    }
}

impl RateLimitSettings {
    pub fn limiter_config(&self) -> RateLimitConfig {
        let refill = if self.carry_fractional_refill {
            RefillPolicy::CarryRemainder
        } else {
            RefillPolicy::Truncating
        };
        RateLimitConfig::new(self.requests, self.window).with_refill(refill)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn max_idle(&self) -> Duration {
        self.window.saturating_mul(self.idle_windows.max(1))
    }
}

/// Values that must never be used as a signing secret.
const WEAK_SECRETS: &[&str] = &[
    "change-this-super-secret-key",
    "change-me",
    "secret",
    "password",
    "jwt-secret",
];

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.cert_path.is_some() && self.tls.key_path.is_some()
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("CARDEX_WEB_CONFIG").map(PathBuf::from).ok();

        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents)?
        } else {
            ServerConfig::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.harden_secret()?;
        Ok(config)
    }

    /// Overrides fields from `CARDEX_*` variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = var("CARDEX_BIND_ADDR") {
            self.bind_addr = addr.parse()?;
        }
        if let Some(env) = var("CARDEX_ENVIRONMENT") {
            self.environment = env;
        }
        if let Some(secret) = var("CARDEX_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(origins) = var("CARDEX_CORS_ORIGINS") {
            self.cors.origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(val) = var("CARDEX_RATE_LIMIT_REQUESTS") {
            match val.trim().parse::<u32>() {
                Ok(n) => self.rate_limit.requests = n,
                Err(_) => tracing::warn!(
                    "Ignoring unparsable CARDEX_RATE_LIMIT_REQUESTS={val:?}; keeping {}",
                    self.rate_limit.requests
                ),
            }
        }
        if let Some(val) = var("CARDEX_RATE_LIMIT_WINDOW") {
            match parse_duration(&val) {
                Ok(window) => self.rate_limit.window = window,
                Err(e) => tracing::warn!(
                    "Ignoring CARDEX_RATE_LIMIT_WINDOW={val:?} ({e}); keeping {:?}",
                    self.rate_limit.window
                ),
            }
        }
        if let Some(cert) = var("CARDEX_TLS_CERT") {
            self.tls.cert_path = Some(cert);
        }
        if let Some(key) = var("CARDEX_TLS_KEY") {
            self.tls.key_path = Some(key);
        }
        Ok(())
    }

    /// Fills in or rejects the signing secret.
    pub fn harden_secret(&mut self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            self.auth.jwt_secret = uuid::Uuid::new_v4().to_string();
            tracing::warn!(
                "No JWT secret configured. Generated random secret (tokens will not survive a restart)."
            );
            return Ok(());
        }

        if WEAK_SECRETS.iter().any(|&w| self.auth.jwt_secret == w) {
            if self.is_production() {
                anyhow::bail!(
                    "JWT secret matches a known placeholder value. \
                     Set a strong random secret via CARDEX_JWT_SECRET."
                );
            }
            tracing::warn!("JWT secret is a known placeholder; never use it in production.");
        }
        if self.auth.jwt_secret.len() < 32 {
            tracing::warn!(
                "JWT secret is shorter than 32 characters. \
                 Consider using a stronger secret via CARDEX_JWT_SECRET."
            );
        }
        Ok(())
    }
}

/// Parses `500ms`, `60s`, `1.5m`, `2h`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let input = input.trim();
    let (number, unit_secs) = if let Some(n) = input.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = input.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = input.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = input.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (input, 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration: {input:?}"))?;
    Duration::try_from_secs_f64(value * unit_secs)
        .map_err(|e| anyhow::anyhow!("invalid duration {input:?}: {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
