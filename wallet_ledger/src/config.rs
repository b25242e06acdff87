use std::env;

use anyhow::Context;

use crate::use_cases::wallet_lock::WalletLockConfig;

/// Configuración del servicio, leída del entorno.
///
/// Los valores numéricos tienen los defaults documentados; `DATABASE_URL` y
/// `REDIS_URL` son obligatorios.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub idempotency_cache_ttl_seconds: u64,
    pub distributed_lock_ttl_ms: u64,
    pub distributed_lock_retry_count: u32,
    pub distributed_lock_retry_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            port: parsed_var("PORT", 3000)?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
            idempotency_cache_ttl_seconds: parsed_var("IDEMPOTENCY_CACHE_TTL_SECONDS", 86_400)?,
            distributed_lock_ttl_ms: parsed_var("DISTRIBUTED_LOCK_TTL_MS", 5_000)?,
            distributed_lock_retry_count: parsed_var("DISTRIBUTED_LOCK_RETRY_COUNT", 3)?,
            distributed_lock_retry_delay_ms: parsed_var("DISTRIBUTED_LOCK_RETRY_DELAY_MS", 50)?,
        })
    }

    pub fn wallet_lock_config(&self) -> WalletLockConfig {
        WalletLockConfig {
            ttl_ms: self.distributed_lock_ttl_ms,
            retry_count: self.distributed_lock_retry_count,
            retry_delay_ms: self.distributed_lock_retry_delay_ms,
        }
    }
}

fn parsed_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a valid number, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}
