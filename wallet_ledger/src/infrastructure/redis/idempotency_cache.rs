use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::domain::gateways::{CachedResponse, IdempotencyCache};

/// Clave del cache de respuestas por clave de idempotencia.
fn response_key(idempotency_key: &str) -> String {
    format!("idem:response:{}", idempotency_key)
}

/// Cache rápido de idempotencia sobre Redis.
///
/// No es autoritativo: un miss siempre cae a la fila `transactions`. Todo
/// error de red o de serialización se loguea y se traga, nunca aborta la
/// mutación.
#[derive(Clone)]
pub struct RedisIdempotencyCache {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisIdempotencyCache {
    pub fn new(conn: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { conn, ttl_seconds }
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(&self, idempotency_key: &str) -> Option<CachedResponse> {
        let mut conn = self.conn.clone();
        let key = response_key(idempotency_key);

        let raw: Option<String> = match conn.get(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Idempotency cache read failed for {}: {}", key, e);
                return None;
            }
        };

        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!("Idempotency cache payload corrupt for {}: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, idempotency_key: &str, response: &CachedResponse) {
        let key = response_key(idempotency_key);

        let payload = match serde_json::to_string(response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Idempotency cache serialization failed for {}: {}", key, e);
                return;
            }
        };

        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> =
            conn.set_ex(&key, payload, self.ttl_seconds).await;

        if let Err(e) = result {
            warn!("Idempotency cache write failed for {}: {}", key, e);
        }
    }
}
