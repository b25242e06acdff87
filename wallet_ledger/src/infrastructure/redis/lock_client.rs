use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::domain::error::AppError;
use crate::domain::gateways::LockClient;

/// Borrado condicional: la clave se elimina solo si todavía guarda el token
/// de este intento de adquisición.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Cliente de locks distribuidos sobre Redis.
///
/// `SET NX PX` para adquirir, script Lua GET==token → DEL para liberar.
#[derive(Clone)]
pub struct RedisLockClient {
    conn: ConnectionManager,
}

impl RedisLockClient {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn lock_err(e: redis::RedisError) -> AppError {
    AppError::Internal(format!("lock client error: {}", e))
}

#[async_trait]
impl LockClient for RedisLockClient {
    async fn try_acquire(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();

        // SET key token NX PX ttl -> "OK" si la clave estaba ausente, nil si no.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(lock_err)?;

        Ok(reply.is_some())
    }

    async fn release_if_held(&self, key: &str, token: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();

        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(lock_err)?;

        Ok(deleted == 1)
    }
}
