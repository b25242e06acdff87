use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::AppError;

/// Puerto del cliente de locks distribuidos.
///
/// La implementación real es Redis; los tests inyectan un fake en memoria que
/// implementa únicamente `SET ... NX PX` y el borrado condicional por token.
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Compare-and-set de un solo escritor con TTL: tiene éxito si y solo si
    /// la clave estaba ausente.
    async fn try_acquire(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool, AppError>;

    /// Borra la clave solo si su valor actual es exactamente `token`.
    ///
    /// El scope por token garantiza que un lock cuyo TTL expiró y fue
    /// readquirido por otro caller no sea liberado espuriamente.
    async fn release_if_held(&self, key: &str, token: &str) -> Result<bool, AppError>;
}

/// Respuesta cacheada de una mutación terminada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    pub fingerprint: String,
    pub status_code: u16,
    pub body: serde_json::Value,
}

/// Puerto del cache rápido de idempotencia.
///
/// Semántica best-effort: un miss cae al registro autoritativo en la tabla
/// `transactions`, y los errores del cache se loguean y se tragan dentro de
/// la implementación. Por eso las firmas no retornan `Result`.
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    async fn get(&self, idempotency_key: &str) -> Option<CachedResponse>;
    async fn set(&self, idempotency_key: &str, response: &CachedResponse);
}
