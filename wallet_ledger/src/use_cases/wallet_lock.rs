use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::domain::concurrency::wallet_lock_keys;
use crate::domain::error::AppError;
use crate::domain::gateways::LockClient;
use crate::domain::types::WalletId;

/// Parámetros de adquisición del lock distribuido.
#[derive(Debug, Clone, Copy)]
pub struct WalletLockConfig {
    pub ttl_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for WalletLockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5_000,
            retry_count: 3,
            retry_delay_ms: 50,
        }
    }
}

/// Lock distribuido sobre un conjunto de billeteras.
///
/// Estrecha la ventana de carrera entre instancias del servicio antes de que
/// la transacción de base de datos tome los row-locks. Las claves se
/// adquieren siempre en el orden canónico ascendente; esa propiedad es la
/// que evita deadlocks entre instancias con conjuntos solapados.
#[derive(Clone)]
pub struct WalletLockManager {
    client: Arc<dyn LockClient>,
    config: WalletLockConfig,
}

impl WalletLockManager {
    pub fn new(client: Arc<dyn LockClient>, config: WalletLockConfig) -> Self {
        Self { client, config }
    }

    /// Adquiere las claves de lock de todas las billeteras del conjunto.
    ///
    /// Cada intento usa un token aleatorio propio. Si alguna clave falla
    /// dentro de un intento, se liberan las ya adquiridas (borrado
    /// condicional por token), se espera `retry_delay × intento` y se vuelve
    /// a intentar, hasta `retry_count` intentos.
    #[tracing::instrument(name = "WalletLockManager::acquire", skip(self))]
    pub async fn acquire(&self, wallet_ids: &[WalletId]) -> Result<WalletLockGuard, AppError> {
        let keys = wallet_lock_keys(wallet_ids);
        if keys.is_empty() {
            return Err(AppError::LockKeysMissing);
        }

        let attempts = self.config.retry_count.max(1);
        for attempt in 1..=attempts {
            let token = Uuid::new_v4().to_string();

            if self.try_acquire_all(&keys, &token).await {
                return Ok(WalletLockGuard {
                    client: self.client.clone(),
                    keys,
                    token,
                    released: false,
                });
            }

            if attempt < attempts {
                let backoff = self.config.retry_delay_ms * u64::from(attempt);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        Err(AppError::DistributedLockNotAcquired)
    }

    /// Un intento completo: todas las claves en orden, o ninguna.
    async fn try_acquire_all(&self, keys: &[String], token: &str) -> bool {
        let mut held: Vec<&String> = Vec::new();

        for key in keys {
            let acquired = match self
                .client
                .try_acquire(key, token, self.config.ttl_ms)
                .await
            {
                Ok(acquired) => acquired,
                Err(e) => {
                    warn!("Lock client error acquiring {}: {}", key, e);
                    false
                }
            };

            if acquired {
                held.push(key);
                continue;
            }

            // Intento fallido: devolvemos las claves ya tomadas por este token.
            for held_key in held {
                if let Err(e) = self.client.release_if_held(held_key, token).await {
                    warn!("Lock client error releasing {}: {}", held_key, e);
                }
            }
            return false;
        }

        true
    }
}

/// Handle de un lock adquirido.
///
/// La liberación corre exactamente una vez en todo camino de salida: la vía
/// normal es `release().await`; si el guard se suelta sin liberar (error
/// temprano, cancelación del handler), el Drop lanza una liberación
/// best-effort en segundo plano. Un TTL ya expirado se detecta por el token
/// y la liberación queda en no-op.
pub struct WalletLockGuard {
    client: Arc<dyn LockClient>,
    keys: Vec<String>,
    token: String,
    released: bool,
}

impl std::fmt::Debug for WalletLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletLockGuard")
            .field("keys", &self.keys)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

impl WalletLockGuard {
    /// Claves actualmente en poder del guard.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Libera todas las claves con borrado condicional por token.
    ///
    /// Los errores de liberación se loguean y no se propagan.
    pub async fn release(mut self) {
        self.released = true;
        let keys = std::mem::take(&mut self.keys);
        release_keys(self.client.clone(), keys, self.token.clone()).await;
    }
}

impl Drop for WalletLockGuard {
    fn drop(&mut self) {
        if self.released || self.keys.is_empty() {
            return;
        }

        let client = self.client.clone();
        let keys = std::mem::take(&mut self.keys);
        let token = std::mem::take(&mut self.token);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                release_keys(client, keys, token).await;
            });
        }
    }
}

async fn release_keys(client: Arc<dyn LockClient>, keys: Vec<String>, token: String) {
    for key in keys {
        if let Err(e) = client.release_if_held(&key, &token).await {
            warn!("Lock release failed for {}: {}", key, e);
        }
    }
}
