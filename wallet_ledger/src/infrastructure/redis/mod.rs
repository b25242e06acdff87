pub mod idempotency_cache;
pub mod lock_client;
