use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::types::{UserId, WalletId};

/// Error unificado del dominio.
///
/// Cada variante lleva asociado un código externo estable y un status HTTP;
/// cualquier capa puede retornarlo y una única frontera (`api::error`) lo
/// renderiza al formato de salida `{error: {code, message, details?}}`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Idempotency-Key header is required")]
    IdempotencyKeyMissing,

    #[error("User not found with ID: {0}")]
    UserNotFound(UserId),

    #[error("Asset type not found with code: {0}")]
    AssetTypeNotFound(String),

    #[error("User {user_id} has no wallet for asset: {asset_code}")]
    UserWalletNotFound { user_id: UserId, asset_code: String },

    #[error("User has no wallet for the requested asset code: {0}")]
    AssetWalletNotFound(String),

    #[error("Idempotency key was already used with a different request")]
    IdempotencyKeyReused,

    #[error("A request with this idempotency key is already in progress")]
    RequestAlreadyInProgress,

    #[error("Idempotency record vanished after duplicate-key insert")]
    IdempotencyStateNotFound,

    #[error("Insufficient funds in wallet {wallet_id}: required {required}, available {available}")]
    InsufficientFunds {
        wallet_id: WalletId,
        required: i64,
        available: i64,
    },

    #[error("Optimistic lock conflict on wallet: {0}")]
    OptimisticLockConflict(WalletId),

    #[error("Row-locked wallet count mismatch: expected {expected}, locked {actual}")]
    LockedWalletMismatch { expected: usize, actual: usize },

    #[error("Could not acquire distributed wallet lock")]
    DistributedLockNotAcquired,

    #[error("Cannot derive lock keys from an empty wallet set")]
    LockKeysMissing,

    #[error("Treasury wallet is not configured for asset: {0}")]
    TreasuryWalletNotConfigured(String),

    #[error("Idempotency context is missing for this request")]
    IdempotencyContextMissing,

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Código de error externo estable (contrato con los clientes).
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::IdempotencyKeyMissing => "IDEMPOTENCY_KEY_MISSING",
            AppError::UserNotFound(_) => "USER_NOT_FOUND",
            AppError::AssetTypeNotFound(_) => "ASSET_TYPE_NOT_FOUND",
            AppError::UserWalletNotFound { .. } => "USER_WALLET_NOT_FOUND",
            AppError::AssetWalletNotFound(_) => "ASSET_WALLET_NOT_FOUND",
            AppError::IdempotencyKeyReused => "IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_REQUEST",
            AppError::RequestAlreadyInProgress => "REQUEST_ALREADY_IN_PROGRESS",
            AppError::IdempotencyStateNotFound => "IDEMPOTENCY_STATE_NOT_FOUND",
            AppError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AppError::OptimisticLockConflict(_) => "OPTIMISTIC_LOCK_CONFLICT",
            AppError::LockedWalletMismatch { .. } => "LOCKED_WALLET_MISMATCH",
            AppError::DistributedLockNotAcquired => "DISTRIBUTED_LOCK_NOT_ACQUIRED",
            AppError::LockKeysMissing => "LOCK_KEYS_MISSING",
            AppError::TreasuryWalletNotConfigured(_) => "TREASURY_WALLET_NOT_CONFIGURED",
            AppError::IdempotencyContextMissing => "IDEMPOTENCY_CONTEXT_MISSING",
            AppError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            AppError::RepositoryError(_) | AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Status HTTP asociado a la variante.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation(_)
            | AppError::IdempotencyKeyMissing
            | AppError::LockKeysMissing => 400,
            AppError::UserNotFound(_)
            | AppError::AssetTypeNotFound(_)
            | AppError::UserWalletNotFound { .. }
            | AppError::AssetWalletNotFound(_)
            | AppError::RouteNotFound(_) => 404,
            AppError::IdempotencyKeyReused
            | AppError::RequestAlreadyInProgress
            | AppError::InsufficientFunds { .. }
            | AppError::OptimisticLockConflict(_)
            | AppError::LockedWalletMismatch { .. } => 409,
            AppError::DistributedLockNotAcquired => 423,
            AppError::IdempotencyStateNotFound
            | AppError::TreasuryWalletNotConfigured(_)
            | AppError::IdempotencyContextMissing
            | AppError::RepositoryError(_)
            | AppError::Internal(_) => 500,
        }
    }

    /// Detalles opcionales que acompañan al mensaje en el payload de error.
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::InsufficientFunds {
                required,
                available,
                ..
            } => Some(json!({
                "required": required.to_string(),
                "available": available.to_string(),
            })),
            AppError::LockedWalletMismatch { expected, actual } => Some(json!({
                "expected": expected,
                "actual": actual,
            })),
            _ => None,
        }
    }

    /// Payload de error completo, tal como viaja por el wire.
    ///
    /// También se persiste como `response_body` cuando el error es terminal
    /// (INSUFFICIENT_FUNDS), de modo que los replays devuelvan el mismo body.
    pub fn to_error_body(&self) -> Value {
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }
        json!({ "error": error })
    }
}
