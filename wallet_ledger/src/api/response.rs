use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::entities::{Transaction, TransactionStatus};
use crate::domain::repository::AssetBalance;

/// Balance de un activo, con el monto como string decimal.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalanceDto {
    pub asset_code: String,
    pub asset_name: String,
    pub balance: String,
}

impl From<AssetBalance> for AssetBalanceDto {
    fn from(b: AssetBalance) -> Self {
        Self {
            asset_code: b.asset_code,
            asset_name: b.asset_name,
            balance: b.balance.to_string(),
        }
    }
}

/// Respuesta de `GET /wallet/{userId}/balance`.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balances: Vec<AssetBalanceDto>,
}

impl BalanceResponse {
    pub fn new(user_id: Uuid, balances: Vec<AssetBalance>) -> Self {
        Self {
            user_id,
            balances: balances.into_iter().map(|b| b.into()).collect(),
        }
    }
}

/// Una transacción del historial, montos como strings decimales.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDto {
    pub transaction_id: Uuid,
    pub idempotency_key: String,
    pub operation: String,
    #[schema(value_type = String)]
    pub status: TransactionStatus,
    pub amount: String,
    pub from_wallet_id: Uuid,
    pub to_wallet_id: Uuid,
    pub created_at: String,
}

impl From<Transaction> for TransactionDto {
    fn from(t: Transaction) -> Self {
        Self {
            transaction_id: t.id.0,
            idempotency_key: t.idempotency_key,
            operation: t.transaction_type.operation_name().to_string(),
            status: t.status,
            amount: t.amount.to_string(),
            from_wallet_id: t.source_wallet_id.0,
            to_wallet_id: t.destination_wallet_id.0,
            created_at: t.created_at.to_rfc3339(),
        }
    }
}

/// Respuesta de `GET /wallet/{userId}/transactions`.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHistoryResponse {
    pub user_id: Uuid,
    pub transactions: Vec<TransactionDto>,
}

/// Forma del payload de error, solo para documentación OpenAPI.
#[derive(Serialize, ToSchema)]
pub struct ErrorBodyDto {
    pub code: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponseDto {
    pub error: ErrorBodyDto,
}
