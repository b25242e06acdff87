use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::entities::{
    AssetType, Transaction, TransactionStatus, TransactionType, User, Wallet, WalletOwnerType,
};
use crate::domain::repository::{AssetBalance, LockedWallet};
use crate::domain::types::{AssetTypeId, TransactionId, UserId, WalletId};

#[derive(Debug, FromRow)]
pub struct UserModel {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserModel> for User {
    fn from(m: UserModel) -> Self {
        Self {
            id: UserId(m.id),
            email: m.email,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct AssetTypeModel {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<AssetTypeModel> for AssetType {
    fn from(m: AssetTypeModel) -> Self {
        Self {
            id: AssetTypeId(m.id),
            code: m.code,
            name: m.name,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct WalletModel {
    pub id: Uuid,
    pub owner_type: WalletOwnerType,
    pub user_id: Option<Uuid>,
    pub system_code: Option<String>,
    pub asset_type_id: Uuid,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WalletModel> for Wallet {
    fn from(m: WalletModel) -> Self {
        Self {
            id: WalletId(m.id),
            owner_type: m.owner_type,
            user_id: m.user_id.map(UserId),
            system_code: m.system_code,
            asset_type_id: AssetTypeId(m.asset_type_id),
            version: m.version,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct TransactionModel {
    pub id: Uuid,
    pub idempotency_key: String,
    pub request_fingerprint: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: i64,
    pub asset_type_id: Uuid,
    pub source_wallet_id: Uuid,
    pub destination_wallet_id: Uuid,
    pub response_code: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TransactionModel> for Transaction {
    fn from(m: TransactionModel) -> Self {
        Self {
            id: TransactionId(m.id),
            idempotency_key: m.idempotency_key,
            request_fingerprint: m.request_fingerprint,
            transaction_type: m.transaction_type,
            status: m.status,
            amount: m.amount,
            asset_type_id: AssetTypeId(m.asset_type_id),
            source_wallet_id: WalletId(m.source_wallet_id),
            destination_wallet_id: WalletId(m.destination_wallet_id),
            response_code: m.response_code,
            response_body: m.response_body,
            error_code: m.error_code,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// Fila del `SELECT ... FOR UPDATE` sobre billeteras.
#[derive(Debug, FromRow)]
pub struct LockedWalletRow {
    pub id: Uuid,
    pub version: i64,
}

impl From<LockedWalletRow> for LockedWallet {
    fn from(r: LockedWalletRow) -> Self {
        Self {
            id: WalletId(r.id),
            version: r.version,
        }
    }
}

/// Fila de la consulta agrupada de balances por activo.
#[derive(Debug, FromRow)]
pub struct AssetBalanceRow {
    pub asset_code: String,
    pub asset_name: String,
    pub balance: i64,
}

impl From<AssetBalanceRow> for AssetBalance {
    fn from(r: AssetBalanceRow) -> Self {
        Self {
            asset_code: r.asset_code,
            asset_name: r.asset_name,
            balance: r.balance,
        }
    }
}
