use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::AppError;
use crate::domain::types::{AssetTypeId, LedgerEntryId, TransactionId, UserId, WalletId};

/// Código de sistema de la billetera Tesorería: contraparte de toda mutación
/// visible para usuarios (topup/bonus/spend).
pub const TREASURY_SYSTEM_CODE: &str = "TREASURY";

/// Código de sistema de la billetera de Emisión. Solo la usa el seed como
/// fuente única de fondeo inicial; el runtime nunca la resuelve.
pub const ISSUANCE_SYSTEM_CODE: &str = "ISSUANCE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_owner_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletOwnerType {
    USER,
    SYSTEM,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    TOPUP,
    BONUS,
    SPEND,
}

impl TransactionType {
    /// Nombre de la operación tal como viaja en el payload de respuesta.
    pub fn operation_name(&self) -> &'static str {
        match self {
            TransactionType::TOPUP => "topup",
            TransactionType::BONUS => "bonus",
            TransactionType::SPEND => "spend",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    PROCESSING,
    POSTED,
    FAILED,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_entry_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    DEBIT,
    CREDIT,
}

/// Modelo de Entidad: User.
///
/// Un usuario nunca posee saldo directamente: el dinero vive en sus
/// billeteras, una por tipo de activo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String, // Unique
    pub created_at: DateTime<Utc>,
}

/// Modelo de Entidad: AssetType.
///
/// Identifica una moneda virtual del sistema (código único en mayúsculas).
/// Es inmutable una vez creado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetType {
    pub id: AssetTypeId,
    pub code: String, // Unique, mayúsculas, máx. 50 chars
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Modelo de Entidad: Wallet.
///
/// Exactamente una de dos formas: billetera de usuario (`user_id` presente,
/// sin `system_code`) o billetera de sistema (`system_code` presente, sin
/// `user_id`). La forma se refuerza con un CHECK en la base de datos.
///
/// `version` arranca en 0 y se incrementa en exactamente 1 por cada mutación
/// exitosa que toca la billetera (optimistic locking).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner_type: WalletOwnerType,
    pub user_id: Option<UserId>,
    pub system_code: Option<String>,
    pub asset_type_id: AssetTypeId,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Modelo de Entidad: Transaction.
///
/// Cumple doble rol: registro de auditoría del posting y registro de
/// idempotencia (índice único sobre `idempotency_key`). `response_code` y
/// `response_body` están presentes si y solo si el estado es terminal
/// (POSTED o FAILED).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub idempotency_key: String,
    pub request_fingerprint: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: i64,
    pub asset_type_id: AssetTypeId,
    pub source_wallet_id: WalletId,
    pub destination_wallet_id: WalletId,
    pub response_code: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Construye el registro PROCESSING que se intenta insertar al inicio del
    /// pipeline de mutación.
    ///
    /// Delegamos aquí la validación de forma: monto positivo y billeteras
    /// distintas. Una clave de idempotencia vacía a esta altura ya pasó el
    /// transporte, así que es contexto de idempotencia ausente (error de
    /// configuración), no un error del cliente.
    pub fn processing(
        idempotency_key: String,
        request_fingerprint: String,
        transaction_type: TransactionType,
        amount: i64,
        asset_type_id: AssetTypeId,
        source_wallet_id: WalletId,
        destination_wallet_id: WalletId,
    ) -> Result<Self, AppError> {
        if amount <= 0 {
            return Err(AppError::Validation(
                "amount must be a positive integer".to_string(),
            ));
        }
        if source_wallet_id == destination_wallet_id {
            return Err(AppError::Validation(
                "source and destination wallets must differ".to_string(),
            ));
        }
        if idempotency_key.trim().is_empty() {
            return Err(AppError::IdempotencyContextMissing);
        }

        let now = Utc::now();
        Ok(Self {
            id: TransactionId::new(),
            idempotency_key,
            request_fingerprint,
            transaction_type,
            status: TransactionStatus::PROCESSING,
            amount,
            asset_type_id,
            source_wallet_id,
            destination_wallet_id,
            response_code: None,
            response_body: None,
            error_code: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Modelo de Entidad: LedgerEntry.
///
/// Una pata de un posting de doble entrada. Los asientos son append-only:
/// jamás se actualizan ni se borran, y el balance de una billetera se deriva
/// siempre como Σ(CREDIT) − Σ(DEBIT) sobre ellos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub transaction_id: TransactionId,
    pub wallet_id: WalletId,
    pub asset_type_id: AssetTypeId,
    pub entry_type: LedgerEntryType,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        transaction_id: TransactionId,
        wallet_id: WalletId,
        asset_type_id: AssetTypeId,
        entry_type: LedgerEntryType,
        amount: i64,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            transaction_id,
            wallet_id,
            asset_type_id,
            entry_type,
            amount,
            created_at: Utc::now(),
        }
    }
}
