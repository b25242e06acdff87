use async_trait::async_trait;

use crate::domain::entities::{AssetType, LedgerEntry, Transaction, TransactionStatus, User, Wallet};
use crate::domain::error::AppError;
use crate::domain::types::{AssetTypeId, TransactionId, UserId, WalletId};

/// Balance derivado de una billetera de usuario para un activo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBalance {
    pub asset_code: String,
    pub asset_name: String,
    pub balance: i64,
}

/// Fila retornada por el row-lock: id y versión observada bajo el lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedWallet {
    pub id: WalletId,
    pub version: i64,
}

/// Resultado del intento de insertar el registro PROCESSING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionInsert {
    Inserted,
    /// Violación del índice único sobre `idempotency_key`: ya existe un
    /// registro para esta clave y hay que resolver replay / in-progress.
    DuplicateKey,
}

// Port for Ledger Persistence
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, AppError>;

    /// Busca un tipo de activo por su código (ya en mayúsculas).
    async fn find_asset_type_by_code(&self, code: &str) -> Result<Option<AssetType>, AppError>;

    async fn find_user_wallet(
        &self,
        user_id: UserId,
        asset_type_id: AssetTypeId,
    ) -> Result<Option<Wallet>, AppError>;

    async fn find_system_wallet(
        &self,
        system_code: &str,
        asset_type_id: AssetTypeId,
    ) -> Result<Option<Wallet>, AppError>;

    /// Balance por activo de todas las billeteras del usuario, en una sola
    /// consulta agrupada, opcionalmente filtrada por código de activo.
    /// El resultado viene ordenado por código ascendente.
    async fn user_asset_balances(
        &self,
        user_id: UserId,
        asset_code: Option<String>,
    ) -> Result<Vec<AssetBalance>, AppError>;

    /// Transacciones que tocan cualquier billetera del usuario, las más
    /// recientes primero.
    async fn find_transactions_for_user(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError>;

    /// Abre la transacción de base de datos del pipeline de mutación
    /// (read-committed, statement timeout acotado).
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, AppError>;
}

/// Operaciones dentro de la transacción de base de datos de una mutación.
///
/// Soltar la unidad de trabajo sin `commit` hace rollback de todo lo
/// escrito, incluido el registro PROCESSING.
#[async_trait]
pub trait LedgerUnitOfWork: Send {
    /// Intenta insertar el registro PROCESSING. La violación del índice
    /// único sobre `idempotency_key` se reporta como `DuplicateKey`, no como
    /// error, y no debe abortar la transacción subyacente: tras un
    /// `DuplicateKey` la unidad de trabajo sigue utilizable para leer el
    /// registro existente y resolver el replay.
    async fn insert_processing_transaction(
        &mut self,
        transaction: &Transaction,
    ) -> Result<TransactionInsert, AppError>;

    async fn find_by_idempotency_key(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError>;

    /// Row-lock exclusivo (`FOR UPDATE`) sobre las billeteras dadas,
    /// adquirido en orden `id ASC` hasta el commit o rollback.
    async fn lock_wallets(&mut self, wallet_ids: &[WalletId]) -> Result<Vec<LockedWallet>, AppError>;

    /// Balance derivado: Σ(CREDIT) − Σ(DEBIT) sobre los asientos de la
    /// billetera para el activo.
    async fn wallet_balance(
        &mut self,
        wallet_id: WalletId,
        asset_type_id: AssetTypeId,
    ) -> Result<i64, AppError>;

    /// Inserta las dos patas del posting.
    async fn append_ledger_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), AppError>;

    /// `UPDATE wallets SET version = version + 1 WHERE id = $1 AND
    /// version = $2`. Retorna las filas afectadas (0 o 1).
    async fn bump_wallet_version(
        &mut self,
        wallet_id: WalletId,
        expected_version: i64,
    ) -> Result<u64, AppError>;

    /// Escribe el estado terminal y la respuesta sobre el registro de
    /// transacción.
    async fn finalize_transaction(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
        response_code: i32,
        response_body: &serde_json::Value,
        error_code: Option<String>,
    ) -> Result<(), AppError>;

    /// Punto de linearización de la mutación.
    async fn commit(&mut self) -> Result<(), AppError>;
}
