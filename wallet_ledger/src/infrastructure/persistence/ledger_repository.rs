use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction as PgTransaction};
use uuid::Uuid;

use crate::domain::entities::{
    AssetType, LedgerEntry, Transaction, TransactionStatus, User, Wallet,
};
use crate::domain::error::AppError;
use crate::domain::repository::{
    AssetBalance, LedgerRepository, LedgerUnitOfWork, LockedWallet, TransactionInsert,
};
use crate::domain::types::{AssetTypeId, TransactionId, UserId, WalletId};
use crate::infrastructure::persistence::models::{
    AssetBalanceRow, AssetTypeModel, LockedWalletRow, TransactionModel, UserModel, WalletModel,
};

/// Timeout grueso por sentencia dentro de la transacción de mutación.
const STATEMENT_TIMEOUT_MS: i32 = 10_000;

/// Repositorio del ledger implementado para PostgreSQL.
///
/// Utiliza consultas SQL parametrizadas directas con `sqlx` (Runtime-checked)
/// y `sqlx::query_as` para mapear los resultados a los modelos de
/// persistencia.
pub struct PostgresLedgerRepository {
    /// Pool de conexiones a la base de datos PostgreSQL.
    pool: PgPool,
}

impl PostgresLedgerRepository {
    /// Crea una nueva instancia del repositorio.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn repo_err(e: sqlx::Error) -> AppError {
    AppError::RepositoryError(e.to_string())
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, AppError> {
        let model_opt = sqlx::query_as::<_, UserModel>(
            r#"
            SELECT * FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_err)?;

        Ok(model_opt.map(|m| m.into()))
    }

    async fn find_asset_type_by_code(&self, code: &str) -> Result<Option<AssetType>, AppError> {
        let model_opt = sqlx::query_as::<_, AssetTypeModel>(
            r#"
            SELECT * FROM asset_types
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_err)?;

        Ok(model_opt.map(|m| m.into()))
    }

    async fn find_user_wallet(
        &self,
        user_id: UserId,
        asset_type_id: AssetTypeId,
    ) -> Result<Option<Wallet>, AppError> {
        let model_opt = sqlx::query_as::<_, WalletModel>(
            r#"
            SELECT * FROM wallets
            WHERE owner_type = 'USER' AND user_id = $1 AND asset_type_id = $2
            "#,
        )
        .bind(user_id.0)
        .bind(asset_type_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_err)?;

        Ok(model_opt.map(|m| m.into()))
    }

    async fn find_system_wallet(
        &self,
        system_code: &str,
        asset_type_id: AssetTypeId,
    ) -> Result<Option<Wallet>, AppError> {
        let model_opt = sqlx::query_as::<_, WalletModel>(
            r#"
            SELECT * FROM wallets
            WHERE owner_type = 'SYSTEM' AND system_code = $1 AND asset_type_id = $2
            "#,
        )
        .bind(system_code)
        .bind(asset_type_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_err)?;

        Ok(model_opt.map(|m| m.into()))
    }

    /// Una sola consulta agrupada sobre todas las billeteras del usuario.
    ///
    /// El LEFT JOIN conserva billeteras sin asientos (balance 0) y el cast a
    /// BIGINT deshace el NUMERIC que produce SUM en PostgreSQL.
    async fn user_asset_balances(
        &self,
        user_id: UserId,
        asset_code: Option<String>,
    ) -> Result<Vec<AssetBalance>, AppError> {
        let rows: Vec<AssetBalanceRow> = if let Some(code) = asset_code {
            sqlx::query_as(
                r#"
                SELECT a.code AS asset_code,
                       a.name AS asset_name,
                       COALESCE(SUM(
                           CASE WHEN le.entry_type = 'CREDIT' THEN le.amount
                                ELSE -le.amount END
                       ), 0)::BIGINT AS balance
                FROM wallets w
                JOIN asset_types a ON a.id = w.asset_type_id
                LEFT JOIN ledger_entries le
                       ON le.wallet_id = w.id AND le.asset_type_id = w.asset_type_id
                WHERE w.owner_type = 'USER' AND w.user_id = $1 AND a.code = $2
                GROUP BY a.code, a.name
                ORDER BY a.code ASC
                "#,
            )
            .bind(user_id.0)
            .bind(code)
            .fetch_all(&self.pool)
            .await
            .map_err(repo_err)?
        } else {
            sqlx::query_as(
                r#"
                SELECT a.code AS asset_code,
                       a.name AS asset_name,
                       COALESCE(SUM(
                           CASE WHEN le.entry_type = 'CREDIT' THEN le.amount
                                ELSE -le.amount END
                       ), 0)::BIGINT AS balance
                FROM wallets w
                JOIN asset_types a ON a.id = w.asset_type_id
                LEFT JOIN ledger_entries le
                       ON le.wallet_id = w.id AND le.asset_type_id = w.asset_type_id
                WHERE w.owner_type = 'USER' AND w.user_id = $1
                GROUP BY a.code, a.name
                ORDER BY a.code ASC
                "#,
            )
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(repo_err)?
        };

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Historial de transacciones que tocan cualquier billetera del usuario,
    /// las más recientes primero.
    async fn find_transactions_for_user(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let models = sqlx::query_as::<_, TransactionModel>(
            r#"
            SELECT t.* FROM transactions t
            WHERE t.source_wallet_id IN (SELECT id FROM wallets WHERE user_id = $1)
               OR t.destination_wallet_id IN (SELECT id FROM wallets WHERE user_id = $1)
            ORDER BY t.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(repo_err)?;

        Ok(models.into_iter().map(|m| m.into()).collect())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, AppError> {
        let mut tx = self.pool.begin().await.map_err(repo_err)?;

        // Read-committed basta: las filas mutables quedan bajo FOR UPDATE o
        // bajo el predicado de versión, y el índice único de idempotencia
        // serializa los inserts competidores. Solo acotamos cada sentencia.
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(STATEMENT_TIMEOUT_MS.to_string())
            .execute(&mut *tx)
            .await
            .map_err(repo_err)?;

        Ok(Box::new(PostgresLedgerUnitOfWork { tx: Some(tx) }))
    }
}

/// Unidad de trabajo sobre una transacción PostgreSQL abierta.
///
/// `tx` pasa a `None` tras el commit; si la unidad se suelta antes, sqlx hace
/// rollback al soltar la transacción interna.
pub struct PostgresLedgerUnitOfWork {
    tx: Option<PgTransaction<'static, Postgres>>,
}

impl PostgresLedgerUnitOfWork {
    fn tx(&mut self) -> Result<&mut PgTransaction<'static, Postgres>, AppError> {
        self.tx
            .as_mut()
            .ok_or_else(|| AppError::Internal("database transaction already finished".to_string()))
    }
}

#[async_trait]
impl LedgerUnitOfWork for PostgresLedgerUnitOfWork {
    /// El conflicto de clave se detecta con `ON CONFLICT ... DO NOTHING` en
    /// lugar de dejar fallar el INSERT: una sentencia que levanta error
    /// aborta la transacción de Postgres completa (25P02) y la lectura
    /// posterior del registro existente ya no sería posible sobre esta
    /// misma unidad de trabajo.
    async fn insert_processing_transaction(
        &mut self,
        transaction: &Transaction,
    ) -> Result<TransactionInsert, AppError> {
        let tx = self.tx()?;

        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, idempotency_key, request_fingerprint, transaction_type, status,
                amount, asset_type_id, source_wallet_id, destination_wallet_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        // El orden de los binds debe coincidir estrictamente con $1, $2, etc.
        .bind(transaction.id.0)
        .bind(&transaction.idempotency_key)
        .bind(&transaction.request_fingerprint)
        .bind(transaction.transaction_type)
        .bind(transaction.status)
        .bind(transaction.amount)
        .bind(transaction.asset_type_id.0)
        .bind(transaction.source_wallet_id.0)
        .bind(transaction.destination_wallet_id.0)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(repo_err)?;

        if result.rows_affected() == 0 {
            return Ok(TransactionInsert::DuplicateKey);
        }
        Ok(TransactionInsert::Inserted)
    }

    async fn find_by_idempotency_key(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let tx = self.tx()?;

        let model_opt = sqlx::query_as::<_, TransactionModel>(
            r#"SELECT * FROM transactions WHERE idempotency_key = $1"#,
        )
        .bind(idempotency_key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(repo_err)?;

        Ok(model_opt.map(|m| m.into()))
    }

    /// Row-lock exclusivo en orden `id ASC`.
    ///
    /// El ORDER BY es parte del contrato: toda transacción que siga el mismo
    /// protocolo adquiere los locks de fila en el mismo orden.
    async fn lock_wallets(
        &mut self,
        wallet_ids: &[WalletId],
    ) -> Result<Vec<LockedWallet>, AppError> {
        let tx = self.tx()?;
        let ids: Vec<Uuid> = wallet_ids.iter().map(|w| w.0).collect();

        let rows = sqlx::query_as::<_, LockedWalletRow>(
            r#"
            SELECT id, version FROM wallets
            WHERE id = ANY($1)
            ORDER BY id ASC
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(repo_err)?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn wallet_balance(
        &mut self,
        wallet_id: WalletId,
        asset_type_id: AssetTypeId,
    ) -> Result<i64, AppError> {
        let tx = self.tx()?;

        let balance: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(
                CASE WHEN entry_type = 'CREDIT' THEN amount ELSE -amount END
            ), 0)::BIGINT
            FROM ledger_entries
            WHERE wallet_id = $1 AND asset_type_id = $2
            "#,
        )
        .bind(wallet_id.0)
        .bind(asset_type_id.0)
        .fetch_one(&mut **tx)
        .await
        .map_err(repo_err)?;

        Ok(balance)
    }

    async fn append_ledger_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), AppError> {
        let tx = self.tx()?;

        // Dos filas por posting; ambas dentro de la misma transacción.
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries (
                    id, transaction_id, wallet_id, asset_type_id, entry_type, amount, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.id.0)
            .bind(entry.transaction_id.0)
            .bind(entry.wallet_id.0)
            .bind(entry.asset_type_id.0)
            .bind(entry.entry_type)
            .bind(entry.amount)
            .bind(entry.created_at)
            .execute(&mut **tx)
            .await
            .map_err(repo_err)?;
        }

        Ok(())
    }

    async fn bump_wallet_version(
        &mut self,
        wallet_id: WalletId,
        expected_version: i64,
    ) -> Result<u64, AppError> {
        let tx = self.tx()?;

        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(wallet_id.0)
        .bind(expected_version)
        .execute(&mut **tx)
        .await
        .map_err(repo_err)?;

        Ok(result.rows_affected())
    }

    async fn finalize_transaction(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
        response_code: i32,
        response_body: &serde_json::Value,
        error_code: Option<String>,
    ) -> Result<(), AppError> {
        let tx = self.tx()?;

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1,
                response_code = $2,
                response_body = $3,
                error_code = $4,
                updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(status)
        .bind(response_code)
        .bind(response_body)
        .bind(error_code)
        .bind(id.0)
        .execute(&mut **tx)
        .await
        .map_err(repo_err)?;

        if result.rows_affected() == 0 {
            return Err(AppError::IdempotencyStateNotFound);
        }

        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AppError::Internal("database transaction already finished".to_string()))?;

        tx.commit().await.map_err(repo_err)
    }
}
