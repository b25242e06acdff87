use serde_json::{json, Value};
use std::sync::Arc;

use crate::domain::concurrency::{assert_optimistic_updates, sort_unique_wallet_ids};
use crate::domain::entities::{
    AssetType, LedgerEntry, LedgerEntryType, Transaction, TransactionStatus, TransactionType,
    TREASURY_SYSTEM_CODE,
};
use crate::domain::error::AppError;
use crate::domain::gateways::{CachedResponse, IdempotencyCache};
use crate::domain::repository::{LedgerRepository, TransactionInsert};
use crate::domain::types::{UserId, WalletId};
use crate::use_cases::wallet_lock::WalletLockManager;

/// Operación de mutación solicitada por el cliente.
///
/// TOPUP y BONUS son indistinguibles a nivel contable; el `transaction_type`
/// discrimina únicamente para auditoría y reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Topup,
    Bonus,
    Spend,
}

impl MutationKind {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            MutationKind::Topup => TransactionType::TOPUP,
            MutationKind::Bonus => TransactionType::BONUS,
            MutationKind::Spend => TransactionType::SPEND,
        }
    }
}

/// Petición de mutación ya validada por la capa de transporte.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub user_id: UserId,
    pub asset_code: String,
    pub amount: i64,
    pub idempotency_key: String,
    pub request_fingerprint: String,
}

/// Resultado de una mutación: status y body listos para el wire.
///
/// Cubre tanto ejecuciones frescas como replays; `replayed` gobierna el
/// header `Idempotency-Replayed`.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub status_code: u16,
    pub body: Value,
    pub replayed: bool,
}

/// Caso de uso central: ejecuta topup / bonus / spend como postings atómicos
/// de doble entrada.
///
/// Orquesta el cache de idempotencia, el lock distribuido y la transacción de
/// base de datos. Las tres capas de control de concurrencia se apilan: lock
/// cruzado entre instancias, row-locks en orden determinístico y verificación
/// optimista de versiones.
pub struct ExecuteMutationUseCase {
    repository: Arc<dyn LedgerRepository>,
    cache: Arc<dyn IdempotencyCache>,
    lock_manager: WalletLockManager,
}

impl ExecuteMutationUseCase {
    pub fn new(
        repository: Arc<dyn LedgerRepository>,
        cache: Arc<dyn IdempotencyCache>,
        lock_manager: WalletLockManager,
    ) -> Self {
        Self {
            repository,
            cache,
            lock_manager,
        }
    }

    #[tracing::instrument(
        name = "ExecuteMutationUseCase::execute",
        skip(self, request),
        fields(idempotency_key = %request.idempotency_key)
    )]
    pub async fn execute(
        &self,
        kind: MutationKind,
        request: MutationRequest,
    ) -> Result<MutationOutcome, AppError> {
        // El transporte debió adjuntar clave de idempotencia y huella; si una
        // mutación llega al motor sin ellas, el front-end está mal cableado.
        if request.idempotency_key.trim().is_empty()
            || request.request_fingerprint.trim().is_empty()
        {
            return Err(AppError::IdempotencyContextMissing);
        }

        // 1. Fast replay vía cache. Esta verificación es solo consultiva: la
        // vía autoritativa de idempotencia es el insert contra el índice
        // único dentro de la transacción de base de datos (paso 4); un miss
        // aquí siempre cae a esa vía.
        if let Some(cached) = self.cache.get(&request.idempotency_key).await {
            if cached.fingerprint == request.request_fingerprint {
                return Ok(MutationOutcome {
                    status_code: cached.status_code,
                    body: cached.body,
                    replayed: true,
                });
            }
            return Err(AppError::IdempotencyKeyReused);
        }

        // 2. Resolución de contexto: activo, billetera del usuario y
        // contraparte de Tesorería.
        let asset_code = request.asset_code.trim().to_uppercase();
        let asset = self
            .repository
            .find_asset_type_by_code(&asset_code)
            .await?
            .ok_or_else(|| AppError::AssetTypeNotFound(asset_code.clone()))?;

        let user_wallet = self
            .repository
            .find_user_wallet(request.user_id, asset.id)
            .await?
            .ok_or_else(|| AppError::UserWalletNotFound {
                user_id: request.user_id,
                asset_code: asset_code.clone(),
            })?;

        // Una Tesorería ausente es un error de configuración, no del cliente.
        let treasury = self
            .repository
            .find_system_wallet(TREASURY_SYSTEM_CODE, asset.id)
            .await?
            .ok_or_else(|| AppError::TreasuryWalletNotConfigured(asset_code.clone()))?;

        let (source_wallet_id, destination_wallet_id) = match kind {
            MutationKind::Topup | MutationKind::Bonus => (treasury.id, user_wallet.id),
            MutationKind::Spend => (user_wallet.id, treasury.id),
        };

        // 3. Lock cruzado entre instancias sobre el conjunto ordenado.
        let guard = self
            .lock_manager
            .acquire(&[source_wallet_id, destination_wallet_id])
            .await?;

        // 4. Transacción de base de datos.
        let result = self
            .run_posting(
                kind,
                &request,
                &asset,
                user_wallet.id,
                source_wallet_id,
                destination_wallet_id,
            )
            .await;

        // 5. Write-through best-effort, estrictamente después del commit.
        if let Ok(outcome) = &result {
            self.cache
                .set(
                    &request.idempotency_key,
                    &CachedResponse {
                        fingerprint: request.request_fingerprint.clone(),
                        status_code: outcome.status_code,
                        body: outcome.body.clone(),
                    },
                )
                .await;
        }

        // 6. Liberación incondicional del lock distribuido.
        guard.release().await;

        result
    }

    /// Pasos 4a–4g del pipeline, dentro de una única transacción de base de
    /// datos. Cualquier error suelta la unidad de trabajo sin commit y todo
    /// lo escrito (incluido el registro PROCESSING) se revierte.
    async fn run_posting(
        &self,
        kind: MutationKind,
        request: &MutationRequest,
        asset: &AssetType,
        user_wallet_id: WalletId,
        source_wallet_id: WalletId,
        destination_wallet_id: WalletId,
    ) -> Result<MutationOutcome, AppError> {
        let mut uow = self.repository.begin().await?;

        // 4a. Insert-or-replay sobre el índice único de idempotencia.
        let transaction = Transaction::processing(
            request.idempotency_key.clone(),
            request.request_fingerprint.clone(),
            kind.transaction_type(),
            request.amount,
            asset.id,
            source_wallet_id,
            destination_wallet_id,
        )?;

        match uow.insert_processing_transaction(&transaction).await? {
            TransactionInsert::Inserted => {}
            TransactionInsert::DuplicateKey => {
                let existing = uow
                    .find_by_idempotency_key(&request.idempotency_key)
                    .await?
                    .ok_or(AppError::IdempotencyStateNotFound)?;

                if existing.request_fingerprint != request.request_fingerprint {
                    return Err(AppError::IdempotencyKeyReused);
                }

                return match (existing.response_code, existing.response_body) {
                    (Some(code), Some(body)) => Ok(MutationOutcome {
                        status_code: u16::try_from(code).unwrap_or(500),
                        body,
                        replayed: true,
                    }),
                    // Registro PROCESSING dejado por un handler todavía en
                    // vuelo (o muerto): el cliente debe reintentar más tarde.
                    _ => Err(AppError::RequestAlreadyInProgress),
                };
            }
        }

        // 4b. Row-lock de ambas billeteras en orden canónico.
        let ordered_ids = sort_unique_wallet_ids(&[source_wallet_id, destination_wallet_id]);
        let locked = uow.lock_wallets(&ordered_ids).await?;
        if locked.len() != ordered_ids.len() {
            return Err(AppError::LockedWalletMismatch {
                expected: ordered_ids.len(),
                actual: locked.len(),
            });
        }

        // 4c. Chequeo de fondos sobre el balance derivado del origen. El
        // fallo es terminal: se persiste como FAILED para que los replays
        // devuelvan el mismo 409, y no se escribe ningún asiento.
        let source_balance = uow.wallet_balance(source_wallet_id, asset.id).await?;
        if source_balance < request.amount {
            let failure = AppError::InsufficientFunds {
                wallet_id: source_wallet_id,
                required: request.amount,
                available: source_balance,
            };
            let body = failure.to_error_body();

            uow.finalize_transaction(
                transaction.id,
                TransactionStatus::FAILED,
                409,
                &body,
                Some(failure.code().to_string()),
            )
            .await?;
            uow.commit().await?;

            return Ok(MutationOutcome {
                status_code: 409,
                body,
                replayed: false,
            });
        }

        // 4d. Posting de doble entrada: exactamente un DEBIT y un CREDIT de
        // igual magnitud sobre el mismo activo.
        let entries = [
            LedgerEntry::new(
                transaction.id,
                source_wallet_id,
                asset.id,
                LedgerEntryType::DEBIT,
                request.amount,
            ),
            LedgerEntry::new(
                transaction.id,
                destination_wallet_id,
                asset.id,
                LedgerEntryType::CREDIT,
                request.amount,
            ),
        ];
        uow.append_ledger_entries(&entries).await?;

        // 4e. Bump condicional de versión por billetera bloqueada.
        let mut update_results = Vec::with_capacity(locked.len());
        for wallet in &locked {
            let updated = uow.bump_wallet_version(wallet.id, wallet.version).await?;
            update_results.push((wallet.id, updated));
        }
        assert_optimistic_updates(&update_results)?;

        // 4f. Componemos el payload de éxito con el balance ya posteado de
        // la billetera del usuario y lo persistimos como POSTED.
        let user_balance = uow.wallet_balance(user_wallet_id, asset.id).await?;
        let body = success_body(&transaction, request.user_id, &asset.code, user_balance);

        uow.finalize_transaction(transaction.id, TransactionStatus::POSTED, 200, &body, None)
            .await?;

        // 4g. Punto de linearización.
        uow.commit().await?;

        Ok(MutationOutcome {
            status_code: 200,
            body,
            replayed: false,
        })
    }
}

/// Payload de éxito de una mutación. Montos y balances viajan como strings
/// decimales para preservar enteros de precisión arbitraria entre
/// ecosistemas.
fn success_body(
    transaction: &Transaction,
    user_id: UserId,
    asset_code: &str,
    balance: i64,
) -> Value {
    json!({
        "transactionId": transaction.id.to_string(),
        "idempotencyKey": transaction.idempotency_key,
        "operation": transaction.transaction_type.operation_name(),
        "userId": user_id.to_string(),
        "assetCode": asset_code,
        "amount": transaction.amount.to_string(),
        "balance": balance.to_string(),
        "fromWalletId": transaction.source_wallet_id.to_string(),
        "toWalletId": transaction.destination_wallet_id.to_string(),
        "createdAt": transaction.created_at.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{User, Wallet, WalletOwnerType};
    use crate::domain::gateways::LockClient;
    use crate::domain::repository::{
        AssetBalance, LedgerUnitOfWork, LockedWallet, TransactionInsert,
    };
    use crate::domain::types::{AssetTypeId, TransactionId};
    use crate::use_cases::wallet_lock::WalletLockConfig;
    use async_trait::async_trait;
    use chrono::Utc;
    use mockall::mock;
    use std::collections::HashMap;
    use std::sync::Mutex;

    mock! {
        pub LedgerRepositoryImpl {}

        #[async_trait]
        impl LedgerRepository for LedgerRepositoryImpl {
            async fn find_user(&self, id: UserId) -> Result<Option<User>, AppError>;
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
            async fn user_asset_balances(
                &self,
                user_id: UserId,
                asset_code: Option<String>,
            ) -> Result<Vec<AssetBalance>, AppError>;
            async fn find_transactions_for_user(
                &self,
                user_id: UserId,
                limit: i64,
            ) -> Result<Vec<Transaction>, AppError>;
            async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, AppError>;
        }
    }

    mock! {
        pub LedgerUnitOfWorkImpl {}

        #[async_trait]
        impl LedgerUnitOfWork for LedgerUnitOfWorkImpl {
            async fn insert_processing_transaction(
                &mut self,
                transaction: &Transaction,
            ) -> Result<TransactionInsert, AppError>;
            async fn find_by_idempotency_key(
                &mut self,
                idempotency_key: &str,
            ) -> Result<Option<Transaction>, AppError>;
            async fn lock_wallets(
                &mut self,
                wallet_ids: &[WalletId],
            ) -> Result<Vec<LockedWallet>, AppError>;
            async fn wallet_balance(
                &mut self,
                wallet_id: WalletId,
                asset_type_id: AssetTypeId,
            ) -> Result<i64, AppError>;
            async fn append_ledger_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), AppError>;
            async fn bump_wallet_version(
                &mut self,
                wallet_id: WalletId,
                expected_version: i64,
            ) -> Result<u64, AppError>;
            async fn finalize_transaction(
                &mut self,
                id: TransactionId,
                status: TransactionStatus,
                response_code: i32,
                response_body: &serde_json::Value,
                error_code: Option<String>,
            ) -> Result<(), AppError>;
            async fn commit(&mut self) -> Result<(), AppError>;
        }
    }

    mock! {
        pub IdempotencyCacheImpl {}

        #[async_trait]
        impl IdempotencyCache for IdempotencyCacheImpl {
            async fn get(&self, idempotency_key: &str) -> Option<CachedResponse>;
            async fn set(&self, idempotency_key: &str, response: &CachedResponse);
        }
    }

    /// Fake en memoria del cliente de locks (solo SET NX PX + DEL condicional).
    #[derive(Default)]
    struct InMemoryLockClient {
        entries: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl LockClient for InMemoryLockClient {
        async fn try_acquire(&self, key: &str, token: &str, _ttl_ms: u64) -> Result<bool, AppError> {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(key.to_string(), token.to_string());
            Ok(true)
        }

        async fn release_if_held(&self, key: &str, token: &str) -> Result<bool, AppError> {
            let mut entries = self.entries.lock().unwrap();
            if entries.get(key).map(String::as_str) == Some(token) {
                entries.remove(key);
                return Ok(true);
            }
            Ok(false)
        }
    }

    struct Fixture {
        asset: AssetType,
        user_id: UserId,
        user_wallet: Wallet,
        treasury: Wallet,
        request: MutationRequest,
    }

    fn fixture(amount: i64) -> Fixture {
        let asset = AssetType {
            id: AssetTypeId::new(),
            code: "GOLD_COINS".to_string(),
            name: "Gold Coins".to_string(),
            created_at: Utc::now(),
        };
        let user_id = UserId::new();
        let now = Utc::now();
        let user_wallet = Wallet {
            id: WalletId::new(),
            owner_type: WalletOwnerType::USER,
            user_id: Some(user_id),
            system_code: None,
            asset_type_id: asset.id,
            version: 3,
            created_at: now,
            updated_at: now,
        };
        let treasury = Wallet {
            id: WalletId::new(),
            owner_type: WalletOwnerType::SYSTEM,
            user_id: None,
            system_code: Some(TREASURY_SYSTEM_CODE.to_string()),
            asset_type_id: asset.id,
            version: 17,
            created_at: now,
            updated_at: now,
        };
        let request = MutationRequest {
            user_id,
            asset_code: "gold_coins".to_string(),
            amount,
            idempotency_key: "idem-key-1".to_string(),
            request_fingerprint: "ab".repeat(32),
        };

        Fixture {
            asset,
            user_id,
            user_wallet,
            treasury,
            request,
        }
    }

    fn lock_manager() -> WalletLockManager {
        WalletLockManager::new(
            Arc::new(InMemoryLockClient::default()),
            WalletLockConfig {
                ttl_ms: 5_000,
                retry_count: 3,
                retry_delay_ms: 1,
            },
        )
    }

    /// Mock del repositorio con la resolución de contexto ya configurada.
    fn repo_with_context(fx: &Fixture) -> MockLedgerRepositoryImpl {
        let mut repo = MockLedgerRepositoryImpl::new();
        let asset = fx.asset.clone();
        let user_wallet = fx.user_wallet.clone();
        let treasury = fx.treasury.clone();

        repo.expect_find_asset_type_by_code()
            .withf(|code| code == "GOLD_COINS")
            .returning(move |_| Ok(Some(asset.clone())));
        repo.expect_find_user_wallet()
            .returning(move |_, _| Ok(Some(user_wallet.clone())));
        repo.expect_find_system_wallet()
            .withf(|code, _| code == TREASURY_SYSTEM_CODE)
            .returning(move |_, _| Ok(Some(treasury.clone())));

        repo
    }

    fn cache_with_miss() -> MockIdempotencyCacheImpl {
        let mut cache = MockIdempotencyCacheImpl::new();
        cache.expect_get().returning(|_| None);
        cache
    }

    #[tokio::test]
    async fn test_topup_posts_double_entry_and_returns_success_payload() {
        // Arrange
        let fx = fixture(100);
        let mut repo = repo_with_context(&fx);
        let mut cache = cache_with_miss();

        let treasury_id = fx.treasury.id;
        let user_wallet_id = fx.user_wallet.id;
        let asset_id = fx.asset.id;
        let ordered = sort_unique_wallet_ids(&[treasury_id, user_wallet_id]);

        let mut uow = MockLedgerUnitOfWorkImpl::new();
        uow.expect_insert_processing_transaction()
            .withf(move |tx| {
                tx.status == TransactionStatus::PROCESSING
                    && tx.transaction_type == TransactionType::TOPUP
                    && tx.amount == 100
                    && tx.source_wallet_id == treasury_id
                    && tx.destination_wallet_id == user_wallet_id
            })
            .times(1)
            .returning(|_| Ok(TransactionInsert::Inserted));

        let treasury_version = fx.treasury.version;
        let user_version = fx.user_wallet.version;
        let expected_order = ordered.clone();
        uow.expect_lock_wallets()
            .withf(move |ids| ids == expected_order.as_slice())
            .times(1)
            .returning(move |ids| {
                Ok(ids
                    .iter()
                    .map(|id| LockedWallet {
                        id: *id,
                        version: if *id == treasury_id {
                            treasury_version
                        } else {
                            user_version
                        },
                    })
                    .collect())
            });

        // Primero el balance del origen (Tesorería), luego el del usuario ya
        // posteado.
        uow.expect_wallet_balance()
            .times(2)
            .returning(move |wallet_id, _| {
                if wallet_id == treasury_id {
                    Ok(1_000_000)
                } else {
                    Ok(1_100)
                }
            });

        uow.expect_append_ledger_entries()
            .withf(move |entries| {
                entries.len() == 2
                    && entries[0].entry_type == LedgerEntryType::DEBIT
                    && entries[0].wallet_id == treasury_id
                    && entries[1].entry_type == LedgerEntryType::CREDIT
                    && entries[1].wallet_id == user_wallet_id
                    && entries.iter().all(|e| e.amount == 100 && e.asset_type_id == asset_id)
            })
            .times(1)
            .returning(|_| Ok(()));

        uow.expect_bump_wallet_version()
            .times(2)
            .returning(|_, _| Ok(1));

        uow.expect_finalize_transaction()
            .withf(|_, status, code, body, error_code| {
                *status == TransactionStatus::POSTED
                    && *code == 200
                    && body["operation"] == "topup"
                    && error_code.is_none()
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        uow.expect_commit().times(1).returning(|| Ok(()));

        let boxed: Box<dyn LedgerUnitOfWork> = Box::new(uow);
        repo.expect_begin().return_once(move || Ok(boxed));

        cache
            .expect_set()
            .withf(|key, cached| key == "idem-key-1" && cached.status_code == 200)
            .times(1)
            .returning(|_, _| ());

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        // Act
        let outcome = use_case
            .execute(MutationKind::Topup, fx.request.clone())
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome.status_code, 200);
        assert!(!outcome.replayed);
        assert_eq!(outcome.body["operation"], "topup");
        assert_eq!(outcome.body["assetCode"], "GOLD_COINS");
        assert_eq!(outcome.body["amount"], "100");
        assert_eq!(outcome.body["balance"], "1100");
        assert_eq!(outcome.body["userId"], fx.user_id.to_string());
        assert_eq!(outcome.body["fromWalletId"], treasury_id.to_string());
        assert_eq!(outcome.body["toWalletId"], user_wallet_id.to_string());
    }

    #[tokio::test]
    async fn test_spend_debits_user_wallet() {
        let fx = fixture(50);
        let mut repo = repo_with_context(&fx);
        let mut cache = cache_with_miss();

        let treasury_id = fx.treasury.id;
        let user_wallet_id = fx.user_wallet.id;

        let mut uow = MockLedgerUnitOfWorkImpl::new();
        uow.expect_insert_processing_transaction()
            .withf(move |tx| {
                tx.transaction_type == TransactionType::SPEND
                    && tx.source_wallet_id == user_wallet_id
                    && tx.destination_wallet_id == treasury_id
            })
            .returning(|_| Ok(TransactionInsert::Inserted));
        uow.expect_lock_wallets().returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| LockedWallet { id: *id, version: 1 })
                .collect())
        });
        uow.expect_wallet_balance()
            .times(2)
            .returning(move |wallet_id, _| {
                // Chequeo de fondos y balance final posteado, ambos sobre la
                // billetera del usuario.
                if wallet_id == user_wallet_id {
                    Ok(950)
                } else {
                    Ok(0)
                }
            });
        uow.expect_append_ledger_entries()
            .withf(move |entries| {
                entries[0].wallet_id == user_wallet_id
                    && entries[0].entry_type == LedgerEntryType::DEBIT
                    && entries[1].wallet_id == treasury_id
                    && entries[1].entry_type == LedgerEntryType::CREDIT
            })
            .returning(|_| Ok(()));
        uow.expect_bump_wallet_version().returning(|_, _| Ok(1));
        uow.expect_finalize_transaction()
            .withf(|_, status, code, _, _| *status == TransactionStatus::POSTED && *code == 200)
            .returning(|_, _, _, _, _| Ok(()));
        uow.expect_commit().times(1).returning(|| Ok(()));

        let boxed: Box<dyn LedgerUnitOfWork> = Box::new(uow);
        repo.expect_begin().return_once(move || Ok(boxed));
        cache.expect_set().returning(|_, _| ());

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let outcome = use_case
            .execute(MutationKind::Spend, fx.request.clone())
            .await
            .unwrap();

        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.body["operation"], "spend");
        assert_eq!(outcome.body["fromWalletId"], user_wallet_id.to_string());
    }

    #[tokio::test]
    async fn test_insufficient_funds_persists_failed_and_writes_no_entries() {
        let fx = fixture(500);
        let mut repo = repo_with_context(&fx);
        let mut cache = cache_with_miss();

        let user_wallet_id = fx.user_wallet.id;

        let mut uow = MockLedgerUnitOfWorkImpl::new();
        uow.expect_insert_processing_transaction()
            .returning(|_| Ok(TransactionInsert::Inserted));
        uow.expect_lock_wallets().returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| LockedWallet { id: *id, version: 1 })
                .collect())
        });
        // SPEND: el origen es la billetera del usuario, con fondos cortos.
        uow.expect_wallet_balance()
            .withf(move |wallet_id, _| *wallet_id == user_wallet_id)
            .times(1)
            .returning(|_, _| Ok(40));
        uow.expect_finalize_transaction()
            .withf(|_, status, code, body, error_code| {
                *status == TransactionStatus::FAILED
                    && *code == 409
                    && body["error"]["code"] == "INSUFFICIENT_FUNDS"
                    && error_code.as_deref() == Some("INSUFFICIENT_FUNDS")
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        uow.expect_commit().times(1).returning(|| Ok(()));
        // Sin expectativas de append_ledger_entries ni bump_wallet_version:
        // cualquier llamada haría fallar el test.

        let boxed: Box<dyn LedgerUnitOfWork> = Box::new(uow);
        repo.expect_begin().return_once(move || Ok(boxed));

        cache
            .expect_set()
            .withf(|_, cached| cached.status_code == 409)
            .times(1)
            .returning(|_, _| ());

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let outcome = use_case
            .execute(MutationKind::Spend, fx.request.clone())
            .await
            .unwrap();

        assert_eq!(outcome.status_code, 409);
        assert!(!outcome.replayed);
        assert_eq!(outcome.body["error"]["code"], "INSUFFICIENT_FUNDS");
        assert_eq!(outcome.body["error"]["details"]["available"], "40");
        assert_eq!(outcome.body["error"]["details"]["required"], "500");
    }

    #[tokio::test]
    async fn test_cache_hit_with_matching_fingerprint_replays() {
        let fx = fixture(100);
        let fingerprint = fx.request.request_fingerprint.clone();

        let mut cache = MockIdempotencyCacheImpl::new();
        cache.expect_get().times(1).returning(move |_| {
            Some(CachedResponse {
                fingerprint: fingerprint.clone(),
                status_code: 200,
                body: json!({"transactionId": "t-1"}),
            })
        });

        // El repositorio no debe ser tocado en absoluto.
        let repo = MockLedgerRepositoryImpl::new();

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let outcome = use_case
            .execute(MutationKind::Topup, fx.request.clone())
            .await
            .unwrap();

        assert!(outcome.replayed);
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.body["transactionId"], "t-1");
    }

    #[tokio::test]
    async fn test_cache_hit_with_different_fingerprint_conflicts() {
        let fx = fixture(100);

        let mut cache = MockIdempotencyCacheImpl::new();
        cache.expect_get().returning(|_| {
            Some(CachedResponse {
                fingerprint: "cd".repeat(32),
                status_code: 200,
                body: json!({}),
            })
        });

        let use_case = ExecuteMutationUseCase::new(
            Arc::new(MockLedgerRepositoryImpl::new()),
            Arc::new(cache),
            lock_manager(),
        );

        let err = use_case
            .execute(MutationKind::Topup, fx.request.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::IdempotencyKeyReused));
        assert_eq!(err.http_status(), 409);
    }

    fn existing_transaction(fx: &Fixture, response: Option<(i32, Value)>) -> Transaction {
        let mut tx = Transaction::processing(
            fx.request.idempotency_key.clone(),
            fx.request.request_fingerprint.clone(),
            TransactionType::TOPUP,
            fx.request.amount,
            fx.asset.id,
            fx.treasury.id,
            fx.user_wallet.id,
        )
        .unwrap();

        if let Some((code, body)) = response {
            tx.status = if code == 200 {
                TransactionStatus::POSTED
            } else {
                TransactionStatus::FAILED
            };
            tx.response_code = Some(code);
            tx.response_body = Some(body);
        }
        tx
    }

    #[tokio::test]
    async fn test_duplicate_key_with_posted_row_replays_stored_response() {
        let fx = fixture(100);
        let mut repo = repo_with_context(&fx);
        let mut cache = cache_with_miss();

        let existing = existing_transaction(&fx, Some((200, json!({"balance": "1100"}))));

        let mut uow = MockLedgerUnitOfWorkImpl::new();
        uow.expect_insert_processing_transaction()
            .returning(|_| Ok(TransactionInsert::DuplicateKey));
        uow.expect_find_by_idempotency_key()
            .withf(|key| key == "idem-key-1")
            .times(1)
            .returning(move |_| Ok(Some(existing.clone())));
        // Sin commit: la vía de replay es de solo lectura y el rollback del
        // drop es inocuo.

        let boxed: Box<dyn LedgerUnitOfWork> = Box::new(uow);
        repo.expect_begin().return_once(move || Ok(boxed));

        // El replay autoritativo también calienta el cache.
        cache
            .expect_set()
            .withf(|_, cached| cached.status_code == 200)
            .times(1)
            .returning(|_, _| ());

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let outcome = use_case
            .execute(MutationKind::Topup, fx.request.clone())
            .await
            .unwrap();

        assert!(outcome.replayed);
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.body["balance"], "1100");
    }

    #[tokio::test]
    async fn test_duplicate_key_still_processing_conflicts() {
        let fx = fixture(100);
        let mut repo = repo_with_context(&fx);
        let cache = cache_with_miss();

        let existing = existing_transaction(&fx, None);

        let mut uow = MockLedgerUnitOfWorkImpl::new();
        uow.expect_insert_processing_transaction()
            .returning(|_| Ok(TransactionInsert::DuplicateKey));
        uow.expect_find_by_idempotency_key()
            .returning(move |_| Ok(Some(existing.clone())));

        let boxed: Box<dyn LedgerUnitOfWork> = Box::new(uow);
        repo.expect_begin().return_once(move || Ok(boxed));

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let err = use_case
            .execute(MutationKind::Topup, fx.request.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::RequestAlreadyInProgress));
        assert_eq!(err.code(), "REQUEST_ALREADY_IN_PROGRESS");
    }

    #[tokio::test]
    async fn test_duplicate_key_with_different_fingerprint_conflicts() {
        let fx = fixture(100);
        let mut repo = repo_with_context(&fx);
        let cache = cache_with_miss();

        let mut existing = existing_transaction(&fx, Some((200, json!({}))));
        existing.request_fingerprint = "cd".repeat(32);

        let mut uow = MockLedgerUnitOfWorkImpl::new();
        uow.expect_insert_processing_transaction()
            .returning(|_| Ok(TransactionInsert::DuplicateKey));
        uow.expect_find_by_idempotency_key()
            .returning(move |_| Ok(Some(existing.clone())));

        let boxed: Box<dyn LedgerUnitOfWork> = Box::new(uow);
        repo.expect_begin().return_once(move || Ok(boxed));

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let err = use_case
            .execute(MutationKind::Topup, fx.request.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::IdempotencyKeyReused));
    }

    #[tokio::test]
    async fn test_optimistic_conflict_rolls_back_whole_posting() {
        let fx = fixture(10);
        let mut repo = repo_with_context(&fx);
        let cache = cache_with_miss();

        let mut uow = MockLedgerUnitOfWorkImpl::new();
        uow.expect_insert_processing_transaction()
            .returning(|_| Ok(TransactionInsert::Inserted));
        uow.expect_lock_wallets().returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| LockedWallet { id: *id, version: 1 })
                .collect())
        });
        uow.expect_wallet_balance().returning(|_, _| Ok(1_000_000));
        uow.expect_append_ledger_entries().returning(|_| Ok(()));
        // La segunda billetera pierde la carrera de versión.
        let mut bump_calls = 0;
        uow.expect_bump_wallet_version()
            .times(2)
            .returning(move |_, _| {
                bump_calls += 1;
                Ok(if bump_calls == 1 { 1 } else { 0 })
            });
        // Sin finalize ni commit: el error debe abortar la transacción.

        let boxed: Box<dyn LedgerUnitOfWork> = Box::new(uow);
        repo.expect_begin().return_once(move || Ok(boxed));

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let err = use_case
            .execute(MutationKind::Topup, fx.request.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::OptimisticLockConflict(_)));
        assert_eq!(err.code(), "OPTIMISTIC_LOCK_CONFLICT");
    }

    #[tokio::test]
    async fn test_locked_wallet_count_mismatch_conflicts() {
        let fx = fixture(10);
        let mut repo = repo_with_context(&fx);
        let cache = cache_with_miss();

        let mut uow = MockLedgerUnitOfWorkImpl::new();
        uow.expect_insert_processing_transaction()
            .returning(|_| Ok(TransactionInsert::Inserted));
        uow.expect_lock_wallets().returning(|ids| {
            Ok(vec![LockedWallet {
                id: ids[0],
                version: 1,
            }])
        });

        let boxed: Box<dyn LedgerUnitOfWork> = Box::new(uow);
        repo.expect_begin().return_once(move || Ok(boxed));

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let err = use_case
            .execute(MutationKind::Topup, fx.request.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::LockedWalletMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unknown_asset_code_is_404() {
        let fx = fixture(10);
        let cache = cache_with_miss();

        let mut repo = MockLedgerRepositoryImpl::new();
        repo.expect_find_asset_type_by_code()
            .withf(|code| code == "UNKNOWN")
            .returning(|_| Ok(None));

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let mut request = fx.request.clone();
        request.asset_code = "unknown".to_string();

        let err = use_case
            .execute(MutationKind::Topup, request)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AssetTypeNotFound(_)));
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_missing_treasury_is_configuration_error() {
        let fx = fixture(10);
        let cache = cache_with_miss();

        let mut repo = MockLedgerRepositoryImpl::new();
        let asset = fx.asset.clone();
        let user_wallet = fx.user_wallet.clone();
        repo.expect_find_asset_type_by_code()
            .returning(move |_| Ok(Some(asset.clone())));
        repo.expect_find_user_wallet()
            .returning(move |_, _| Ok(Some(user_wallet.clone())));
        repo.expect_find_system_wallet().returning(|_, _| Ok(None));

        let use_case =
            ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), lock_manager());

        let err = use_case
            .execute(MutationKind::Bonus, fx.request.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::TreasuryWalletNotConfigured(_)));
        assert_eq!(err.http_status(), 500);
    }

    #[tokio::test]
    async fn test_missing_idempotency_context_is_configuration_error() {
        let fx = fixture(10);

        // Ni el cache ni el repositorio deben ser tocados.
        let use_case = ExecuteMutationUseCase::new(
            Arc::new(MockLedgerRepositoryImpl::new()),
            Arc::new(MockIdempotencyCacheImpl::new()),
            lock_manager(),
        );

        let mut request = fx.request.clone();
        request.idempotency_key = "   ".to_string();

        let err = use_case
            .execute(MutationKind::Topup, request)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::IdempotencyContextMissing));
        assert_eq!(err.code(), "IDEMPOTENCY_CONTEXT_MISSING");
        assert_eq!(err.http_status(), 500);

        let mut request = fx.request.clone();
        request.request_fingerprint = String::new();

        let err = use_case
            .execute(MutationKind::Topup, request)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::IdempotencyContextMissing));
    }

    #[tokio::test]
    async fn test_distributed_lock_unavailable_is_423() {
        let fx = fixture(10);
        let cache = cache_with_miss();
        let repo = repo_with_context(&fx);

        // Cliente que nunca concede un lock.
        struct DeniedLockClient;

        #[async_trait]
        impl LockClient for DeniedLockClient {
            async fn try_acquire(&self, _: &str, _: &str, _: u64) -> Result<bool, AppError> {
                Ok(false)
            }
            async fn release_if_held(&self, _: &str, _: &str) -> Result<bool, AppError> {
                Ok(false)
            }
        }

        let manager = WalletLockManager::new(
            Arc::new(DeniedLockClient),
            WalletLockConfig {
                ttl_ms: 5_000,
                retry_count: 2,
                retry_delay_ms: 1,
            },
        );

        let use_case = ExecuteMutationUseCase::new(Arc::new(repo), Arc::new(cache), manager);

        let err = use_case
            .execute(MutationKind::Topup, fx.request.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DistributedLockNotAcquired));
        assert_eq!(err.http_status(), 423);
    }
}
