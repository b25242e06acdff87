use std::sync::Arc;

use crate::domain::entities::Transaction;
use crate::domain::error::AppError;
use crate::domain::repository::LedgerRepository;
use crate::domain::types::UserId;

/// Máximo de transacciones retornadas por consulta de historial.
const HISTORY_LIMIT: i64 = 50;

/// Caso de uso de historial: transacciones que tocan cualquier billetera del
/// usuario, las más recientes primero.
#[derive(Clone)]
pub struct GetTransactionHistoryUseCase {
    repository: Arc<dyn LedgerRepository>,
}

impl GetTransactionHistoryUseCase {
    pub fn new(repository: Arc<dyn LedgerRepository>) -> Self {
        Self { repository }
    }

    #[tracing::instrument(name = "GetTransactionHistoryUseCase::execute", skip(self))]
    pub async fn execute(&self, user_id: UserId) -> Result<Vec<Transaction>, AppError> {
        self.repository
            .find_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;

        self.repository
            .find_transactions_for_user(user_id, HISTORY_LIMIT)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{AssetType, TransactionType, User, Wallet};
    use crate::domain::repository::{AssetBalance, LedgerUnitOfWork};
    use crate::domain::types::{AssetTypeId, WalletId};
    use async_trait::async_trait;
    use chrono::Utc;
    use mockall::mock;

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

    #[tokio::test]
    async fn test_history_for_existing_user() {
        let user_id = UserId::new();
        let mut repo = MockLedgerRepositoryImpl::new();

        repo.expect_find_user().returning(move |id| {
            Ok(Some(User {
                id,
                email: "alice@example.com".to_string(),
                created_at: Utc::now(),
            }))
        });
        repo.expect_find_transactions_for_user()
            .withf(|_, limit| *limit == 50)
            .times(1)
            .returning(|_, _| {
                let tx = Transaction::processing(
                    "key-1".to_string(),
                    "ab".repeat(32),
                    TransactionType::TOPUP,
                    100,
                    AssetTypeId::new(),
                    WalletId::new(),
                    WalletId::new(),
                )
                .unwrap();
                Ok(vec![tx])
            });

        let use_case = GetTransactionHistoryUseCase::new(Arc::new(repo));

        let history = use_case.execute(user_id).await.unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, 100);
    }

    #[tokio::test]
    async fn test_unknown_user_is_404() {
        let user_id = UserId::new();
        let mut repo = MockLedgerRepositoryImpl::new();
        repo.expect_find_user().returning(|_| Ok(None));

        let use_case = GetTransactionHistoryUseCase::new(Arc::new(repo));

        let err = use_case.execute(user_id).await.unwrap_err();
        assert!(matches!(err, AppError::UserNotFound(_)));
    }
}
