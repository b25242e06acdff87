use std::sync::Arc;

use crate::domain::error::AppError;
use crate::domain::repository::{AssetBalance, LedgerRepository};
use crate::domain::types::UserId;

/// Caso de uso de consulta de balances por usuario.
///
/// El balance nunca se guarda como columna agregada: se deriva de los
/// asientos contables en una sola consulta agrupada.
#[derive(Clone)]
pub struct GetBalanceUseCase {
    repository: Arc<dyn LedgerRepository>,
}

impl GetBalanceUseCase {
    pub fn new(repository: Arc<dyn LedgerRepository>) -> Self {
        Self { repository }
    }

    /// Devuelve el balance por activo de todas las billeteras del usuario,
    /// opcionalmente filtrado por código de activo, ordenado por código
    /// ascendente.
    ///
    /// Falla con `USER_NOT_FOUND` si el usuario no existe y con
    /// `ASSET_WALLET_NOT_FOUND` si el filtro no matchea ninguna billetera.
    #[tracing::instrument(name = "GetBalanceUseCase::execute", skip(self))]
    pub async fn execute(
        &self,
        user_id: UserId,
        asset_code: Option<String>,
    ) -> Result<Vec<AssetBalance>, AppError> {
        self.repository
            .find_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;

        let filter = asset_code.map(|code| code.trim().to_uppercase());

        let balances = self
            .repository
            .user_asset_balances(user_id, filter.clone())
            .await?;

        if let Some(code) = filter {
            if balances.is_empty() {
                return Err(AppError::AssetWalletNotFound(code));
            }
        }

        Ok(balances)
    }
}
