use crate::domain::error::AppError;
use crate::domain::types::WalletId;

/// Prefijo de las claves de lock distribuido por billetera.
const WALLET_LOCK_KEY_PREFIX: &str = "lock:wallet:";

/// Deduplica y ordena ascendentemente un conjunto de billeteras.
///
/// Este orden es el orden canónico de adquisición de locks en todo el
/// sistema: tanto el lock distribuido como el `SELECT ... FOR UPDATE` lo
/// siguen. Que todos los lockers coincidan en él es la única propiedad que
/// evita deadlocks entre mutaciones con billeteras solapadas.
pub fn sort_unique_wallet_ids(wallet_ids: &[WalletId]) -> Vec<WalletId> {
    let mut ids = wallet_ids.to_vec();
    ids.sort();
    ids.dedup();
    ids
}

/// Claves de lock distribuido (`lock:wallet:{id}`) en el orden canónico.
pub fn wallet_lock_keys(wallet_ids: &[WalletId]) -> Vec<String> {
    sort_unique_wallet_ids(wallet_ids)
        .iter()
        .map(|id| format!("{}{}", WALLET_LOCK_KEY_PREFIX, id))
        .collect()
}

/// Verifica los resultados del bump condicional de versiones.
///
/// Cada tupla es `(wallet_id, filas_afectadas)`. Cualquier resultado distinto
/// de 1 significa que otra transacción modificó la billetera entre el
/// row-lock y el UPDATE, y la mutación completa debe abortar.
pub fn assert_optimistic_updates(results: &[(WalletId, u64)]) -> Result<(), AppError> {
    for (wallet_id, updated_count) in results {
        if *updated_count != 1 {
            return Err(AppError::OptimisticLockConflict(*wallet_id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn wallet(id: &str) -> WalletId {
        WalletId(Uuid::parse_str(id).unwrap())
    }

    #[test]
    fn test_sort_unique_orders_ascending_and_dedups() {
        let high = wallet("ffffffff-0000-0000-0000-000000000001");
        let low = wallet("00000000-0000-0000-0000-000000000001");
        let mid = wallet("88888888-0000-0000-0000-000000000001");

        let sorted = sort_unique_wallet_ids(&[high, low, mid, low, high]);

        assert_eq!(sorted, vec![low, mid, high]);
    }

    #[test]
    fn test_sort_unique_matches_lexicographic_text_order() {
        // El orden por bytes del UUID debe coincidir con el orden por code
        // point de su forma textual canónica, que es el contrato del lock.
        let a = wallet("0a1b2c3d-1111-2222-3333-444455556666");
        let b = wallet("9f8e7d6c-1111-2222-3333-444455556666");
        let c = wallet("fedcba98-1111-2222-3333-444455556666");

        let sorted = sort_unique_wallet_ids(&[c, a, b]);
        let mut by_text = vec![c, a, b];
        by_text.sort_by_key(|w| w.to_string());

        assert_eq!(sorted, by_text);
    }

    #[test]
    fn test_wallet_lock_keys_format_and_order() {
        let low = wallet("00000000-0000-0000-0000-000000000001");
        let high = wallet("ffffffff-0000-0000-0000-000000000001");

        let keys = wallet_lock_keys(&[high, low]);

        assert_eq!(
            keys,
            vec![
                format!("lock:wallet:{}", low),
                format!("lock:wallet:{}", high),
            ]
        );
    }

    #[test]
    fn test_wallet_lock_keys_empty_input() {
        assert!(wallet_lock_keys(&[]).is_empty());
    }

    #[test]
    fn test_assert_optimistic_updates_accepts_all_ones() {
        let results = vec![(WalletId::new(), 1), (WalletId::new(), 1)];
        assert!(assert_optimistic_updates(&results).is_ok());
    }

    #[test]
    fn test_assert_optimistic_updates_names_offending_wallet() {
        let good = WalletId::new();
        let bad = WalletId::new();

        let err = assert_optimistic_updates(&[(good, 1), (bad, 0)]).unwrap_err();

        match err {
            AppError::OptimisticLockConflict(id) => assert_eq!(id, bad),
            other => panic!("Expected OptimisticLockConflict, got {:?}", other),
        }
    }
}
