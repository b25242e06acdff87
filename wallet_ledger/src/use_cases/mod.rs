pub mod execute_mutation;
pub mod get_balance;
pub mod get_transaction_history;
pub mod wallet_lock;
