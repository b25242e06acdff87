pub mod ledger_repository;
pub mod models;
