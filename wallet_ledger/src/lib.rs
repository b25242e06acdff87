//! Wallet Ledger Service Library
//!
//! This library acts as the core of the closed-loop wallet service, exporting
//! the necessary modules for the application binaries and integration tests.
//!
//! # Modules
//!
//! * `api` - Contains the HTTP interface (routes, DTOs, error rendering).
//! * `config` - Contains the typed environment configuration.
//! * `domain` - Contains the domain entities, ledger invariants and ports.
//! * `infrastructure` - Contains the Postgres and Redis adapters.
//! * `use_cases` - Contains the application business logic and workflows.

pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod use_cases;
