//! Error types for pmm-bot.

use thiserror::Error;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] pmm_ledger::LedgerError),
}

/// Result type alias for application operations.
pub type AppResult<T> = std::result::Result<T, AppError>;
