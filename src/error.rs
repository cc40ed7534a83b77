//! Error taxonomy for perk operations
//!
//! User-facing failures (`NotAManagedItem`, `InsufficientDraws`, ...) abort an
//! operation before anything is mutated. Store failures surface as
//! `StoreUnavailable`; malformed ledger or embedded records as
//! `InvalidPersistedFormat`.

use crate::catalog::CatalogError;
use crate::host::ActorId;
use crate::storage::repository::LedgerError;

pub type PerkResult<T> = Result<T, PerkError>;

#[derive(Debug, thiserror::Error)]
pub enum PerkError {
    #[error("No perks are configured")]
    CatalogEmpty,
    #[error("Item is not a managed tool")]
    NotAManagedItem,
    #[error("Not enough draws: have {have}, need {need}")]
    InsufficientDraws { have: i64, need: i64 },
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: f64, need: f64 },
    #[error("Draw count {requested} outside 1..={max}")]
    InvalidDrawCount { requested: u32, max: u32 },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("A roll is already in progress for {0}")]
    RollInProgress(ActorId),
    #[error("Tool has no perk")]
    NoPerkOnTool,
    #[error("Unknown perk: {0}")]
    UnknownPerk(String),
    #[error("Currency adjustment rejected by host")]
    CurrencyRejected,
    #[error("Invalid persisted record: {0}")]
    InvalidPersistedFormat(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] LedgerError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl From<LedgerError> for PerkError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InvalidFormat(msg) => PerkError::InvalidPersistedFormat(msg),
            LedgerError::Serialization(msg) => PerkError::InvalidPersistedFormat(msg),
            other => PerkError::StoreUnavailable(other),
        }
    }
}

impl PerkError {
    /// Failures reported to the player before any state changed
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            PerkError::NotAManagedItem
                | PerkError::InsufficientDraws { .. }
                | PerkError::InsufficientFunds { .. }
                | PerkError::InvalidDrawCount { .. }
                | PerkError::RollInProgress(_)
                | PerkError::NoPerkOnTool
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_mapping() {
        let err: PerkError = LedgerError::InvalidFormat("x:0".into()).into();
        assert!(matches!(err, PerkError::InvalidPersistedFormat(_)));

        let err: PerkError = LedgerError::Unavailable("offline".into()).into();
        assert!(matches!(err, PerkError::StoreUnavailable(_)));
        assert!(!err.is_user_facing());
    }

    #[test]
    fn test_messages() {
        let err = PerkError::InsufficientDraws { have: 1, need: 3 };
        assert_eq!(err.to_string(), "Not enough draws: have 1, need 3");
        assert!(err.is_user_facing());
    }
}
