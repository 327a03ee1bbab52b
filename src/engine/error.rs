//! Error types for settlement operations.

use crate::directory::DirectoryError;
use crate::domain::{MoneyError, PayoutPeriod, UserId};
use serde::Serialize;
use thiserror::Error;

/// Record kind named in errors and sweep reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Statement,
    Commission,
    Period,
    Code,
    Click,
    Signup,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Entity::Statement => "statement",
            Entity::Commission => "commission",
            Entity::Period => "period",
            Entity::Code => "referral code",
            Entity::Click => "click",
            Entity::Signup => "signup",
        };
        f.write_str(name)
    }
}

/// Errors returned by the settlement engine.
///
/// `PeriodAlreadyLocked` and `AggregationAlreadyRun` never leave the public
/// operations; they are turned into successful no-ops there.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("vendor {vendor} is already attributed to code {code}")]
    DuplicateReferral { vendor: UserId, code: String },

    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: Entity,
        id: i64,
        from: String,
        to: String,
    },

    #[error("a payment reference is required")]
    MissingReference,

    #[error("period {} is already locked", .0.id)]
    PeriodAlreadyLocked(Box<PayoutPeriod>),

    #[error("period {0} has already been aggregated")]
    AggregationAlreadyRun(i64),

    #[error("period {0} is still open")]
    PeriodNotLocked(i64),

    #[error("referral code {0} does not exist")]
    CodeNotFound(String),

    #[error("referral code {0} is deactivated")]
    CodeInactive(String),

    #[error("partner {0} cannot refer their own vendor account")]
    SelfReferral(UserId),

    #[error("{entity} {key} not found")]
    NotFound { entity: Entity, key: String },

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl EngineError {
    pub(crate) fn not_found(entity: Entity, key: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub(crate) fn invalid_transition(
        entity: Entity,
        id: i64,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        EngineError::InvalidTransition {
            entity,
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
