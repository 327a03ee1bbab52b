//! Status enums persisted as upper-case TEXT columns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value {value:?}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownStatus {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

status_enum!(
    /// Lifecycle of a tracked link visit.
    ClickStatus {
        Started => "STARTED",
        Qualified => "QUALIFIED",
        Expired => "EXPIRED",
    }
);

status_enum!(
    /// One-way qualification flag on a referral signup.
    QualificationStatus {
        Pending => "PENDING",
        Qualified => "QUALIFIED",
    }
);

status_enum!(
    /// Which qualifying event produced a commission.
    SourceType {
        Signup => "SIGNUP",
        Listing => "LISTING",
        Click => "CLICK",
    }
);

status_enum!(
    CommissionStatus {
        Pending => "PENDING",
        Success => "SUCCESS",
        Failed => "FAILED",
    }
);

status_enum!(
    PeriodStatus {
        Open => "OPEN",
        Locked => "LOCKED",
    }
);

status_enum!(
    /// Admin workflow of a partner statement; strictly forward.
    StatementStatus {
        Draft => "DRAFT",
        Approved => "APPROVED",
        Paid => "PAID",
    }
);

impl StatementStatus {
    /// The only status reachable from `self`, if any.
    pub fn successor(&self) -> Option<StatementStatus> {
        match self {
            StatementStatus::Draft => Some(StatementStatus::Approved),
            StatementStatus::Approved => Some(StatementStatus::Paid),
            StatementStatus::Paid => None,
        }
    }
}

impl CommissionStatus {
    /// Whether the commission counts towards earnings.
    pub fn is_payable(&self) -> bool {
        !matches!(self, CommissionStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_roundtrip() {
        assert_eq!(ClickStatus::from_str("QUALIFIED").unwrap(), ClickStatus::Qualified);
        assert_eq!(SourceType::Listing.as_str(), "LISTING");
        assert_eq!(StatementStatus::Paid.to_string(), "PAID");
    }

    #[test]
    fn test_unknown_status_reports_kind() {
        let err = PeriodStatus::from_str("CLOSED").unwrap_err();
        assert_eq!(err.kind, "PeriodStatus");
        assert_eq!(err.value, "CLOSED");
    }

    #[test]
    fn test_statement_status_only_moves_forward() {
        assert_eq!(StatementStatus::Draft.successor(), Some(StatementStatus::Approved));
        assert_eq!(StatementStatus::Approved.successor(), Some(StatementStatus::Paid));
        assert_eq!(StatementStatus::Paid.successor(), None);
    }

    #[test]
    fn test_serde_uses_upper_case() {
        let json = serde_json::to_string(&CommissionStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }

    #[test]
    fn test_failed_commissions_are_not_payable() {
        assert!(CommissionStatus::Pending.is_payable());
        assert!(CommissionStatus::Success.is_payable());
        assert!(!CommissionStatus::Failed.is_payable());
    }
}
