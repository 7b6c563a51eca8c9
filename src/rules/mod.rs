//! Timecard business rules.
//!
//! Everything in here is pure: no database, no HTTP. Handlers load rows,
//! call into these functions and persist what comes back.

pub mod approval;
pub mod clock;
pub mod holiday;
pub mod mail;
pub mod overtime;
pub mod reconcile;
pub mod summary;
pub mod worktime;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RuleError {
    #[error("Clock-out must be after clock-in")]
    InvalidSpan,

    #[error("Work span exceeds 24 hours")]
    SpanTooLong,

    #[error("Rest intervals are invalid: {0}")]
    InvalidRestIntervals(String),

    #[error("Invalid month, expected YYYY-MM: {0}")]
    InvalidMonth(String),

    #[error("Cannot {action} while status is {status}")]
    InvalidTransition { action: String, status: String },

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("A reason is required for this edit")]
    ReasonRequired,

    #[error("Punch times are incomplete")]
    IncompletePunches,

    #[error("{0} overtime minutes are not covered by an approved overtime request")]
    UnapprovedOvertime(i64),

    #[error("Unknown placeholder in template: {0}")]
    UnknownPlaceholder(String),

    #[error("Malformed template: {0}")]
    MalformedTemplate(String),
}
