//! Error types for the contract engine
//!
//! All fallible operations return `Result<T, Error>`.
//! Every variant names the contract element that was violated
//! (type, routine, block, field or clause) so failures can be diagnosed
//! without a debugger.

use std::fmt;

use thiserror::Error;

use crate::routine::BlockKind;
use crate::value::Value;

/// Contract failure taxonomy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// An invariant clause failed after a guarded operation, a direct
    /// write, a removal or initialization. State has already been rolled back.
    #[error("Invariant violation on {type_name} after {trigger}: {}", .clauses.join(", "))]
    InvariantViolation {
        type_name: String,
        trigger: Trigger,
        clauses: Vec<String>,
    },

    /// A require clause did not hold. Nothing was committed.
    #[error("Precondition violation in '{routine}': {}", .clauses.join(", "))]
    PreconditionViolation {
        routine: String,
        clauses: Vec<String>,
    },

    /// An ensure clause did not hold. The body has already committed.
    #[error("Postcondition violation in '{routine}': {}", .clauses.join(", "))]
    PostconditionViolation {
        routine: String,
        clauses: Vec<String>,
    },

    /// A block was entered out of order
    #[error("Ordering error in '{routine}': '{block}' block {message}")]
    OrderingError {
        routine: String,
        block: BlockKind,
        message: String,
    },

    /// The routine's block structure or result is inconsistent
    #[error("Structural error in '{routine}': {kind}")]
    StructuralError {
        routine: String,
        kind: StructuralKind,
    },

    /// The engine was used outside the situations it supports
    #[error("Usage error in '{routine}': {message}")]
    UsageError { routine: String, message: String },

    /// A host operation body reported its own failure
    #[error("Operation '{operation}' on {type_name} failed: {message}")]
    OperationFailed {
        type_name: String,
        operation: String,
        message: String,
    },
}

impl Error {
    pub(crate) fn usage(routine: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UsageError {
            routine: routine.into(),
            message: message.into(),
        }
    }

    pub(crate) fn structural(routine: impl Into<String>, kind: StructuralKind) -> Self {
        Error::StructuralError {
            routine: routine.into(),
            kind,
        }
    }

    /// Short machine-friendly name of the failure kind, used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvariantViolation { .. } => "invariant_violation",
            Error::PreconditionViolation { .. } => "precondition_violation",
            Error::PostconditionViolation { .. } => "postcondition_violation",
            Error::OrderingError { .. } => "ordering_error",
            Error::StructuralError { .. } => "structural_error",
            Error::UsageError { .. } => "usage_error",
            Error::OperationFailed { .. } => "operation_failed",
        }
    }

    /// True for the three assertion failures (invariant, require, ensure)
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation { .. }
                | Error::PreconditionViolation { .. }
                | Error::PostconditionViolation { .. }
        )
    }
}

/// What caused an invariant check
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Initialization,
    Operation(String),
    Assignment(String),
    Removal(String),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Trigger::Initialization => write!(f, "initialization"),
            Trigger::Operation(name) => write!(f, "operation '{}'", name),
            Trigger::Assignment(field) => write!(f, "assignment to '{}'", field),
            Trigger::Removal(field) => write!(f, "removal of '{}'", field),
        }
    }
}

/// Kinds of structural failure detected at body exit or call exit
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralKind {
    /// No body block ran during the call
    MissingBody,
    /// The body block finished without binding `result`
    MissingResult,
    /// A block kind was used more than once
    DuplicateBlock(BlockKind),
    /// The routine returned something other than what the body committed
    ResultMismatch { committed: Value, returned: Value },
}

impl fmt::Display for StructuralKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StructuralKind::MissingBody => write!(f, "Body block is not defined"),
            StructuralKind::MissingResult => {
                write!(f, "body block finished without binding 'result'")
            }
            StructuralKind::DuplicateBlock(block) => write!(f, "duplicate '{}' block", block),
            StructuralKind::ResultMismatch {
                committed,
                returned,
            } => write!(
                f,
                "result mismatch: body committed {} but routine returned {}",
                committed, returned
            ),
        }
    }
}

/// Result type alias for contract operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_violation_display_lists_clauses() {
        let err = Error::InvariantViolation {
            type_name: "Pair".into(),
            trigger: Trigger::Operation("shift".into()),
            clauses: vec!["a >= 0".into(), "b >= 0".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Pair"));
        assert!(msg.contains("operation 'shift'"));
        assert!(msg.contains("a >= 0, b >= 0"));
    }

    #[test]
    fn test_structural_missing_body_message() {
        let err = Error::structural("add", StructuralKind::MissingBody);
        assert_eq!(
            err.to_string(),
            "Structural error in 'add': Body block is not defined"
        );
    }

    #[test]
    fn test_ordering_error_names_block() {
        let err = Error::OrderingError {
            routine: "f".into(),
            block: BlockKind::Ensure,
            message: "entered before body".into(),
        };
        assert!(err.to_string().contains("'ensure' block"));
    }

    #[test]
    fn test_kind_and_classification() {
        let usage = Error::usage("old", "no active call");
        assert_eq!(usage.kind(), "usage_error");
        assert!(!usage.is_contract_violation());

        let pre = Error::PreconditionViolation {
            routine: "divide".into(),
            clauses: vec!["divisor != 0".into()],
        };
        assert!(pre.is_contract_violation());
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(Trigger::Initialization.to_string(), "initialization");
        assert_eq!(
            Trigger::Assignment("x".into()).to_string(),
            "assignment to 'x'"
        );
        assert_eq!(Trigger::Removal("x".into()).to_string(), "removal of 'x'");
    }
}
