//! Invariant guard: transactional enforcement around a contracted object
//!
//! [`ContractedObject`] is the proxy through which all reads, writes and
//! operation calls on a contracted instance go. [`Session`] is the handle an
//! operation body receives; every write it makes is journaled.
//!
//! # Guarded call
//!
//! 1. Disable direct-write checking and start an empty ledger
//! 2. Run the operation body through a [`Session`]
//! 3. Evaluate the invariant
//! 4. Success: drop the ledger, re-enable checking, return the result
//! 5. Failure (invariant or body error): replay the ledger newest-first,
//!    re-enable checking, return the error
//!
//! Direct writes made while checking is enabled are checked immediately and
//! only that single write is undone on failure.
//!
//! # Nested calls
//!
//! An operation calling another guarded operation on the same instance is
//! governed by [`Reentrancy`]: `Flatten` runs the nested body inside the outer
//! transaction, `Reject` refuses it with a usage error.

use std::rc::Rc;

use crate::class::ContractClass;
use crate::config::Reentrancy;
use crate::error::{Error, Result, Trigger};
use crate::ledger::RollbackLedger;
use crate::value::{ObjectState, Value};

/// An instance under invariant enforcement
pub struct ContractedObject {
    class: Rc<ContractClass>,
    state: ObjectState,
    /// False only while one of this object's guarded operations runs
    enforcing: bool,
    ledger: RollbackLedger,
    depth: usize,
}

impl ContractedObject {
    pub(crate) fn construct(class: Rc<ContractClass>, args: &[Value]) -> Result<Self> {
        let mut object = ContractedObject {
            class,
            state: ObjectState::new(),
            enforcing: false,
            ledger: RollbackLedger::new(),
            depth: 0,
        };

        if let Some(init) = object.class.initializer().cloned() {
            let mut session = Session {
                object: &mut object,
                operation: "<init>",
            };
            init(&mut session, args)?;
        }
        // Nothing to roll back to: a failed construction never yields an object
        object.ledger = RollbackLedger::new();

        if let Err(e) = object.class.enforce(&object.state, Trigger::Initialization) {
            tracing::warn!(class = %object.class.name(), error = %e, "construction rejected");
            return Err(e);
        }
        object.enforcing = true;
        Ok(object)
    }

    pub fn class(&self) -> &ContractClass {
        &self.class
    }

    pub fn type_name(&self) -> &str {
        self.class.name()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.state.get(field)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.state.integer(field)
    }

    pub fn state(&self) -> &ObjectState {
        &self.state
    }

    /// Whether direct writes are currently checked
    pub fn is_enforcing(&self) -> bool {
        self.enforcing
    }

    /// Evaluate the invariant without changing anything
    pub fn holds_invariant(&self) -> bool {
        self.class.invariant().check(&self.state).is_ok()
    }

    /// Direct attribute assignment. The invariant is checked right away;
    /// if it fails, only this field is restored.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        debug_assert!(self.enforcing && self.ledger.is_empty());
        let previous = self.state.set(field, value.into());
        self.check_single(field, previous, Trigger::Assignment(field.to_string()))
    }

    /// Direct attribute removal, checked like [`set`](Self::set).
    /// Returns the removed value.
    pub fn remove(&mut self, field: &str) -> Result<Option<Value>> {
        debug_assert!(self.enforcing && self.ledger.is_empty());
        let previous = self.state.remove(field);
        self.check_single(field, previous.clone(), Trigger::Removal(field.to_string()))?;
        Ok(previous)
    }

    fn check_single(&mut self, field: &str, previous: Option<Value>, trigger: Trigger) -> Result<()> {
        if let Err(e) = self.class.enforce(&self.state, trigger) {
            self.state.restore(field, previous);
            tracing::warn!(class = %self.class.name(), field, error = %e, "direct write rolled back");
            return Err(e);
        }
        Ok(())
    }

    /// Invoke a guarded operation
    pub fn call(&mut self, operation: &str, args: &[Value]) -> Result<Value> {
        let op = match self.class.operation(operation) {
            Some(op) if op.is_public() => op.clone(),
            Some(_) => {
                return Err(Error::usage(
                    operation,
                    format!("'{}' is internal to {}", operation, self.class.name()),
                ))
            }
            None => {
                return Err(Error::usage(
                    operation,
                    format!("{} has no operation '{}'", self.class.name(), operation),
                ))
            }
        };

        debug_assert!(self.enforcing && self.ledger.is_empty());
        let saved = self.enforcing;
        self.enforcing = false;
        self.depth += 1;
        tracing::debug!(class = %self.class.name(), operation, "guarded call");

        let outcome = {
            let mut session = Session {
                object: &mut *self,
                operation: op.name(),
            };
            op.invoke(&mut session, args)
        };
        self.depth -= 1;

        let outcome = outcome.and_then(|value| {
            self.class
                .enforce(&self.state, Trigger::Operation(op.name().to_string()))
                .map(|()| value)
        });

        let ledger = std::mem::take(&mut self.ledger);
        let writes = ledger.len();
        if let Err(e) = &outcome {
            let restored = ledger.replay(&mut self.state);
            tracing::warn!(
                class = %self.class.name(),
                operation,
                writes,
                restored = ?restored,
                error = %e,
                "guarded call rolled back"
            );
        } else {
            tracing::debug!(class = %self.class.name(), operation, writes, "guarded call committed");
        }
        self.enforcing = saved;
        outcome
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.class.name(),
            "fields": self.state.to_json(),
        })
    }
}

impl std::fmt::Debug for ContractedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractedObject")
            .field("type", &self.class.name())
            .field("state", &self.state)
            .field("enforcing", &self.enforcing)
            .field("pending_writes", &self.ledger.len())
            .finish()
    }
}

/// Write/invoke handle given to operation bodies and initializers
pub struct Session<'a> {
    object: &'a mut ContractedObject,
    operation: &'a str,
}

impl Session<'_> {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.object.state.get(field)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.object.state.integer(field)
    }

    pub fn state(&self) -> &ObjectState {
        &self.object.state
    }

    /// Journaled write; not checked until the guarded call ends
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        let previous = self.object.state.set(field, value.into());
        self.object.ledger.record(field, previous);
    }

    /// Journaled removal
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let previous = self.object.state.remove(field);
        if previous.is_some() {
            self.object.ledger.record(field, previous.clone());
        }
        previous
    }

    /// Call another operation on the same instance.
    ///
    /// Internal operations always run inline. Guarded operations follow the
    /// class's [`Reentrancy`] policy.
    pub fn call(&mut self, operation: &str, args: &[Value]) -> Result<Value> {
        let op = self.object.class.operation(operation).cloned().ok_or_else(|| {
            Error::usage(
                self.operation,
                format!("{} has no operation '{}'", self.object.class.name(), operation),
            )
        })?;

        if op.is_public() && self.object.class.config().reentrancy == Reentrancy::Reject {
            return Err(Error::usage(
                self.operation,
                format!(
                    "re-entrant call to guarded operation '{}' on {} is rejected",
                    operation,
                    self.object.class.name()
                ),
            ));
        }

        tracing::trace!(
            class = %self.object.class.name(),
            outer = self.operation,
            inner = operation,
            "nested call joins outer transaction"
        );
        self.object.depth += 1;
        let result = {
            let mut nested = Session {
                object: &mut *self.object,
                operation: op.name(),
            };
            op.invoke(&mut nested, args)
        };
        self.object.depth -= 1;
        result
    }

    /// Name of the running operation (`<init>` inside an initializer)
    pub fn operation(&self) -> &str {
        self.operation
    }

    pub fn type_name(&self) -> &str {
        self.object.class.name()
    }

    /// Nesting depth of operation bodies on this instance
    pub fn depth(&self) -> usize {
        self.object.depth
    }

    /// Build the error an operation body returns to report its own failure
    pub fn fail(&self, message: impl Into<String>) -> Error {
        Error::OperationFailed {
            type_name: self.object.class.name().to_string(),
            operation: self.operation.to_string(),
            message: message.into(),
        }
    }
}
