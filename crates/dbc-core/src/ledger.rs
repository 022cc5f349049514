//! Rollback ledger: write-ahead undo log of a guarded call
//!
//! Every write made while a guarded operation runs appends one entry holding
//! the value the field had immediately before that write (or `None` if the
//! field did not exist). Replaying the entries in reverse therefore walks
//! each field back through all of its intermediate values to the value it
//! had at call entry, however many times it was written.

use crate::value::{ObjectState, Value};

/// One undo record
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub field: String,
    /// `None` means the field was absent before the write
    pub previous: Option<Value>,
}

/// Append-only undo journal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackLedger {
    entries: Vec<LedgerEntry>,
}

impl RollbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, field: &str, previous: Option<Value>) {
        tracing::trace!(field, previous = ?previous, seq = self.entries.len(), "ledger record");
        self.entries.push(LedgerEntry {
            field: field.to_string(),
            previous,
        });
    }

    /// Undo every recorded write, newest first, directly on `state`.
    /// Returns the distinct fields that were touched, in first-write order.
    pub fn replay(self, state: &mut ObjectState) -> Vec<String> {
        let mut touched: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !touched.contains(&entry.field) {
                touched.push(entry.field.clone());
            }
        }
        for entry in self.entries.into_iter().rev() {
            state.restore(&entry.field, entry.previous);
        }
        touched
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
