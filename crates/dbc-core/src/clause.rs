//! Labelled clauses: the predicates contracts are made of
//!
//! An invariant is an ordered list of [`InvariantClause`]s over object state.
//! Require and ensure blocks record their predicates into a [`Clauses`]
//! collector. In both cases every clause is evaluated and all unmet labels
//! are reported together.

use std::fmt;
use std::rc::Rc;

use crate::value::ObjectState;

/// Predicate over object state
pub type Predicate = Rc<dyn Fn(&ObjectState) -> bool>;

/// One named invariant predicate
#[derive(Clone)]
pub struct InvariantClause {
    pub label: String,
    predicate: Predicate,
}

impl InvariantClause {
    pub fn new(label: impl Into<String>, predicate: impl Fn(&ObjectState) -> bool + 'static) -> Self {
        InvariantClause {
            label: label.into(),
            predicate: Rc::new(predicate),
        }
    }

    pub fn holds(&self, state: &ObjectState) -> bool {
        (self.predicate)(state)
    }
}

impl fmt::Debug for InvariantClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvariantClause")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Conjunction of invariant clauses. Subclasses extend, never replace.
#[derive(Debug, Clone, Default)]
pub struct Invariant {
    clauses: Vec<InvariantClause>,
}

impl Invariant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: InvariantClause) {
        self.clauses.push(clause);
    }

    /// Evaluate every clause against `state`.
    /// Returns the labels of all clauses that do not hold.
    pub fn check(&self, state: &ObjectState) -> std::result::Result<(), Vec<String>> {
        let violated: Vec<String> = self
            .clauses
            .iter()
            .filter(|clause| !clause.holds(state))
            .map(|clause| clause.label.clone())
            .collect();
        if violated.is_empty() {
            Ok(())
        } else {
            Err(violated)
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|c| c.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Collector for require/ensure predicates
///
/// ```ignore
/// call.require(|c| {
///     c.check("divisor != 0", divisor != 0);
///     Ok(())
/// })?;
/// ```
#[derive(Debug, Default)]
pub struct Clauses {
    evaluated: usize,
    unmet: Vec<String>,
}

impl Clauses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one clause; `holds` is the already evaluated predicate
    pub fn check(&mut self, label: impl Into<String>, holds: bool) -> &mut Self {
        self.evaluated += 1;
        if !holds {
            self.unmet.push(label.into());
        }
        self
    }

    pub fn all_hold(&self) -> bool {
        self.unmet.is_empty()
    }

    pub fn evaluated(&self) -> usize {
        self.evaluated
    }

    pub fn unmet(&self) -> &[String] {
        &self.unmet
    }

    pub(crate) fn into_unmet(self) -> Vec<String> {
        self.unmet
    }
}
