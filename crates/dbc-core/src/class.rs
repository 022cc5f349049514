//! Contract classes: per-type operation tables with installed guards
//!
//! A [`ContractClass`] is the Rust stand-in for a host type that adopts
//! invariant enforcement. It is assembled once with a [`ClassBuilder`]:
//!
//! ```ignore
//! let pair = ContractClass::builder("Pair")
//!     .invariant("a >= 0", |s| s.integer("a").is_some_and(|a| a >= 0))
//!     .invariant("b >= 0", |s| s.integer("b").is_some_and(|b| b >= 0))
//!     .initializer(|s, _| { s.set("a", 1); s.set("b", 2); Ok(()) })
//!     .operation("shift", |s, _| { s.set("a", 3); s.set("b", -4); Ok(Value::Null) })
//!     .build();
//! let mut obj = pair.instantiate(&[])?;
//! ```
//!
//! `build` is the single point where guards are installed: every operation
//! whose name does not start with `_` becomes a guarded operation of the
//! class. A subclass starts from a copy of its parent's table, so inherited,
//! overridden and newly added operations are all guarded, and all of them are
//! checked against the conjunction of the parent's and the subclass's
//! invariant clauses.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::clause::{Invariant, InvariantClause};
use crate::config::GuardConfig;
use crate::error::{Error, Result, Trigger};
use crate::guard::{ContractedObject, Session};
use crate::value::{ObjectState, Value};

/// Body of an operation
pub type OperationFn = Rc<dyn Fn(&mut Session<'_>, &[Value]) -> Result<Value>>;

/// Body of an initializer
pub type InitializerFn = Rc<dyn Fn(&mut Session<'_>, &[Value]) -> Result<()>>;

/// A named operation in a class table
#[derive(Clone)]
pub struct Operation {
    name: String,
    declared_in: String,
    body: OperationFn,
}

impl Operation {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class that declared (or last overrode) this operation
    pub fn declared_in(&self) -> &str {
        &self.declared_in
    }

    /// Internal operations (leading `_`) are never guarded on their own
    pub fn is_public(&self) -> bool {
        !self.name.starts_with('_')
    }

    pub(crate) fn invoke(&self, session: &mut Session<'_>, args: &[Value]) -> Result<Value> {
        (self.body)(session, args)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("declared_in", &self.declared_in)
            .finish_non_exhaustive()
    }
}

/// A host type under invariant enforcement
pub struct ContractClass {
    name: String,
    parent: Option<String>,
    invariant: Invariant,
    initializer: Option<InitializerFn>,
    operations: BTreeMap<String, Operation>,
    config: GuardConfig,
}

impl ContractClass {
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            parent: None,
            invariant: Invariant::new(),
            initializer: None,
            operations: BTreeMap::new(),
            config: GuardConfig::default(),
        }
    }

    /// Start a subclass that inherits this class's operations, invariant
    /// clauses, initializer and configuration
    pub fn subclass(&self, name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            parent: Some(self.name.clone()),
            invariant: self.invariant.clone(),
            initializer: self.initializer.clone(),
            operations: self.operations.clone(),
            config: self.config.clone(),
        }
    }

    /// Run the initializer, then check the invariant once.
    /// On failure no object is returned.
    pub fn instantiate(self: &Rc<Self>, args: &[Value]) -> Result<ContractedObject> {
        ContractedObject::construct(Rc::clone(self), args)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn invariant(&self) -> &Invariant {
        &self.invariant
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// True when `name` is an operation wrapped with invariant checking
    pub fn is_guarded(&self, name: &str) -> bool {
        self.operations.get(name).is_some_and(Operation::is_public)
    }

    /// Names of all guarded operations, sorted
    pub fn guarded_operations(&self) -> Vec<&str> {
        self.operations
            .values()
            .filter(|op| op.is_public())
            .map(Operation::name)
            .collect()
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub(crate) fn initializer(&self) -> Option<&InitializerFn> {
        self.initializer.as_ref()
    }

    /// Evaluate the invariant and turn any violated clauses into an error
    pub(crate) fn enforce(&self, state: &ObjectState, trigger: Trigger) -> Result<()> {
        self.invariant
            .check(state)
            .map_err(|clauses| Error::InvariantViolation {
                type_name: self.name.clone(),
                trigger,
                clauses,
            })
    }
}

impl fmt::Debug for ContractClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractClass")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("invariant", &self.invariant.labels().collect::<Vec<_>>())
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

/// Assembles a [`ContractClass`]
pub struct ClassBuilder {
    name: String,
    parent: Option<String>,
    invariant: Invariant,
    initializer: Option<InitializerFn>,
    operations: BTreeMap<String, Operation>,
    config: GuardConfig,
}

impl ClassBuilder {
    /// Add an invariant clause. Inherited clauses are kept.
    pub fn invariant(
        mut self,
        label: impl Into<String>,
        predicate: impl Fn(&ObjectState) -> bool + 'static,
    ) -> Self {
        self.invariant.push(InvariantClause::new(label, predicate));
        self
    }

    pub fn initializer(
        mut self,
        body: impl Fn(&mut Session<'_>, &[Value]) -> Result<()> + 'static,
    ) -> Self {
        self.initializer = Some(Rc::new(body));
        self
    }

    /// Declare an operation, replacing an inherited one of the same name
    pub fn operation(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&mut Session<'_>, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        let name = name.into();
        let op = Operation {
            name: name.clone(),
            declared_in: self.name.clone(),
            body: Rc::new(body),
        };
        self.operations.insert(name, op);
        self
    }

    pub fn config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Rc<ContractClass> {
        let guarded = self.operations.values().filter(|op| op.is_public()).count();
        tracing::debug!(
            class = %self.name,
            parent = ?self.parent,
            guarded,
            internal = self.operations.len() - guarded,
            clauses = self.invariant.len(),
            "guards installed"
        );
        Rc::new(ContractClass {
            name: self.name,
            parent: self.parent,
            invariant: self.invariant,
            initializer: self.initializer,
            operations: self.operations,
            config: self.config,
        })
    }
}
