//! Routine contracts: ordered require / body / ensure blocks
//!
//! A [`Routine`] wraps a function body. Each invocation gets an explicit
//! per-call context, [`Call`], through which the three blocks are entered in
//! source order:
//!
//! ```ignore
//! let next_integer = Routine::new("next_integer", |call, n: i64| {
//!     let result = call.body(|locals| {
//!         let result = n + 1;
//!         locals.result(result);
//!         Ok(result)
//!     })?;
//!     call.ensure(|c, old| {
//!         if let Some(old) = old.snapshot() {
//!             let prev = old.result().and_then(Value::as_integer).unwrap_or_default();
//!             c.check("result == old.result + 1", result == prev + 1);
//!         }
//!         Ok(())
//!     })?;
//!     Ok(result)
//! });
//! ```
//!
//! # Per-call state machine
//!
//! `Start → (require?) → body → (ensure?) → Validated`
//!
//! - `require` must be the first block entered
//! - `body` must bind `result`; at exit its locals become the snapshot the
//!   next call of the same routine sees as "old"
//! - `ensure` may only be entered once a body has completed
//! - at return: exactly one body, no duplicated block kind, and the value
//!   returned must equal the committed `result`

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::clause::Clauses;
use crate::error::{Error, Result, StructuralKind};
use crate::old::{Old, OldSnapshotStore, RoutineId, Snapshot};
use crate::value::Value;

/// Name of the binding the body block must produce
pub const RESULT: &str = "result";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockKind {
    Require,
    Body,
    Ensure,
}

impl BlockKind {
    pub const ALL: [BlockKind; 3] = [BlockKind::Require, BlockKind::Body, BlockKind::Ensure];
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockKind::Require => write!(f, "require"),
            BlockKind::Body => write!(f, "body"),
            BlockKind::Ensure => write!(f, "ensure"),
        }
    }
}

// ── Block-usage Ledger ────────────────────────────────────

/// Record of the blocks entered during one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockLedger {
    entered: Vec<BlockKind>,
    body_completed: bool,
}

impl BlockLedger {
    pub fn entered(&self) -> &[BlockKind] {
        &self.entered
    }

    pub fn count(&self, kind: BlockKind) -> usize {
        self.entered.iter().filter(|k| **k == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entered.is_empty()
    }

    pub fn body_completed(&self) -> bool {
        self.body_completed
    }

    fn enter(&mut self, kind: BlockKind) {
        self.entered.push(kind);
    }

    /// Exit-time structure checks
    fn validate(&self, routine: &str) -> Result<()> {
        if self.count(BlockKind::Body) == 0 {
            return Err(Error::structural(routine, StructuralKind::MissingBody));
        }
        for kind in BlockKind::ALL {
            if self.count(kind) > 1 {
                return Err(Error::structural(routine, StructuralKind::DuplicateBlock(kind)));
            }
        }
        Ok(())
    }
}

// ── Locals ────────────────────────────────────────────────

/// Named values the body declares for the next call's "old"
#[derive(Debug, Default)]
pub struct Locals {
    bindings: BTreeMap<String, Value>,
}

impl Locals {
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    /// Bind `result`
    pub fn result(&mut self, value: impl Into<Value>) -> &mut Self {
        self.bind(RESULT, value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

// ── Routine ───────────────────────────────────────────────

type RoutineFn<A, R> = Box<dyn Fn(&mut Call<'_, A, R>, A) -> Result<R>>;

/// A function wrapped with require/body/ensure enforcement
pub struct Routine<A, R> {
    id: RoutineId,
    store: Rc<RefCell<OldSnapshotStore>>,
    body: RoutineFn<A, R>,
}

impl<A, R> Routine<A, R>
where
    R: Clone + Into<Value>,
{
    /// Wrap `body` with a private "old" history
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&mut Call<'_, A, R>, A) -> Result<R> + 'static,
    ) -> Self {
        Self::with_store(name, OldSnapshotStore::shared(), body)
    }

    /// Wrap `body`, keeping its history in a store shared with other routines.
    /// The history is released from the store when this routine is dropped.
    pub fn with_store(
        name: impl Into<String>,
        store: Rc<RefCell<OldSnapshotStore>>,
        body: impl Fn(&mut Call<'_, A, R>, A) -> Result<R> + 'static,
    ) -> Self {
        Routine {
            id: RoutineId::new(name),
            store,
            body: Box::new(body),
        }
    }

    pub fn id(&self) -> &RoutineId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn store(&self) -> &Rc<RefCell<OldSnapshotStore>> {
        &self.store
    }

    /// "old" of the innermost active call; a usage error when none is active
    pub fn old(&self) -> Result<Old> {
        self.store.borrow().old(&self.id)
    }

    /// Snapshot of the most recently completed body
    pub fn latest(&self) -> Option<Snapshot> {
        self.store.borrow().latest(&self.id).cloned()
    }

    /// Invoke the routine with full block validation
    pub fn call(&self, args: A) -> Result<R> {
        let prior = self.store.borrow_mut().enter(&self.id);
        let _frame = Frame {
            store: &self.store,
            id: &self.id,
        };
        tracing::debug!(
            routine = %self.id,
            depth = self.store.borrow().depth(&self.id),
            first = prior.is_void(),
            "routine call"
        );

        let mut call = Call {
            routine: self,
            ledger: BlockLedger::default(),
            result: None,
            prior,
            pending: None,
        };
        let returned = (self.body)(&mut call, args);
        let outcome = call.finish(returned);
        match &outcome {
            Ok(_) => tracing::debug!(routine = %self.id, "routine contract satisfied"),
            Err(e) => {
                tracing::warn!(routine = %self.id, kind = e.kind(), error = %e, "routine contract failed")
            }
        }
        outcome
    }
}

impl<A, R> fmt::Debug for Routine<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routine")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<A, R> Drop for Routine<A, R> {
    fn drop(&mut self) {
        if let Ok(mut store) = self.store.try_borrow_mut() {
            store.release(&self.id);
        }
    }
}

/// Pops the call's "old" frame on every exit path, including unwinding
struct Frame<'a> {
    store: &'a RefCell<OldSnapshotStore>,
    id: &'a RoutineId,
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        match self.store.try_borrow_mut() {
            Ok(mut store) => store.exit(self.id),
            // Never panic here: this may run during an unwind
            Err(_) => tracing::warn!(
                routine = %self.id,
                "old frame leaked: snapshot store is still borrowed at call exit"
            ),
        }
    }
}

// ── Call ──────────────────────────────────────────────────

/// Explicit context of one routine activation
pub struct Call<'r, A, R> {
    routine: &'r Routine<A, R>,
    ledger: BlockLedger,
    result: Option<Value>,
    prior: Old,
    /// First violation a block reported, re-raised if the routine swallows it
    pending: Option<Error>,
}

impl<'r, A, R> Call<'r, A, R> {
    /// Precondition block. Must be the first block of the call.
    pub fn require<F>(&mut self, check: F) -> Result<()>
    where
        F: FnOnce(&mut Clauses) -> Result<()>,
    {
        if !self.ledger.is_empty() {
            return Err(self.reject(Error::OrderingError {
                routine: self.name().to_string(),
                block: BlockKind::Require,
                message: format!(
                    "must be the first block, but {} already ran",
                    describe(self.ledger.entered())
                ),
            }));
        }
        self.ledger.enter(BlockKind::Require);

        let mut clauses = Clauses::new();
        if let Err(e) = check(&mut clauses) {
            return Err(self.reject(e));
        }
        if !clauses.all_hold() {
            return Err(self.reject(Error::PreconditionViolation {
                routine: self.name().to_string(),
                clauses: clauses.into_unmet(),
            }));
        }
        Ok(())
    }

    /// The computation. `compute` must bind `result` on its [`Locals`];
    /// the locals are committed as the next call's "old".
    pub fn body<T, F>(&mut self, compute: F) -> Result<T>
    where
        F: FnOnce(&mut Locals) -> Result<T>,
    {
        self.ledger.enter(BlockKind::Body);

        let mut locals = Locals::default();
        let value = match compute(&mut locals) {
            Ok(value) => value,
            Err(e) => return Err(self.reject(e)),
        };
        let Some(result) = locals.get(RESULT).cloned() else {
            let routine = self.name().to_string();
            return Err(self.reject(Error::structural(routine, StructuralKind::MissingResult)));
        };

        self.result = Some(result);
        self.ledger.body_completed = true;
        self.routine
            .store
            .borrow_mut()
            .commit(&self.routine.id, Snapshot::from_bindings(locals.bindings));
        Ok(value)
    }

    /// Postcondition block. Receives the previous call's snapshot, or VOID.
    pub fn ensure<F>(&mut self, check: F) -> Result<()>
    where
        F: FnOnce(&mut Clauses, &Old) -> Result<()>,
    {
        if !self.ledger.body_completed() {
            return Err(self.reject(Error::OrderingError {
                routine: self.name().to_string(),
                block: BlockKind::Ensure,
                message: "entered before a body block completed".to_string(),
            }));
        }
        self.ledger.enter(BlockKind::Ensure);

        let old = self.prior.clone();
        let mut clauses = Clauses::new();
        if let Err(e) = check(&mut clauses, &old) {
            return Err(self.reject(e));
        }
        if !clauses.all_hold() {
            return Err(self.reject(Error::PostconditionViolation {
                routine: self.name().to_string(),
                clauses: clauses.into_unmet(),
            }));
        }
        Ok(())
    }

    /// The previous call's snapshot as seen by this call
    pub fn old(&self) -> &Old {
        &self.prior
    }

    pub fn routine(&self) -> &RoutineId {
        &self.routine.id
    }

    fn name(&self) -> &str {
        self.routine.id.name()
    }

    pub fn blocks(&self) -> &BlockLedger {
        &self.ledger
    }

    /// Value committed as `result` by the body, once it has run
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    fn reject(&mut self, error: Error) -> Error {
        if self.pending.is_none() {
            self.pending = Some(error.clone());
        }
        error
    }
}

impl<'r, A, R> Call<'r, A, R>
where
    R: Clone + Into<Value>,
{
    /// Re-enter the same routine from inside one of its blocks
    pub fn recurse(&self, args: A) -> Result<R> {
        self.routine.call(args)
    }

    /// Exit-time validation
    fn finish(self, returned: Result<R>) -> Result<R> {
        let value = returned?;
        if let Some(violation) = self.pending {
            return Err(violation);
        }
        let routine = self.routine.id.name();
        self.ledger.validate(routine)?;

        let committed = self
            .result
            .ok_or_else(|| Error::structural(routine, StructuralKind::MissingResult))?;
        let returned: Value = value.clone().into();
        if !committed.identical(&returned) {
            return Err(Error::structural(
                routine,
                StructuralKind::ResultMismatch {
                    committed,
                    returned,
                },
            ));
        }
        Ok(value)
    }
}

fn describe(blocks: &[BlockKind]) -> String {
    blocks
        .iter()
        .map(|b| format!("'{}'", b))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add() -> Routine<(i64, i64), i64> {
        Routine::new("add", |call, (x, y): (i64, i64)| {
            call.body(|locals| {
                locals.result(x + y);
                Ok(x + y)
            })
        })
    }

    fn divide() -> Routine<(i64, i64), i64> {
        Routine::new("divide", |call, (dividend, divisor): (i64, i64)| {
            call.require(|c| {
                c.check("divisor != 0", divisor != 0);
                Ok(())
            })?;
            call.body(|locals| {
                let result = dividend / divisor;
                locals.result(result);
                Ok(result)
            })
        })
    }

    // ── Block Protocol Tests ──────────────────────────────

    #[test]
    fn test_body_only_routine() {
        assert_eq!(add().call((1, 2)).unwrap(), 3);
    }

    #[test]
    fn test_precondition_violation() {
        let err = divide().call((4, 0)).unwrap_err();
        assert_eq!(
            err,
            Error::PreconditionViolation {
                routine: "divide".into(),
                clauses: vec!["divisor != 0".into()],
            }
        );
        assert_eq!(divide().call((8, 2)).unwrap(), 4);
    }

    #[test]
    fn test_precondition_failure_commits_nothing() {
        let routine = divide();
        assert!(routine.call((1, 0)).is_err());
        assert!(routine.latest().is_none());
        assert_eq!(routine.store().borrow().commits(routine.id()), 0);
    }

    #[test]
    fn test_postcondition_violation() {
        let absolute_value = Routine::new("absolute_value", |call, value: i64| {
            let result = call.body(|locals| {
                locals.result(value);
                Ok(value)
            })?;
            call.ensure(|c, _| {
                c.check("result >= 0", result >= 0);
                Ok(())
            })?;
            Ok(result)
        });
        assert_eq!(absolute_value.call(5).unwrap(), 5);
        let err = absolute_value.call(-5).unwrap_err();
        assert!(matches!(err, Error::PostconditionViolation { .. }));
        // the body had committed before the postcondition failed
        assert_eq!(
            absolute_value.latest().unwrap().result(),
            Some(&Value::from(-5))
        );
    }

    #[test]
    fn test_missing_body_is_structural_error() {
        let no_body: Routine<i64, i64> = Routine::new("no_body", |_, n: i64| Ok(n));
        let err = no_body.call(1).unwrap_err();
        assert_eq!(
            err,
            Error::StructuralError {
                routine: "no_body".into(),
                kind: StructuralKind::MissingBody,
            }
        );
    }

    #[test]
    fn test_body_without_result_binding() {
        let r: Routine<(), i64> = Routine::new("forgetful", |call, ()| {
            call.body(|locals| {
                locals.bind("value", 1);
                Ok(1)
            })
        });
        let err = r.call(()).unwrap_err();
        assert!(matches!(
            err,
            Error::StructuralError { kind: StructuralKind::MissingResult, .. }
        ));
        assert!(r.latest().is_none());
    }

    #[test]
    fn test_result_mismatch() {
        let r: Routine<(), i64> = Routine::new("liar", |call, ()| {
            call.body(|locals| {
                locals.result(1);
                Ok(())
            })?;
            Ok(2)
        });
        let err = r.call(()).unwrap_err();
        assert_eq!(
            err,
            Error::StructuralError {
                routine: "liar".into(),
                kind: StructuralKind::ResultMismatch {
                    committed: Value::from(1),
                    returned: Value::from(2),
                },
            }
        );
    }

    #[test]
    fn test_nan_result_matches_itself() {
        let sqrt: Routine<f64, f64> = Routine::new("sqrt", |call, x: f64| {
            call.body(|locals| {
                let root = x.sqrt();
                locals.result(root);
                Ok(root)
            })
        });
        assert_eq!(sqrt.call(4.0).unwrap(), 2.0);
        assert!(sqrt.call(-1.0).unwrap().is_nan());
        assert!(sqrt.latest().unwrap().result().and_then(Value::as_float).is_some_and(f64::is_nan));
    }

    #[test]
    fn test_signed_zero_result_mismatch() {
        let r: Routine<(), f64> = Routine::new("flip_zero", |call, ()| {
            call.body(|locals| {
                locals.result(0.0);
                Ok(())
            })?;
            Ok(-0.0)
        });
        assert!(matches!(
            r.call(()).unwrap_err(),
            Error::StructuralError { kind: StructuralKind::ResultMismatch { .. }, .. }
        ));
    }

    // ── Ordering Tests ────────────────────────────────────

    #[test]
    fn test_ensure_before_body_is_ordering_error() {
        let r: Routine<(), i64> = Routine::new("backwards", |call, ()| {
            call.ensure(|_, _| Ok(()))?;
            call.body(|locals| {
                locals.result(0);
                Ok(0)
            })
        });
        let err = r.call(()).unwrap_err();
        assert_eq!(
            err,
            Error::OrderingError {
                routine: "backwards".into(),
                block: BlockKind::Ensure,
                message: "entered before a body block completed".into(),
            }
        );
    }

    #[test]
    fn test_require_after_body_is_ordering_error() {
        let r: Routine<(), i64> = Routine::new("late_require", |call, ()| {
            call.body(|locals| {
                locals.result(0);
                Ok(0)
            })?;
            call.require(|_| Ok(()))?;
            Ok(0)
        });
        let err = r.call(()).unwrap_err();
        match err {
            Error::OrderingError { block, message, .. } => {
                assert_eq!(block, BlockKind::Require);
                assert!(message.contains("'body'"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_body_detected_at_exit() {
        let r: Routine<(), i64> = Routine::new("twice", |call, ()| {
            call.body(|locals| {
                locals.result(1);
                Ok(1)
            })?;
            call.body(|locals| {
                locals.result(1);
                Ok(1)
            })
        });
        let err = r.call(()).unwrap_err();
        assert_eq!(
            err,
            Error::StructuralError {
                routine: "twice".into(),
                kind: StructuralKind::DuplicateBlock(BlockKind::Body),
            }
        );
    }

    #[test]
    fn test_duplicate_ensure_detected_at_exit() {
        let r: Routine<(), i64> = Routine::new("double_check", |call, ()| {
            call.body(|locals| {
                locals.result(1);
                Ok(1)
            })?;
            call.ensure(|_, _| Ok(()))?;
            call.ensure(|_, _| Ok(()))?;
            Ok(1)
        });
        assert!(matches!(
            r.call(()).unwrap_err(),
            Error::StructuralError {
                kind: StructuralKind::DuplicateBlock(BlockKind::Ensure),
                ..
            }
        ));
    }

    #[test]
    fn test_swallowed_violation_still_reported() {
        let r: Routine<i64, i64> = Routine::new("swallower", |call, n: i64| {
            let _ = call.require(|c| {
                c.check("n > 0", n > 0);
                Ok(())
            });
            call.body(|locals| {
                locals.result(n);
                Ok(n)
            })
        });
        assert!(matches!(
            r.call(-1).unwrap_err(),
            Error::PreconditionViolation { .. }
        ));
        assert_eq!(r.call(1).unwrap(), 1);
    }

    // ── Old Tests ─────────────────────────────────────────

    #[test]
    fn test_old_accessor_outside_call() {
        let r = add();
        let err = r.old().unwrap_err();
        assert!(err.to_string().contains("'add'"));
    }

    #[test]
    fn test_unguarded_old_on_first_call() {
        let previous_integer: Routine<i64, i64> = Routine::new("previous_integer", |call, n: i64| {
            let result = call.body(|locals| {
                locals.result(n - 1);
                Ok(n - 1)
            })?;
            call.ensure(|c, old| {
                let before = old.integer(RESULT)?;
                c.check("result == old.result - 1", result == before - 1);
                Ok(())
            })?;
            Ok(result)
        });
        let err = previous_integer.call(2).unwrap_err();
        assert_eq!(err.kind(), "usage_error");
        assert!(err.to_string().contains("'old' has no attributes"));
    }

    #[test]
    fn test_old_holds_declared_locals() {
        let counter: Routine<i64, i64> = Routine::new("count", |call, start: i64| {
            let result = call.body(|locals| {
                let next = start + 1;
                locals.bind("start", start).result(next);
                Ok(next)
            })?;
            call.ensure(|c, old| {
                if let Some(old) = old.snapshot() {
                    let prev = old.result().and_then(Value::as_integer).unwrap_or_default();
                    c.check("result > old.result", result > prev);
                    c.check("old.start bound", old.get("start").is_some());
                }
                Ok(())
            })?;
            Ok(result)
        });
        for i in 0..10 {
            assert_eq!(counter.call(i).unwrap(), i + 1);
        }
        assert_eq!(counter.latest().unwrap().get("start"), Some(&Value::from(9)));
    }

    #[test]
    fn test_call_exposes_old_during_body() {
        let r: Routine<i64, i64> = Routine::new("peek", |call, n: i64| {
            let was_void = call.old().is_void();
            call.body(|locals| {
                locals.result(n).bind("was_void", was_void);
                Ok(n)
            })
        });
        r.call(1).unwrap();
        assert_eq!(r.latest().unwrap().get("was_void"), Some(&Value::from(true)));
        r.call(2).unwrap();
        assert_eq!(r.latest().unwrap().get("was_void"), Some(&Value::from(false)));
    }

    #[test]
    fn test_frame_popped_after_failure() {
        let r = divide();
        let _ = r.call((1, 0));
        assert_eq!(r.store().borrow().depth(r.id()), 0);
        assert!(r.old().is_err());
    }

    #[test]
    fn test_frame_exit_tolerates_borrowed_store() {
        let store = OldSnapshotStore::shared();
        let held = Rc::clone(&store);
        let r: Routine<(), i64> = Routine::with_store("hog", Rc::clone(&store), move |call, ()| {
            let value = call.body(|locals| {
                locals.result(0);
                Ok(0)
            })?;
            // keep the store borrowed past the end of the call
            std::mem::forget(held.borrow());
            Ok(value)
        });
        assert_eq!(r.call(()).unwrap(), 0);
        assert!(store.try_borrow_mut().is_err());
    }

    #[test]
    fn test_dropped_routine_releases_shared_slot() {
        let store = OldSnapshotStore::shared();
        let keep: Routine<(), i64> = Routine::with_store("keep", Rc::clone(&store), |call, ()| {
            call.body(|locals| {
                locals.result(1);
                Ok(1)
            })
        });
        keep.call(()).unwrap();
        for _ in 0..8 {
            let temp: Routine<(), i64> = Routine::with_store("temp", Rc::clone(&store), |call, ()| {
                call.body(|locals| {
                    locals.result(2);
                    Ok(2)
                })
            });
            temp.call(()).unwrap();
            assert_eq!(store.borrow().len(), 2);
        }
        assert_eq!(store.borrow().len(), 1);
        assert!(store.borrow().latest(keep.id()).is_some());
    }

    #[test]
    fn test_block_ledger_records_entry_order() {
        let r: Routine<(), i64> = Routine::new("full", |call, ()| {
            call.require(|_| Ok(()))?;
            call.body(|locals| {
                locals.result(0);
                Ok(())
            })?;
            call.ensure(|_, _| Ok(()))?;
            assert_eq!(
                call.blocks().entered(),
                [BlockKind::Require, BlockKind::Body, BlockKind::Ensure]
            );
            assert_eq!(call.result(), Some(&Value::from(0)));
            Ok(0)
        });
        assert_eq!(r.call(()).unwrap(), 0);
    }
}
