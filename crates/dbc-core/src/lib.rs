//! dbc-core - runtime Design-by-Contract enforcement
//!
//! Two enforcement engines share one failure taxonomy:
//!
//! - **Invariant guard**: a [`ContractClass`] declares invariant clauses and
//!   operations; every guarded operation on a [`ContractedObject`] runs as a
//!   transaction whose writes are undone if the invariant fails afterwards.
//! - **Routine contracts**: a [`Routine`] runs its body through ordered
//!   `require` / `body` / `ensure` blocks, and postconditions can compare
//!   against the previous call's captured locals ("old").
//!
//! # Architecture
//!
//! ```text
//! ContractClass ──▶ ContractedObject ──▶ Session ──▶ RollbackLedger
//!   (clauses,         (state, guard)      (journaled     (undo log)
//!    op table)                              writes)
//!
//! Routine ──▶ Call ──▶ require / body / ensure
//!                │            │
//!                ▼            ▼
//!            BlockLedger   OldSnapshotStore ──▶ Old (Snapshot | VOID)
//! ```
//!
//! # Guarantees
//!
//! - **Transactional**: after a failed guarded operation every field holds
//!   exactly the value it had at call entry
//! - **Ordered**: block misuse is reported at the offending block or at
//!   routine exit, never ignored
//! - **Stack-correct**: recursive calls never see each other's uncommitted
//!   locals as "old"
//! - **Single-threaded**: shared state uses `Rc`/`RefCell`; nothing here is
//!   `Send`

pub mod class;
pub mod clause;
pub mod config;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod old;
pub mod routine;
pub mod value;

pub use class::{ClassBuilder, ContractClass, Operation};
pub use clause::{Clauses, Invariant, InvariantClause};
pub use config::{GuardConfig, Reentrancy};
pub use error::{Error, Result, StructuralKind, Trigger};
pub use guard::{ContractedObject, Session};
pub use ledger::{LedgerEntry, RollbackLedger};
pub use old::{Old, OldSnapshotStore, RoutineId, Snapshot};
pub use routine::{BlockKind, BlockLedger, Call, Locals, Routine, RESULT};
pub use value::{ObjectState, Value};
