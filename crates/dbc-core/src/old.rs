//! "old" snapshots: the previous call's locals, visible to postconditions
//!
//! The store keeps one slot per function identity ([`RoutineId`]):
//!
//! - `latest`: the snapshot committed by the most recently *completed* body
//!   block of that function
//! - a stack of frames, one per active call, each holding the snapshot that
//!   was `latest` when that call started
//!
//! A call's ensure block reads its own frame, so a nested or recursive call
//! that commits in between never changes what the enclosing call sees as
//! "old". The next call after both return sees whichever body completed last.
//!
//! # Lifecycle
//!
//! ```text
//! enter(id)   push frame (previous = latest)
//! commit(id)  latest = snapshot            (at body exit)
//! old(id)     read top frame               (UsageError if no frame)
//! exit(id)    pop frame
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::value::Value;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Function identity: a name plus a serial unique within the process
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoutineId {
    serial: u64,
    name: String,
}

impl RoutineId {
    pub fn new(name: impl Into<String>) -> Self {
        RoutineId {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Immutable bindings captured at body exit. Always holds `result`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    bindings: BTreeMap<String, Value>,
}

impl Snapshot {
    pub(crate) fn from_bindings(bindings: BTreeMap<String, Value>) -> Self {
        Snapshot { bindings }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn result(&self) -> Option<&Value> {
        self.get(crate::routine::RESULT)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.bindings
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// The "old" view handed to an ensure block: a previous snapshot, or VOID
/// on the function's first call
#[derive(Debug, Clone, PartialEq)]
pub struct Old {
    routine: String,
    snapshot: Option<Rc<Snapshot>>,
}

impl Old {
    pub(crate) fn new(routine: &RoutineId, snapshot: Option<Rc<Snapshot>>) -> Self {
        Old {
            routine: routine.name().to_string(),
            snapshot,
        }
    }

    /// No earlier call of this function has completed its body
    pub fn is_void(&self) -> bool {
        self.snapshot.is_none()
    }

    /// Guarded access: `if let Some(old) = old.snapshot() { … }`
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_deref()
    }

    /// Unguarded access. Reading through VOID, or a name the previous call
    /// did not bind, is a usage error.
    pub fn get(&self, name: &str) -> Result<&Value> {
        let snapshot = self.snapshot.as_deref().ok_or_else(|| {
            Error::usage(
                &self.routine,
                format!(
                    "'old' has no attributes (no previous call); check Old::is_void before reading '{}'",
                    name
                ),
            )
        })?;
        snapshot.get(name).ok_or_else(|| {
            Error::usage(
                &self.routine,
                format!("previous call did not bind '{}'", name),
            )
        })
    }

    pub fn result(&self) -> Result<&Value> {
        self.get(crate::routine::RESULT)
    }

    /// Integer binding; any other type is a usage error
    pub fn integer(&self, name: &str) -> Result<i64> {
        let value = self.get(name)?;
        value.as_integer().ok_or_else(|| {
            Error::usage(
                &self.routine,
                format!("old '{}' is {}, not Integer", name, value.type_name()),
            )
        })
    }
}

#[derive(Debug, Default)]
struct Slot {
    latest: Option<Rc<Snapshot>>,
    frames: Vec<Option<Rc<Snapshot>>>,
    commits: u64,
}

/// Per-function history of completed calls
///
/// One slot per [`RoutineId`] that has been called through this store. A
/// [`Routine`](crate::Routine) releases its slot when it is dropped, so a
/// long-lived shared store only holds history for live routines.
#[derive(Debug, Default)]
pub struct OldSnapshotStore {
    slots: BTreeMap<RoutineId, Slot>,
}

impl OldSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store meant to be handed to several routines
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Open a frame for a new call and return its "old" view
    pub fn enter(&mut self, id: &RoutineId) -> Old {
        let slot = self.slots.entry(id.clone()).or_default();
        let previous = slot.latest.clone();
        slot.frames.push(previous.clone());
        tracing::trace!(routine = %id, depth = slot.frames.len(), void = previous.is_none(), "old frame opened");
        Old::new(id, previous)
    }

    /// Replace the latest snapshot (body exit)
    pub fn commit(&mut self, id: &RoutineId, snapshot: Snapshot) {
        let slot = self.slots.entry(id.clone()).or_default();
        slot.latest = Some(Rc::new(snapshot));
        slot.commits += 1;
    }

    /// Close the innermost frame of `id`
    pub fn exit(&mut self, id: &RoutineId) {
        if let Some(slot) = self.slots.get_mut(id) {
            let popped = slot.frames.pop();
            debug_assert!(popped.is_some(), "exit without matching enter");
        }
    }

    /// "old" for the innermost active call of `id`
    pub fn old(&self, id: &RoutineId) -> Result<Old> {
        self.slots
            .get(id)
            .and_then(|slot| slot.frames.last())
            .map(|previous| Old::new(id, previous.clone()))
            .ok_or_else(|| {
                Error::usage(
                    id.name(),
                    format!(
                        "'old' used outside an active call; '{}' must be invoked through its Routine wrapper",
                        id.name()
                    ),
                )
            })
    }

    /// Snapshot of the most recently completed body, if any
    pub fn latest(&self, id: &RoutineId) -> Option<&Snapshot> {
        self.slots.get(id).and_then(|slot| slot.latest.as_deref())
    }

    /// Number of active calls of `id`
    pub fn depth(&self, id: &RoutineId) -> usize {
        self.slots.get(id).map_or(0, |slot| slot.frames.len())
    }

    /// Number of body blocks of `id` that have completed
    pub fn commits(&self, id: &RoutineId) -> u64 {
        self.slots.get(id).map_or(0, |slot| slot.commits)
    }

    /// Drop the slot of a routine that no longer exists
    pub(crate) fn release(&mut self, id: &RoutineId) {
        if self.slots.remove(id).is_some() {
            tracing::trace!(routine = %id, remaining = self.slots.len(), "old slot released");
        }
    }

    /// Number of routines holding history in this store
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Forget the history of `id`, so its next call sees VOID again.
    /// Not allowed while the routine is running.
    pub fn reset(&mut self, id: &RoutineId) -> Result<()> {
        if self.depth(id) > 0 {
            return Err(Error::usage(
                id.name(),
                "cannot reset 'old' history while the routine is active",
            ));
        }
        self.slots.remove(id);
        Ok(())
    }
}
