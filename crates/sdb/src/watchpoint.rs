//! Fixed 32-slot watchpoint pool.
//!
//! Modeled directly on the reference's `{ free_head, active_head, arena }`
//! pool: slots are never moved, only relinked, and ids are never reused
//! within a session.

use crate::error::SdbError;
use crate::expr::{expr, EvalContext};

const NR_WP: usize = 32;

struct Slot {
    next: Option<usize>,
    prev: Option<usize>,
    id: u64,
    source_expr: String,
    last_value: u32,
}

/// A snapshot of one active watchpoint, for display purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchpointView {
    pub id: u64,
    pub source_expr: String,
    pub last_value: u32,
}

/// Fixed-capacity pool of watchpoints with a free list and an active
/// list, both threaded through stable slot indices rather than pointers.
pub struct WatchpointPool {
    slots: [Slot; NR_WP],
    free_head: Option<usize>,
    active_head: Option<usize>,
    next_id: u64,
}

impl WatchpointPool {
    /// A fresh pool: every slot free, no watchpoints active, id sequence
    /// restarted at 1.
    #[must_use]
    pub fn new() -> Self {
        let mut slots: [Slot; NR_WP] = std::array::from_fn(|i| Slot {
            next: (i + 1 < NR_WP).then_some(i + 1),
            prev: i.checked_sub(1),
            id: 0,
            source_expr: String::new(),
            last_value: 0,
        });
        slots[0].prev = None;
        Self {
            slots,
            free_head: Some(0),
            active_head: None,
            next_id: 0,
        }
    }

    fn active_tail(&self) -> Option<usize> {
        let mut cur = self.active_head?;
        while let Some(next) = self.slots[cur].next {
            cur = next;
        }
        Some(cur)
    }

    /// Evaluate `source_expr`, allocate a slot, and link it at the tail of
    /// the active list. Returns the new watchpoint's id.
    ///
    /// # Errors
    /// Returns the evaluator's error if `source_expr` fails to evaluate,
    /// or [`SdbError::WatchpointPoolFull`] if every slot is in use.
    pub fn add(&mut self, source_expr: &str, ctx: &mut dyn EvalContext) -> Result<u64, SdbError> {
        let value = expr(source_expr, ctx)?;

        let idx = self.free_head.ok_or(SdbError::WatchpointPoolFull)?;
        self.free_head = self.slots[idx].next;
        if let Some(new_free_head) = self.free_head {
            self.slots[new_free_head].prev = None;
        }

        self.next_id += 1;
        self.slots[idx] = Slot {
            next: None,
            prev: self.active_tail(),
            id: self.next_id,
            source_expr: source_expr.to_string(),
            last_value: value,
        };

        match self.active_tail() {
            Some(tail) => self.slots[tail].next = Some(idx),
            None => self.active_head = Some(idx),
        }

        Ok(self.next_id)
    }

    /// Unlink the first active watchpoint with the given id and return
    /// its slot to the free pool.
    ///
    /// # Errors
    /// Returns [`SdbError::UnknownWatchpoint`] if no active watchpoint
    /// has that id.
    pub fn delete(&mut self, id: u64) -> Result<(), SdbError> {
        let idx = self.find(id).ok_or(SdbError::UnknownWatchpoint(id as i64))?;

        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if let Some(prev) = prev {
            self.slots[prev].next = next;
        }
        if let Some(next) = next {
            self.slots[next].prev = prev;
        }
        if self.active_head == Some(idx) {
            self.active_head = next;
        }

        if let Some(old_free_head) = self.free_head {
            self.slots[old_free_head].prev = Some(idx);
        }
        self.slots[idx].next = self.free_head;
        self.slots[idx].prev = None;
        self.free_head = Some(idx);

        Ok(())
    }

    fn find(&self, id: u64) -> Option<usize> {
        let mut cur = self.active_head;
        while let Some(idx) = cur {
            if self.slots[idx].id == id {
                return Some(idx);
            }
            cur = self.slots[idx].next;
        }
        None
    }

    /// List all active watchpoints, oldest (head) first.
    #[must_use]
    pub fn display(&self) -> Vec<WatchpointView> {
        let mut out = Vec::new();
        let mut cur = self.active_head;
        while let Some(idx) = cur {
            out.push(WatchpointView {
                id: self.slots[idx].id,
                source_expr: self.slots[idx].source_expr.clone(),
                last_value: self.slots[idx].last_value,
            });
            cur = self.slots[idx].next;
        }
        out
    }

    /// Re-evaluate every active watchpoint. Returns `(id, expr, old,
    /// new)` for each one whose value changed, and updates `last_value`
    /// in place. An expression that fails to re-evaluate is skipped (and
    /// should be logged by the caller) rather than aborting the scan.
    pub fn check(&mut self, ctx: &mut dyn EvalContext) -> Vec<(u64, String, u32, u32)> {
        let mut changed = Vec::new();
        let mut cur = self.active_head;
        while let Some(idx) = cur {
            match expr(&self.slots[idx].source_expr, ctx) {
                Ok(value) if value != self.slots[idx].last_value => {
                    changed.push((
                        self.slots[idx].id,
                        self.slots[idx].source_expr.clone(),
                        self.slots[idx].last_value,
                        value,
                    ));
                    self.slots[idx].last_value = value;
                }
                Ok(_) => {}
                Err(e) => log::warn!(
                    "watchpoint {} re-eval failed: {e}",
                    self.slots[idx].id
                ),
            }
            cur = self.slots[idx].next;
        }
        changed
    }
}

impl Default for WatchpointPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Machine(HashMap<&'static str, u32>);
    impl EvalContext for Machine {
        fn resolve_name(&self, name: &str) -> Option<u32> {
            self.0.get(name).copied()
        }
        fn read_word(&mut self, _addr: u32) -> u32 {
            0
        }
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut pool = WatchpointPool::new();
        let mut m = Machine(HashMap::from([("a0", 1)]));
        let id1 = pool.add("$a0", &mut m).unwrap();
        let id2 = pool.add("$a0", &mut m).unwrap();
        assert_eq!((id1, id2), (1, 2));
        pool.delete(id1).unwrap();
        let id3 = pool.add("$a0", &mut m).unwrap();
        assert_eq!(id3, 3);
    }

    #[test]
    fn check_reports_value_changes() {
        let mut pool = WatchpointPool::new();
        let mut m = Machine(HashMap::from([("a0", 1)]));
        pool.add("$a0", &mut m).unwrap();
        assert!(pool.check(&mut m).is_empty());
        m.0.insert("a0", 2);
        let changed = pool.check(&mut m);
        assert_eq!(changed, vec![(1, "$a0".to_string(), 1, 2)]);
        assert!(pool.check(&mut m).is_empty());
    }

    #[test]
    fn pool_full_after_32_watchpoints() {
        let mut pool = WatchpointPool::new();
        let mut m = Machine(HashMap::from([("a0", 1)]));
        for _ in 0..32 {
            pool.add("$a0", &mut m).unwrap();
        }
        assert_eq!(pool.add("$a0", &mut m), Err(SdbError::WatchpointPoolFull));
    }

    #[test]
    fn delete_unknown_id_is_an_error() {
        let mut pool = WatchpointPool::new();
        assert_eq!(pool.delete(99), Err(SdbError::UnknownWatchpoint(99)));
    }
}
