//! Priority hint (§6): the single-writer, single-reader handoff from C12 to
//! C11. Last-write-wins; C11 reads whatever snapshot is current at the start
//! of its cycle (§5 — "a single-writer, single-reader handoff with
//! last-write-wins semantics").

use arc_swap::ArcSwap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct PriorityHint {
    pub exchange_a_ids: Vec<String>,
    pub exchange_b_ids: Vec<String>,
}

/// Shared handle cloned into both C11 (reader) and C12 (writer). Cloning the
/// handle is cheap (an `Arc` around the swap cell); the hint itself is
/// replaced wholesale on every publish rather than mutated in place.
#[derive(Clone)]
pub struct PriorityHandoff {
    inner: Arc<ArcSwap<PriorityHint>>,
}

impl PriorityHandoff {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(PriorityHint::default())),
        }
    }

    /// Publishes a new hint, capped at `max_per_side` ids per exchange (~50,
    /// per §4.11), overwriting whatever was previously published.
    pub fn publish(&self, mut hint: PriorityHint, max_per_side: usize) {
        hint.exchange_a_ids.truncate(max_per_side);
        hint.exchange_b_ids.truncate(max_per_side);
        self.inner.store(Arc::new(hint));
    }

    pub fn current(&self) -> Arc<PriorityHint> {
        self.inner.load_full()
    }
}

impl Default for PriorityHandoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Reorders `ids` so any id present in `priority_ids` sorts first, preserving
/// the relative order within each partition (§4.10 step 2).
pub fn prioritize(ids: Vec<String>, priority_ids: &[String]) -> Vec<String> {
    let priority_set: std::collections::HashSet<&String> = priority_ids.iter().collect();
    let (mut priority, rest): (Vec<String>, Vec<String>) =
        ids.into_iter().partition(|id| priority_set.contains(id));
    priority.extend(rest);
    priority
}
