//! Dedup gate over the satisfaction table.
//!
//! The table is the engine's only long-lived state: a key is present from
//! the moment a fetch for it is admitted until a clear removes it. The gate
//! never looks at outcomes; failed keys become admittable again only
//! because the engine re-injects a clear for them.

use crate::router::{RoutedCommand, RoutedOp};
use indexmap::IndexSet;
use keyfetch_core::{DataKey, FetchRequest};

/// Set of satisfied keys, in admission order
#[derive(Debug, Clone, Default)]
pub struct SatisfactionTable {
    satisfied: IndexSet<DataKey>,
}

impl SatisfactionTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the key is satisfied
    #[must_use]
    pub fn is_satisfied(&self, key: &DataKey) -> bool {
        self.satisfied.contains(key)
    }

    /// Mark a key satisfied; returns false if it already was
    pub fn mark(&mut self, key: DataKey) -> bool {
        self.satisfied.insert(key)
    }

    /// Forget a key; returns true if it was satisfied
    pub fn remove(&mut self, key: &DataKey) -> bool {
        self.satisfied.shift_remove(key)
    }

    /// Number of satisfied keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.satisfied.len()
    }

    /// Whether no key is satisfied
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.satisfied.is_empty()
    }

    /// Satisfied keys, oldest first
    pub fn keys(&self) -> impl Iterator<Item = &DataKey> {
        self.satisfied.iter()
    }
}

/// Outcome of passing one routed command through the gate
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// The key was forgotten; any task for it must be cancelled
    Cleared {
        /// Whether the key had been satisfied
        was_satisfied: bool,
    },
    /// The key is already satisfied; nothing happens
    Suppressed,
    /// The request should be started
    Admitted(FetchRequest),
}

/// Applies routed commands to a [`SatisfactionTable`] in arrival order
#[derive(Debug, Default)]
pub struct DedupGate {
    table: SatisfactionTable,
}

impl DedupGate {
    /// Create a gate over an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one routed command
    pub fn apply(&mut self, routed: RoutedCommand) -> GateDecision {
        match routed.op {
            RoutedOp::Clear => GateDecision::Cleared {
                was_satisfied: self.table.remove(&routed.key),
            },
            RoutedOp::Fetch(request) => {
                if self.table.mark(routed.key) {
                    GateDecision::Admitted(request)
                } else {
                    GateDecision::Suppressed
                }
            }
        }
    }

    /// The underlying table
    #[must_use]
    pub fn table(&self) -> &SatisfactionTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Envelope, route};
    use keyfetch_core::{CacheClear, FetchPolicy};
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn apply_all(gate: &mut DedupGate, envelope: Envelope) -> Vec<GateDecision> {
        route(envelope).into_iter().map(|r| gate.apply(r)).collect()
    }

    fn cached(args: Vec<serde_json::Value>) -> FetchRequest {
        FetchRequest::new("LOAD", args).with_policy(FetchPolicy::PreferCache)
    }

    #[test]
    fn test_prefer_cache_admits_once() {
        let mut gate = DedupGate::new();
        let request = cached(vec![json!(1), json!(2)]);

        let first = apply_all(&mut gate, Envelope::external(request.clone()));
        let second = apply_all(&mut gate, Envelope::external(request.clone()));

        assert_eq!(first, vec![GateDecision::Admitted(request)]);
        assert_eq!(second, vec![GateDecision::Suppressed]);
        assert_eq!(gate.table().len(), 1);
    }

    #[test]
    fn test_clear_makes_key_admittable() {
        let mut gate = DedupGate::new();
        let request = cached(vec![json!("bar")]);

        apply_all(&mut gate, Envelope::external(request.clone()));
        let cleared = apply_all(&mut gate, Envelope::synthesized(CacheClear::from(&request)));
        let again = apply_all(&mut gate, Envelope::external(request.clone()));

        assert_eq!(cleared, vec![GateDecision::Cleared { was_satisfied: true }]);
        assert_eq!(again, vec![GateDecision::Admitted(request)]);
    }

    #[test]
    fn test_clear_unknown_key() {
        let mut gate = DedupGate::new();
        let decisions = apply_all(&mut gate, Envelope::external(CacheClear::new("LOAD", vec![])));
        assert_eq!(decisions, vec![GateDecision::Cleared { was_satisfied: false }]);
        assert!(gate.table().is_empty());
    }

    #[test]
    fn test_refetch_always_admits() {
        let mut gate = DedupGate::new();
        let request = FetchRequest::new("LOAD", vec![json!("bar")]);

        let first = apply_all(&mut gate, Envelope::external(request.clone()));
        let second = apply_all(&mut gate, Envelope::external(request.clone()));

        assert_eq!(
            first,
            vec![
                GateDecision::Cleared { was_satisfied: false },
                GateDecision::Admitted(request.clone())
            ]
        );
        assert_eq!(
            second,
            vec![
                GateDecision::Cleared { was_satisfied: true },
                GateDecision::Admitted(request)
            ]
        );
    }

    #[test]
    fn test_distinct_keys_independent() {
        let mut gate = DedupGate::new();
        let a = cached(vec![json!("a")]);
        let b = cached(vec![json!("b")]);
        let other_type = FetchRequest::new("LOAD_OTHER", vec![json!("a")])
            .with_policy(FetchPolicy::PreferCache);

        assert_eq!(apply_all(&mut gate, Envelope::external(a.clone())), vec![GateDecision::Admitted(a)]);
        assert_eq!(apply_all(&mut gate, Envelope::external(b.clone())), vec![GateDecision::Admitted(b)]);
        assert_eq!(
            apply_all(&mut gate, Envelope::external(other_type.clone())),
            vec![GateDecision::Admitted(other_type)]
        );
        assert_eq!(gate.table().len(), 3);
    }

    #[test]
    fn test_table_keeps_admission_order() {
        let mut table = SatisfactionTable::new();
        let a = keyfetch_core::derive_key("A", &[]);
        let b = keyfetch_core::derive_key("B", &[]);
        assert!(table.mark(b.clone()));
        assert!(table.mark(a.clone()));
        assert!(!table.mark(a.clone()));
        assert_eq!(table.keys().cloned().collect::<Vec<_>>(), vec![b, a]);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Cached(u8),
        Refetch(u8),
        Clear(u8),
    }

    impl Step {
        fn envelope(&self) -> (u8, Envelope) {
            match *self {
                Self::Cached(id) => (id, Envelope::external(cached(vec![json!(id)]))),
                Self::Refetch(id) => (id, Envelope::external(FetchRequest::new("LOAD", vec![json!(id)]))),
                Self::Clear(id) => (id, Envelope::external(CacheClear::new("LOAD", vec![json!(id)]))),
            }
        }
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u8..4).prop_map(Step::Cached),
            (0u8..4).prop_map(Step::Refetch),
            (0u8..4).prop_map(Step::Clear),
        ]
    }

    proptest! {
        #[test]
        fn prop_gate_tracks_satisfied_set(steps in proptest::collection::vec(step(), 0..64)) {
            let mut gate = DedupGate::new();
            let mut satisfied = HashSet::new();
            for step in steps {
                let (id, envelope) = step.envelope();
                for decision in apply_all(&mut gate, envelope) {
                    match decision {
                        GateDecision::Cleared { was_satisfied } => {
                            prop_assert_eq!(was_satisfied, satisfied.remove(&id));
                        }
                        GateDecision::Suppressed => prop_assert!(satisfied.contains(&id)),
                        GateDecision::Admitted(_) => prop_assert!(satisfied.insert(id)),
                    }
                }
                prop_assert_eq!(gate.table().len(), satisfied.len());
            }
        }
    }
}
