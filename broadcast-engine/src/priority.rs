//! Delivery priority — orders events *within* a batch, never pre-empts the
//! batch window (§4.4, GLOSSARY).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn orders_low_to_critical() {
        let mut priorities = vec![Priority::Critical, Priority::Low, Priority::High, Priority::Medium];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Low, Priority::Medium, Priority::High, Priority::Critical]
        );
    }

    fn priority_from_ordinal(n: u8) -> Priority {
        match n % 4 {
            0 => Priority::Low,
            1 => Priority::Medium,
            2 => Priority::High,
            _ => Priority::Critical,
        }
    }

    // Invariant 4 (§8): within a batch, events are ordered by priority
    // descending; ties preserve insertion order. `sort_by` is stable, so the
    // same descending comparator the broadcaster uses on a batch's events
    // must both be non-increasing and tie-stable here.
    proptest! {
        #[test]
        fn descending_stable_sort_is_non_increasing_and_tie_stable(ordinals in prop::collection::vec(0u8..4, 0..50)) {
            let mut indexed: Vec<(usize, Priority)> = ordinals.iter().map(|&n| priority_from_ordinal(n)).enumerate().collect();
            let original = indexed.clone();
            indexed.sort_by(|a, b| b.1.cmp(&a.1));

            for window in indexed.windows(2) {
                prop_assert!(window[0].1 >= window[1].1);
            }

            for priority in [Priority::Low, Priority::Medium, Priority::High, Priority::Critical] {
                let expected: Vec<usize> = original.iter().filter(|(_, p)| *p == priority).map(|(i, _)| *i).collect();
                let actual: Vec<usize> = indexed.iter().filter(|(_, p)| *p == priority).map(|(i, _)| *i).collect();
                prop_assert_eq!(expected, actual);
            }
        }
    }
}
