//! Symmetric difference between observed and desired canonical sets.
//!
//! The diff is deliberately dumb: an element present on both sides with a
//! byte-identical canonical form is unchanged, anything else lands in
//! `to_remove` or `to_add`. No partial-match heuristics, no field-level
//! patches; every statement this feeds is idempotent.

use std::collections::BTreeSet;

/// Outcome of diffing one entity's canonical sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    /// Present on the server but not declared: to be revoked/removed.
    pub to_remove: Vec<String>,
    /// Declared but not present on the server: to be granted/added.
    pub to_add: Vec<String>,
}

impl SetDiff {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Compute `observed - desired` (to remove) and `desired - observed` (to add).
///
/// Output is sorted and deduplicated on both sides.
pub fn diff<S: AsRef<str>>(observed: &[S], desired: &[S]) -> SetDiff {
    let observed: BTreeSet<&str> = observed.iter().map(AsRef::as_ref).collect();
    let desired: BTreeSet<&str> = desired.iter().map(AsRef::as_ref).collect();

    SetDiff {
        to_remove: observed.difference(&desired).map(|s| s.to_string()).collect(),
        to_add: desired.difference(&observed).map(|s| s.to_string()).collect(),
    }
}
