//! Structural difference between two rings.
//!
//! The comparison is purely over pnode names and vnode numbers; the rings
//! may use different algorithms or vnode counts.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::Result;
use crate::ring::Ring;

/// Vnodes a pnode gained and lost going from the first ring to the second.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PnodeDiff {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<u32>,
}

impl PnodeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Per-pnode changes. Pnodes whose vnode sets are identical are absent.
pub type RingDiff = BTreeMap<String, PnodeDiff>;

/// Computes, for every pnode of either ring, the vnodes it gains and loses
/// going from `before` to `after`.
pub fn diff(before: &Ring, after: &Ring) -> Result<RingDiff> {
    let before_pnodes: BTreeSet<String> = before.get_pnodes()?.into_iter().collect();
    let after_pnodes: BTreeSet<String> = after.get_pnodes()?.into_iter().collect();

    let mut result = RingDiff::new();
    for pnode in before_pnodes.union(&after_pnodes) {
        let old = if before_pnodes.contains(pnode) {
            before.get_vnodes(pnode)?
        } else {
            Vec::new()
        };
        let new = if after_pnodes.contains(pnode) {
            after.get_vnodes(pnode)?
        } else {
            Vec::new()
        };

        let change = merge_diff(&old, &new);
        if !change.is_empty() {
            result.insert(pnode.clone(), change);
        }
    }
    Ok(result)
}

/// Single pass over two ascending vnode lists.
pub fn merge_diff(old: &[u32], new: &[u32]) -> PnodeDiff {
    let mut change = PnodeDiff::default();
    let (mut i, mut j) = (0, 0);

    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            i += 1;
            j += 1;
        } else if old[i] < new[j] {
            change.removed.push(old[i]);
            i += 1;
        } else {
            change.added.push(new[j]);
            j += 1;
        }
    }
    change.removed.extend_from_slice(&old[i..]);
    change.added.extend_from_slice(&new[j..]);
    change
}
