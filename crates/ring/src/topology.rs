//! The full snapshot of a ring: algorithm, vnode count, ownership and data.
//!
//! Also the external representation: a `Topology` serializes to
//!
//! ```text
//! {
//!   "algorithm": { "NAME": .., "MAX": .., "VNODE_HASH_INTERVAL": .. },
//!   "vnodes": V,
//!   "pnodeToVnodeMap": { "<pnode>": { "<vnode>": <data or null>, .. }, .. },
//!   "version": "2.1.0"
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::algorithm::AlgorithmDescriptor;
use crate::error::{Result, RingError};

/// Longest accepted pnode name, in bytes.
pub const MAX_PNODE_NAME_LEN: usize = 1024;

/// Vnodes owned by one pnode, with the data attached to each.
pub type VnodeDataMap = BTreeMap<u32, Option<Value>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub algorithm: AlgorithmDescriptor,
    pub vnodes: u32,
    #[serde(rename = "pnodeToVnodeMap")]
    pub pnode_to_vnode_map: BTreeMap<String, VnodeDataMap>,
    pub version: String,
}

impl Topology {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Checks the coverage invariant: every vnode in `[0, vnodes)` is owned
    /// by exactly one pnode, and there is at least one pnode.
    pub fn validate(&self) -> Result<()> {
        if self.vnodes == 0 {
            return Err(RingError::Format("vnodes must be positive".to_string()));
        }
        if self.pnode_to_vnode_map.is_empty() {
            return Err(RingError::Format("pnodeToVnodeMap has no pnodes".to_string()));
        }

        let owned: usize = self.pnode_to_vnode_map.values().map(BTreeMap::len).sum();
        if owned != self.vnodes as usize {
            return Err(RingError::Format(format!(
                "pnodeToVnodeMap assigns {} vnodes but the ring has {}",
                owned, self.vnodes
            )));
        }

        // With the counts equal, no duplicates and nothing out of range means
        // every vnode is covered.
        let mut seen = vec![false; self.vnodes as usize];
        for (pnode, vnodes) in &self.pnode_to_vnode_map {
            validate_pnode_name(pnode).map_err(|e| RingError::Format(e.to_string()))?;
            for &vnode in vnodes.keys() {
                let slot = seen.get_mut(vnode as usize).ok_or_else(|| {
                    RingError::Format(format!(
                        "vnode {} of pnode {} is out of range (vnodes = {})",
                        vnode, pnode, self.vnodes
                    ))
                })?;
                if *slot {
                    return Err(RingError::Format(format!(
                        "vnode {} is owned by more than one pnode",
                        vnode
                    )));
                }
                *slot = true;
            }
        }
        Ok(())
    }

    pub fn pnodes(&self) -> impl Iterator<Item = &str> {
        self.pnode_to_vnode_map.keys().map(String::as_str)
    }

    /// Ascending vnodes of `pnode`, or `None` if the pnode is unknown.
    pub fn vnodes_of(&self, pnode: &str) -> Option<Vec<u32>> {
        self.pnode_to_vnode_map
            .get(pnode)
            .map(|m| m.keys().copied().collect())
    }

    /// Owner and data of `vnode`, found by a linear search over the pnodes.
    pub fn entry(&self, vnode: u32) -> Option<(&str, Option<&Value>)> {
        self.pnode_to_vnode_map.iter().find_map(|(pnode, vnodes)| {
            vnodes
                .get(&vnode)
                .map(|data| (pnode.as_str(), data.as_ref()))
        })
    }
}

/// Assigns vnodes `0..vnodes` to `pnodes` round-robin: vnode `i` goes to
/// `pnodes[i % pnodes.len()]`.
pub fn round_robin(pnodes: &[String], vnodes: u32) -> Result<BTreeMap<String, VnodeDataMap>> {
    if pnodes.is_empty() {
        return Err(RingError::Config("at least one pnode is required".to_string()));
    }

    let mut unique = BTreeSet::new();
    for pnode in pnodes {
        validate_pnode_name(pnode)?;
        if !unique.insert(pnode.as_str()) {
            return Err(RingError::Config(format!("pnode {} is listed twice", pnode)));
        }
    }

    let mut map: BTreeMap<String, VnodeDataMap> =
        pnodes.iter().map(|p| (p.clone(), BTreeMap::new())).collect();
    for vnode in 0..vnodes {
        let pnode = &pnodes[vnode as usize % pnodes.len()];
        if let Some(owned) = map.get_mut(pnode) {
            owned.insert(vnode, None);
        }
    }
    Ok(map)
}

pub fn validate_pnode_name(pnode: &str) -> Result<()> {
    if pnode.is_empty() {
        return Err(RingError::Config("pnode names must not be empty".to_string()));
    }
    if pnode.len() > MAX_PNODE_NAME_LEN {
        return Err(RingError::Config(format!(
            "pnode name is {} bytes (max {})",
            pnode.len(),
            MAX_PNODE_NAME_LEN
        )));
    }
    Ok(())
}
