use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;

use super::{Backend, BackendKind, Mutation, RingMeta, VnodeEntry};
use crate::error::{Result, RingError};
use crate::topology::{validate_pnode_name, Topology};
use crate::version::VERSION;

/// Topology held as live structures for the life of the process.
///
/// Ownership is kept in both directions: `owners[v]` names the pnode of
/// vnode `v`, and `pnodes` maps each pnode to its ascending vnode set. A
/// pnode stays in `pnodes` after its last vnode is remapped away, until it
/// is explicitly removed.
pub struct InMemoryBackend {
    meta: RingMeta,
    owners: Vec<Option<Arc<str>>>,
    pnodes: BTreeMap<Arc<str>, BTreeSet<u32>>,
    data: HashMap<u32, Value>,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("vnodes", &self.meta.vnodes)
            .field("pnodes", &self.pnodes.len())
            .field("with_data", &self.data.len())
            .finish()
    }
}

impl InMemoryBackend {
    /// Builds the live structures from a snapshot. The snapshot must satisfy
    /// the coverage invariant.
    pub fn from_topology(topology: Topology) -> Result<Self> {
        topology.validate()?;

        let mut owners = vec![None; topology.vnodes as usize];
        let mut pnodes = BTreeMap::new();
        let mut data = HashMap::new();

        for (pnode, vnodes) in topology.pnode_to_vnode_map {
            let name: Arc<str> = Arc::from(pnode);
            let mut owned = BTreeSet::new();
            for (vnode, value) in vnodes {
                owners[vnode as usize] = Some(Arc::clone(&name));
                owned.insert(vnode);
                if let Some(value) = value.filter(|v| !v.is_null()) {
                    data.insert(vnode, value);
                }
            }
            pnodes.insert(name, owned);
        }

        Ok(Self {
            meta: RingMeta {
                algorithm: topology.algorithm,
                vnodes: topology.vnodes,
                version: VERSION.to_string(),
            },
            owners,
            pnodes,
            data,
        })
    }

    fn check_range(&self, vnode: u32) -> Result<()> {
        if vnode >= self.meta.vnodes {
            return Err(RingError::VnodeOutOfRange {
                vnode: vnode as u64,
                vnodes: self.meta.vnodes,
            });
        }
        Ok(())
    }

    fn intern(&mut self, pnode: &str) -> Arc<str> {
        match self.pnodes.get_key_value(pnode) {
            Some((name, _)) => Arc::clone(name),
            None => {
                let name: Arc<str> = Arc::from(pnode);
                self.pnodes.insert(Arc::clone(&name), BTreeSet::new());
                name
            }
        }
    }

    /// Rejects a mutation that would leave `removed` owning anything.
    fn check_removal(&self, mutation: &Mutation, removed: &str) -> Result<()> {
        let owned = self
            .pnodes
            .get(removed)
            .ok_or_else(|| RingError::UnknownPnode(removed.to_string()))?;

        let mut final_owner: HashMap<u32, &str> = HashMap::new();
        for w in &mutation.writes {
            final_owner.insert(w.vnode, &w.pnode);
        }
        if final_owner.values().any(|p| *p == removed) {
            return Err(RingError::Invariant(format!(
                "mutation assigns vnodes to pnode {} while removing it",
                removed
            )));
        }
        if let Some(orphan) = owned.iter().find(|v| !final_owner.contains_key(*v)) {
            return Err(RingError::Invariant(format!(
                "removing pnode {} would leave vnode {} unowned",
                removed, orphan
            )));
        }
        Ok(())
    }
}

impl Backend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn meta(&self) -> &RingMeta {
        &self.meta
    }

    fn get(&self, vnode: u32) -> Result<VnodeEntry> {
        self.check_range(vnode)?;
        let pnode = self.owners[vnode as usize]
            .as_ref()
            .ok_or_else(|| RingError::Degraded(format!("vnode {} has no owner", vnode)))?;
        Ok(VnodeEntry {
            pnode: pnode.to_string(),
            data: self.data.get(&vnode).cloned(),
        })
    }

    fn delete(&mut self, vnode: u32) -> Result<()> {
        self.check_range(vnode)?;
        if let Some(old) = self.owners[vnode as usize].take() {
            if let Some(owned) = self.pnodes.get_mut(&old) {
                owned.remove(&vnode);
            }
        }
        self.data.remove(&vnode);
        Ok(())
    }

    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        // Validate everything first; nothing below this block can fail.
        for w in &mutation.writes {
            self.check_range(w.vnode)?;
            validate_pnode_name(&w.pnode)?;
        }
        if let Some(removed) = mutation.removed_pnode.as_deref() {
            self.check_removal(&mutation, removed)?;
        }

        for w in mutation.writes {
            let name = self.intern(&w.pnode);
            if let Some(old) = self.owners[w.vnode as usize].replace(Arc::clone(&name)) {
                if let Some(owned) = self.pnodes.get_mut(&old) {
                    owned.remove(&w.vnode);
                }
            }
            if let Some(owned) = self.pnodes.get_mut(&name) {
                owned.insert(w.vnode);
            }
            match w.data.filter(|v| !v.is_null()) {
                Some(value) => {
                    self.data.insert(w.vnode, value);
                }
                None => {
                    self.data.remove(&w.vnode);
                }
            }
        }

        if let Some(removed) = mutation.removed_pnode {
            self.pnodes.remove(removed.as_str());
        }
        self.meta.version = VERSION.to_string();
        Ok(())
    }

    fn list_vnodes(&self, pnode: &str) -> Result<Vec<u32>> {
        self.pnodes
            .get(pnode)
            .map(|owned| owned.iter().copied().collect())
            .ok_or_else(|| RingError::UnknownPnode(pnode.to_string()))
    }

    fn list_pnodes(&self) -> Result<Vec<String>> {
        Ok(self.pnodes.keys().map(|p| p.to_string()).collect())
    }

    fn load_all(&self) -> Result<Topology> {
        let pnode_to_vnode_map = self
            .pnodes
            .iter()
            .map(|(pnode, owned)| {
                let vnodes = owned
                    .iter()
                    .map(|v| (*v, self.data.get(v).cloned()))
                    .collect();
                (pnode.to_string(), vnodes)
            })
            .collect();

        Ok(Topology {
            algorithm: self.meta.algorithm.clone(),
            vnodes: self.meta.vnodes,
            pnode_to_vnode_map,
            version: self.meta.version.clone(),
        })
    }
}
