//! The ring engine: lookups and topology mutations over a [`Backend`].
//!
//! ```text
//!   key --digest--> BigUint --/ interval--> vnode --backend--> pnode (+data)
//! ```
//!
//! A ring is bound to exactly one backend for its lifetime. Every mutation
//! is handed to the backend as a single [`Mutation`], so the coverage
//! invariant holds before and after each call even when a multi-vnode
//! change such as [`Ring::remove_pnode`] fails half way through validation.
//!
//! A ring is meant for one writer at a time; `&mut self` on the mutating
//! methods enforces that within a process.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use config::StoreConfig;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::algorithm::{AlgorithmDescriptor, HashAlgorithm};
use crate::backend::{
    Backend, BackendConfig, BackendKind, InMemoryBackend, Mutation, PersistentBackend, VnodeEntry,
    VnodeWrite,
};
use crate::error::{Result, RingError};
use crate::hashspace;
use crate::observe::{NoopObserver, RingEvent, RingObserver};
use crate::topology::{round_robin, validate_pnode_name, Topology};
use crate::version::{check_version, VERSION};

/// Where a key lives: its vnode, the owning pnode and the vnode's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeLocation {
    pub pnode: String,
    pub vnode: u32,
    pub data: Option<Value>,
}

/// Parameters of a fresh ring.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub algorithm: String,
    pub vnodes: u32,
    pub pnodes: Vec<String>,
    pub backend: BackendConfig,
}

impl CreateOptions {
    /// In-memory ring of `vnodes` vnodes spread over `pnodes`.
    pub fn new(algorithm: impl Into<String>, vnodes: u32, pnodes: Vec<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            vnodes,
            pnodes,
            backend: BackendConfig::Memory,
        }
    }

    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }
}

/// Constructs rings with a non-default observer.
pub struct RingBuilder {
    observer: Arc<dyn RingObserver>,
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self {
            observer: Arc::new(NoopObserver),
        }
    }
}

impl RingBuilder {
    pub fn observer(mut self, observer: Arc<dyn RingObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Builds a ring with vnodes assigned round-robin over `opts.pnodes`.
    pub fn create(self, opts: CreateOptions) -> Result<Ring> {
        self.construct("create", || {
            let algorithm: HashAlgorithm = opts.algorithm.parse()?;
            let vnodes = NonZeroU32::new(opts.vnodes)
                .ok_or_else(|| RingError::Config("vnode count must be positive".to_string()))?;
            let topology = Topology {
                algorithm: AlgorithmDescriptor::new(algorithm, vnodes)?,
                vnodes: vnodes.get(),
                pnode_to_vnode_map: round_robin(&opts.pnodes, vnodes.get())?,
                version: VERSION.to_string(),
            };
            open_backend(&opts.backend, topology)
        })
    }

    /// Builds a ring from its serialized form, populating the chosen backend.
    pub fn deserialize(self, backend: BackendConfig, text: &str) -> Result<Ring> {
        self.construct("deserialize", || {
            let topology = Topology::from_json(text)?;
            check_version(&topology.version)?;
            topology.validate()?;
            open_backend(&backend, topology)
        })
    }

    /// Opens the persistent ring stored at `location`.
    pub fn load(self, location: &Path, config: &StoreConfig) -> Result<Ring> {
        self.construct("load", || {
            let backend = PersistentBackend::open(location, config)?;
            Ok(Box::new(backend) as Box<dyn Backend>)
        })
    }

    fn construct<F>(self, method: &'static str, build: F) -> Result<Ring>
    where
        F: FnOnce() -> Result<Box<dyn Backend>>,
    {
        self.observer.fire(&RingEvent::NewStart);
        let result = build();
        self.observer.fire(&RingEvent::NewDone {
            method,
            error: result.as_ref().err(),
        });

        let backend = result?;
        let meta = backend.meta();
        info!(
            method,
            backend = %backend.kind(),
            algorithm = %meta.algorithm.algorithm(),
            vnodes = meta.vnodes,
            "ring ready"
        );
        Ok(Ring {
            backend: Some(backend),
            observer: self.observer,
        })
    }
}

fn open_backend(config: &BackendConfig, topology: Topology) -> Result<Box<dyn Backend>> {
    Ok(match config {
        BackendConfig::Memory => Box::new(InMemoryBackend::from_topology(topology)?),
        BackendConfig::Persistent { location, store } => {
            Box::new(PersistentBackend::create(location, store, &topology)?)
        }
    })
}

pub struct Ring {
    /// `None` once the ring is closed.
    backend: Option<Box<dyn Backend>>,
    observer: Arc<dyn RingObserver>,
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Ring");
        match &self.backend {
            Some(b) => s
                .field("backend", &b.kind())
                .field("algorithm", &b.meta().algorithm.algorithm())
                .field("vnodes", &b.meta().vnodes),
            None => s.field("closed", &true),
        };
        s.finish()
    }
}

impl Ring {
    pub fn builder() -> RingBuilder {
        RingBuilder::default()
    }

    pub fn create(opts: CreateOptions) -> Result<Self> {
        Self::builder().create(opts)
    }

    pub fn deserialize(backend: BackendConfig, text: &str) -> Result<Self> {
        Self::builder().deserialize(backend, text)
    }

    pub fn load(location: &Path, config: &StoreConfig) -> Result<Self> {
        Self::builder().load(location, config)
    }

    fn backend(&self) -> Result<&dyn Backend> {
        self.backend.as_deref().ok_or(RingError::Closed)
    }

    fn backend_mut(&mut self) -> Result<&mut (dyn Backend + 'static)> {
        self.backend.as_deref_mut().ok_or(RingError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    pub fn backend_kind(&self) -> Result<BackendKind> {
        Ok(self.backend()?.kind())
    }

    pub fn algorithm(&self) -> Result<&AlgorithmDescriptor> {
        Ok(&self.backend()?.meta().algorithm)
    }

    pub fn vnode_count(&self) -> Result<u32> {
        Ok(self.backend()?.meta().vnodes)
    }

    fn check_vnode(&self, vnode: u32) -> Result<()> {
        let vnodes = self.vnode_count()?;
        if vnode >= vnodes {
            return Err(RingError::VnodeOutOfRange {
                vnode: vnode as u64,
                vnodes,
            });
        }
        Ok(())
    }

    /// Maps `key` to its vnode and the vnode's owner.
    pub fn get_node(&self, key: impl AsRef<[u8]>) -> Result<NodeLocation> {
        let key = key.as_ref();
        self.observer.fire(&RingEvent::GetNodeStart { key });
        let result = self.locate(key);
        self.observer.fire(&RingEvent::GetNodeDone {
            key,
            result: result.as_ref(),
        });
        result
    }

    fn locate(&self, key: &[u8]) -> Result<NodeLocation> {
        let backend = self.backend()?;
        let meta = backend.meta();
        let vnodes = NonZeroU32::new(meta.vnodes)
            .ok_or_else(|| RingError::Format("ring has zero vnodes".to_string()))?;

        let hash = meta.algorithm.algorithm().digest(key);
        let raw = hashspace::vnode_for_hash(&hash, meta.algorithm.vnode_hash_interval());
        let vnode = hashspace::clamp_vnode(raw, vnodes);

        let VnodeEntry { pnode, data } = backend.get(vnode)?;
        debug!(vnode, pnode = %pnode, "located key");
        Ok(NodeLocation { pnode, vnode, data })
    }

    /// Every pnode, in lexicographic order.
    pub fn get_pnodes(&self) -> Result<Vec<String>> {
        let pnodes = self.backend()?.list_pnodes()?;
        debug!(count = pnodes.len(), "listed pnodes");
        Ok(pnodes)
    }

    /// Vnodes owned by `pnode`, ascending.
    pub fn get_vnodes(&self, pnode: &str) -> Result<Vec<u32>> {
        let vnodes = self.backend()?.list_vnodes(pnode)?;
        debug!(pnode, count = vnodes.len(), "listed vnodes");
        Ok(vnodes)
    }

    pub fn get_vnode_pnode_and_data(&self, vnode: u32) -> Result<VnodeEntry> {
        self.check_vnode(vnode)?;
        let entry = self.backend()?.get(vnode)?;
        debug!(vnode, pnode = %entry.pnode, has_data = entry.data.is_some(), "read vnode");
        Ok(entry)
    }

    /// Point lookups over several vnodes, in the order given.
    pub fn get_vnodes_pnode_and_data(&self, vnodes: &[u32]) -> Result<Vec<(u32, VnodeEntry)>> {
        vnodes
            .iter()
            .map(|&v| Ok((v, self.get_vnode_pnode_and_data(v)?)))
            .collect()
    }

    /// Fixed-width upper-case hex start of `vnode`'s slice of the hash space.
    pub fn hashspace(&self, vnode: u32) -> Result<String> {
        self.check_vnode(vnode)?;
        let algorithm = self.algorithm()?;
        let start = hashspace::hashspace_start(algorithm.vnode_hash_interval(), vnode);
        let hex = hashspace::format_hashspace(&start, algorithm.max());
        debug!(vnode, start = %hex, "computed hashspace");
        Ok(hex)
    }

    /// Attaches `data` to `vnode`, replacing what was there. `None`, JSON
    /// `null` and the empty string all clear the vnode's data.
    pub fn add_data(&mut self, vnode: u32, data: Option<Value>) -> Result<()> {
        let data = data.filter(|v| !is_empty_data(v));
        self.observer.fire(&RingEvent::AddDataStart {
            vnode,
            data: data.as_ref(),
        });
        let result = self.set_data(vnode, data.clone());
        self.observer.fire(&RingEvent::AddDataDone {
            vnode,
            data: data.as_ref(),
            error: result.as_ref().err(),
        });
        result
    }

    fn set_data(&mut self, vnode: u32, data: Option<Value>) -> Result<()> {
        self.check_vnode(vnode)?;
        let backend = self.backend_mut()?;
        let entry = backend.get(vnode)?;
        debug!(vnode, pnode = %entry.pnode, clear = data.is_none(), "setting vnode data");
        backend.apply(Mutation::write(vnode, entry.pnode, data))
    }

    /// [`Ring::add_data`] over each vnode in turn, stopping at the first
    /// failure. Vnodes before the failing one keep their new data.
    pub fn add_data_to_vnodes(&mut self, vnodes: &[u32], data: Option<Value>) -> Result<()> {
        for &vnode in vnodes {
            self.add_data(vnode, data.clone())?;
        }
        Ok(())
    }

    /// Moves `vnode` to `new_pnode`, keeping its data, and returns the
    /// previous owner. `new_pnode` joins the ring if it is not yet a member.
    /// Remapping a vnode onto its current owner changes nothing.
    pub fn remap_vnode(&mut self, new_pnode: &str, vnode: u32) -> Result<String> {
        self.observer.fire(&RingEvent::RemapVnodeStart { new_pnode, vnode });
        let result = self.move_vnode(new_pnode, vnode);
        self.observer.fire(&RingEvent::RemapVnodeDone {
            new_pnode,
            vnode,
            old_pnode: result.as_deref().ok(),
            error: result.as_ref().err(),
        });
        result
    }

    fn move_vnode(&mut self, new_pnode: &str, vnode: u32) -> Result<String> {
        validate_pnode_name(new_pnode)?;
        self.check_vnode(vnode)?;
        let backend = self.backend_mut()?;
        let VnodeEntry { pnode: old, data } = backend.get(vnode)?;
        if old == new_pnode {
            return Ok(old);
        }
        backend.apply(Mutation::write(vnode, new_pnode, data))?;
        info!(vnode, from = %old, to = new_pnode, "remapped vnode");
        Ok(old)
    }

    /// [`Ring::remap_vnode`] over each vnode in turn, stopping at the first
    /// failure. Returns the previous owner of each vnode moved.
    pub fn remap_vnodes(&mut self, new_pnode: &str, vnodes: &[u32]) -> Result<Vec<(u32, String)>> {
        let mut moved = Vec::with_capacity(vnodes.len());
        for &vnode in vnodes {
            moved.push((vnode, self.remap_vnode(new_pnode, vnode)?));
        }
        Ok(moved)
    }

    /// Introduces `pnode` by moving `vnodes` to it.
    pub fn add_pnode(&mut self, pnode: &str, vnodes: &[u32]) -> Result<()> {
        validate_pnode_name(pnode)?;
        if vnodes.is_empty() {
            return Err(RingError::Config(format!(
                "pnode {} needs at least one vnode",
                pnode
            )));
        }
        if self.get_pnodes()?.iter().any(|p| p == pnode) {
            return Err(RingError::Config(format!("pnode {} already exists", pnode)));
        }
        for &vnode in vnodes {
            self.check_vnode(vnode)?;
        }
        self.remap_vnodes(pnode, vnodes).map(|_| ())
    }

    /// Removes `pnode`, handing its vnodes round-robin to the remaining
    /// pnodes in lexicographic order. Data stays with each vnode. The last
    /// pnode cannot be removed.
    pub fn remove_pnode(&mut self, pnode: &str) -> Result<()> {
        self.observer.fire(&RingEvent::RemovePnodeStart { pnode });
        let result = self.drop_pnode(pnode);
        self.observer.fire(&RingEvent::RemovePnodeDone {
            pnode,
            error: result.as_ref().err(),
        });
        result
    }

    fn drop_pnode(&mut self, pnode: &str) -> Result<()> {
        let backend = self.backend_mut()?;
        let pnodes = backend.list_pnodes()?;
        if !pnodes.iter().any(|p| p == pnode) {
            return Err(RingError::UnknownPnode(pnode.to_string()));
        }
        let remaining: Vec<String> = pnodes.into_iter().filter(|p| p != pnode).collect();
        if remaining.is_empty() {
            return Err(RingError::Invariant(format!(
                "cannot remove {}, the last pnode",
                pnode
            )));
        }

        let orphans = backend.list_vnodes(pnode)?;
        let mut writes = Vec::with_capacity(orphans.len());
        for (i, &vnode) in orphans.iter().enumerate() {
            let VnodeEntry { data, .. } = backend.get(vnode)?;
            writes.push(VnodeWrite {
                vnode,
                pnode: remaining[i % remaining.len()].clone(),
                data,
            });
        }

        backend.apply(Mutation {
            writes,
            removed_pnode: Some(pnode.to_string()),
        })?;
        info!(
            pnode,
            vnodes = orphans.len(),
            remaining = remaining.len(),
            "removed pnode"
        );
        Ok(())
    }

    /// Snapshot of the whole topology, stamped with the running version.
    pub fn topology(&self) -> Result<Topology> {
        let mut topology = self.backend()?.load_all()?;
        topology.version = VERSION.to_string();
        Ok(topology)
    }

    /// The external JSON form of the ring.
    pub fn serialize(&self) -> Result<String> {
        self.observer.fire(&RingEvent::SerializeStart);
        let result = self.topology().and_then(|t| t.to_json());
        match &result {
            Ok(json) => debug!(bytes = json.len(), "serialized ring"),
            Err(e) => debug!(error = %e, "ring serialization failed"),
        }
        self.observer.fire(&RingEvent::SerializeDone {
            error: result.as_ref().err(),
        });
        result
    }

    /// Releases the backend. Every later call fails with
    /// [`RingError::Closed`]; closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.backend.take() {
            Some(mut backend) => {
                backend.close()?;
                info!(backend = %backend.kind(), "ring closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn is_empty_data(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Parses a list of vnode numbers separated by commas and/or whitespace.
/// Tokens that are not non-negative integers are skipped.
pub fn parse_vnode_list(input: &str) -> Vec<u32> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|token| token.parse::<u32>().ok())
        .collect()
}
