//! Storage backends for ring topology.
//!
//! Two interchangeable implementations of [`Backend`]:
//!
//! | Backend                | Holds topology in              | Survives restart |
//! |------------------------|--------------------------------|------------------|
//! | [`InMemoryBackend`]    | live ownership structures      | no               |
//! | [`PersistentBackend`]  | one store record per vnode     | yes              |
//!
//! The ring engine only ever changes ownership through [`Backend::apply`],
//! which takes a whole [`Mutation`] and applies it all-or-nothing so the
//! coverage invariant holds between calls.

mod memory;
mod persistent;

use std::fmt;
use std::path::PathBuf;

use config::StoreConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::algorithm::AlgorithmDescriptor;
use crate::error::Result;
use crate::topology::Topology;

pub use memory::InMemoryBackend;
pub use persistent::PersistentBackend;

/// Which backend a ring is bound to, chosen at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Memory,
    Persistent { location: PathBuf, store: StoreConfig },
}

impl BackendConfig {
    pub fn persistent(location: impl Into<PathBuf>) -> Self {
        BackendConfig::Persistent {
            location: location.into(),
            store: StoreConfig::default(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Memory => BackendKind::Memory,
            BackendConfig::Persistent { .. } => BackendKind::Persistent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Persistent,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => f.write_str("memory"),
            BackendKind::Persistent => f.write_str("persistent"),
        }
    }
}

/// Immutable ring parameters plus the version of the stored topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingMeta {
    pub algorithm: AlgorithmDescriptor,
    pub vnodes: u32,
    pub version: String,
}

/// Owner and optional data of one vnode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnodeEntry {
    pub pnode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Assign `vnode` to `pnode` with `data`, replacing its previous owner and data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnodeWrite {
    pub vnode: u32,
    pub pnode: String,
    pub data: Option<Value>,
}

/// A group of ownership changes applied atomically.
///
/// `removed_pnode` is dropped from the pnode set once the writes are
/// applied; the writes must move every one of its vnodes elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mutation {
    pub writes: Vec<VnodeWrite>,
    pub removed_pnode: Option<String>,
}

impl Mutation {
    pub fn write(vnode: u32, pnode: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            writes: vec![VnodeWrite {
                vnode,
                pnode: pnode.into(),
                data,
            }],
            removed_pnode: None,
        }
    }
}

pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn meta(&self) -> &RingMeta;

    /// Owner and data of `vnode`. The caller range-checks `vnode`.
    fn get(&self, vnode: u32) -> Result<VnodeEntry>;

    /// Assigns `vnode` to `pnode`, registering the pnode if it is new.
    fn put(&mut self, vnode: u32, pnode: &str, data: Option<Value>) -> Result<()> {
        self.apply(Mutation::write(vnode, pnode, data))
    }

    /// Drops the record of `vnode`, leaving it unowned until the next `put`.
    fn delete(&mut self, vnode: u32) -> Result<()>;

    fn apply(&mut self, mutation: Mutation) -> Result<()>;

    /// Ascending vnodes owned by `pnode`.
    fn list_vnodes(&self, pnode: &str) -> Result<Vec<u32>>;

    /// Every pnode, in lexicographic order.
    fn list_pnodes(&self) -> Result<Vec<String>>;

    fn load_all(&self) -> Result<Topology>;

    /// Releases backend resources. Called once, when the ring closes.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
