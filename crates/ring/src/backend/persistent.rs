//! Ring topology kept in an on-disk [`Store`], one record per vnode.
//!
//! ```text
//! META                          {"algorithm":..,"vnodes":V,"version":..}
//! PNODES                        ["A","B",..]
//! V/0000000000                  {"pnode":"A","data":..}
//! V/0000000001                  {"pnode":"B"}
//! P/0001/A/0000000000           (empty; per-pnode index)
//! P/0001/B/0000000001
//! ```
//!
//! Vnode numbers are zero-padded so that key order is numeric order. The
//! pnode index embeds the name's byte length ahead of the name, so the
//! prefix of one pnode never matches another pnode whose name merely starts
//! with the same bytes.
//!
//! Every mutation is written as one store batch, however many log frames it
//! spans; a crash leaves either the old assignment or the new one. `META` is
//! written last when a ring is populated, so a location without `META` holds
//! no ring.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use config::StoreConfig;
use store::{Store, WriteBatch};
use tracing::{debug, info, warn};

use super::{Backend, BackendKind, Mutation, RingMeta, VnodeEntry};
use crate::error::{Result, RingError};
use crate::topology::{validate_pnode_name, Topology, VnodeDataMap};
use crate::version::{check_version, VERSION};

const META_KEY: &[u8] = b"META";
const PNODES_KEY: &[u8] = b"PNODES";
const VNODE_PREFIX: &[u8] = b"V/";

/// Vnodes written per batch while populating a new ring.
const POPULATE_CHUNK: usize = 8192;

fn vnode_key(vnode: u32) -> Vec<u8> {
    format!("V/{:010}", vnode).into_bytes()
}

fn index_prefix(pnode: &str) -> Vec<u8> {
    format!("P/{:04x}/{}/", pnode.len(), pnode).into_bytes()
}

fn index_key(pnode: &str, vnode: u32) -> Vec<u8> {
    let mut key = index_prefix(pnode);
    key.extend_from_slice(format!("{:010}", vnode).as_bytes());
    key
}

/// Parses the zero-padded vnode number at the end of a `V/` or `P/` key.
fn vnode_suffix(key: &[u8], prefix_len: usize) -> Result<u32> {
    std::str::from_utf8(&key[prefix_len..])
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| {
            RingError::Format(format!(
                "malformed record key {}",
                String::from_utf8_lossy(key)
            ))
        })
}

pub struct PersistentBackend {
    location: PathBuf,
    store: Store,
    meta: RingMeta,
    pnodes: BTreeSet<String>,
}

impl std::fmt::Debug for PersistentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentBackend")
            .field("location", &self.location)
            .field("vnodes", &self.meta.vnodes)
            .field("pnodes", &self.pnodes.len())
            .field("version", &self.meta.version)
            .finish()
    }
}

impl PersistentBackend {
    /// Writes `topology` into a new store at `location`.
    ///
    /// Fails with a configuration error if `location` already holds a ring.
    /// Records left behind by an earlier, interrupted populate are cleared.
    pub fn create(location: &Path, config: &StoreConfig, topology: &Topology) -> Result<Self> {
        topology.validate()?;
        if location.exists() && !location.is_dir() {
            return Err(RingError::Config(format!(
                "{} exists and is not a directory",
                location.display()
            )));
        }

        let mut store = Store::open(location, config)
            .map_err(RingError::backend("open", location.display().to_string()))?;

        if store.contains(META_KEY) {
            return Err(RingError::Config(format!(
                "{} already holds a ring",
                location.display()
            )));
        }
        if !store.is_empty() {
            warn!(
                location = %location.display(),
                records = store.len(),
                "clearing records of an incomplete ring"
            );
            let mut batch = WriteBatch::new();
            for (key, _) in store.iter() {
                batch.delete(key);
            }
            store
                .write(batch)
                .map_err(RingError::backend("clear", location.display().to_string()))?;
        }

        let mut batch = WriteBatch::new();
        let mut pending = 0usize;
        for (pnode, vnodes) in &topology.pnode_to_vnode_map {
            for (&vnode, data) in vnodes {
                let entry = VnodeEntry {
                    pnode: pnode.clone(),
                    data: data.clone().filter(|v| !v.is_null()),
                };
                batch.put(vnode_key(vnode), serde_json::to_vec(&entry)?);
                batch.put(index_key(pnode, vnode), Vec::new());
                pending += 1;
                if pending == POPULATE_CHUNK {
                    store
                        .write(std::mem::take(&mut batch))
                        .map_err(RingError::backend("populate", format!("V/{:010}", vnode)))?;
                    pending = 0;
                }
            }
        }

        let pnodes: BTreeSet<String> = topology.pnode_to_vnode_map.keys().cloned().collect();
        let meta = RingMeta {
            algorithm: topology.algorithm.clone(),
            vnodes: topology.vnodes,
            version: VERSION.to_string(),
        };
        batch.put(PNODES_KEY, serde_json::to_vec(&pnodes)?);
        batch.put(META_KEY, serde_json::to_vec(&meta)?);
        store
            .write(batch)
            .map_err(RingError::backend("populate", "META"))?;

        info!(
            location = %location.display(),
            vnodes = meta.vnodes,
            pnodes = pnodes.len(),
            "populated persistent ring"
        );

        Ok(Self {
            location: location.to_path_buf(),
            store,
            meta,
            pnodes,
        })
    }

    /// Opens the ring stored at `location`, validating its metadata.
    pub fn open(location: &Path, config: &StoreConfig) -> Result<Self> {
        if !location.is_dir() {
            return Err(RingError::NotFound(format!(
                "no ring at {}",
                location.display()
            )));
        }

        let store = Store::open(location, config)
            .map_err(RingError::backend("open", location.display().to_string()))?;

        let raw_meta = store.get(META_KEY).ok_or_else(|| {
            RingError::NotFound(format!("no ring at {}", location.display()))
        })?;
        let meta: RingMeta = serde_json::from_slice(raw_meta)?;
        if meta.vnodes == 0 {
            return Err(RingError::Format("META has zero vnodes".to_string()));
        }
        check_version(&meta.version)?;

        let raw_pnodes = store
            .get(PNODES_KEY)
            .ok_or_else(|| RingError::Degraded("PNODES record is missing".to_string()))?;
        let pnodes: BTreeSet<String> = serde_json::from_slice(raw_pnodes)?;
        if pnodes.is_empty() {
            return Err(RingError::Degraded("ring has no pnodes".to_string()));
        }

        debug!(
            location = %location.display(),
            vnodes = meta.vnodes,
            pnodes = pnodes.len(),
            version = %meta.version,
            "opened persistent ring"
        );

        Ok(Self {
            location: location.to_path_buf(),
            store,
            meta,
            pnodes,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
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

    fn read_entry(&self, vnode: u32) -> Result<Option<VnodeEntry>> {
        match self.store.get(&vnode_key(vnode)) {
            Some(raw) => Ok(Some(serde_json::from_slice(raw)?)),
            None => Ok(None),
        }
    }
}

impl Backend for PersistentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Persistent
    }

    fn meta(&self) -> &RingMeta {
        &self.meta
    }

    fn get(&self, vnode: u32) -> Result<VnodeEntry> {
        self.check_range(vnode)?;
        self.read_entry(vnode)?
            .ok_or_else(|| RingError::Degraded(format!("vnode {} has no owner", vnode)))
    }

    fn delete(&mut self, vnode: u32) -> Result<()> {
        self.check_range(vnode)?;
        let Some(entry) = self.read_entry(vnode)? else {
            return Ok(());
        };
        let mut batch = WriteBatch::new();
        batch
            .delete(vnode_key(vnode))
            .delete(index_key(&entry.pnode, vnode));
        self.store
            .write(batch)
            .map_err(RingError::backend("delete", format!("V/{:010}", vnode)))
    }

    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        if mutation.writes.is_empty() && mutation.removed_pnode.is_none() {
            return Ok(());
        }

        // Owner of each touched vnode as the batch progresses, so a vnode
        // written twice drops the index key of its first write.
        let mut owner: HashMap<u32, Option<String>> = HashMap::new();
        let mut batch = WriteBatch::new();

        for w in &mutation.writes {
            self.check_range(w.vnode)?;
            validate_pnode_name(&w.pnode)?;

            let previous = match owner.get(&w.vnode) {
                Some(p) => p.clone(),
                None => self.read_entry(w.vnode)?.map(|e| e.pnode),
            };
            if let Some(previous) = previous.as_deref() {
                batch.delete(index_key(previous, w.vnode));
            }

            let entry = VnodeEntry {
                pnode: w.pnode.clone(),
                data: w.data.clone().filter(|v| !v.is_null()),
            };
            batch.put(vnode_key(w.vnode), serde_json::to_vec(&entry)?);
            batch.put(index_key(&w.pnode, w.vnode), Vec::new());
            owner.insert(w.vnode, Some(w.pnode.clone()));
        }

        let mut pnodes = self.pnodes.clone();
        pnodes.extend(mutation.writes.iter().map(|w| w.pnode.clone()));

        if let Some(removed) = mutation.removed_pnode.as_deref() {
            if !self.pnodes.contains(removed) {
                return Err(RingError::UnknownPnode(removed.to_string()));
            }
            if owner.values().any(|p| p.as_deref() == Some(removed)) {
                return Err(RingError::Invariant(format!(
                    "mutation assigns vnodes to pnode {} while removing it",
                    removed
                )));
            }
            for vnode in self.list_vnodes(removed)? {
                if !owner.contains_key(&vnode) {
                    return Err(RingError::Invariant(format!(
                        "removing pnode {} would leave vnode {} unowned",
                        removed, vnode
                    )));
                }
            }
            pnodes.remove(removed);
        }

        if pnodes != self.pnodes {
            batch.put(PNODES_KEY, serde_json::to_vec(&pnodes)?);
        }

        let mut meta = self.meta.clone();
        if meta.version != VERSION {
            meta.version = VERSION.to_string();
            batch.put(META_KEY, serde_json::to_vec(&meta)?);
        }

        let key = match mutation.writes.first() {
            Some(w) => format!("V/{:010}", w.vnode),
            None => "PNODES".to_string(),
        };
        self.store
            .write(batch)
            .map_err(RingError::backend("apply", key))?;

        self.pnodes = pnodes;
        self.meta = meta;
        Ok(())
    }

    fn list_vnodes(&self, pnode: &str) -> Result<Vec<u32>> {
        if !self.pnodes.contains(pnode) {
            return Err(RingError::UnknownPnode(pnode.to_string()));
        }
        let prefix = index_prefix(pnode);
        self.store
            .scan_prefix(&prefix)
            .map(|(key, _)| vnode_suffix(key, prefix.len()))
            .collect()
    }

    fn list_pnodes(&self) -> Result<Vec<String>> {
        Ok(self.pnodes.iter().cloned().collect())
    }

    fn load_all(&self) -> Result<Topology> {
        let mut map: BTreeMap<String, VnodeDataMap> = self
            .pnodes
            .iter()
            .map(|p| (p.clone(), BTreeMap::new()))
            .collect();

        let mut count = 0u64;
        for (key, value) in self.store.scan_prefix(VNODE_PREFIX) {
            let vnode = vnode_suffix(key, VNODE_PREFIX.len())?;
            let entry: VnodeEntry = serde_json::from_slice(value)?;
            map.entry(entry.pnode).or_default().insert(vnode, entry.data);
            count += 1;
        }

        if count != self.meta.vnodes as u64 {
            warn!(
                location = %self.location.display(),
                found = count,
                expected = self.meta.vnodes,
                "persistent ring is missing vnode records"
            );
            return Err(RingError::Degraded(format!(
                "{} of {} vnode records present",
                count, self.meta.vnodes
            )));
        }

        Ok(Topology {
            algorithm: self.meta.algorithm.clone(),
            vnodes: self.meta.vnodes,
            pnode_to_vnode_map: map,
            version: self.meta.version.clone(),
        })
    }

    fn close(&mut self) -> Result<()> {
        self.store
            .sync()
            .map_err(RingError::backend("sync", self.location.display().to_string()))
    }
}
