use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::observe::{RingEvent, RingObserver};
use crate::*;

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn memory_ring(algorithm: &str, vnodes: u32, pnodes: &[&str]) -> Ring {
    Ring::create(CreateOptions::new(algorithm, vnodes, names(pnodes))).unwrap()
}

/// Asserts that every vnode has exactly one owner.
pub fn assert_coverage(ring: &Ring) {
    let vnodes = ring.vnode_count().unwrap();
    let mut seen = BTreeSet::new();
    for pnode in ring.get_pnodes().unwrap() {
        for vnode in ring.get_vnodes(&pnode).unwrap() {
            assert!(vnode < vnodes, "vnode {} out of range", vnode);
            assert!(seen.insert(vnode), "vnode {} owned twice", vnode);
            assert_eq!(ring.get_vnode_pnode_and_data(vnode).unwrap().pnode, pnode);
        }
    }
    assert_eq!(seen.len(), vnodes as usize);
}

/// Records one line per event fired.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl RingObserver for RecordingObserver {
    fn fire(&self, event: &RingEvent<'_>) {
        let event = match event {
            RingEvent::NewDone { method, error } => {
                format!("new-done {} ok={}", method, error.is_none())
            }
            RingEvent::GetNodeDone { result, .. } => match result {
                Ok(loc) => format!("getnode-done {}:{}", loc.pnode, loc.vnode),
                Err(e) => format!("getnode-done error={:?}", e.kind()),
            },
            RingEvent::AddDataDone { vnode, data, error } => {
                format!("adddata-done {} {:?} ok={}", vnode, data, error.is_none())
            }
            RingEvent::RemapVnodeStart { new_pnode, vnode } => {
                format!("remapvnode-start {} {}", new_pnode, vnode)
            }
            RingEvent::RemapVnodeDone {
                new_pnode,
                vnode,
                old_pnode,
                error,
            } => format!(
                "remapvnode-done {} {} old={:?} ok={}",
                new_pnode,
                vnode,
                old_pnode,
                error.is_none()
            ),
            RingEvent::RemovePnodeDone { pnode, error } => {
                format!("removepnode-done {} ok={}", pnode, error.is_none())
            }
            other => other.name().to_string(),
        };
        self.events.lock().unwrap().push(event);
    }
}
