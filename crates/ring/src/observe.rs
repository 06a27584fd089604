//! Events fired around ring operations.
//!
//! Each mutating or lookup operation fires a `*-start` event on entry and a
//! `*-done` event with its outcome on exit. Observers are injected per ring;
//! [`NoopObserver`] is the default. Events are not part of the ring's
//! correctness contract and observers must not call back into the ring.

use serde_json::Value;

use crate::error::RingError;
use crate::ring::NodeLocation;

#[derive(Debug)]
pub enum RingEvent<'a> {
    NewStart,
    NewDone {
        method: &'static str,
        error: Option<&'a RingError>,
    },
    GetNodeStart {
        key: &'a [u8],
    },
    GetNodeDone {
        key: &'a [u8],
        result: Result<&'a NodeLocation, &'a RingError>,
    },
    SerializeStart,
    SerializeDone {
        error: Option<&'a RingError>,
    },
    AddDataStart {
        vnode: u32,
        data: Option<&'a Value>,
    },
    AddDataDone {
        vnode: u32,
        data: Option<&'a Value>,
        error: Option<&'a RingError>,
    },
    RemapVnodeStart {
        new_pnode: &'a str,
        vnode: u32,
    },
    RemapVnodeDone {
        new_pnode: &'a str,
        vnode: u32,
        old_pnode: Option<&'a str>,
        error: Option<&'a RingError>,
    },
    RemovePnodeStart {
        pnode: &'a str,
    },
    RemovePnodeDone {
        pnode: &'a str,
        error: Option<&'a RingError>,
    },
}

impl RingEvent<'_> {
    /// Event name, e.g. `remapvnode-done`.
    pub fn name(&self) -> &'static str {
        match self {
            RingEvent::NewStart => "new-start",
            RingEvent::NewDone { .. } => "new-done",
            RingEvent::GetNodeStart { .. } => "getnode-start",
            RingEvent::GetNodeDone { .. } => "getnode-done",
            RingEvent::SerializeStart => "serialize-start",
            RingEvent::SerializeDone { .. } => "serialize-done",
            RingEvent::AddDataStart { .. } => "adddata-start",
            RingEvent::AddDataDone { .. } => "adddata-done",
            RingEvent::RemapVnodeStart { .. } => "remapvnode-start",
            RingEvent::RemapVnodeDone { .. } => "remapvnode-done",
            RingEvent::RemovePnodeStart { .. } => "removepnode-start",
            RingEvent::RemovePnodeDone { .. } => "removepnode-done",
        }
    }
}

pub trait RingObserver: Send + Sync {
    fn fire(&self, event: &RingEvent<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RingObserver for NoopObserver {
    fn fire(&self, _event: &RingEvent<'_>) {}
}
