//! # Ring - consistent hashing over virtual nodes
//!
//! Maps an unbounded key space onto a fixed number of virtual nodes (vnodes),
//! each owned by one physical node (pnode).
//!
//! ## Architecture
//!
//! ```text
//! caller
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                    RING                       │
//! │                                               │
//! │ get_node(key) → digest → hashspace → vnode    │
//! │                                    |          │
//! │ remap / remove / add_data          v          │
//! │        → one Mutation → Backend               │
//! │                      (memory | on-disk store) │
//! │                                               │
//! │ serialize() → Topology → JSON                 │
//! │ diff(a, b)  → merge walk over sorted vnodes   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                              |
//! |-----------------|------------------------------------------------------|
//! | [`algorithm`]   | Supported digests, persisted algorithm descriptor     |
//! | [`hashspace`]   | Big-integer digest to vnode arithmetic               |
//! | [`topology`]    | Full snapshot, coverage check, round-robin placement |
//! | [`backend`]     | `Backend` trait, in-memory and persistent backends   |
//! | [`ring`]        | `Ring` engine operations and construction            |
//! | [`diff`]        | Per-pnode added/removed vnodes between two rings     |
//! | [`version`]     | Format version and compatibility rule                |
//! | [`observe`]     | Start/done events for injected observers             |
//!
//! ## Invariants
//!
//! After every successful call, each vnode in `[0, V)` is owned by exactly
//! one pnode, the pnode set is non-empty, and `V` and the algorithm are the
//! ones the ring was created with. A failed call leaves the topology as it
//! was.

pub mod algorithm;
pub mod backend;
pub mod diff;
pub mod error;
pub mod hashspace;
pub mod observe;
pub mod ring;
pub mod topology;
pub mod version;

pub use algorithm::{AlgorithmDescriptor, HashAlgorithm};
pub use backend::{Backend, BackendConfig, BackendKind, VnodeEntry};
pub use diff::{diff, PnodeDiff, RingDiff};
pub use error::{ErrorKind, Result, RingError};
pub use observe::{NoopObserver, RingEvent, RingObserver};
pub use ring::{parse_vnode_list, CreateOptions, NodeLocation, Ring, RingBuilder};
pub use topology::Topology;
pub use version::VERSION;

#[cfg(test)]
mod tests;
