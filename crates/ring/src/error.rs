//! Error taxonomy for ring operations.

use store::StoreError;
use thiserror::Error;

pub type Result<T, E = RingError> = std::result::Result<T, E>;

/// Coarse classification of a [`RingError`], for callers that branch on the
/// kind of failure rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Format,
    VersionIncompatible,
    NotFound,
    InvariantViolation,
    BackendIo,
    Closed,
}

#[derive(Debug, Error)]
pub enum RingError {
    /// Bad construction parameters: unsupported algorithm, zero vnodes, empty
    /// or duplicate pnode names, an occupied store location.
    #[error("configuration error: {0}")]
    Config(String),

    /// A serialized topology or persisted record is malformed.
    #[error("format error: {0}")]
    Format(String),

    #[error("format error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version {found} is not compatible with current version {supported}")]
    VersionIncompatible { found: String, supported: String },

    #[error("pnode {0} does not exist")]
    UnknownPnode(String),

    #[error("vnode {vnode} is out of range (ring has {vnodes} vnodes)")]
    VnodeOutOfRange { vnode: u64, vnodes: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    /// The operation would break a ring invariant and was rejected before
    /// anything changed.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Persisted state no longer satisfies the coverage invariant.
    #[error("ring is degraded: {0}")]
    Degraded(String),

    #[error("backend {op} failed for {key}: {source}")]
    Backend {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("ring is closed")]
    Closed,
}

impl RingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RingError::Config(_) => ErrorKind::Configuration,
            RingError::Format(_) | RingError::Json(_) => ErrorKind::Format,
            RingError::VersionIncompatible { .. } => ErrorKind::VersionIncompatible,
            RingError::UnknownPnode(_)
            | RingError::VnodeOutOfRange { .. }
            | RingError::NotFound(_) => ErrorKind::NotFound,
            RingError::Invariant(_) => ErrorKind::InvariantViolation,
            RingError::Degraded(_) | RingError::Backend { .. } => ErrorKind::BackendIo,
            RingError::Closed => ErrorKind::Closed,
        }
    }

    /// Wraps a store failure with the operation and key it happened on.
    pub(crate) fn backend(op: &'static str, key: impl Into<String>) -> impl FnOnce(StoreError) -> RingError {
        let key = key.into();
        move |source| RingError::Backend { op, key, source }
    }
}
