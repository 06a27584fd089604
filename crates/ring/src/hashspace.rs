//! Conversions between digests and vnode indices.
//!
//! The hash space `[0, max]` is cut into `V` intervals of width
//! `floor((max + 1) / V)`. Interval `i` starts at `i * width`; the last
//! interval also absorbs the remainder up to `max`. All arithmetic is
//! arbitrary-precision: a 256-bit digest does not fit any machine integer.

use std::num::NonZeroU32;

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive};

use crate::algorithm::parse_hex;
use crate::error::Result;

/// Width of each vnode's slice of the hash space: `floor((max + 1) / vnodes)`.
pub fn vnode_hash_interval(max: &BigUint, vnodes: NonZeroU32) -> BigUint {
    (max + BigUint::one()) / vnodes.get()
}

/// Inclusive lower bound of `vnode`'s interval.
pub fn hashspace_start(vnode_hash_interval: &BigUint, vnode: u32) -> BigUint {
    vnode_hash_interval * vnode
}

/// Raw vnode index of `hash`: `floor(hash / interval)`.
///
/// The result can be one past the last vnode when `hash` falls in the
/// remainder that does not divide evenly; see [`clamp_vnode`].
///
/// # Panics
///
/// Panics if `vnode_hash_interval` is zero. Descriptors never carry a zero
/// interval.
pub fn vnode_for_hash(hash: &BigUint, vnode_hash_interval: &BigUint) -> u64 {
    (hash / vnode_hash_interval).to_u64().unwrap_or(u64::MAX)
}

/// [`vnode_for_hash`] over a hex-encoded digest.
pub fn vnode_for_hex(hash_hex: &str, vnode_hash_interval: &BigUint) -> Result<u64> {
    let hash = parse_hex("hash", hash_hex)?;
    Ok(vnode_for_hash(&hash, vnode_hash_interval))
}

/// Folds an out-of-range raw index into the last vnode.
pub fn clamp_vnode(raw: u64, vnodes: NonZeroU32) -> u32 {
    let last = vnodes.get() - 1;
    if raw > last as u64 {
        last
    } else {
        raw as u32
    }
}

/// Renders a point of the hash space as upper-case hex, zero-padded to the
/// width of `max`.
pub fn format_hashspace(value: &BigUint, max: &BigUint) -> String {
    let width = max.to_str_radix(16).len();
    let digits = value.to_str_radix(16).to_uppercase();
    format!("{:0>width$}", digits, width = width)
}
