use super::helpers::memory_ring;
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

fn copy_of(ring: &Ring) -> Ring {
    Ring::deserialize(BackendConfig::Memory, &ring.serialize().unwrap()).unwrap()
}

#[test]
fn diff_with_itself_is_empty() {
    let ring = memory_ring("sha256", 16, &["A", "B", "C"]);
    assert!(diff(&ring, &ring).unwrap().is_empty());
    assert!(diff(&ring, &copy_of(&ring)).unwrap().is_empty());
}

#[test]
fn remap_shows_up_on_both_pnodes() {
    let before = memory_ring("sha256", 4, &["A", "B"]);
    let mut after = copy_of(&before);
    after.remap_vnode("B", 0).unwrap();

    let d = diff(&before, &after).unwrap();
    assert_eq!(d.len(), 2);
    assert_eq!(d["A"].removed, vec![0]);
    assert!(d["A"].added.is_empty());
    assert_eq!(d["B"].added, vec![0]);
    assert!(d["B"].removed.is_empty());
}

#[test]
fn diff_is_antisymmetric() {
    let a = memory_ring("sha256", 32, &["A", "B", "C"]);
    let mut b = copy_of(&a);
    b.remap_vnodes("D", &[1, 2, 9]).unwrap();
    b.remove_pnode("C").unwrap();

    let forward = diff(&a, &b).unwrap();
    let backward = diff(&b, &a).unwrap();
    assert_eq!(
        forward.keys().collect::<Vec<_>>(),
        backward.keys().collect::<Vec<_>>()
    );
    for (pnode, change) in &forward {
        assert_eq!(change.added, backward[pnode].removed, "{}", pnode);
        assert_eq!(change.removed, backward[pnode].added, "{}", pnode);
    }
}

#[test]
fn pnodes_present_in_one_ring_only() {
    let before = memory_ring("sha256", 6, &["A", "B", "C"]);
    let mut after = copy_of(&before);
    after.remove_pnode("A").unwrap();
    after.remap_vnode("E", 5).unwrap();

    let d = diff(&before, &after).unwrap();
    // A owned 0 and 3; B and C each pick one up
    assert_eq!(d["A"].removed, vec![0, 3]);
    assert!(d["A"].added.is_empty());
    assert_eq!(d["B"].added, vec![0]);
    assert_eq!(d["C"].added, vec![3]);
    assert_eq!(d["C"].removed, vec![5]);
    assert_eq!(d["E"].added, vec![5]);
}

#[test]
fn rings_of_different_shape_can_be_compared() {
    let small = memory_ring("md5", 4, &["A", "B"]);
    let large = memory_ring("sha256", 8, &["A", "B"]);
    let d = diff(&small, &large).unwrap();
    assert_eq!(d["A"].added, vec![4, 6]);
    assert_eq!(d["B"].added, vec![5, 7]);
    assert!(d["A"].removed.is_empty());
}

#[test]
fn memory_and_persistent_rings_can_be_compared() -> Result<()> {
    let dir = tempdir()?;
    let mem = memory_ring("sha256", 8, &["A", "B"]);
    let mut disk = Ring::deserialize(BackendConfig::persistent(dir.path().join("ring")), &mem.serialize()?)?;
    assert!(diff(&mem, &disk)?.is_empty());

    disk.remap_vnode("A", 7)?;
    let d = diff(&mem, &disk)?;
    assert_eq!(d["A"].added, vec![7]);
    assert_eq!(d["B"].removed, vec![7]);
    Ok(())
}

#[test]
fn diff_json_omits_empty_sides() {
    let before = memory_ring("sha256", 4, &["A", "B"]);
    let mut after = copy_of(&before);
    after.remap_vnode("C", 1).unwrap();

    let json = serde_json::to_value(diff(&before, &after).unwrap()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "B": { "removed": [1] },
            "C": { "added": [1] }
        })
    );
}

#[test]
fn diff_against_closed_ring_fails() {
    let a = memory_ring("sha256", 4, &["A"]);
    let mut b = memory_ring("sha256", 4, &["A"]);
    b.close().unwrap();
    assert!(matches!(diff(&a, &b), Err(RingError::Closed)));
}
