use super::helpers::{assert_coverage, memory_ring, names};
use crate::*;
use serde_json::{json, Value};

// --------------------- create ---------------------

#[test]
fn create_assigns_round_robin() {
    let ring = memory_ring("sha256", 4, &["A", "B"]);
    assert_eq!(ring.get_pnodes().unwrap(), vec!["A", "B"]);
    assert_eq!(ring.get_vnodes("A").unwrap(), vec![0, 2]);
    assert_eq!(ring.get_vnodes("B").unwrap(), vec![1, 3]);
    assert_eq!(ring.backend_kind().unwrap(), BackendKind::Memory);
    assert_coverage(&ring);
}

#[test]
fn create_with_uneven_split_stays_balanced() {
    let ring = memory_ring("md5", 10, &["A", "B", "C"]);
    let sizes: Vec<usize> = ["A", "B", "C"]
        .iter()
        .map(|p| ring.get_vnodes(p).unwrap().len())
        .collect();
    assert_eq!(sizes, vec![4, 3, 3]);
    assert_coverage(&ring);
}

#[test]
fn create_rejects_bad_parameters() {
    let cases = [
        CreateOptions::new("crc32", 4, names(&["A"])),
        CreateOptions::new("sha256", 0, names(&["A"])),
        CreateOptions::new("sha256", 4, Vec::new()),
        CreateOptions::new("sha256", 4, names(&["A", "B", "A"])),
        CreateOptions::new("sha256", 4, names(&["A", ""])),
    ];
    for opts in cases {
        let err = Ring::create(opts.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration, "{:?}", opts);
    }
}

#[test]
fn algorithm_aliases_are_accepted() {
    let ring = memory_ring("SHA-1", 4, &["A"]);
    assert_eq!(ring.algorithm().unwrap().algorithm(), HashAlgorithm::Sha1);
}

// --------------------- get_node ---------------------

#[test]
fn get_node_uses_the_top_bits_of_the_digest() {
    // With 16 vnodes each vnode is one value of the digest's first nibble.
    // sha256("abc") = ba78..., md5("abc") = 9001..., sha1("") = da39...
    let sha256 = memory_ring("sha256", 16, &["A"]);
    assert_eq!(sha256.get_node("abc").unwrap().vnode, 0xb);

    let md5 = memory_ring("md5", 16, &["A"]);
    assert_eq!(md5.get_node("abc").unwrap().vnode, 0x9);

    let sha1 = memory_ring("sha1", 16, &["A", "B"]);
    let loc = sha1.get_node("").unwrap();
    assert_eq!(loc.vnode, 0xd);
    assert_eq!(loc.pnode, "B");
    assert_eq!(loc.data, None);
}

#[test]
fn get_node_is_deterministic() {
    let ring = memory_ring("sha256", 1000, &["A", "B", "C"]);
    for i in 0..200 {
        let key = format!("/account/{}/object", i);
        let first = ring.get_node(&key).unwrap();
        let second = ring.get_node(key.as_bytes()).unwrap();
        assert_eq!(first, second);
        assert!(first.vnode < 1000);
        assert_eq!(ring.get_vnode_pnode_and_data(first.vnode).unwrap().pnode, first.pnode);
    }
}

#[test]
fn get_node_returns_vnode_data() {
    let mut ring = memory_ring("sha256", 16, &["A", "B"]);
    ring.add_data(0xb, Some(json!({ "readonly": true }))).unwrap();
    let loc = ring.get_node("abc").unwrap();
    assert_eq!(loc.data, Some(json!({ "readonly": true })));
}

#[test]
fn single_vnode_ring_maps_everything_to_vnode_zero() {
    let ring = memory_ring("sha256", 1, &["only"]);
    for key in ["", "a", "zzz"] {
        assert_eq!(ring.get_node(key).unwrap().vnode, 0);
    }
}

#[test]
fn hashspace_is_fixed_width_hex() {
    let ring = memory_ring("sha256", 16, &["A"]);
    assert_eq!(ring.hashspace(0).unwrap(), "0".repeat(64));
    assert_eq!(ring.hashspace(1).unwrap(), format!("1{}", "0".repeat(63)));
    assert_eq!(ring.hashspace(15).unwrap(), format!("F{}", "0".repeat(63)));
    assert_eq!(ring.hashspace(16).unwrap_err().kind(), ErrorKind::NotFound);
}

// --------------------- add_data ---------------------

#[test]
fn add_data_then_clear_with_empty_string() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);

    ring.add_data(1, Some(Value::from("foo"))).unwrap();
    let entry = ring.get_vnode_pnode_and_data(1).unwrap();
    assert_eq!(entry.pnode, "B");
    assert_eq!(entry.data, Some(Value::from("foo")));

    ring.add_data(1, Some(Value::from(""))).unwrap();
    assert_eq!(ring.get_vnode_pnode_and_data(1).unwrap().data, None);
}

#[test]
fn add_data_clears_on_none_and_null() {
    let mut ring = memory_ring("sha256", 4, &["A"]);
    ring.add_data(2, Some(json!([1, 2]))).unwrap();
    ring.add_data(2, None).unwrap();
    assert_eq!(ring.get_vnode_pnode_and_data(2).unwrap().data, None);

    ring.add_data(2, Some(json!(0))).unwrap();
    assert_eq!(ring.get_vnode_pnode_and_data(2).unwrap().data, Some(json!(0)));
    ring.add_data(2, Some(Value::Null)).unwrap();
    assert_eq!(ring.get_vnode_pnode_and_data(2).unwrap().data, None);
}

#[test]
fn add_data_out_of_range_changes_nothing() {
    let mut ring = memory_ring("sha256", 4, &["A"]);
    let err = ring.add_data(4, Some(Value::from("x"))).unwrap_err();
    assert!(matches!(err, RingError::VnodeOutOfRange { vnode: 4, vnodes: 4 }));
    assert_coverage(&ring);
}

#[test]
fn add_data_to_vnodes_applies_in_order_and_stops_on_failure() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);
    let data = Some(json!("tagged"));
    assert!(ring.add_data_to_vnodes(&[0, 9, 1], data.clone()).is_err());

    let entries = ring.get_vnodes_pnode_and_data(&[0, 1]).unwrap();
    assert_eq!(entries[0].1.data, data);
    assert_eq!(entries[1].1.data, None);
}

// --------------------- remap ---------------------

#[test]
fn remap_then_remove_scenario() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);

    let old = ring.remap_vnode("B", 0).unwrap();
    assert_eq!(old, "A");
    assert_eq!(ring.get_vnodes("A").unwrap(), vec![2]);
    assert_eq!(ring.get_vnodes("B").unwrap(), vec![0, 1, 3]);
    assert_coverage(&ring);

    ring.remove_pnode("A").unwrap();
    assert_eq!(ring.get_pnodes().unwrap(), vec!["B"]);
    assert_eq!(ring.get_vnodes("B").unwrap(), vec![0, 1, 2, 3]);
    assert_coverage(&ring);
}

#[test]
fn remap_to_new_pnode_keeps_data() {
    let mut ring = memory_ring("sha256", 6, &["A", "B"]);
    ring.add_data(3, Some(json!({ "shard": 3 }))).unwrap();

    assert_eq!(ring.remap_vnode("C", 3).unwrap(), "B");
    assert_eq!(ring.get_pnodes().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(ring.get_vnodes("B").unwrap(), vec![1, 5]);
    let entry = ring.get_vnode_pnode_and_data(3).unwrap();
    assert_eq!(entry.pnode, "C");
    assert_eq!(entry.data, Some(json!({ "shard": 3 })));
    assert_coverage(&ring);
}

#[test]
fn remap_onto_current_owner_is_a_no_op() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);
    assert_eq!(ring.remap_vnode("A", 2).unwrap(), "A");
    assert_eq!(ring.get_vnodes("A").unwrap(), vec![0, 2]);
}

#[test]
fn remap_rejects_bad_input() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);
    assert_eq!(ring.remap_vnode("C", 4).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(ring.remap_vnode("", 0).unwrap_err().kind(), ErrorKind::Configuration);
    assert_eq!(ring.get_pnodes().unwrap(), vec!["A", "B"]);
}

#[test]
fn pnode_emptied_by_remaps_stays_listed() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);
    ring.remap_vnodes("B", &[0, 2]).unwrap();
    assert_eq!(ring.get_pnodes().unwrap(), vec!["A", "B"]);
    assert!(ring.get_vnodes("A").unwrap().is_empty());

    ring.remove_pnode("A").unwrap();
    assert_eq!(ring.get_pnodes().unwrap(), vec!["B"]);
}

#[test]
fn remap_vnodes_reports_previous_owners() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);
    let moved = ring.remap_vnodes("C", &[0, 1]).unwrap();
    assert_eq!(moved, vec![(0, "A".to_string()), (1, "B".to_string())]);
    assert_eq!(ring.get_vnodes("C").unwrap(), vec![0, 1]);
}

#[test]
fn remap_vnodes_stops_at_first_failure() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);
    assert!(ring.remap_vnodes("C", &[0, 99, 1]).is_err());
    assert_eq!(ring.get_vnodes("C").unwrap(), vec![0]);
    assert_coverage(&ring);
}

#[test]
fn add_pnode_takes_listed_vnodes() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);
    ring.add_pnode("C", &[1, 2]).unwrap();
    assert_eq!(ring.get_vnodes("C").unwrap(), vec![1, 2]);

    assert_eq!(ring.add_pnode("C", &[3]).unwrap_err().kind(), ErrorKind::Configuration);
    assert_eq!(ring.add_pnode("D", &[]).unwrap_err().kind(), ErrorKind::Configuration);
    assert_eq!(ring.add_pnode("D", &[0, 4]).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(!ring.get_pnodes().unwrap().contains(&"D".to_string()));
}

// --------------------- remove_pnode ---------------------

#[test]
fn remove_pnode_round_robins_over_remaining_in_name_order() {
    let mut ring = memory_ring("sha256", 9, &["C", "A", "B"]);
    // round robin follows the given order: C owns 0, 3, 6
    assert_eq!(ring.get_vnodes("C").unwrap(), vec![0, 3, 6]);
    ring.add_data(3, Some(Value::from("keep me"))).unwrap();

    ring.remove_pnode("C").unwrap();
    assert_eq!(ring.get_pnodes().unwrap(), vec!["A", "B"]);
    assert_eq!(ring.get_vnodes("A").unwrap(), vec![0, 1, 4, 6, 7]);
    assert_eq!(ring.get_vnodes("B").unwrap(), vec![2, 3, 5, 8]);

    let entry = ring.get_vnode_pnode_and_data(3).unwrap();
    assert_eq!(entry.pnode, "B");
    assert_eq!(entry.data, Some(Value::from("keep me")));
    assert_coverage(&ring);
}

#[test]
fn remove_last_pnode_is_rejected() {
    let mut ring = memory_ring("sha256", 4, &["A"]);
    let err = ring.remove_pnode("A").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    assert_eq!(ring.get_pnodes().unwrap(), vec!["A"]);
    assert_eq!(ring.get_vnodes("A").unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn remove_unknown_pnode_is_not_found() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);
    assert!(matches!(ring.remove_pnode("Z"), Err(RingError::UnknownPnode(_))));
    assert!(matches!(ring.get_vnodes("Z"), Err(RingError::UnknownPnode(_))));
}

#[test]
fn coverage_holds_across_mixed_mutations() {
    let mut ring = memory_ring("sha1", 64, &["n1", "n2", "n3", "n4"]);
    ring.remap_vnodes("n5", &[1, 2, 3, 10, 20, 63]).unwrap();
    ring.remove_pnode("n2").unwrap();
    ring.add_data_to_vnodes(&[5, 6], Some(json!("x"))).unwrap();
    ring.remove_pnode("n5").unwrap();
    ring.remap_vnode("n1", 0).unwrap();
    assert_coverage(&ring);
    assert_eq!(ring.get_pnodes().unwrap(), vec!["n1", "n3", "n4"]);
}

// --------------------- close ---------------------

#[test]
fn closed_ring_rejects_every_operation() {
    let mut ring = memory_ring("sha256", 4, &["A", "B"]);
    ring.close().unwrap();
    assert!(ring.is_closed());

    assert!(matches!(ring.get_node("k"), Err(RingError::Closed)));
    assert!(matches!(ring.get_pnodes(), Err(RingError::Closed)));
    assert!(matches!(ring.get_vnodes("A"), Err(RingError::Closed)));
    assert!(matches!(ring.get_vnode_pnode_and_data(0), Err(RingError::Closed)));
    assert!(matches!(ring.add_data(0, None), Err(RingError::Closed)));
    assert!(matches!(ring.remap_vnode("B", 0), Err(RingError::Closed)));
    assert!(matches!(ring.remove_pnode("A"), Err(RingError::Closed)));
    assert!(matches!(ring.serialize(), Err(RingError::Closed)));
    assert_eq!(ring.hashspace(0).unwrap_err().kind(), ErrorKind::Closed);

    // closing again is harmless
    ring.close().unwrap();
}

// --------------------- parse_vnode_list ---------------------

#[test]
fn vnode_lists_skip_non_numbers() {
    assert_eq!(parse_vnode_list("1, 2 3,,x 4"), vec![1, 2, 3, 4]);
    assert_eq!(parse_vnode_list("-1 5\n6"), vec![5, 6]);
    assert!(parse_vnode_list("").is_empty());
}
