//! Black-box integration coverage crossing the container module
//! boundaries: a `ChainedMap` built from many `OpenAddressingMap` shards,
//! exercised only through the public crate API.

use edgeforest::chained_map::{ChainedMap, ChainedSet};
use edgeforest::oamap::{OpenAddressingMap, OpenAddressingSet};
use edgeforest::packed_vector::{IdMultiset, PackedVector};

#[test]
fn chained_map_survives_many_more_keys_than_one_shard_can_hold() {
    // A lone OpenAddressingMap saturates well under 255 entries; this
    // exercises the sharding/grow/rehash path that lets ChainedMap go
    // far beyond that.
    let mut map: ChainedMap<u32, u32> = ChainedMap::new();
    for k in 0..20_000u32 {
        assert!(map.insert(k, k * 7), "insert {k} should not report saturation");
    }
    assert_eq!(map.len(), 20_000);
    for k in (0..20_000u32).step_by(37) {
        assert_eq!(map.find(&k), Some(&(k * 7)));
    }
    assert_eq!(map.find(&20_001), None);
}

#[test]
fn chained_map_erase_and_compact_preserves_surviving_keys() {
    let mut map: ChainedMap<u32, u32> = ChainedMap::new();
    for k in 0..5000u32 {
        map.insert(k, k);
    }
    for k in (0..5000u32).filter(|k| k % 2 == 0) {
        assert!(map.erase(&k));
    }
    map.compact();
    assert_eq!(map.len(), 2500);
    for k in (0..5000u32).filter(|k| k % 2 == 1) {
        assert_eq!(map.find(&k), Some(&k));
    }
    for k in (0..5000u32).filter(|k| k % 2 == 0) {
        assert_eq!(map.find(&k), None);
    }
}

#[test]
fn chained_set_and_open_addressing_set_agree_on_membership() {
    let mut small: OpenAddressingSet<u16> = OpenAddressingSet::new();
    let mut big: ChainedSet<u16> = ChainedSet::new();
    for v in 0..200u16 {
        small.insert(v);
        big.insert(v);
    }
    for v in 0..200u16 {
        assert_eq!(small.contains(&v), big.contains(&v));
    }
    assert!(!small.contains(&9999));
    assert!(!big.contains(&9999));
}

#[test]
fn open_addressing_map_at_returns_default_on_miss_not_a_reference() {
    let mut map: OpenAddressingMap<u32, u32> = OpenAddressingMap::new();
    map.insert(1, 100);
    assert_eq!(map.at(&1), 100);
    assert_eq!(map.at(&2), 0);
}

#[test]
fn id_multiset_set_operations_compose_across_modules() {
    let mut a: IdMultiset<4> = IdMultiset::new(0, 15);
    let mut b: IdMultiset<4> = IdMultiset::new(0, 15);
    for v in [1, 2, 2, 3] {
        a.push(v);
    }
    for v in [2, 3, 3, 4] {
        b.push(v);
    }
    let union = &a | &b;
    assert_eq!(union.count(2), 2);
    assert_eq!(union.count(3), 2);
    assert!(union.contains(4));

    let intersection = &a & &b;
    assert_eq!(intersection.count(2), 1);
    assert_eq!(intersection.count(3), 1);
    assert!(!intersection.contains(1));
    assert!(!intersection.contains(4));
}

#[test]
fn packed_vector_round_trips_values_at_every_supported_width() {
    let mut v: PackedVector<3> = PackedVector::new();
    for i in 0..100u8 {
        v.push(i % 8);
    }
    assert_eq!(v.len(), 100);
    for i in 0..100u8 {
        assert_eq!(v.get(i as usize), i % 8);
    }
}
