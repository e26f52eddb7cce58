// Internal test-only items (the fake shard client, `from_clients`,
// `with_components`) are crate-private, so these scenarios run as unit
// tests inside `src/counter/service.rs` rather than here. This file
// covers the one thing that genuinely needs to be exercised from outside
// the crate: the ring's documented stability property, which is public.

use visit_counter::counter::ring::Ring;

#[test]
fn removing_and_readding_a_shard_restores_routing() {
    let mut ring = Ring::with_shards(100, ["s1", "s2", "s3"]);
    let before = ring.route("visits:page-A").unwrap();

    ring.remove("s2").unwrap();
    let _ = ring.route("visits:page-A").unwrap();

    ring.add("s2".to_string());
    let after = ring.route("visits:page-A").unwrap();

    assert_eq!(before, after);
}

#[test]
fn ring_distributes_within_expected_bounds_for_v_100() {
    let ring = Ring::with_shards(100, ["s1", "s2", "s3", "s4"]);
    let dist = ring.distribution();
    let shard_count = dist.len();

    for count in dist.values() {
        let fraction = *count as f64 / ring.total_entries() as f64;
        assert!(fraction >= 1.0 / (2.0 * shard_count as f64));
        assert!(fraction <= 2.0 / shard_count as f64);
    }
}
