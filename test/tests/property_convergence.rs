/// PROPERTY-BASED TESTS: convergence over real wire frames
///
/// A peer's frames delivered in any order must reproduce its state on the
/// receiver: later writes to a key depend on earlier ones, so reordered
/// delivery exercises the causal buffer until the chain reassembles.
use proptest::prelude::*;

use meshmap_shared::Value;
use meshmap_test::{assert_converged, TestPeer};

const KEYS: [&str; 4] = ["doc", "title", "count", "owner"];

fn writes_with_shuffled_order() -> impl Strategy<Value = (Vec<(usize, i64)>, Vec<usize>)> {
    prop::collection::vec((0..KEYS.len(), any::<i64>()), 1..16).prop_flat_map(|writes| {
        let order: Vec<usize> = (0..writes.len()).collect();
        (Just(writes), Just(order).prop_shuffle())
    })
}

proptest! {
    #[test]
    fn prop_shuffled_frame_delivery_converges(
        (writes, order) in writes_with_shuffled_order()
    ) {
        let mut alice = TestPeer::new("ws-prop");
        let mut bob = TestPeer::new("ws-prop");

        for (key, value) in &writes {
            alice.set(KEYS[*key], Value::Int(*value));
        }

        let frames = alice.engine.ops_to_send();
        prop_assert_eq!(frames.len(), writes.len());
        for &index in &order {
            bob.engine.apply_incoming(&frames[index]);
        }

        assert_converged(&alice, &bob);
    }

    /// Dropping a frame must stall exactly the writes that causally depend
    /// on it, never anything else.
    #[test]
    fn prop_lost_frame_stalls_only_its_own_key(
        values in prop::collection::vec(any::<i64>(), 2..8)
    ) {
        let mut alice = TestPeer::new("ws-prop");
        let mut bob = TestPeer::new("ws-prop");

        for value in &values {
            alice.set("chained", Value::Int(*value));
        }
        alice.set("independent", Value::Int(42));

        let frames = alice.engine.ops_to_send();
        // Lose the first write of the chain; deliver everything else.
        for frame in frames.iter().skip(1) {
            bob.engine.apply_incoming(frame);
        }

        prop_assert_eq!(bob.get("chained"), None);
        prop_assert_eq!(bob.get("independent"), Some(&Value::Int(42)));
    }
}
