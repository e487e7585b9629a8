//! Property tests: yielding never changes what gets committed.
//!
//! 1. Rendering a keyed list in slices of any size commits the same markup
//!    as rendering it in one go.
//! 2. An update that arrives while a render is paused still wins: the final
//!    markup matches a root that only ever saw the last update.
//! 3. The committed tree is structurally valid after every flush.

use fibre_harness::TestRoot;
use fibre_reconciler::{Element, host};
use proptest::prelude::*;

const KEYS: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

fn keyed_list(keys: &[&'static str], version: u32) -> Element {
    host("ul")
        .children(keys.iter().map(|k| {
            host("li")
                .key(*k)
                .attr("v", i64::from(version))
                .child(format!("{k}{version}"))
        }))
        .build()
}

fn list_strategy() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(KEYS.to_vec(), 0..=KEYS.len()).prop_shuffle()
}

/// Flush in slices of `units` until nothing is left.
fn drain_in_slices(t: &mut TestRoot, units: usize) {
    for _ in 0..10_000 {
        if !t.flush_units(units).unwrap() {
            t.flush_all().unwrap();
            return;
        }
    }
    panic!("slices never drained");
}

fn rendered(lists: &[&[&'static str]]) -> String {
    let mut t = TestRoot::new();
    for (version, keys) in lists.iter().enumerate() {
        t.render(keyed_list(keys, version as u32)).unwrap();
        t.flush_all().unwrap();
    }
    t.serialize()
}

proptest! {
    #[test]
    fn sliced_render_matches_one_shot(
        first in list_strategy(),
        second in list_strategy(),
        units in 1usize..6,
    ) {
        let mut t = TestRoot::new();
        t.render(keyed_list(&first, 0)).unwrap();
        drain_in_slices(&mut t, units);
        t.reconciler().validate_tree(t.root_id()).unwrap();
        t.render(keyed_list(&second, 1)).unwrap();
        drain_in_slices(&mut t, units);
        t.reconciler().validate_tree(t.root_id()).unwrap();

        prop_assert_eq!(t.serialize(), rendered(&[first.as_slice(), second.as_slice()]));
    }

    #[test]
    fn update_during_a_paused_render_wins(
        first in list_strategy(),
        second in list_strategy(),
        third in list_strategy(),
        units in 1usize..4,
    ) {
        let mut t = TestRoot::new();
        t.render(keyed_list(&first, 0)).unwrap();
        t.flush_all().unwrap();

        t.render(keyed_list(&second, 1)).unwrap();
        t.flush_units(units).unwrap();
        t.render(keyed_list(&third, 2)).unwrap();
        drain_in_slices(&mut t, units);
        t.reconciler().validate_tree(t.root_id()).unwrap();

        let mut expected = TestRoot::new();
        expected.render(keyed_list(&third, 2)).unwrap();
        expected.flush_all().unwrap();
        prop_assert_eq!(t.serialize(), expected.serialize());
    }
}
